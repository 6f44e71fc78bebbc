//! Turns a flat [`RawGraph`] into a nested [`ModelGraph`]: namespace groups,
//! edge lists, per-scope layout connectivity and section groups for scopes
//! with too many children.

use crate::config::ProcessorConfig;
use crate::ir::{NamespaceGrouping, RawGraph};
use crate::layout::ScopeGraph;
use crate::model::{
    Edge, ModelGraph, ModelNode, ROOT_SCOPE, find_common_namespace, group_node_id, group_path,
    join_namespace, namespace_level, next_level_namespace_part,
};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

pub struct GraphProcessor<'a> {
    raw: &'a RawGraph,
    grouping: &'a dyn NamespaceGrouping,
    config: &'a ProcessorConfig,
}

impl<'a> GraphProcessor<'a> {
    pub fn new(
        raw: &'a RawGraph,
        grouping: &'a dyn NamespaceGrouping,
        config: &'a ProcessorConfig,
    ) -> Self {
        Self {
            raw,
            grouping,
            config,
        }
    }

    pub fn process(&self, graph_id: &str) -> ModelGraph {
        let mut graph = ModelGraph::new(graph_id);
        self.process_nodes(&mut graph);
        self.process_edge_relationships(&mut graph);
        process_namespace_relationships(&mut graph);
        generate_layout_graph_connections(&mut graph);
        if split_large_group_nodes(&mut graph, self.config.children_threshold()) {
            generate_layout_graph_connections(&mut graph);
        }
        populate_descendants_and_counts(&mut graph);
        debug!(
            graph_id,
            nodes = graph.len(),
            roots = graph.root_node_ids.len(),
            sections = graph.artificial_group_node_ids.len(),
            "processed graph"
        );
        graph
    }

    fn process_nodes(&self, graph: &mut ModelGraph) {
        for raw_node in self.raw.nodes.values() {
            let group_key = if self.config.flatten_layers {
                String::new()
            } else {
                self.grouping.group_key(raw_node).replace('/', "_")
            };

            let mut asset = ModelNode::asset(&raw_node.id, &group_key);
            if let Some(asset_node) = asset.as_asset_mut() {
                asset_node.hide_in_layout = raw_node.hide_in_layout;
            }
            if !graph.add_node(asset) {
                warn!(node_id = %raw_node.id, "duplicate node id, keeping the first");
                continue;
            }

            if raw_node.hide_in_layout || group_key.is_empty() {
                continue;
            }
            let group = ModelNode::group(&group_key, "");
            if !graph.contains(&group.id) {
                graph.add_node(group);
            }
        }
    }

    fn process_edge_relationships(&self, graph: &mut ModelGraph) {
        for raw_node in self.raw.nodes.values() {
            for source in self.raw.upstream_of(&raw_node.id) {
                link_assets(graph, source, &raw_node.id);
            }
            for target in self.raw.downstream_of(&raw_node.id) {
                link_assets(graph, &raw_node.id, target);
            }
        }
    }
}

fn link_assets(graph: &mut ModelGraph, source: &str, target: &str) {
    let both_assets = [source, target]
        .iter()
        .all(|id| graph.node(id).is_some_and(ModelNode::is_asset));
    if !both_assets {
        warn!(source, target, "edge endpoint not found, skipping edge");
        return;
    }
    let edge = Edge {
        source_node_id: source.to_string(),
        target_node_id: target.to_string(),
    };
    if let Some(target_node) = graph.node_mut(target).and_then(ModelNode::as_asset_mut)
        && !target_node
            .incoming_edges
            .iter()
            .any(|existing| existing.source_node_id == source)
    {
        target_node.incoming_edges.push(edge.clone());
    }
    if let Some(source_node) = graph.node_mut(source).and_then(ModelNode::as_asset_mut)
        && !source_node
            .outgoing_edges
            .iter()
            .any(|existing| existing.target_node_id == target)
    {
        source_node.outgoing_edges.push(edge);
    }
}

fn process_namespace_relationships(graph: &mut ModelGraph) {
    let entries: Vec<(String, String, usize)> = graph
        .nodes()
        .filter(|node| !node.is_hidden())
        .map(|node| (node.id.clone(), node.namespace.clone(), node.level))
        .collect();
    for (id, namespace, level) in entries {
        if level == 0 {
            graph.add_root(&id);
            continue;
        }
        let parent_id = group_node_id(&namespace);
        if !graph.attach_child(&parent_id, &id) {
            warn!(node_id = %id, parent_id = %parent_id, "failed to find the namespace parent");
        }
    }
}

/// The node standing for `node_id` one level below `common`: the node itself
/// when it is a direct child of that scope, else the group that encloses it.
fn scope_endpoint(common: &str, node_id: &str, namespace: &str) -> String {
    let part = next_level_namespace_part(common, namespace);
    if part.is_empty() {
        node_id.to_string()
    } else {
        group_node_id(&join_namespace(common, part))
    }
}

/// Rebuilds `layout_graph_edges` from the asset edges, by a breadth-first walk
/// that starts at assets without a visible incoming edge.
pub fn generate_layout_graph_connections(graph: &mut ModelGraph) {
    graph.layout_graph_edges.clear();

    let visible_assets: Vec<&ModelNode> = graph
        .nodes()
        .filter(|node| node.is_asset() && !node.is_hidden())
        .collect();
    let mut seeds: Vec<String> = visible_assets
        .iter()
        .filter(|node| {
            node.as_asset().is_some_and(|asset| {
                asset.incoming_edges.iter().all(|edge| {
                    graph
                        .node(&edge.source_node_id)
                        .is_none_or(ModelNode::is_hidden)
                })
            })
        })
        .map(|node| node.id.clone())
        .collect();
    // Assets on cycles have no source to start from.
    seeds.extend(visible_assets.iter().map(|node| node.id.clone()));

    let mut connections: Vec<(String, String, String)> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    for seed in seeds {
        if seen.contains(&seed) {
            continue;
        }
        queue.push_back(seed);
        while let Some(current_id) = queue.pop_front() {
            let Some(current) = graph.node(&current_id) else {
                continue;
            };
            if current.is_hidden() || !seen.insert(current_id.clone()) {
                continue;
            }
            let Some(asset) = current.as_asset() else {
                continue;
            };
            for edge in &asset.outgoing_edges {
                let Some(target) = graph.node(&edge.target_node_id) else {
                    continue;
                };
                if target.is_hidden() {
                    continue;
                }
                let common = find_common_namespace(&current.namespace, &target.namespace);
                let from = scope_endpoint(&common, &current.id, &current.namespace);
                let to = scope_endpoint(&common, &target.id, &target.namespace);
                if from != to {
                    let scope = if common.is_empty() {
                        ROOT_SCOPE.to_string()
                    } else {
                        group_node_id(&common)
                    };
                    connections.push((scope, from, to));
                }
                queue.push_back(target.id.clone());
            }
        }
    }

    for (scope, from, to) in connections {
        graph
            .layout_graph_edges
            .entry(scope)
            .or_default()
            .insert(&from, &to);
    }
}

struct NodeRename {
    old_id: String,
    new_id: String,
    namespace: String,
    parent_id: String,
}

struct SectionPlan {
    section: ModelNode,
    renames: Vec<NodeRename>,
}

/// Breadth-first over scopes, splits every scope with more than `threshold`
/// children into section groups. Returns whether anything was split.
fn split_large_group_nodes(graph: &mut ModelGraph, threshold: usize) -> bool {
    let mut split_any = false;
    let mut queue: VecDeque<Option<String>> = VecDeque::from([None]);
    while let Some(scope) = queue.pop_front() {
        let mut children = graph.child_ids(scope.as_deref());
        if children.len() > threshold {
            split_any = true;
            let plans = plan_sections(graph, scope.as_deref(), &children, threshold);
            children = apply_sections(graph, scope.as_deref(), plans);
        }
        for child in children {
            if graph.is_group(&child) {
                queue.push_back(Some(child));
            }
        }
    }
    split_any
}

/// Cuts the scope's children into buckets of `threshold`, following a
/// depth-first walk of the scope's connectivity from its sources.
fn bucket_children(scope: &ScopeGraph, threshold: usize) -> Vec<Vec<String>> {
    let mut buckets: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();

    let starts = scope
        .sources()
        .into_iter()
        .chain(scope.node_ids.iter().map(String::as_str));
    for start in starts {
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            current.push(id.to_string());
            if current.len() == threshold {
                buckets.push(std::mem::take(&mut current));
            }
            stack.extend(scope.targets(id).iter().rev().map(String::as_str));
        }
    }
    if !current.is_empty() {
        buckets.push(current);
    }
    buckets
}

fn plan_sections(
    graph: &ModelGraph,
    scope: Option<&str>,
    children: &[String],
    threshold: usize,
) -> Vec<SectionPlan> {
    let scope_graph = ScopeGraph::build(graph, scope.unwrap_or(ROOT_SCOPE), children);
    let buckets = bucket_children(&scope_graph, threshold);
    let section_namespace = scope.map(group_path).unwrap_or("");
    let count = buckets.len();

    let mut plans = Vec::with_capacity(count);
    for (idx, bucket) in buckets.into_iter().enumerate() {
        let name = format!("section_{}_of_{count}", idx + 1);
        let mut section = ModelNode::group(&name, section_namespace);
        section.parent_id = scope.map(str::to_string);

        let mut renames = Vec::new();
        let mut stack: Vec<(String, String)> = bucket
            .iter()
            .rev()
            .map(|id| (id.clone(), section.id.clone()))
            .collect();
        while let Some((id, new_parent_id)) = stack.pop() {
            let Some(node) = graph.node(&id) else {
                continue;
            };
            let namespace = if node.namespace.is_empty() {
                name.clone()
            } else if scope.is_none() {
                join_namespace(&name, &node.namespace)
            } else {
                group_path(&new_parent_id).to_string()
            };
            let new_id = match node.as_group() {
                Some(group) => group_node_id(&join_namespace(&namespace, &group.name)),
                None => node.id.clone(),
            };
            stack.extend(
                node.children_ids()
                    .iter()
                    .rev()
                    .map(|child| (child.clone(), new_id.clone())),
            );
            renames.push(NodeRename {
                old_id: id,
                new_id,
                namespace,
                parent_id: new_parent_id,
            });
        }

        if let Some(group) = section.as_group_mut() {
            group.children_ids = bucket;
            group.section_container = true;
        }
        plans.push(SectionPlan { section, renames });
    }
    plans
}

/// Applies a section plan in one edit: inserts the sections, re-keys renamed
/// groups and rewrites every id reference to them. Returns the section ids.
fn apply_sections(
    graph: &mut ModelGraph,
    scope: Option<&str>,
    plans: Vec<SectionPlan>,
) -> Vec<String> {
    let id_map: HashMap<String, String> = plans
        .iter()
        .flat_map(|plan| plan.renames.iter())
        .filter(|rename| rename.old_id != rename.new_id)
        .map(|rename| (rename.old_id.clone(), rename.new_id.clone()))
        .collect();

    let mut section_ids = Vec::with_capacity(plans.len());
    let mut bucketed: HashSet<String> = HashSet::new();
    for plan in plans {
        let section_id = plan.section.id.clone();
        let members = plan.section.children_ids().to_vec();
        if !graph.add_node(plan.section) {
            warn!(section_id = %section_id, "section id already taken");
            continue;
        }
        bucketed.extend(members);
        for rename in plan.renames {
            if !graph.rekey_node(&rename.old_id, &rename.new_id) {
                warn!(old_id = %rename.old_id, new_id = %rename.new_id, "failed to rename node");
                continue;
            }
            if let Some(node) = graph.node_mut(&rename.new_id) {
                node.level = namespace_level(&rename.namespace);
                node.namespace = rename.namespace;
                node.parent_id = Some(rename.parent_id);
            }
        }
        graph.artificial_group_node_ids.push(section_id.clone());
        section_ids.push(section_id);
    }

    for node in graph.nodes_mut() {
        if let Some(group) = node.as_group_mut() {
            for child_id in &mut group.children_ids {
                if let Some(new_id) = id_map.get(child_id) {
                    *child_id = new_id.clone();
                }
            }
        }
    }

    match scope {
        None => {
            graph.root_node_ids.retain(|id| !bucketed.contains(id));
            graph.root_node_ids.extend(section_ids.iter().cloned());
        }
        Some(scope_id) => {
            if let Some(group) = graph.group_mut(scope_id) {
                group.children_ids = section_ids.clone();
            }
        }
    }

    // Hidden assets sit outside the hierarchy but still name their group's path.
    let path_map: HashMap<&str, &str> = id_map
        .iter()
        .map(|(old_id, new_id)| (group_path(old_id), group_path(new_id)))
        .collect();
    for node in graph.nodes_mut().filter(|node| node.is_hidden()) {
        if let Some(new_path) = path_map.get(node.namespace.as_str()) {
            node.namespace = new_path.to_string();
            node.level = namespace_level(&node.namespace);
        }
    }

    if !id_map.is_empty() {
        graph.layout_graph_edges = std::mem::take(&mut graph.layout_graph_edges)
            .into_iter()
            .map(|(scope_id, connections)| {
                let scope_id = id_map.get(&scope_id).cloned().unwrap_or(scope_id);
                (scope_id, connections.renamed(&id_map))
            })
            .collect();
    }

    debug!(
        scope = scope.unwrap_or(ROOT_SCOPE),
        sections = section_ids.len(),
        renamed = id_map.len(),
        "split oversized scope"
    );
    section_ids
}

fn populate_descendants_and_counts(graph: &mut ModelGraph) {
    let mut collected: Vec<(String, Vec<String>, Vec<String>, Vec<String>)> = Vec::new();
    for group in graph.group_nodes() {
        let mut all = Vec::new();
        let mut assets = Vec::new();
        let mut groups = Vec::new();
        let mut stack: Vec<&str> = group.children_ids().iter().rev().map(String::as_str).collect();
        while let Some(id) = stack.pop() {
            let Some(node) = graph.node(id) else {
                continue;
            };
            if node.is_hidden() {
                continue;
            }
            all.push(node.id.clone());
            if node.is_group() {
                groups.push(node.id.clone());
                stack.extend(node.children_ids().iter().rev().map(String::as_str));
            } else {
                assets.push(node.id.clone());
            }
        }
        collected.push((group.id.clone(), all, assets, groups));
    }

    let mut min_count: Option<usize> = None;
    let mut max_count: Option<usize> = None;
    for (id, all, assets, groups) in collected {
        min_count = Some(min_count.map_or(assets.len(), |min| min.min(assets.len())));
        max_count = Some(max_count.map_or(assets.len(), |max| max.max(assets.len())));
        if let Some(group) = graph.group_mut(&id) {
            group.descendants_node_ids = all;
            group.descendants_asset_node_ids = assets;
            group.descendants_group_node_ids = groups;
        }
    }
    graph.min_descendant_asset_node_count = min_count;
    graph.max_descendant_asset_node_count = max_count;
}
