use crate::config::LayoutConfig;
use crate::layout::{GraphLayout, Placement, PlacementError};
use crate::model::{ModelGraph, Rect};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

/// Expanded groups with no expanded group below them, in hierarchy order.
/// Groups under a collapsed ancestor are not part of the frontier.
pub fn deepest_expanded_group_node_ids(graph: &ModelGraph) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack: Vec<&str> = graph.root_node_ids.iter().rev().map(String::as_str).collect();
    while let Some(id) = stack.pop() {
        let Some(node) = graph.node(id) else {
            continue;
        };
        if !node.is_expanded() {
            continue;
        }
        let expanded_children: Vec<&str> = node
            .children_ids()
            .iter()
            .map(String::as_str)
            .filter(|child| graph.node(child).is_some_and(|child| child.is_expanded()))
            .collect();
        if expanded_children.is_empty() {
            out.push(id.to_string());
        } else {
            stack.extend(expanded_children.into_iter().rev());
        }
    }
    out
}

/// Expands and collapses groups of a model graph, re-laying out every scope
/// whose size depends on the change.
pub struct GraphExpander<'a> {
    graph: &'a mut ModelGraph,
    config: &'a LayoutConfig,
    placement: &'a dyn Placement,
}

impl<'a> GraphExpander<'a> {
    pub fn new(
        graph: &'a mut ModelGraph,
        config: &'a LayoutConfig,
        placement: &'a dyn Placement,
    ) -> Self {
        Self {
            graph,
            config,
            placement,
        }
    }

    /// Expands one group, then re-lays out and grows each ancestor up to the
    /// root. No-op if the group is already expanded.
    pub fn expand_group_node(&mut self, group_id: &str) -> Result<(), PlacementError> {
        match self.graph.group(group_id) {
            None => {
                warn!(group_id, "cannot expand a node that is not a group");
                return Ok(());
            }
            Some(group) if group.expanded => return Ok(()),
            Some(_) => {}
        }

        let mut current = Some(group_id.to_string());
        while let Some(current_id) = current {
            let Some(group) = self.graph.group_mut(&current_id) else {
                break;
            };
            group.expanded = true;
            self.layout_and_resize(&current_id)?;
            current = self
                .graph
                .node(&current_id)
                .and_then(|node| node.parent_id.clone());
        }

        self.layout_root()
    }

    /// Collapses one group back to its natural size and re-lays out its
    /// ancestors. Returns the resulting deepest expanded groups.
    pub fn collapse_group_node(&mut self, group_id: &str) -> Result<Vec<String>, PlacementError> {
        let Some(node) = self.graph.node_mut(group_id) else {
            warn!(group_id, "cannot collapse an unknown node");
            return Ok(deepest_expanded_group_node_ids(self.graph));
        };
        let Some(group) = node.as_group_mut() else {
            warn!(group_id, "cannot collapse a node that is not a group");
            return Ok(deepest_expanded_group_node_ids(self.graph));
        };
        group.expanded = false;
        node.width = Some(self.config.group_width);
        node.height = Some(self.config.group_height);
        let mut current = node.parent_id.clone();
        self.graph.edges_by_group_node_ids.remove(group_id);

        while let Some(current_id) = current {
            if !self.graph.is_group(&current_id) {
                break;
            }
            self.layout_and_resize(&current_id)?;
            current = self
                .graph
                .node(&current_id)
                .and_then(|node| node.parent_id.clone());
        }

        self.layout_root()?;
        Ok(deepest_expanded_group_node_ids(self.graph))
    }

    /// Expands the given groups and all their ancestors, deepest level first,
    /// then lays out the root.
    pub fn expand_from_deepest_group_nodes(
        &mut self,
        group_ids: &[String],
    ) -> Result<(), PlacementError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut ordered: Vec<(String, usize)> = Vec::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        for id in group_ids {
            if self.graph.is_group(id) {
                queue.push_back(id.clone());
            } else {
                warn!(group_id = %id, "skipping expansion target that is not a group");
            }
        }
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let Some(node) = self.graph.node(&id) else {
                continue;
            };
            if let Some(parent_id) = &node.parent_id {
                queue.push_back(parent_id.clone());
            }
            ordered.push((id, node.level));
        }
        ordered.sort_by(|a, b| b.1.cmp(&a.1));

        for (id, _) in &ordered {
            if let Some(group) = self.graph.group_mut(id) {
                group.expanded = true;
            }
            self.layout_and_resize(id)?;
        }

        self.layout_root()
    }

    /// Expands every ancestor of `node_id`, outermost first. Returns the
    /// resulting deepest expanded groups.
    pub fn expand_to_reveal_node(&mut self, node_id: &str) -> Result<Vec<String>, PlacementError> {
        if !self.graph.contains(node_id) {
            warn!(node_id, "cannot reveal an unknown node");
        }
        let mut ancestors = self.graph.ancestor_ids(node_id);
        ancestors.reverse();
        for group_id in &ancestors {
            self.expand_group_node(group_id)?;
        }
        Ok(deepest_expanded_group_node_ids(self.graph))
    }

    /// Expands every group without a group child, and with them the whole
    /// hierarchy. Returns those leaf groups.
    pub fn expand_all_groups(&mut self) -> Result<Vec<String>, PlacementError> {
        self.clear_layout_data(None, true);
        let leaf_groups: Vec<String> = self
            .graph
            .group_nodes()
            .filter(|node| {
                !node
                    .children_ids()
                    .iter()
                    .any(|child| self.graph.is_group(child))
            })
            .map(|node| node.id.clone())
            .collect();
        if leaf_groups.is_empty() {
            self.layout_root()?;
        } else {
            self.expand_from_deepest_group_nodes(&leaf_groups)?;
        }
        Ok(leaf_groups)
    }

    pub fn collapse_all_groups(&mut self) -> Result<Vec<String>, PlacementError> {
        self.clear_layout_data(None, true);
        self.layout_root()?;
        Ok(Vec::new())
    }

    /// Re-lays out the whole graph. Without a target frontier the current
    /// expansion state is restored; with `clear_all` every group is collapsed
    /// before the targets are applied. Returns the frontier that was applied.
    pub fn re_layout_graph(
        &mut self,
        targets: Option<&[String]>,
        clear_all: bool,
    ) -> Result<Vec<String>, PlacementError> {
        let frontier = match targets {
            Some(targets) => {
                if clear_all {
                    self.clear_layout_data(None, true);
                }
                targets.to_vec()
            }
            None => {
                self.clear_layout_data(None, false);
                deepest_expanded_group_node_ids(self.graph)
            }
        };

        if frontier.is_empty() {
            self.layout_root()?;
        } else {
            self.expand_from_deepest_group_nodes(&frontier)?;
        }
        debug!(frontier = ?frontier, "re-laid out graph");
        Ok(frontier)
    }

    /// Lays out the children of `group_id` and sizes the group to fit them.
    fn layout_and_resize(&mut self, group_id: &str) -> Result<Rect, PlacementError> {
        let rect = GraphLayout::new(self.graph, self.config, self.placement).layout(Some(group_id))?;
        if let Some(node) = self.graph.node_mut(group_id) {
            node.width = Some(rect.width + self.config.margin_x * 2.0);
            node.height = Some(rect.height + self.config.margin_top + self.config.margin_bottom);
        }
        Ok(rect)
    }

    fn layout_root(&mut self) -> Result<(), PlacementError> {
        GraphLayout::new(self.graph, self.config, self.placement).layout(None)?;
        self.update_offsets();
        Ok(())
    }

    /// Recomputes `global_x/y` top-down from the root nodes.
    fn update_offsets(&mut self) {
        for root_id in self.graph.root_node_ids.clone() {
            let Some(root) = self.graph.node_mut(&root_id) else {
                continue;
            };
            if !root.has_position() {
                continue;
            }
            root.global_x = Some(root.local_offset_x);
            root.global_y = Some(root.local_offset_y);
            if root.is_group() {
                update_node_offset(self.graph, &root_id);
            }
        }
    }

    /// Drops sizes below `root` (the root level for `None`), following only
    /// expanded groups. With `clear_all` the visited groups are collapsed and
    /// their edge caches discarded.
    fn clear_layout_data(&mut self, root: Option<&str>, clear_all: bool) {
        if clear_all && let Some(root_id) = root {
            if let Some(group) = self.graph.group_mut(root_id) {
                group.expanded = false;
            }
            self.graph.edges_by_group_node_ids.remove(root_id);
        }
        for child_id in self.graph.child_ids(root) {
            let Some(child) = self.graph.node_mut(&child_id) else {
                continue;
            };
            child.width = None;
            child.height = None;
            if child.is_expanded() {
                self.clear_layout_data(Some(&child_id), clear_all);
            }
        }
    }
}

/// Sets the global position of every positioned child of `group_id`, then
/// descends into it.
pub fn update_node_offset(graph: &mut ModelGraph, group_id: &str) {
    let Some(group) = graph.node(group_id) else {
        return;
    };
    let origin_x = group.x.unwrap_or(0.0) + group.global_x.unwrap_or(0.0);
    let origin_y = group.y.unwrap_or(0.0) + group.global_y.unwrap_or(0.0);
    for child_id in group.children_ids().to_vec() {
        let Some(child) = graph.node_mut(&child_id) else {
            continue;
        };
        if !child.has_position() {
            continue;
        }
        child.global_x = Some(origin_x + child.local_offset_x);
        child.global_y = Some(origin_y + child.local_offset_y);
        if child.is_group() {
            update_node_offset(graph, &child_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessorConfig;
    use crate::ir::{RawGraph, RawNode};
    use crate::layout::{DagrePlacement, PlacementInput, PlacementOptions, PlacementOutput};
    use crate::processor::GraphProcessor;

    /// Dagre, with one node dropped from the result.
    struct DroppingPlacement(&'static str);

    impl Placement for DroppingPlacement {
        fn place(
            &self,
            input: &PlacementInput,
            options: &PlacementOptions,
        ) -> Result<PlacementOutput, PlacementError> {
            let mut output = DagrePlacement.place(input, options)?;
            output.centers.remove(self.0);
            output
                .edges
                .retain(|edge| edge.from != self.0 && edge.to != self.0);
            Ok(output)
        }
    }

    fn by_group(node: &RawNode) -> String {
        node.definition.group_name.clone().unwrap_or_default()
    }

    fn build(raw: &RawGraph, threshold: usize) -> ModelGraph {
        let config = ProcessorConfig {
            group_node_children_count_threshold: threshold,
            flatten_layers: false,
        };
        GraphProcessor::new(raw, &by_group, &config).process("test")
    }

    fn two_groups() -> ModelGraph {
        let mut raw = RawGraph::new();
        for id in ["a", "b", "c"] {
            raw.ensure_node(id, Some("g"));
        }
        raw.ensure_node("d", Some("h"));
        raw.add_edge("a", "b");
        raw.add_edge("b", "c");
        raw.add_edge("c", "d");
        build(&raw, 400)
    }

    fn sectioned() -> ModelGraph {
        let mut raw = RawGraph::new();
        let ids: Vec<String> = (0..25).map(|i| format!("n{i:02}")).collect();
        for id in &ids {
            raw.ensure_node(id, Some("big"));
        }
        for pair in ids.windows(2) {
            raw.add_edge(&pair[0], &pair[1]);
        }
        build(&raw, 20)
    }

    #[test]
    fn expanding_lays_out_children_left_to_right() {
        let mut graph = two_groups();
        let config = LayoutConfig::default();
        GraphExpander::new(&mut graph, &config, &DagrePlacement)
            .expand_group_node("g___group___")
            .unwrap();

        let x = |id: &str| graph.node(id).unwrap().x.unwrap();
        assert!(x("a") < x("b") && x("b") < x("c"));
        let group = graph.node("g___group___").unwrap();
        assert!(group.is_expanded());
        assert!(group.width.unwrap() > config.group_width);
        assert!(graph.node("c").unwrap().global_x.is_some());
        assert_eq!(graph.edges_by_group_node_ids["g___group___"].len(), 2);
        assert_eq!(
            deepest_expanded_group_node_ids(&graph),
            vec!["g___group___".to_string()]
        );
    }

    #[test]
    fn child_globals_follow_parent_position() {
        let mut graph = two_groups();
        let config = LayoutConfig::default();
        GraphExpander::new(&mut graph, &config, &DagrePlacement)
            .expand_group_node("g___group___")
            .unwrap();
        let group = graph.node("g___group___").unwrap();
        let child = graph.node("a").unwrap();
        assert_eq!(group.global_x, Some(group.local_offset_x));
        assert_eq!(
            child.global_x.unwrap(),
            group.x.unwrap() + group.global_x.unwrap() + child.local_offset_x
        );
    }

    #[test]
    fn unplaced_children_get_no_global_offset() {
        let mut graph = two_groups();
        let config = LayoutConfig::default();
        GraphExpander::new(&mut graph, &config, &DroppingPlacement("b"))
            .expand_group_node("g___group___")
            .unwrap();

        let skipped = graph.node("b").unwrap();
        assert!(skipped.x.is_none());
        assert!(skipped.global_x.is_none());
        assert!(skipped.global_y.is_none());
        for id in ["a", "c"] {
            let node = graph.node(id).unwrap();
            assert!(node.global_x.is_some() && node.global_y.is_some(), "{id}");
        }
    }

    #[test]
    fn collapse_then_expand_restores_size() {
        let config = LayoutConfig::default();
        let mut direct = two_groups();
        GraphExpander::new(&mut direct, &config, &DagrePlacement)
            .re_layout_graph(Some(&["g___group___".to_string()]), true)
            .unwrap();

        let mut graph = two_groups();
        let mut expander = GraphExpander::new(&mut graph, &config, &DagrePlacement);
        expander.expand_group_node("g___group___").unwrap();
        let frontier = expander.collapse_group_node("g___group___").unwrap();
        assert!(frontier.is_empty());
        expander.expand_group_node("g___group___").unwrap();

        let size = |graph: &ModelGraph| {
            let node = graph.node("g___group___").unwrap();
            (node.width, node.height)
        };
        assert_eq!(size(&graph), size(&direct));
    }

    #[test]
    fn collapse_shrinks_and_drops_scope_edges() {
        let mut graph = two_groups();
        let config = LayoutConfig::default();
        let mut expander = GraphExpander::new(&mut graph, &config, &DagrePlacement);
        expander.expand_group_node("g___group___").unwrap();
        expander.collapse_group_node("g___group___").unwrap();
        let group = graph.node("g___group___").unwrap();
        assert!(!group.is_expanded());
        assert_eq!(group.width, Some(config.group_width));
        assert!(!graph.edges_by_group_node_ids.contains_key("g___group___"));
    }

    #[test]
    fn re_layout_is_idempotent() {
        let mut graph = sectioned();
        let config = LayoutConfig::default();
        let targets = vec!["big/section_1_of_2___group___".to_string()];
        GraphExpander::new(&mut graph, &config, &DagrePlacement)
            .re_layout_graph(Some(&targets), true)
            .unwrap();
        let first = serde_json::to_string(&graph).unwrap();
        GraphExpander::new(&mut graph, &config, &DagrePlacement)
            .re_layout_graph(Some(&targets), true)
            .unwrap();
        assert_eq!(serde_json::to_string(&graph).unwrap(), first);
    }

    #[test]
    fn clear_all_drops_previous_expansion() {
        let mut graph = two_groups();
        let config = LayoutConfig::default();
        let mut expander = GraphExpander::new(&mut graph, &config, &DagrePlacement);
        expander.expand_group_node("g___group___").unwrap();
        let applied = expander
            .re_layout_graph(Some(&["h___group___".to_string()]), true)
            .unwrap();
        assert_eq!(applied, vec!["h___group___".to_string()]);
        assert!(!graph.node("g___group___").unwrap().is_expanded());
        assert_eq!(
            deepest_expanded_group_node_ids(&graph),
            vec!["h___group___".to_string()]
        );
    }

    #[test]
    fn re_layout_without_targets_keeps_expansion() {
        let mut graph = two_groups();
        let config = LayoutConfig::default();
        let mut expander = GraphExpander::new(&mut graph, &config, &DagrePlacement);
        expander.expand_group_node("h___group___").unwrap();
        let applied = expander.re_layout_graph(None, false).unwrap();
        assert_eq!(applied, vec!["h___group___".to_string()]);
        assert!(graph.node("d").unwrap().x.is_some());
    }

    #[test]
    fn reveal_expands_the_ancestor_chain() {
        let mut graph = sectioned();
        let config = LayoutConfig::default();
        let frontier = GraphExpander::new(&mut graph, &config, &DagrePlacement)
            .expand_to_reveal_node("n24")
            .unwrap();
        assert_eq!(frontier, vec!["big/section_2_of_2___group___".to_string()]);
        assert!(graph.node("big___group___").unwrap().is_expanded());
        let node = graph.node("n24").unwrap();
        assert!(node.x.is_some() && node.global_x.is_some());
    }

    #[test]
    fn expand_all_then_collapse_all() {
        let mut graph = sectioned();
        let config = LayoutConfig::default();
        let mut expander = GraphExpander::new(&mut graph, &config, &DagrePlacement);
        let leaves = expander.expand_all_groups().unwrap();
        assert_eq!(
            leaves,
            vec![
                "big/section_1_of_2___group___".to_string(),
                "big/section_2_of_2___group___".to_string()
            ]
        );
        assert!(expander.collapse_all_groups().unwrap().is_empty());
        assert!(graph.group_nodes().all(|node| !node.is_expanded()));
        assert!(deepest_expanded_group_node_ids(&graph).is_empty());
    }

    #[test]
    fn unknown_targets_are_ignored() {
        let mut graph = two_groups();
        let config = LayoutConfig::default();
        let mut expander = GraphExpander::new(&mut graph, &config, &DagrePlacement);
        expander.expand_group_node("missing").unwrap();
        expander
            .expand_from_deepest_group_nodes(&["a".to_string()])
            .unwrap();
        assert!(graph.group_nodes().all(|node| !node.is_expanded()));
        assert!(graph.node("g___group___").unwrap().x.is_some());
    }
}
