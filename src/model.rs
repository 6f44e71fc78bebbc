//! The nested model graph: an arena of asset and group nodes, their namespace
//! hierarchy and the layout caches the layout engine and expander maintain.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::{BTreeMap, HashMap};

/// Suffix appended to a namespace path to form a group node id.
pub const GROUP_NODE_ID_SUFFIX: &str = "___group___";

/// Layout scope id of the root level.
pub const ROOT_SCOPE: &str = "";

pub fn group_node_id(path: &str) -> String {
    format!("{path}{GROUP_NODE_ID_SUFFIX}")
}

/// Inverse of [`group_node_id`]; ids without the suffix are returned as-is.
pub fn group_path(group_id: &str) -> &str {
    group_id.strip_suffix(GROUP_NODE_ID_SUFFIX).unwrap_or(group_id)
}

pub fn namespace_segments(namespace: &str) -> impl Iterator<Item = &str> {
    namespace.split('/').filter(|part| !part.is_empty())
}

pub fn namespace_level(namespace: &str) -> usize {
    namespace_segments(namespace).count()
}

pub fn join_namespace(parent: &str, part: &str) -> String {
    if parent.is_empty() {
        part.to_string()
    } else if part.is_empty() {
        parent.to_string()
    } else {
        format!("{parent}/{part}")
    }
}

/// Longest common prefix of two namespaces, compared segment by segment.
pub fn find_common_namespace(a: &str, b: &str) -> String {
    namespace_segments(a)
        .zip(namespace_segments(b))
        .take_while(|(left, right)| left == right)
        .map(|(left, _)| left)
        .collect::<Vec<_>>()
        .join("/")
}

/// First segment of `namespace` below `common`, or `""` when `namespace` is
/// `common` itself.
pub fn next_level_namespace_part<'a>(common: &str, namespace: &'a str) -> &'a str {
    namespace_segments(namespace)
        .nth(namespace_level(common))
        .unwrap_or("")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn contains(&self, point: Point) -> bool {
        const EPSILON: f32 = 1e-3;
        point.x >= self.x - EPSILON
            && point.x <= self.x + self.width + EPSILON
            && point.y >= self.y - EPSILON
            && point.y <= self.y + self.height + EPSILON
    }
}

/// A directed relationship between two asset nodes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub source_node_id: String,
    pub target_node_id: String,
}

/// An edge routed by the layout engine inside one layout scope. Points are in
/// the scope's local frame.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEdge {
    pub id: String,
    pub from_node_id: String,
    pub to_node_id: String,
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetNode {
    pub incoming_edges: Vec<Edge>,
    pub outgoing_edges: Vec<Edge>,
    pub hide_in_layout: bool,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupNode {
    /// Last segment of the group's path (the group key, or `section_k_of_n`).
    pub name: String,
    pub children_ids: Vec<String>,
    pub expanded: bool,
    pub descendants_node_ids: Vec<String>,
    pub descendants_asset_node_ids: Vec<String>,
    pub descendants_group_node_ids: Vec<String>,
    pub section_container: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "nodeType")]
pub enum NodeKind {
    #[serde(rename = "ASSET_NODE")]
    Asset(AssetNode),
    #[serde(rename = "GROUP_NODE")]
    Group(GroupNode),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelNode {
    pub id: String,
    pub namespace: String,
    pub level: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub local_offset_x: f32,
    pub local_offset_y: f32,
    pub global_x: Option<f32>,
    pub global_y: Option<f32>,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl ModelNode {
    pub fn asset(id: &str, namespace: &str) -> Self {
        Self::with_kind(id, namespace, NodeKind::Asset(AssetNode::default()))
    }

    /// A collapsed group named `name` living in `namespace`; its id is derived
    /// from the resulting path.
    pub fn group(name: &str, namespace: &str) -> Self {
        let id = group_node_id(&join_namespace(namespace, name));
        Self::with_kind(
            &id,
            namespace,
            NodeKind::Group(GroupNode {
                name: name.to_string(),
                ..Default::default()
            }),
        )
    }

    fn with_kind(id: &str, namespace: &str, kind: NodeKind) -> Self {
        Self {
            id: id.to_string(),
            namespace: namespace.to_string(),
            level: namespace_level(namespace),
            parent_id: None,
            x: None,
            y: None,
            width: None,
            height: None,
            local_offset_x: 0.0,
            local_offset_y: 0.0,
            global_x: None,
            global_y: None,
            kind,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Group(_))
    }

    pub fn is_asset(&self) -> bool {
        matches!(self.kind, NodeKind::Asset(_))
    }

    pub fn as_group(&self) -> Option<&GroupNode> {
        match &self.kind {
            NodeKind::Group(group) => Some(group),
            NodeKind::Asset(_) => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut GroupNode> {
        match &mut self.kind {
            NodeKind::Group(group) => Some(group),
            NodeKind::Asset(_) => None,
        }
    }

    pub fn as_asset(&self) -> Option<&AssetNode> {
        match &self.kind {
            NodeKind::Asset(asset) => Some(asset),
            NodeKind::Group(_) => None,
        }
    }

    pub fn as_asset_mut(&mut self) -> Option<&mut AssetNode> {
        match &mut self.kind {
            NodeKind::Asset(asset) => Some(asset),
            NodeKind::Group(_) => None,
        }
    }

    /// Hidden assets never take part in hierarchy or layout.
    pub fn is_hidden(&self) -> bool {
        match &self.kind {
            NodeKind::Asset(asset) => asset.hide_in_layout,
            NodeKind::Group(_) => false,
        }
    }

    pub fn is_expanded(&self) -> bool {
        self.as_group().is_some_and(|group| group.expanded)
    }

    pub fn children_ids(&self) -> &[String] {
        match &self.kind {
            NodeKind::Group(group) => &group.children_ids,
            NodeKind::Asset(_) => &[],
        }
    }

    pub fn has_position(&self) -> bool {
        self.x.is_some() && self.y.is_some()
    }

    /// The namespace this node opens for its children. Only meaningful for
    /// groups, whose id is derived from it.
    pub fn path(&self) -> String {
        match &self.kind {
            NodeKind::Group(_) => group_path(&self.id).to_string(),
            NodeKind::Asset(_) => join_namespace(&self.namespace, &self.id),
        }
    }
}

/// Simplified connectivity of one layout scope: `from -> [to]`, both in first
/// insertion order and deduplicated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Connections {
    order: Vec<String>,
    targets: HashMap<String, Vec<String>>,
}

impl Connections {
    pub fn insert(&mut self, from: &str, to: &str) -> bool {
        if !self.targets.contains_key(from) {
            self.order.push(from.to_string());
        }
        let targets = self.targets.entry(from.to_string()).or_default();
        if targets.iter().any(|existing| existing == to) {
            return false;
        }
        targets.push(to.to_string());
        true
    }

    pub fn contains(&self, from: &str, to: &str) -> bool {
        self.targets(from).iter().any(|existing| existing == to)
    }

    pub fn targets(&self, from: &str) -> &[String] {
        self.targets.get(from).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order.iter().flat_map(move |from| {
            self.targets(from)
                .iter()
                .map(move |to| (from.as_str(), to.as_str()))
        })
    }

    pub fn len(&self) -> usize {
        self.targets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrites endpoint ids through `renames`, merging entries that collapse
    /// onto the same pair.
    pub fn renamed(&self, renames: &HashMap<String, String>) -> Self {
        let mut out = Self::default();
        for (from, to) in self.iter() {
            let from = renames.get(from).map(String::as_str).unwrap_or(from);
            let to = renames.get(to).map(String::as_str).unwrap_or(to);
            out.insert(from, to);
        }
        out
    }
}

impl Serialize for Connections {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.order.len()))?;
        for from in &self.order {
            map.serialize_entry(from, self.targets(from))?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelGraph {
    pub id: String,
    nodes: Vec<ModelNode>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    pub root_node_ids: Vec<String>,
    /// On-screen edges per layout scope, for the scope's visible subgraph.
    pub edges_by_group_node_ids: BTreeMap<String, Vec<ModelEdge>>,
    /// Layout input connectivity per layout scope.
    pub layout_graph_edges: BTreeMap<String, Connections>,
    pub artificial_group_node_ids: Vec<String>,
    pub min_descendant_asset_node_count: Option<usize>,
    pub max_descendant_asset_node_count: Option<usize>,
}

impl ModelGraph {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            nodes: Vec::new(),
            index: HashMap::new(),
            root_node_ids: Vec::new(),
            edges_by_group_node_ids: BTreeMap::new(),
            layout_graph_edges: BTreeMap::new(),
            artificial_group_node_ids: Vec::new(),
            min_descendant_asset_node_count: None,
            max_descendant_asset_node_count: None,
        }
    }

    /// Adds a node unless its id is taken. Returns whether it was inserted.
    pub fn add_node(&mut self, node: ModelNode) -> bool {
        if self.index.contains_key(&node.id) {
            return false;
        }
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        true
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&ModelNode> {
        self.index.get(id).map(|&idx| &self.nodes[idx])
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut ModelNode> {
        match self.index.get(id) {
            Some(&idx) => Some(&mut self.nodes[idx]),
            None => None,
        }
    }

    pub fn group(&self, id: &str) -> Option<&GroupNode> {
        self.node(id).and_then(ModelNode::as_group)
    }

    pub fn group_mut(&mut self, id: &str) -> Option<&mut GroupNode> {
        self.node_mut(id).and_then(ModelNode::as_group_mut)
    }

    pub fn is_group(&self, id: &str) -> bool {
        self.group(id).is_some()
    }

    /// Nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &ModelNode> {
        self.nodes.iter()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut ModelNode> {
        self.nodes.iter_mut()
    }

    pub fn group_nodes(&self) -> impl Iterator<Item = &ModelNode> {
        self.nodes.iter().filter(|node| node.is_group())
    }

    /// Direct children of `scope`: the root nodes for `None`, otherwise the
    /// group's children (empty for unknown ids and assets).
    pub fn child_ids(&self, scope: Option<&str>) -> Vec<String> {
        match scope {
            None => self.root_node_ids.clone(),
            Some(id) => self
                .node(id)
                .map(|node| node.children_ids().to_vec())
                .unwrap_or_default(),
        }
    }

    /// Links `child_id` under `parent_id`, setting both directions together.
    pub fn attach_child(&mut self, parent_id: &str, child_id: &str) -> bool {
        if !self.contains(child_id) {
            return false;
        }
        let Some(parent) = self.group_mut(parent_id) else {
            return false;
        };
        if !parent.children_ids.iter().any(|id| id == child_id) {
            parent.children_ids.push(child_id.to_string());
        }
        if let Some(child) = self.node_mut(child_id) {
            child.parent_id = Some(parent_id.to_string());
        }
        true
    }

    pub fn add_root(&mut self, id: &str) {
        if !self.root_node_ids.iter().any(|existing| existing == id) {
            self.root_node_ids.push(id.to_string());
        }
    }

    /// Re-keys a node. Only the arena index is touched; callers rewrite the
    /// references held by other nodes in the same edit.
    pub(crate) fn rekey_node(&mut self, old_id: &str, new_id: &str) -> bool {
        if old_id == new_id {
            return self.contains(old_id);
        }
        if self.contains(new_id) {
            return false;
        }
        let Some(idx) = self.index.remove(old_id) else {
            return false;
        };
        self.nodes[idx].id = new_id.to_string();
        self.index.insert(new_id.to_string(), idx);
        true
    }

    /// Ancestor group ids of `id`, nearest first.
    pub fn ancestor_ids(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut cur = self.node(id).and_then(|node| node.parent_id.clone());
        while let Some(parent_id) = cur {
            let Some(parent) = self.node(&parent_id) else {
                break;
            };
            cur = parent.parent_id.clone();
            out.push(parent_id);
        }
        out
    }

    /// Checks the hierarchy invariants. Returns a description of every
    /// violation found.
    pub fn check_hierarchy(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for node in &self.nodes {
            if node.level != namespace_level(&node.namespace) {
                problems.push(format!(
                    "node \"{}\" has level {} but namespace \"{}\"",
                    node.id, node.level, node.namespace
                ));
            }
            match &node.parent_id {
                Some(parent_id) => {
                    let listed = self
                        .group(parent_id)
                        .is_some_and(|parent| parent.children_ids.contains(&node.id));
                    if !listed {
                        problems.push(format!(
                            "node \"{}\" is not listed by its parent \"{parent_id}\"",
                            node.id
                        ));
                    }
                }
                None if node.level > 0 && !node.is_hidden() => {
                    problems.push(format!("node \"{}\" has no parent", node.id));
                }
                None => {}
            }
            for child_id in node.children_ids() {
                let back = self
                    .node(child_id)
                    .and_then(|child| child.parent_id.as_deref());
                if back != Some(node.id.as_str()) {
                    problems.push(format!(
                        "child \"{child_id}\" of \"{}\" does not point back",
                        node.id
                    ));
                }
            }
            if let Some(asset) = node.as_asset() {
                for edge in &asset.outgoing_edges {
                    let mirrored = self
                        .node(&edge.target_node_id)
                        .and_then(ModelNode::as_asset)
                        .is_some_and(|target| target.incoming_edges.contains(edge));
                    if !mirrored {
                        problems.push(format!(
                            "edge {} -> {} has no incoming mirror",
                            edge.source_node_id, edge.target_node_id
                        ));
                    }
                }
            }
        }
        for root_id in &self.root_node_ids {
            if self.node(root_id).is_none_or(|node| node.parent_id.is_some()) {
                problems.push(format!("root \"{root_id}\" is missing or parented"));
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_namespace_is_segment_wise() {
        assert_eq!(find_common_namespace("a/b/c", "a/b/d"), "a/b");
        assert_eq!(find_common_namespace("ab", "abc"), "");
        assert_eq!(find_common_namespace("", "a"), "");
        assert_eq!(find_common_namespace("g", "g"), "g");
    }

    #[test]
    fn next_level_part_below_common() {
        assert_eq!(next_level_namespace_part("a", "a/b/c"), "b");
        assert_eq!(next_level_namespace_part("a/b", "a/b"), "");
        assert_eq!(next_level_namespace_part("", "g1"), "g1");
    }

    #[test]
    fn group_ids_round_trip_through_paths() {
        let group = ModelNode::group("inner", "outer");
        assert_eq!(group.id, "outer/inner___group___");
        assert_eq!(group.level, 1);
        assert_eq!(group.path(), "outer/inner");
        assert_eq!(group_path("plain"), "plain");
    }

    #[test]
    fn connections_keep_insertion_order_and_dedupe() {
        let mut connections = Connections::default();
        assert!(connections.insert("b", "c"));
        assert!(connections.insert("a", "b"));
        assert!(!connections.insert("b", "c"));
        assert!(connections.insert("b", "a"));
        let pairs: Vec<_> = connections.iter().collect();
        assert_eq!(pairs, vec![("b", "c"), ("b", "a"), ("a", "b")]);
        assert_eq!(connections.len(), 3);
        let json = serde_json::to_string(&connections).unwrap();
        assert_eq!(json, r#"{"b":["c","a"],"a":["b"]}"#);
    }

    #[test]
    fn attach_child_links_both_ways() {
        let mut graph = ModelGraph::new("g");
        graph.add_node(ModelNode::group("g", ""));
        graph.add_node(ModelNode::asset("a", "g"));
        assert!(graph.attach_child("g___group___", "a"));
        graph.add_root("g___group___");
        assert_eq!(graph.node("a").unwrap().parent_id.as_deref(), Some("g___group___"));
        assert_eq!(graph.child_ids(Some("g___group___")), vec!["a".to_string()]);
        assert!(graph.check_hierarchy().is_empty());
        assert!(!graph.attach_child("a", "g___group___"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut graph = ModelGraph::new("g");
        assert!(graph.add_node(ModelNode::asset("a", "")));
        assert!(!graph.add_node(ModelNode::asset("a", "other")));
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.node("a").unwrap().namespace, "");
    }

    #[test]
    fn rekey_moves_index_entry() {
        let mut graph = ModelGraph::new("g");
        graph.add_node(ModelNode::group("g", ""));
        assert!(graph.rekey_node("g___group___", "s/g___group___"));
        assert!(graph.node("g___group___").is_none());
        assert_eq!(graph.node("s/g___group___").unwrap().id, "s/g___group___");
    }

    #[test]
    fn node_serializes_with_type_tag() {
        let node = ModelNode::asset("a", "g");
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["nodeType"], "ASSET_NODE");
        assert_eq!(value["namespace"], "g");
        assert_eq!(value["level"], 1);
    }
}
