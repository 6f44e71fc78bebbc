use crate::config::{Direction, LayoutConfig};
use crate::model::{ModelEdge, ModelGraph, Point, ROOT_SCOPE, Rect};
use dagre_rust::{
    GraphConfig as DagreConfig, GraphEdge as DagreEdge, GraphNode as DagreNode,
    layout as dagre_layout,
};
use graphlib_rust::{Graph as DagreGraph, GraphOption};
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    #[error("layered placement failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementOptions {
    pub direction: Direction,
    pub node_separation: f32,
    pub rank_separation: f32,
    pub edge_separation: f32,
    pub margin_x: f32,
    pub margin_y: f32,
}

impl PlacementOptions {
    pub fn from_config(config: &LayoutConfig) -> Self {
        Self {
            direction: config.direction,
            node_separation: config.node_separation,
            rank_separation: config.rank_separation,
            edge_separation: config.edge_separation,
            margin_x: config.margin_x,
            margin_y: config.margin_top,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacementNode {
    pub id: String,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacementInput {
    pub nodes: Vec<PlacementNode>,
    pub edges: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedEdge {
    pub from: String,
    pub to: String,
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacementOutput {
    /// Center of every placed node.
    pub centers: HashMap<String, Point>,
    pub edges: Vec<PlacedEdge>,
}

/// A layered DAG placement primitive: sized nodes and directed edges in,
/// node centers and edge polylines out. Must accept empty and disconnected
/// graphs.
pub trait Placement {
    fn place(
        &self,
        input: &PlacementInput,
        options: &PlacementOptions,
    ) -> Result<PlacementOutput, PlacementError>;
}

/// [`Placement`] backed by dagre.
#[derive(Debug, Clone, Copy, Default)]
pub struct DagrePlacement;

impl Placement for DagrePlacement {
    fn place(
        &self,
        input: &PlacementInput,
        options: &PlacementOptions,
    ) -> Result<PlacementOutput, PlacementError> {
        if input.nodes.is_empty() {
            return Ok(PlacementOutput::default());
        }
        check_placement_input(input, options)?;

        let mut dagre_graph: DagreGraph<DagreConfig, DagreNode, DagreEdge> =
            DagreGraph::new(Some(GraphOption {
                directed: Some(true),
                multigraph: Some(false),
                compound: Some(false),
            }));

        let mut graph_config = DagreConfig::default();
        graph_config.rankdir = Some(options.direction.rankdir().to_string());
        graph_config.nodesep = Some(options.node_separation);
        graph_config.ranksep = Some(options.rank_separation);
        graph_config.edgesep = Some(options.edge_separation);
        graph_config.marginx = Some(options.margin_x);
        graph_config.marginy = Some(options.margin_y);
        dagre_graph.set_graph(graph_config);

        for node in &input.nodes {
            let mut dagre_node = DagreNode::default();
            dagre_node.width = node.width;
            dagre_node.height = node.height;
            dagre_graph.set_node(node.id.clone(), Some(dagre_node));
        }

        let node_set: HashSet<&str> = input.nodes.iter().map(|node| node.id.as_str()).collect();
        let mut edge_set: HashSet<(&str, &str)> = HashSet::new();
        for (from, to) in &input.edges {
            if !node_set.contains(from.as_str()) || !node_set.contains(to.as_str()) {
                continue;
            }
            if !edge_set.insert((from.as_str(), to.as_str())) {
                continue;
            }
            dagre_graph
                .set_edge(from, to, Some(DagreEdge::default()), None)
                .map_err(|err| PlacementError::Failed(err.to_string()))?;
        }

        panic::catch_unwind(AssertUnwindSafe(|| {
            dagre_layout::run_layout(&mut dagre_graph)
        }))
        .map_err(|payload| PlacementError::Failed(panic_message(payload.as_ref())))?;

        let mut output = PlacementOutput::default();
        for node in &input.nodes {
            let Some(dagre_node) = dagre_graph.node(&node.id) else {
                continue;
            };
            output.centers.insert(
                node.id.clone(),
                Point {
                    x: dagre_node.x,
                    y: dagre_node.y,
                },
            );
        }
        for edge in dagre_graph.edges() {
            let points = dagre_graph
                .edge(&edge.v, &edge.w, edge.name.clone())
                .and_then(|label| label.points.as_ref())
                .map(|points| {
                    points
                        .iter()
                        .map(|point| Point {
                            x: point.x,
                            y: point.y,
                        })
                        .collect()
                })
                .unwrap_or_default();
            output.edges.push(PlacedEdge {
                from: edge.v,
                to: edge.w,
                points,
            });
        }
        Ok(output)
    }
}

/// Rejects sizes and spacings dagre cannot rank. Panics abort on wasm32, so
/// `catch_unwind` alone does not cover the worker.
fn check_placement_input(
    input: &PlacementInput,
    options: &PlacementOptions,
) -> Result<(), PlacementError> {
    let valid = |value: f32| value.is_finite() && value >= 0.0;
    let spacings = [
        ("nodeSeparation", options.node_separation),
        ("rankSeparation", options.rank_separation),
        ("edgeSeparation", options.edge_separation),
        ("marginX", options.margin_x),
        ("marginY", options.margin_y),
    ];
    for (name, value) in spacings {
        if !valid(value) {
            return Err(PlacementError::Failed(format!("invalid {name} {value}")));
        }
    }
    for node in &input.nodes {
        if !valid(node.width) || !valid(node.height) {
            return Err(PlacementError::Failed(format!(
                "invalid size {}x{} for node \"{}\"",
                node.width, node.height, node.id
            )));
        }
    }
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "dagre panicked".to_string()
    }
}

/// The layout input of one scope: its visible direct children and the
/// scope's precomputed connectivity restricted to them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeGraph {
    pub node_ids: Vec<String>,
    pub edges: Vec<(String, String)>,
    pub outgoing: HashMap<String, Vec<String>>,
    pub incoming: HashMap<String, Vec<String>>,
}

impl ScopeGraph {
    pub fn build(graph: &ModelGraph, scope_id: &str, child_ids: &[String]) -> Self {
        let mut scope = ScopeGraph::default();
        for id in child_ids {
            match graph.node(id) {
                Some(node) if node.is_hidden() => {}
                Some(_) => scope.node_ids.push(id.clone()),
                None => warn!(node_id = %id, scope = scope_id, "child missing from model graph"),
            }
        }

        let Some(connections) = graph.layout_graph_edges.get(scope_id) else {
            return scope;
        };
        let members: HashSet<&str> = scope.node_ids.iter().map(String::as_str).collect();
        for (from, to) in connections.iter() {
            if !members.contains(from) || !members.contains(to) {
                for endpoint in [from, to] {
                    if !graph.contains(endpoint) {
                        warn!(node_id = endpoint, scope = scope_id, "edge endpoint missing from model graph");
                    }
                }
                continue;
            }
            scope.edges.push((from.to_string(), to.to_string()));
            scope
                .outgoing
                .entry(from.to_string())
                .or_default()
                .push(to.to_string());
            scope
                .incoming
                .entry(to.to_string())
                .or_default()
                .push(from.to_string());
        }
        scope
    }

    pub fn targets(&self, id: &str) -> &[String] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes without an incoming edge inside the scope, in node order.
    pub fn sources(&self) -> Vec<&str> {
        self.node_ids
            .iter()
            .filter(|id| !self.incoming.contains_key(id.as_str()))
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    min_x: f32,
    min_y: f32,
    max_x: f32,
    max_y: f32,
}

impl Bounds {
    fn empty() -> Self {
        Self {
            min_x: f32::MAX,
            min_y: f32::MAX,
            max_x: f32::MIN,
            max_y: f32::MIN,
        }
    }

    fn is_empty(&self) -> bool {
        self.min_x > self.max_x
    }

    fn include_point(&mut self, x: f32, y: f32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    fn include_box(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.include_point(x, y);
        self.include_point(x + width, y + height);
    }

    fn to_rect(self) -> Rect {
        if self.is_empty() {
            return Rect::default();
        }
        Rect {
            x: self.min_x,
            y: self.min_y,
            width: self.max_x - self.min_x,
            height: self.max_y - self.min_y,
        }
    }
}

/// Lays out the direct children of one group (or the root level) and caches
/// the routed edges of that scope.
pub struct GraphLayout<'a> {
    graph: &'a mut ModelGraph,
    config: &'a LayoutConfig,
    placement: &'a dyn Placement,
}

impl<'a> GraphLayout<'a> {
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

    /// Positions the children of `root_group_id` (root nodes when `None`) and
    /// returns their bounding rectangle, net of the horizontal margin.
    pub fn layout(&mut self, root_group_id: Option<&str>) -> Result<Rect, PlacementError> {
        if let Some(group_id) = root_group_id
            && !self.graph.is_group(group_id)
        {
            warn!(group_id, "layout requested for a node that is not a group");
            return Ok(Rect::default());
        }
        let scope_id = root_group_id.unwrap_or(ROOT_SCOPE).to_string();
        let child_ids = self.graph.child_ids(root_group_id);
        let scope = ScopeGraph::build(self.graph, &scope_id, &child_ids);

        let input = PlacementInput {
            nodes: scope
                .node_ids
                .iter()
                .filter_map(|id| self.placement_node(id))
                .collect(),
            edges: scope.edges.clone(),
        };
        let options = PlacementOptions::from_config(self.config);
        let output = self.placement.place(&input, &options)?;

        let mut placed: Vec<String> = Vec::with_capacity(input.nodes.len());
        let mut node_bounds = Bounds::empty();
        for placement_node in &input.nodes {
            let Some(center) = output.centers.get(&placement_node.id) else {
                warn!(node_id = %placement_node.id, "node is not in the layout result");
                continue;
            };
            let Some(node) = self.graph.node_mut(&placement_node.id) else {
                continue;
            };
            let x = center.x - placement_node.width / 2.0;
            let y = center.y - placement_node.height / 2.0;
            node.x = Some(x);
            node.y = Some(y);
            node.width = Some(placement_node.width);
            node.height = Some(placement_node.height);
            node.local_offset_x = 0.0;
            node.local_offset_y = 0.0;
            node_bounds.include_box(x, y, placement_node.width, placement_node.height);
            placed.push(placement_node.id.clone());
        }

        let mut edges: Vec<ModelEdge> = Vec::with_capacity(output.edges.len());
        let mut edge_bounds = Bounds::empty();
        for placed_edge in output.edges {
            if !self.graph.contains(&placed_edge.from) {
                warn!(node_id = %placed_edge.from, "edge source not found");
                continue;
            }
            if !self.graph.contains(&placed_edge.to) {
                warn!(node_id = %placed_edge.to, "edge target not found");
                continue;
            }
            for point in &placed_edge.points {
                edge_bounds.include_point(point.x, point.y);
            }
            edges.push(ModelEdge {
                id: format!("{}|{}", placed_edge.from, placed_edge.to),
                from_node_id: placed_edge.from,
                to_node_id: placed_edge.to,
                points: placed_edge.points,
            });
        }

        // Edges routed left of (or above) the nodes push every node right
        // (or down), so the whole scope starts at the node box origin.
        let mut offset_x = 0.0;
        let mut offset_y = 0.0;
        if !node_bounds.is_empty() && !edge_bounds.is_empty() {
            offset_x = (node_bounds.min_x - edge_bounds.min_x).max(0.0);
            offset_y = (node_bounds.min_y - edge_bounds.min_y).max(0.0);
        }

        let mut bounds = Bounds::empty();
        for part in [node_bounds, edge_bounds] {
            if !part.is_empty() {
                bounds.include_box(
                    part.min_x + offset_x,
                    part.min_y + offset_y,
                    part.max_x - part.min_x,
                    part.max_y - part.min_y,
                );
            }
        }
        let mut rect = bounds.to_rect();

        // Children never exceed their container, and are centered when the
        // container is wider than they are.
        if root_group_id.is_some() {
            let full_width = rect.width + self.config.margin_x * 2.0;
            let parent_width = self.config.group_width;
            if full_width < parent_width {
                offset_x += (parent_width - full_width) / 2.0;
                rect.width = parent_width - self.config.margin_x * 2.0;
            }
        }

        if offset_x != 0.0 || offset_y != 0.0 {
            for id in &placed {
                if let Some(node) = self.graph.node_mut(id) {
                    node.local_offset_x = offset_x;
                    node.local_offset_y = offset_y;
                }
            }
            for edge in &mut edges {
                for point in &mut edge.points {
                    point.x += offset_x;
                    point.y += offset_y;
                }
            }
        }

        debug!(
            scope = %scope_id,
            nodes = placed.len(),
            edges = edges.len(),
            width = rect.width,
            height = rect.height,
            "laid out scope"
        );
        self.graph.edges_by_group_node_ids.insert(scope_id, edges);
        Ok(rect)
    }

    fn placement_node(&self, id: &str) -> Option<PlacementNode> {
        let node = self.graph.node(id)?;
        let (width, height) = if node.is_group() {
            (
                node.width.unwrap_or(self.config.group_width),
                node.height.unwrap_or(self.config.group_height),
            )
        } else {
            (self.config.asset_width, self.config.asset_height)
        };
        Some(PlacementNode {
            id: id.to_string(),
            width,
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Connections, ModelNode};

    /// Places nodes on one row, 150 apart, and routes every edge through a
    /// point `detour` units left of the row.
    struct RowPlacement {
        detour: f32,
    }

    impl Placement for RowPlacement {
        fn place(
            &self,
            input: &PlacementInput,
            _options: &PlacementOptions,
        ) -> Result<PlacementOutput, PlacementError> {
            let mut output = PlacementOutput::default();
            for (idx, node) in input.nodes.iter().enumerate() {
                output.centers.insert(
                    node.id.clone(),
                    Point {
                        x: 100.0 + idx as f32 * 150.0,
                        y: 100.0,
                    },
                );
            }
            for (from, to) in &input.edges {
                let start = output.centers[from];
                let end = output.centers[to];
                output.edges.push(PlacedEdge {
                    from: from.clone(),
                    to: to.clone(),
                    points: vec![
                        start,
                        Point {
                            x: start.x.min(end.x) - 50.0 - self.detour,
                            y: 40.0,
                        },
                        end,
                    ],
                });
            }
            Ok(output)
        }
    }

    struct FailingPlacement;

    impl Placement for FailingPlacement {
        fn place(
            &self,
            _input: &PlacementInput,
            _options: &PlacementOptions,
        ) -> Result<PlacementOutput, PlacementError> {
            Err(PlacementError::Failed("boom".to_string()))
        }
    }

    fn chain_graph() -> ModelGraph {
        let mut graph = ModelGraph::new("test");
        graph.add_node(ModelNode::group("g", ""));
        graph.add_root("g___group___");
        for id in ["a", "b", "c"] {
            graph.add_node(ModelNode::asset(id, "g"));
            graph.attach_child("g___group___", id);
        }
        let mut connections = Connections::default();
        connections.insert("a", "b");
        connections.insert("b", "c");
        graph
            .layout_graph_edges
            .insert("g___group___".to_string(), connections);
        graph
    }

    #[test]
    fn dagre_places_chain_left_to_right() {
        let mut graph = chain_graph();
        let config = LayoutConfig::default();
        let rect = GraphLayout::new(&mut graph, &config, &DagrePlacement)
            .layout(Some("g___group___"))
            .unwrap();
        let x = |id: &str| graph.node(id).unwrap().x.unwrap();
        assert!(x("a") < x("b"));
        assert!(x("b") < x("c"));
        assert!(rect.width > 0.0);
        assert_eq!(graph.edges_by_group_node_ids["g___group___"].len(), 2);
    }

    #[test]
    fn dagre_accepts_empty_input() {
        let output = DagrePlacement
            .place(
                &PlacementInput::default(),
                &PlacementOptions::from_config(&LayoutConfig::default()),
            )
            .unwrap();
        assert!(output.centers.is_empty());
        assert!(output.edges.is_empty());
    }

    #[test]
    fn dagre_rejects_non_finite_sizes() {
        let options = PlacementOptions::from_config(&LayoutConfig::default());
        let input = PlacementInput {
            nodes: vec![PlacementNode {
                id: "a".to_string(),
                width: f32::NAN,
                height: 100.0,
            }],
            edges: Vec::new(),
        };
        let err = DagrePlacement.place(&input, &options).unwrap_err();
        assert!(err.to_string().contains("node \"a\""), "{err}");

        let input = PlacementInput {
            nodes: vec![PlacementNode {
                id: "a".to_string(),
                width: 100.0,
                height: 100.0,
            }],
            edges: Vec::new(),
        };
        let options = PlacementOptions {
            rank_separation: f32::INFINITY,
            ..options
        };
        assert!(DagrePlacement.place(&input, &options).is_err());
    }

    #[test]
    fn edge_overflow_shifts_nodes_and_stays_in_bounds() {
        let mut graph = chain_graph();
        let config = LayoutConfig::default();
        let rect = GraphLayout::new(&mut graph, &config, &RowPlacement { detour: 50.0 })
            .layout(Some("g___group___"))
            .unwrap();

        // Node boxes start at (50, 50); the detour passes through (0, 40).
        let a = graph.node("a").unwrap();
        assert_eq!(a.local_offset_x, 50.0);
        assert_eq!(a.local_offset_y, 10.0);
        assert_eq!(a.x, Some(50.0));
        for edge in &graph.edges_by_group_node_ids["g___group___"] {
            for point in &edge.points {
                assert!(rect.contains(*point), "{point:?} outside {rect:?}");
            }
        }
        for id in ["a", "b", "c"] {
            let node = graph.node(id).unwrap();
            let left = node.x.unwrap() + node.local_offset_x;
            assert!(left >= rect.x && left + node.width.unwrap() <= rect.x + rect.width + 1e-3);
        }
    }

    #[test]
    fn narrow_children_are_centered_in_parent() {
        let mut graph = ModelGraph::new("test");
        graph.add_node(ModelNode::group("g", ""));
        graph.add_node(ModelNode::asset("a", "g"));
        graph.attach_child("g___group___", "a");
        let config = LayoutConfig {
            asset_width: 20.0,
            group_width: 200.0,
            ..LayoutConfig::default()
        };
        let rect = GraphLayout::new(&mut graph, &config, &RowPlacement { detour: 0.0 })
            .layout(Some("g___group___"))
            .unwrap();
        assert_eq!(rect.width, 200.0 - config.margin_x * 2.0);
        // (200 - (20 + 40)) / 2
        assert_eq!(graph.node("a").unwrap().local_offset_x, 70.0);
    }

    #[test]
    fn hidden_assets_are_skipped() {
        let mut graph = chain_graph();
        graph
            .node_mut("c")
            .and_then(ModelNode::as_asset_mut)
            .unwrap()
            .hide_in_layout = true;
        let config = LayoutConfig::default();
        GraphLayout::new(&mut graph, &config, &RowPlacement { detour: 0.0 })
            .layout(Some("g___group___"))
            .unwrap();
        assert!(graph.node("c").unwrap().x.is_none());
        assert_eq!(graph.edges_by_group_node_ids["g___group___"].len(), 1);
    }

    #[test]
    fn placement_failure_is_reported() {
        let mut graph = chain_graph();
        let config = LayoutConfig::default();
        let err = GraphLayout::new(&mut graph, &config, &FailingPlacement)
            .layout(None)
            .unwrap_err();
        assert_eq!(err, PlacementError::Failed("boom".to_string()));
    }

    #[test]
    fn expanded_group_sizes_feed_the_layout_input() {
        let mut graph = chain_graph();
        {
            let group = graph.node_mut("g___group___").unwrap();
            group.width = Some(640.0);
            group.height = Some(220.0);
        }
        let config = LayoutConfig::default();
        let layout = GraphLayout::new(&mut graph, &config, &DagrePlacement);
        let node = layout.placement_node("g___group___").unwrap();
        assert_eq!((node.width, node.height), (640.0, 220.0));
        let asset = layout.placement_node("a").unwrap();
        assert_eq!((asset.width, asset.height), (100.0, 100.0));
    }

    #[test]
    fn scope_graph_finds_sources() {
        let graph = chain_graph();
        let scope = ScopeGraph::build(
            &graph,
            "g___group___",
            &graph.child_ids(Some("g___group___")),
        );
        assert_eq!(scope.sources(), vec!["a"]);
        assert_eq!(scope.targets("b"), ["c".to_string()]);
    }
}
