use crate::config::Direction;
use crate::expander::deepest_expanded_group_node_ids;
use crate::model::{ModelGraph, ROOT_SCOPE};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// The visible part of a laid out model graph in absolute coordinates.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutDump {
    pub graph_id: String,
    pub direction: Direction,
    pub width: f32,
    pub height: f32,
    pub deepest_expanded_group_node_ids: Vec<String>,
    pub nodes: Vec<NodeDump>,
    pub edges: Vec<EdgeDump>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDump {
    pub id: String,
    pub kind: NodeDumpKind,
    pub parent_id: Option<String>,
    pub level: usize,
    pub expanded: bool,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeDumpKind {
    Asset,
    Group,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDump {
    pub scope: String,
    pub from: String,
    pub to: String,
    pub points: Vec<[f32; 2]>,
}

impl LayoutDump {
    pub fn from_model_graph(graph: &ModelGraph, direction: Direction) -> Self {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        let mut width: f32 = 0.0;
        let mut height: f32 = 0.0;

        // (scope id, absolute origin of the scope's local frame)
        let mut scopes: Vec<(String, f32, f32)> = vec![(ROOT_SCOPE.to_string(), 0.0, 0.0)];
        let mut stack: Vec<&str> = graph.root_node_ids.iter().rev().map(String::as_str).collect();
        while let Some(id) = stack.pop() {
            let Some(node) = graph.node(id) else {
                continue;
            };
            let (Some(x), Some(y)) = (node.x, node.y) else {
                continue;
            };
            let abs_x = node.global_x.unwrap_or(0.0) + x;
            let abs_y = node.global_y.unwrap_or(0.0) + y;
            let node_width = node.width.unwrap_or(0.0);
            let node_height = node.height.unwrap_or(0.0);
            width = width.max(abs_x + node_width);
            height = height.max(abs_y + node_height);
            nodes.push(NodeDump {
                id: node.id.clone(),
                kind: if node.is_group() {
                    NodeDumpKind::Group
                } else {
                    NodeDumpKind::Asset
                },
                parent_id: node.parent_id.clone(),
                level: node.level,
                expanded: node.is_expanded(),
                x: abs_x,
                y: abs_y,
                width: node_width,
                height: node_height,
            });
            if node.is_expanded() {
                scopes.push((node.id.clone(), abs_x, abs_y));
                stack.extend(node.children_ids().iter().rev().map(String::as_str));
            }
        }

        for (scope, origin_x, origin_y) in scopes {
            let Some(scope_edges) = graph.edges_by_group_node_ids.get(&scope) else {
                continue;
            };
            for edge in scope_edges {
                edges.push(EdgeDump {
                    scope: scope.clone(),
                    from: edge.from_node_id.clone(),
                    to: edge.to_node_id.clone(),
                    points: edge
                        .points
                        .iter()
                        .map(|point| [origin_x + point.x, origin_y + point.y])
                        .collect(),
                });
            }
        }

        LayoutDump {
            graph_id: graph.id.clone(),
            direction,
            width,
            height,
            deepest_expanded_group_node_ids: deepest_expanded_group_node_ids(graph),
            nodes,
            edges,
        }
    }
}

pub fn write_layout_dump(
    path: Option<&Path>,
    graph: &ModelGraph,
    direction: Direction,
) -> anyhow::Result<()> {
    let dump = LayoutDump::from_model_graph(graph, direction);
    match path {
        Some(path) => {
            let file = File::create(path)?;
            let writer = BufWriter::new(file);
            serde_json::to_writer_pretty(writer, &dump)?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut writer = stdout.lock();
            serde_json::to_writer_pretty(&mut writer, &dump)?;
            writeln!(writer)?;
        }
    }
    Ok(())
}
