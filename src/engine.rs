use crate::config::Config;
use crate::expander::GraphExpander;
use crate::ir::{Adjacency, NamespaceGrouping, RawGraph, RawNode, RepositoryGrouping};
use crate::layout::{DagrePlacement, Placement};
use crate::model::ModelGraph;
use crate::processor::GraphProcessor;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("model graph with id \"{0}\" not found")]
    GraphNotFound(String),
}

/// Result of one engine request. The model graph is the cached instance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutResponse<'a> {
    pub graph_id: String,
    pub target_deepest_group_node_ids_to_expand: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub model_graph: &'a ModelGraph,
}

/// Processes raw graphs into cached model graphs and applies expansion
/// requests to them. Graphs are keyed by the caller's graph id.
pub struct LayoutEngine {
    config: Config,
    grouping: Box<dyn NamespaceGrouping>,
    placement: Box<dyn Placement>,
    cache: HashMap<String, ModelGraph>,
}

impl Default for LayoutEngine {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl LayoutEngine {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            grouping: Box::new(RepositoryGrouping),
            placement: Box::new(DagrePlacement),
            cache: HashMap::new(),
        }
    }

    pub fn with_grouping(mut self, grouping: impl NamespaceGrouping + 'static) -> Self {
        self.grouping = Box::new(grouping);
        self
    }

    pub fn with_placement(mut self, placement: impl Placement + 'static) -> Self {
        self.placement = Box::new(placement);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Builds a fresh model graph for `raw`, lays it out with
    /// `targets` expanded and caches it under `graph_id`, replacing any
    /// previous entry. A layout failure is reported in the response and the
    /// partially laid out graph is still cached.
    pub fn process_graph(
        &mut self,
        graph_id: &str,
        raw: &RawGraph,
        targets: &[String],
    ) -> LayoutResponse<'_> {
        let mut graph =
            GraphProcessor::new(raw, self.grouping.as_ref(), &self.config.processor).process(graph_id);

        let mut warnings = Vec::new();
        if graph.contains("") {
            warn!(graph_id, "graph contains nodes with empty ids");
            warnings.push(
                "Some nodes have empty strings as ids which will cause layout failures."
                    .to_string(),
            );
        }
        warnings.extend(target_warnings(&graph, targets));

        let result = GraphExpander::new(&mut graph, &self.config.layout, self.placement.as_ref())
            .re_layout_graph(Some(targets), true);
        let (applied, error) = match result {
            Ok(applied) => (applied, None),
            Err(err) => {
                warn!(graph_id, error = %err, "failed to layout graph");
                (targets.to_vec(), Some(format!("Failed to layout graph: {err}")))
            }
        };
        debug!(graph_id, nodes = graph.len(), "cached model graph");

        let model_graph = self
            .cache
            .entry(graph_id.to_string())
            .insert_entry(graph)
            .into_mut();
        LayoutResponse {
            graph_id: graph_id.to_string(),
            target_deepest_group_node_ids_to_expand: applied,
            warnings,
            error,
            model_graph,
        }
    }

    /// Re-lays out a cached graph so that exactly `targets` (and their
    /// ancestors) are expanded.
    pub fn update_expanded_groups(
        &mut self,
        graph_id: &str,
        targets: &[String],
    ) -> Result<LayoutResponse<'_>, EngineError> {
        let Some(graph) = self.cache.get_mut(graph_id) else {
            return Err(EngineError::GraphNotFound(graph_id.to_string()));
        };
        let warnings = target_warnings(graph, targets);
        let result = GraphExpander::new(graph, &self.config.layout, self.placement.as_ref())
            .re_layout_graph(Some(targets), true);
        let (applied, error) = match result {
            Ok(applied) => (applied, None),
            Err(err) => {
                warn!(graph_id, error = %err, "failed to update expanded groups");
                (targets.to_vec(), Some(format!("Failed to layout graph: {err}")))
            }
        };
        Ok(LayoutResponse {
            graph_id: graph_id.to_string(),
            target_deepest_group_node_ids_to_expand: applied,
            warnings,
            error,
            model_graph: graph,
        })
    }

    /// Processes unseen graph ids and re-expands known ones.
    pub fn layout(
        &mut self,
        graph_id: &str,
        raw: &RawGraph,
        targets: &[String],
    ) -> Result<LayoutResponse<'_>, EngineError> {
        if self.cache.contains_key(graph_id) {
            return self.update_expanded_groups(graph_id, targets);
        }
        Ok(self.process_graph(graph_id, raw, targets))
    }

    /// Direct access to the expand/collapse operations of a cached graph.
    pub fn expander(&mut self, graph_id: &str) -> Result<GraphExpander<'_>, EngineError> {
        let graph = self
            .cache
            .get_mut(graph_id)
            .ok_or_else(|| EngineError::GraphNotFound(graph_id.to_string()))?;
        Ok(GraphExpander::new(
            graph,
            &self.config.layout,
            self.placement.as_ref(),
        ))
    }

    pub fn model_graph(&self, graph_id: &str) -> Option<&ModelGraph> {
        self.cache.get(graph_id)
    }

    pub fn evict(&mut self, graph_id: &str) -> Option<ModelGraph> {
        self.cache.remove(graph_id)
    }

    pub fn cached_graph_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.cache.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

fn target_warnings(graph: &ModelGraph, targets: &[String]) -> Vec<String> {
    targets
        .iter()
        .filter(|id| !graph.is_group(id))
        .map(|id| format!("Expansion target \"{id}\" is not a group node"))
        .collect()
}

#[derive(Serialize)]
struct GraphKey<'a> {
    downstream: &'a Adjacency,
    upstream: &'a Adjacency,
    nodes: Vec<&'a RawNode>,
}

/// Content hash of a raw graph, suitable as a cache key: equal content gives
/// an equal id.
pub fn compute_graph_id(raw: &RawGraph) -> serde_json::Result<String> {
    let key = GraphKey {
        downstream: &raw.downstream,
        upstream: &raw.upstream,
        nodes: raw.nodes.values().collect(),
    };
    Ok(simple_hash(&serde_json::to_string(&key)?))
}

fn simple_hash(text: &str) -> String {
    let mut hash: i32 = 0;
    for unit in text.encode_utf16() {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(i32::from(unit));
    }
    to_base36(i64::from(hash).unsigned_abs())
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
