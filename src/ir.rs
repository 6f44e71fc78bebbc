use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Neighbor set keyed by node id. Kept as a map of booleans so the JSON shape
/// matches the UI's `GraphData` (`{"a": {"b": true}}`).
pub type Adjacency = BTreeMap<String, BTreeMap<String, bool>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryLocation {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub location: RepositoryLocation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDefinition {
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub repository: Option<Repository>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNode {
    pub id: String,
    #[serde(default)]
    pub definition: AssetDefinition,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hide_in_layout: bool,
}

/// The flat graph handed to the engine: node descriptors plus upstream and
/// downstream adjacency. `BTreeMap` keeps iteration order stable, which is the
/// input order every traversal tie-break follows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawGraph {
    #[serde(default)]
    pub nodes: BTreeMap<String, RawNode>,
    #[serde(default)]
    pub upstream: Adjacency,
    #[serde(default)]
    pub downstream: Adjacency,
}

impl RawGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts (or updates the group of) an asset node.
    pub fn ensure_node(&mut self, id: &str, group_name: Option<&str>) -> &mut RawNode {
        let entry = self.nodes.entry(id.to_string()).or_insert_with(|| RawNode {
            id: id.to_string(),
            ..Default::default()
        });
        if let Some(group_name) = group_name {
            entry.definition.group_name = Some(group_name.to_string());
        }
        entry
    }

    /// Records `from -> to` in both adjacency maps. Endpoints are not created.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.upstream
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string(), true);
        self.downstream
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string(), true);
    }

    pub fn upstream_of(&self, id: &str) -> impl Iterator<Item = &str> {
        self.upstream
            .get(id)
            .into_iter()
            .flat_map(|set| set.keys().map(String::as_str))
    }

    pub fn downstream_of(&self, id: &str) -> impl Iterator<Item = &str> {
        self.downstream
            .get(id)
            .into_iter()
            .flat_map(|set| set.keys().map(String::as_str))
    }
}

/// Decides which group an asset belongs to. Domain specific, so the engine
/// takes it as a collaborator.
pub trait NamespaceGrouping {
    fn group_key(&self, node: &RawNode) -> String;
}

impl<F> NamespaceGrouping for F
where
    F: Fn(&RawNode) -> String,
{
    fn group_key(&self, node: &RawNode) -> String {
        self(node)
    }
}

/// Groups assets by `<groupName>@<repository>:<location>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepositoryGrouping;

impl NamespaceGrouping for RepositoryGrouping {
    fn group_key(&self, node: &RawNode) -> String {
        let definition = &node.definition;
        let group = definition.group_name.as_deref().unwrap_or("default");
        let (repository, location) = match &definition.repository {
            Some(repo) => (repo.name.as_str(), repo.location.name.as_str()),
            None => ("__repository__", "__location__"),
        };
        // '/' delimits namespaces, so it must not leak into a group key.
        format!("{group}@{repository}:{location}").replace('/', "_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_edge_fills_both_directions() {
        let mut graph = RawGraph::new();
        graph.ensure_node("a", Some("g"));
        graph.ensure_node("b", Some("g"));
        graph.add_edge("a", "b");
        assert_eq!(graph.upstream_of("b").collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(graph.downstream_of("a").collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(graph.upstream_of("a").count(), 0);
    }

    #[test]
    fn repository_grouping_formats_key() {
        let node = RawNode {
            id: "orders".to_string(),
            definition: AssetDefinition {
                group_name: Some("sales/eu".to_string()),
                repository: Some(Repository {
                    name: "repo".to_string(),
                    location: RepositoryLocation {
                        name: "loc".to_string(),
                    },
                }),
            },
            hide_in_layout: false,
        };
        assert_eq!(RepositoryGrouping.group_key(&node), "sales_eu@repo:loc");
    }

    #[test]
    fn closures_act_as_grouping() {
        let grouping = |node: &RawNode| node.id[..1].to_string();
        let node = RawNode {
            id: "xyz".to_string(),
            ..Default::default()
        };
        assert_eq!(grouping.group_key(&node), "x");
    }

    #[test]
    fn deserializes_graph_data_json() {
        let json = r#"{
            "nodes": {
                "a": {"id": "a", "definition": {"groupName": "g"}},
                "b": {"id": "b", "hideInLayout": true}
            },
            "upstream": {"b": {"a": true}},
            "downstream": {"a": {"b": true}}
        }"#;
        let graph: RawGraph = serde_json::from_str(json).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert!(graph.nodes["b"].hide_in_layout);
        assert_eq!(graph.nodes["a"].definition.group_name.as_deref(), Some("g"));
        assert_eq!(graph.upstream_of("b").collect::<Vec<_>>(), vec!["a"]);
    }
}
