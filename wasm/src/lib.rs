use asset_graph_layout::{Config, LayoutEngine, RawGraph, parse_config};
use wasm_bindgen::prelude::*;

fn parse_targets(targets_json: Option<String>) -> Result<Vec<String>, String> {
    match targets_json {
        Some(raw) if !raw.trim().is_empty() => {
            serde_json::from_str::<Vec<String>>(&raw).map_err(|error| error.to_string())
        }
        _ => Ok(Vec::new()),
    }
}

/// One engine per worker. Model graphs stay cached between requests.
#[wasm_bindgen]
pub struct AssetGraphLayoutWorker {
    engine: LayoutEngine,
}

impl Default for AssetGraphLayoutWorker {
    fn default() -> Self {
        Self {
            engine: LayoutEngine::new(Config::default()),
        }
    }
}

#[wasm_bindgen]
impl AssetGraphLayoutWorker {
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<AssetGraphLayoutWorker, JsValue> {
        let config = match config_json {
            Some(raw) => parse_config(&raw).map_err(|error| JsValue::from_str(&error.to_string()))?,
            None => Config::default(),
        };
        Ok(Self {
            engine: LayoutEngine::new(config),
        })
    }

    #[wasm_bindgen(js_name = processGraph)]
    pub fn process_graph(
        &mut self,
        graph_id: &str,
        graph_json: &str,
        targets_json: Option<String>,
    ) -> Result<String, JsValue> {
        self.process_graph_json(graph_id, graph_json, targets_json)
            .map_err(|error| JsValue::from_str(&error))
    }

    #[wasm_bindgen(js_name = updateExpandedGroups)]
    pub fn update_expanded_groups(
        &mut self,
        graph_id: &str,
        targets_json: Option<String>,
    ) -> Result<String, JsValue> {
        self.update_expanded_groups_json(graph_id, targets_json)
            .map_err(|error| JsValue::from_str(&error))
    }

    #[wasm_bindgen(js_name = evict)]
    pub fn evict(&mut self, graph_id: &str) -> bool {
        self.engine.evict(graph_id).is_some()
    }
}

impl AssetGraphLayoutWorker {
    fn process_graph_json(
        &mut self,
        graph_id: &str,
        graph_json: &str,
        targets_json: Option<String>,
    ) -> Result<String, String> {
        let raw: RawGraph = serde_json::from_str(graph_json).map_err(|error| error.to_string())?;
        let targets = parse_targets(targets_json)?;
        let response = self.engine.process_graph(graph_id, &raw, &targets);
        serde_json::to_string(&response).map_err(|error| error.to_string())
    }

    fn update_expanded_groups_json(
        &mut self,
        graph_id: &str,
        targets_json: Option<String>,
    ) -> Result<String, String> {
        let targets = parse_targets(targets_json)?;
        let response = self
            .engine
            .update_expanded_groups(graph_id, &targets)
            .map_err(|error| error.to_string())?;
        serde_json::to_string(&response).map_err(|error| error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use crate::AssetGraphLayoutWorker;

    const GRAPH: &str = r#"{
        "nodes": {
            "a": {"id": "a", "definition": {"groupName": "g"}},
            "b": {"id": "b", "definition": {"groupName": "g"}}
        },
        "upstream": {"b": {"a": true}},
        "downstream": {"a": {"b": true}}
    }"#;

    #[test]
    fn processes_then_updates_cached_graph() {
        let mut worker = AssetGraphLayoutWorker::default();
        let processed = worker.process_graph_json("graph", GRAPH, None).unwrap();
        let value: serde_json::Value = serde_json::from_str(&processed).unwrap();
        assert_eq!(value["graphId"], "graph");
        assert_eq!(value["modelGraph"]["rootNodeIds"].as_array().unwrap().len(), 1);

        let group_id = value["modelGraph"]["rootNodeIds"][0].as_str().unwrap().to_string();
        let updated = worker
            .update_expanded_groups_json("graph", Some(format!("[\"{group_id}\"]")))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&updated).unwrap();
        assert_eq!(value["targetDeepestGroupNodeIdsToExpand"][0], group_id.as_str());
    }

    #[test]
    fn unknown_graph_is_an_error() {
        let mut worker = AssetGraphLayoutWorker::default();
        let error = worker.update_expanded_groups_json("nope", None).unwrap_err();
        assert!(error.contains("not found"));
    }
}
