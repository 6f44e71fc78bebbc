use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default child-count limit above which a group is split into sections.
pub const DEFAULT_GROUP_NODE_CHILDREN_COUNT_THRESHOLD: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Ranks flow left to right.
    Horizontal,
    /// Ranks flow top to bottom.
    Vertical,
}

impl Direction {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "horizontal" | "lr" => Some(Self::Horizontal),
            "vertical" | "tb" | "td" => Some(Self::Vertical),
            _ => None,
        }
    }

    /// The `rankdir` value understood by dagre.
    pub fn rankdir(self) -> &'static str {
        match self {
            Self::Horizontal => "lr",
            Self::Vertical => "tb",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    pub direction: Direction,
    pub node_separation: f32,
    pub rank_separation: f32,
    pub edge_separation: f32,
    pub margin_x: f32,
    pub margin_top: f32,
    pub margin_bottom: f32,
    pub asset_width: f32,
    pub asset_height: f32,
    pub group_width: f32,
    pub group_height: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            direction: Direction::Horizontal,
            node_separation: 20.0,
            rank_separation: 50.0,
            edge_separation: 20.0,
            margin_x: 20.0,
            margin_top: 36.0,
            margin_bottom: 16.0,
            asset_width: 100.0,
            asset_height: 100.0,
            group_width: 100.0,
            group_height: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    pub group_node_children_count_threshold: usize,
    /// Skip namespace grouping and lay every asset out at the root.
    pub flatten_layers: bool,
}

impl ProcessorConfig {
    pub fn children_threshold(&self) -> usize {
        self.group_node_children_count_threshold.max(1)
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            group_node_children_count_threshold: DEFAULT_GROUP_NODE_CHILDREN_COUNT_THRESHOLD,
            flatten_layers: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub layout: LayoutConfig,
    pub processor: ProcessorConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutConfigFile {
    direction: Option<String>,
    node_separation: Option<f32>,
    rank_separation: Option<f32>,
    edge_separation: Option<f32>,
    margin_x: Option<f32>,
    margin_top: Option<f32>,
    margin_bottom: Option<f32>,
    asset_width: Option<f32>,
    asset_height: Option<f32>,
    group_width: Option<f32>,
    group_height: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessorConfigFile {
    group_node_children_count_threshold: Option<usize>,
    flatten_layers: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    layout: Option<LayoutConfigFile>,
    processor: Option<ProcessorConfigFile>,
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parses a config document (JSON, or JSON5 as a fallback) and merges the set
/// fields onto the defaults.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let parsed: ConfigFile = match serde_json::from_str(contents) {
        Ok(parsed) => parsed,
        Err(json_err) => json5::from_str(contents)
            .map_err(|_| anyhow::anyhow!("invalid config: {json_err}"))?,
    };

    let mut config = Config::default();

    if let Some(layout) = parsed.layout {
        if let Some(v) = layout.direction {
            config.layout.direction = Direction::from_token(&v)
                .ok_or_else(|| anyhow::anyhow!("unknown layout direction \"{v}\""))?;
        }
        if let Some(v) = layout.node_separation {
            config.layout.node_separation = v;
        }
        if let Some(v) = layout.rank_separation {
            config.layout.rank_separation = v;
        }
        if let Some(v) = layout.edge_separation {
            config.layout.edge_separation = v;
        }
        if let Some(v) = layout.margin_x {
            config.layout.margin_x = v;
        }
        if let Some(v) = layout.margin_top {
            config.layout.margin_top = v;
        }
        if let Some(v) = layout.margin_bottom {
            config.layout.margin_bottom = v;
        }
        if let Some(v) = layout.asset_width {
            config.layout.asset_width = v;
        }
        if let Some(v) = layout.asset_height {
            config.layout.asset_height = v;
        }
        if let Some(v) = layout.group_width {
            config.layout.group_width = v;
        }
        if let Some(v) = layout.group_height {
            config.layout.group_height = v;
        }
    }

    if let Some(processor) = parsed.processor {
        if let Some(v) = processor.group_node_children_count_threshold {
            config.processor.group_node_children_count_threshold = v;
        }
        if let Some(v) = processor.flatten_layers {
            config.processor.flatten_layers = v;
        }
    }

    Ok(config)
}
