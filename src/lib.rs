#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod engine;
pub mod expander;
pub mod ir;
pub mod layout;
pub mod layout_dump;
pub mod model;
pub mod processor;

#[cfg(feature = "cli")]
pub use cli::run;
pub use config::{Config, Direction, LayoutConfig, ProcessorConfig, load_config, parse_config};
pub use engine::{EngineError, LayoutEngine, LayoutResponse, compute_graph_id};
pub use expander::{GraphExpander, deepest_expanded_group_node_ids};
pub use ir::{NamespaceGrouping, RawGraph, RawNode, RepositoryGrouping};
pub use layout::{DagrePlacement, GraphLayout, Placement, PlacementError};
pub use model::{ModelGraph, ModelNode, NodeKind};
pub use processor::GraphProcessor;
