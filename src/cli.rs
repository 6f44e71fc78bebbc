use crate::config::{Direction, load_config};
use crate::engine::{LayoutEngine, compute_graph_id};
use crate::ir::RawGraph;
use crate::layout_dump::write_layout_dump;
use anyhow::Result;
use clap::Parser;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "agl",
    version,
    about = "Hierarchical layout for asset dependency graphs"
)]
pub struct Args {
    /// Input graph JSON ({nodes, upstream, downstream}) or '-' for stdin
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Output file for the layout dump. Defaults to stdout.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Config file (JSON or JSON5)
    #[arg(short = 'c', long = "configFile")]
    pub config: Option<PathBuf>,

    /// Group ids to expand (the deepest expanded groups)
    #[arg(long = "expand", value_name = "GROUP_ID")]
    pub expand: Vec<String>,

    /// Expand every group
    #[arg(long = "expand-all", conflicts_with = "expand")]
    pub expand_all: bool,

    /// Expand the ancestors of this node
    #[arg(long = "reveal", value_name = "NODE_ID")]
    pub reveal: Option<String>,

    /// Layout direction, overriding the config file
    #[arg(short = 'd', long = "direction", value_parser = parse_direction)]
    pub direction: Option<Direction>,

    /// Cache key for the graph. Defaults to a hash of its content.
    #[arg(long = "graph-id")]
    pub graph_id: Option<String>,
}

fn parse_direction(value: &str) -> std::result::Result<Direction, String> {
    Direction::from_token(value).ok_or_else(|| format!("unknown direction \"{value}\""))
}

pub fn run() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    if let Some(direction) = args.direction {
        config.layout.direction = direction;
    }
    let direction = config.layout.direction;

    let input = read_input(args.input.as_deref())?;
    let raw: RawGraph = serde_json::from_str(&input)?;
    let graph_id = match args.graph_id {
        Some(id) => id,
        None => compute_graph_id(&raw)?,
    };

    let mut engine = LayoutEngine::new(config);
    let response = engine.process_graph(&graph_id, &raw, &args.expand);
    for warning in &response.warnings {
        eprintln!("warning: {warning}");
    }
    if let Some(error) = response.error {
        return Err(anyhow::anyhow!(error));
    }

    let mut frontier = response.target_deepest_group_node_ids_to_expand;
    if args.expand_all {
        engine.expander(&graph_id)?.expand_all_groups()?;
    }
    if let Some(node_id) = args.reveal.as_deref() {
        if engine.model_graph(&graph_id).is_none_or(|graph| !graph.contains(node_id)) {
            return Err(anyhow::anyhow!("Unknown node \"{node_id}\""));
        }
        engine.expander(&graph_id)?.expand_to_reveal_node(node_id)?;
    }

    let graph = engine
        .model_graph(&graph_id)
        .ok_or_else(|| anyhow::anyhow!("Graph \"{graph_id}\" was not cached"))?;
    if args.expand_all || args.reveal.is_some() {
        frontier = crate::expander::deepest_expanded_group_node_ids(graph);
    }
    eprintln!("expanded: {}", frontier.join(", "));
    write_layout_dump(args.output.as_deref(), graph, direction)
}

fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::WARN.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn read_input(path: Option<&Path>) -> Result<String> {
    if let Some(path) = path
        && path != Path::new("-")
    {
        return Ok(std::fs::read_to_string(path)?);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}
