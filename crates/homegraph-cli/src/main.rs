//! Homegraph CLI: entry point.

use std::io::BufReader;

use chrono::{TimeZone, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;

use homegraph::{ExportQuery, GraphStore, Millis, NodeKind, MAX_HOPS};
use homegraph_cli::{
    ingest_reader, resolve_config_path, resolve_graph_path, AppConfig, GraphSession,
};

#[derive(Parser)]
#[command(
    name = "homegraph",
    about = "Decaying home-automation knowledge graph with temporal pattern mining",
    version
)]
struct Cli {
    /// Path to the graph snapshot (JSON).
    #[arg(short, long, global = true)]
    graph: Option<String>,

    /// Path to a JSON config file with `graph` and `miner` sections.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a JSONL file of node/edge events ("-" reads stdin).
    Ingest {
        /// Events file, one JSON object per line.
        file: String,
    },

    /// Evict decayed and over-capacity nodes and edges.
    Prune,

    /// Print a privacy-minimized export of the graph.
    Export {
        /// Only nodes of these kinds.
        #[arg(long = "kind", value_delimiter = ',')]
        kinds: Vec<NodeKind>,

        /// Only nodes in these domains.
        #[arg(long = "domain", value_delimiter = ',')]
        domains: Vec<String>,

        /// Neighborhood center; overrides kind and domain filters.
        #[arg(long)]
        center: Option<String>,

        /// Neighborhood depth (at most 2).
        #[arg(long)]
        hops: Option<u32>,

        #[arg(long, default_value_t = 200)]
        limit_nodes: usize,

        #[arg(long, default_value_t = 400)]
        limit_edges: usize,
    },

    /// Mine "A then B" action patterns.
    Mine {
        /// How far back to look, in hours.
        #[arg(long, default_value_t = 168.0)]
        lookback_hours: f64,

        /// Restrict to entities in this zone.
        #[arg(long)]
        zone: Option<String>,
    },

    /// Print nodes and edges around a center node.
    Neighborhood {
        center: String,

        #[arg(long, default_value_t = 1)]
        hops: u32,
    },

    /// List entities assigned to a zone.
    Zone {
        /// Zone name or `zone:` id.
        zone: String,
    },

    /// Print graph counts and mean decayed values.
    Stats,

    /// Validate a graph snapshot.
    Validate,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   homegraph completions bash > ~/.local/share/bash-completion/completions/homegraph
    ///   homegraph completions zsh > ~/.zfunc/_homegraph
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_ts(ms: Millis) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let graph_path = resolve_graph_path(cli.graph.as_deref());
    let open_session = || -> anyhow::Result<GraphSession> {
        let config_path = resolve_config_path(cli.config.as_deref());
        let config = AppConfig::load(config_path.as_deref())?;
        Ok(GraphSession::open(&graph_path, &config)?)
    };

    match cli.command {
        Commands::Ingest { file } => {
            let mut session = open_session()?;
            let report = if file == "-" {
                ingest_reader(&mut session, std::io::stdin().lock())?
            } else {
                let f = std::fs::File::open(&file)?;
                ingest_reader(&mut session, BufReader::new(f))?
            };
            session.save()?;
            print_json(&report)?;
        }

        Commands::Prune => {
            let mut session = open_session()?;
            let report = session.prune(None);
            session.save()?;
            print_json(&report)?;
        }

        Commands::Export {
            kinds,
            domains,
            center,
            hops,
            limit_nodes,
            limit_edges,
        } => {
            let mut session = open_session()?;
            let query = ExportQuery {
                kinds: (!kinds.is_empty()).then_some(kinds),
                domains: (!domains.is_empty()).then_some(domains),
                center,
                hops,
                limit_nodes,
                limit_edges,
            };
            let export = session.export(&query, None)?;
            session.save()?;
            print_json(&export)?;
        }

        Commands::Mine {
            lookback_hours,
            zone,
        } => {
            let session = open_session()?;
            let patterns = session.mine(lookback_hours, zone.as_deref(), None);
            if patterns.is_empty() {
                tracing::info!("No patterns met the thresholds");
            }
            for pattern in patterns.values() {
                tracing::debug!(
                    "{} discovered at {}",
                    pattern.pattern_id,
                    format_ts(pattern.discovered_at)
                );
            }
            print_json(&patterns)?;
        }

        Commands::Neighborhood { center, hops } => {
            let session = open_session()?;
            if hops > MAX_HOPS {
                tracing::warn!("Hops clamped from {hops} to {MAX_HOPS}");
            }
            let hood = session.service().get_neighborhood(&center, hops);
            print_json(&serde_json::json!({
                "center": center,
                "nodes": hood.nodes,
                "edges": hood.edges,
            }))?;
        }

        Commands::Zone { zone } => {
            let session = open_session()?;
            match session.service().get_zone_entities(&zone) {
                Ok(entities) => print_json(&serde_json::json!({ "entities": entities }))?,
                Err(e) => print_json(&serde_json::json!({ "error": e.to_string() }))?,
            }
        }

        Commands::Stats => {
            let session = open_session()?;
            let stats = session.service().stats(None);
            if let Some(ts) = session.service().store().nodes().map(|n| n.updated_at).max() {
                tracing::info!("Last update: {}", format_ts(ts));
            }
            print_json(&stats)?;
        }

        Commands::Validate => {
            let mut store = GraphStore::with_path(&graph_path);
            match store.load() {
                Ok(report) => {
                    println!("Valid graph file: {graph_path}");
                    println!("  Nodes: {}", report.nodes_loaded);
                    println!("  Edges: {}", report.edges_loaded);
                    println!("  Skipped records: {}", report.skipped);
                }
                Err(e) => {
                    eprintln!("Invalid graph file: {e}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "homegraph", &mut std::io::stdout());
        }
    }

    Ok(())
}
