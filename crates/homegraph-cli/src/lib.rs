//! Homegraph command-line front end: event ingestion, pruning, export and mining
//! over a snapshot file.

pub mod config;
pub mod error;
pub mod ingest;
pub mod session;

pub use config::{resolve_config_path, resolve_graph_path, AppConfig};
pub use error::{CliError, CliResult};
pub use ingest::{ingest_reader, IngestReport, TouchEvent};
pub use session::GraphSession;
