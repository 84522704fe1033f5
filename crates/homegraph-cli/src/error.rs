//! Errors surfaced by the command-line front end.

use homegraph::GraphError;

/// All errors that can occur in the CLI layer.
#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid event on line {line}: {reason}")]
    InvalidEvent { line: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CliResult<T> = Result<T, CliError>;
