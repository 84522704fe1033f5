//! Configuration loading and resolution.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use homegraph::{GraphConfig, MinerConfig};

use crate::error::{CliError, CliResult};

pub const GRAPH_FILE_ENV: &str = "HOMEGRAPH_FILE";
pub const CONFIG_FILE_ENV: &str = "HOMEGRAPH_CONFIG";

const DEFAULT_AUTO_SAVE_SECS: u64 = 30;

/// Resolve the graph snapshot path.
pub fn resolve_graph_path(explicit: Option<&str>) -> String {
    if let Some(path) = explicit {
        return path.to_string();
    }

    if let Ok(env_path) = std::env::var(GRAPH_FILE_ENV) {
        return env_path;
    }

    let cwd_graph = PathBuf::from(".homegraph/graph.json");
    if cwd_graph.exists() {
        return cwd_graph.display().to_string();
    }

    resolve_default_graph_path()
}

fn resolve_default_graph_path() -> String {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());

    format!("{home}/.homegraph/graph.json")
}

/// Resolve the optional config file path: explicit flag, then environment.
pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
    explicit
        .map(PathBuf::from)
        .or_else(|| std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from))
}

/// Contents of the optional JSON config file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub graph: GraphConfig,
    pub miner: MinerConfig,
    /// Minimum seconds between automatic snapshot writes.
    pub auto_save_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            graph: GraphConfig::default(),
            miner: MinerConfig::default(),
            auto_save_secs: DEFAULT_AUTO_SAVE_SECS,
        }
    }
}

impl AppConfig {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            CliError::Config(format!("Failed to parse config {}: {e}", path.display()))
        })?;
        config.graph.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }
}
