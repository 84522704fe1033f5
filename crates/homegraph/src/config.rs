//! Tunables for the graph service and the pattern miner.

use serde::{Deserialize, Serialize};

use crate::types::{EdgeType, GraphError, GraphResult};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Capacity, decay and sanitization limits for [`crate::GraphService`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub nodes_max: usize,
    pub edges_max: usize,
    pub node_half_life_hours: f64,
    pub edge_half_life_hours: f64,
    /// Effective score below which an unreferenced node is evicted.
    pub node_min: f64,
    /// Effective weight below which an edge is evicted.
    pub edge_min: f64,
    pub meta_max_bytes: usize,
    pub meta_max_string_chars: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            nodes_max: 500,
            edges_max: 1500,
            node_half_life_hours: 24.0,
            edge_half_life_hours: 12.0,
            node_min: 0.1,
            edge_min: 0.1,
            meta_max_bytes: 2048,
            meta_max_string_chars: 120,
        }
    }
}

impl GraphConfig {
    pub fn node_half_life_ms(&self) -> f64 {
        self.node_half_life_hours * MS_PER_HOUR
    }

    pub fn edge_half_life_ms(&self) -> f64 {
        self.edge_half_life_hours * MS_PER_HOUR
    }

    /// Reject configurations the pruning algorithm cannot honor.
    pub fn validate(&self) -> GraphResult<()> {
        if self.nodes_max == 0 || self.edges_max == 0 {
            return Err(GraphError::InvalidInput(
                "nodes_max and edges_max must be at least 1".to_string(),
            ));
        }
        if !(self.node_min >= 0.0 && self.edge_min >= 0.0) {
            return Err(GraphError::InvalidInput(
                "node_min and edge_min must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000)
}

/// Thresholds and windows for [`crate::PatternMiner`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    pub min_confidence: f64,
    pub min_support: f64,
    pub min_lift: f64,
    /// Maximum gap between antecedent and consequent.
    pub delta_window_secs: u64,
    /// Gap that closes one session and opens the next.
    pub debounce_window_secs: u64,
    pub action_edge_type: EdgeType,
    pub service_prefix: String,
    pub max_session_actions: usize,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            min_support: 0.1,
            min_lift: 1.2,
            delta_window_secs: 15 * 60,
            debounce_window_secs: 5 * 60,
            action_edge_type: EdgeType::Affects,
            service_prefix: "ha.service:".to_string(),
            max_session_actions: 200,
        }
    }
}

impl MinerConfig {
    pub fn delta_window_ms(&self) -> i64 {
        secs_to_ms(self.delta_window_secs)
    }

    pub fn debounce_window_ms(&self) -> i64 {
        secs_to_ms(self.debounce_window_secs)
    }
}
