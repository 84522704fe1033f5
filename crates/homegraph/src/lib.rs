//! Homegraph: a privacy-bounded, time-decaying knowledge graph of home-automation
//! activity, with temporal "A then B" pattern mining on top.

pub mod config;
pub mod decay;
pub mod patterns;
pub mod sanitize;
pub mod service;
pub mod storage;
pub mod types;

pub use config::{GraphConfig, MinerConfig};
pub use decay::{decay, effective};
pub use patterns::{
    Action, DiscoveredPattern, GraphSource, PatternEvidence, PatternMiner, Session, SessionIndex,
};
pub use service::{
    EdgeTouch, ExportQuery, GraphExport, GraphService, GraphStats, Neighborhood, NodeTouch,
    PruneReport, ZoneEntity, MAX_HOPS,
};
pub use storage::{edge_id, GraphStore, LoadReport, SaveReport};
pub use types::*;
