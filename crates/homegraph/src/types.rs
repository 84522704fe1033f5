//! Core data types for the home graph: nodes, edges, typed meta, and errors.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> Millis {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Millis
}

/// What a node represents in the home.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Entity,
    Zone,
    Device,
    Person,
    Concept,
    Module,
    Event,
}

impl NodeKind {
    pub const ALL: [NodeKind; 7] = [
        NodeKind::Entity,
        NodeKind::Zone,
        NodeKind::Device,
        NodeKind::Person,
        NodeKind::Concept,
        NodeKind::Module,
        NodeKind::Event,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Entity => "entity",
            NodeKind::Zone => "zone",
            NodeKind::Device => "device",
            NodeKind::Person => "person",
            NodeKind::Concept => "concept",
            NodeKind::Module => "module",
            NodeKind::Event => "event",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| GraphError::InvalidInput(format!("unknown node kind: {s}")))
    }
}

/// Relationship carried by an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    InZone,
    Controls,
    Affects,
    Correlates,
    TriggeredBy,
    ObservedWith,
    Mentions,
}

impl EdgeType {
    pub const ALL: [EdgeType; 7] = [
        EdgeType::InZone,
        EdgeType::Controls,
        EdgeType::Affects,
        EdgeType::Correlates,
        EdgeType::TriggeredBy,
        EdgeType::ObservedWith,
        EdgeType::Mentions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::InZone => "in_zone",
            EdgeType::Controls => "controls",
            EdgeType::Affects => "affects",
            EdgeType::Correlates => "correlates",
            EdgeType::TriggeredBy => "triggered_by",
            EdgeType::ObservedWith => "observed_with",
            EdgeType::Mentions => "mentions",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EdgeType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| GraphError::InvalidInput(format!("unknown edge type: {s}")))
    }
}

/// A single sanitized scalar stored in node or edge meta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Bounded scalar-only metadata. Sanitized on write; loaded snapshots are trusted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Meta(pub(crate) BTreeMap<String, MetaValue>);

impl Meta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetaValue)> {
        self.0.iter()
    }
}

/// Named evidence attached to an edge by the writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// A node in the home graph. `score` is a raw accumulator; decay is applied on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub updated_at: Millis,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Meta::is_empty")]
    pub meta: Meta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A directed, typed edge. The id is derived from `(from_id, edge_type, to_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    #[serde(rename = "from")]
    pub from_id: String,
    #[serde(rename = "to")]
    pub to_id: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub weight: f64,
    pub updated_at: Millis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
    #[serde(default, skip_serializing_if = "Meta::is_empty")]
    pub meta: Meta,
}

impl Edge {
    /// True if `node_id` is either endpoint.
    pub fn touches(&self, node_id: &str) -> bool {
        self.from_id == node_id || self.to_id == node_id
    }
}

/// Errors that can occur in the graph library.
#[derive(thiserror::Error, Debug)]
pub enum GraphError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Zone not found: {0}")]
    ZoneNotFound(String),
}

/// Convenience result type.
pub type GraphResult<T> = Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_type_parse_roundtrip() {
        for kind in NodeKind::ALL {
            assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), kind);
        }
        for t in EdgeType::ALL {
            assert_eq!(t.as_str().parse::<EdgeType>().unwrap(), t);
        }
        assert!("room".parse::<NodeKind>().is_err());
        assert!("likes".parse::<EdgeType>().is_err());
    }

    #[test]
    fn test_edge_serializes_wire_names() {
        let edge = Edge {
            id: "e:1".into(),
            from_id: "a".into(),
            to_id: "b".into(),
            edge_type: EdgeType::TriggeredBy,
            weight: 1.0,
            updated_at: 5,
            evidence: None,
            meta: Meta::new(),
        };
        let v = serde_json::to_value(&edge).unwrap();
        assert_eq!(v["from"], "a");
        assert_eq!(v["to"], "b");
        assert_eq!(v["type"], "triggered_by");
        assert!(v.get("meta").is_none());
        assert!(v.get("evidence").is_none());
    }

    #[test]
    fn test_meta_value_untagged() {
        let v: MetaValue = serde_json::from_str("3").unwrap();
        assert_eq!(v, MetaValue::Int(3));
        let v: MetaValue = serde_json::from_str("2.5").unwrap();
        assert_eq!(v, MetaValue::Float(2.5));
        let v: MetaValue = serde_json::from_str("\"on\"").unwrap();
        assert_eq!(v, MetaValue::Text("on".into()));
    }
}
