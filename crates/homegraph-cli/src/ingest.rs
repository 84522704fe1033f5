//! Newline-delimited JSON event ingestion.
//!
//! Each line is one normalized automation event:
//!
//! ```json
//! {"type":"node","id":"ha.entity:light.kitchen","kind":"entity","label":"Kitchen","domain":"light","delta":1.0}
//! {"type":"edge","from":"ha.service:light.turn_on","rel":"affects","to":"ha.entity:light.kitchen","at":"2024-05-01T07:00:00Z"}
//! ```
//!
//! Timestamps come from `ts` (epoch milliseconds) or `at` (RFC 3339); without
//! either, the event is applied at the current time.

use std::io::BufRead;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use homegraph::{EdgeTouch, EdgeType, Evidence, Millis, NodeKind, NodeTouch};

use crate::error::{CliError, CliResult};
use crate::session::GraphSession;

fn default_delta() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeEvent {
    pub id: String,
    #[serde(default = "default_delta")]
    pub delta: f64,
    #[serde(default)]
    pub kind: Option<NodeKind>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub meta: Option<Map<String, Value>>,
    #[serde(default)]
    pub ts: Option<Millis>,
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EdgeEvent {
    pub from: String,
    pub rel: EdgeType,
    pub to: String,
    #[serde(default = "default_delta")]
    pub delta: f64,
    #[serde(default)]
    pub evidence: Option<Evidence>,
    #[serde(default)]
    pub meta: Option<Map<String, Value>>,
    #[serde(default)]
    pub ts: Option<Millis>,
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

/// One line of an event stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TouchEvent {
    Node(NodeEvent),
    Edge(EdgeEvent),
}

fn event_time(ts: Option<Millis>, at: Option<DateTime<Utc>>) -> Option<Millis> {
    ts.or_else(|| at.map(|t| t.timestamp_millis()))
}

impl TouchEvent {
    /// Parse and validate a single line.
    pub fn parse(line: &str, line_no: usize) -> CliResult<Self> {
        let event: Self = serde_json::from_str(line).map_err(|e| CliError::InvalidEvent {
            line: line_no,
            reason: e.to_string(),
        })?;
        let (id_ok, delta) = match &event {
            TouchEvent::Node(n) => (!n.id.is_empty(), n.delta),
            TouchEvent::Edge(e) => (!e.from.is_empty() && !e.to.is_empty(), e.delta),
        };
        if !id_ok {
            return Err(CliError::InvalidEvent {
                line: line_no,
                reason: "empty id".to_string(),
            });
        }
        if !delta.is_finite() {
            return Err(CliError::InvalidEvent {
                line: line_no,
                reason: format!("delta must be finite, got {delta}"),
            });
        }
        Ok(event)
    }

    pub fn apply(self, session: &mut GraphSession) {
        match self {
            TouchEvent::Node(n) => {
                let mut touch = NodeTouch::new(n.id, n.delta);
                touch.kind = n.kind;
                touch.label = n.label;
                touch.domain = n.domain;
                touch.tags = n.tags;
                touch.source = n.source;
                touch.meta_patch = n.meta;
                touch.now = event_time(n.ts, n.at);
                session.touch_node(touch);
            }
            TouchEvent::Edge(e) => {
                let mut touch = EdgeTouch::new(e.from, e.rel, e.to, e.delta);
                touch.evidence = e.evidence;
                touch.meta_patch = e.meta;
                touch.now = event_time(e.ts, e.at);
                session.touch_edge(touch);
            }
        }
    }
}

/// Outcome of an ingest run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub lines: usize,
    pub nodes: usize,
    pub edges: usize,
    pub malformed: usize,
}

/// Apply every event in `reader` to `session`. Malformed lines are logged and
/// counted; only read errors abort the run.
pub fn ingest_reader<R: BufRead>(session: &mut GraphSession, reader: R) -> CliResult<IngestReport> {
    let mut report = IngestReport::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        report.lines += 1;

        match TouchEvent::parse(trimmed, idx + 1) {
            Ok(event) => {
                match event {
                    TouchEvent::Node(_) => report.nodes += 1,
                    TouchEvent::Edge(_) => report.edges += 1,
                }
                event.apply(session);
            }
            Err(e) => {
                tracing::warn!("Skipping event: {e}");
                report.malformed += 1;
            }
        }
    }

    tracing::info!(
        nodes = report.nodes,
        edges = report.edges,
        malformed = report.malformed,
        "Ingest finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_with_rfc3339() {
        let line = r#"{"type":"node","id":"zone:kitchen","kind":"zone","at":"2024-05-01T07:00:00Z"}"#;
        match TouchEvent::parse(line, 1).unwrap() {
            TouchEvent::Node(n) => {
                assert_eq!(n.kind, Some(NodeKind::Zone));
                assert_eq!(n.delta, 1.0);
                assert_eq!(event_time(n.ts, n.at), Some(1_714_546_800_000));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_edge() {
        let line = r#"{"type":"edge","from":"a","rel":"triggered_by","to":"b","delta":0.5,"ts":42}"#;
        match TouchEvent::parse(line, 1).unwrap() {
            TouchEvent::Edge(e) => {
                assert_eq!(e.rel, EdgeType::TriggeredBy);
                assert_eq!(event_time(e.ts, e.at), Some(42));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        assert!(TouchEvent::parse(r#"{"type":"widget","id":"x"}"#, 3).is_err());
        assert!(TouchEvent::parse(r#"{"type":"node","id":""}"#, 3).is_err());
        assert!(TouchEvent::parse(r#"{"type":"edge","from":"a","rel":"likes","to":"b"}"#, 3).is_err());
        match TouchEvent::parse("{", 7) {
            Err(CliError::InvalidEvent { line, .. }) => assert_eq!(line, 7),
            other => panic!("unexpected {other:?}"),
        }
    }
}
