//! JSON snapshot store for the home graph.
//!
//! The store owns the node and edge maps and nothing else: it never checks that
//! an edge's endpoints exist. Snapshots are written to a sibling temp file and
//! renamed into place. Edges are persisted with a reduced field set
//! (`id, from, to, type, updated_at, weight`); their meta and evidence stay in
//! memory only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::{Edge, EdgeType, GraphError, GraphResult, Meta, Millis, Node};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Deterministic edge identity for `(from_id, edge_type, to_id)`.
pub fn edge_id(from_id: &str, edge_type: EdgeType, to_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(from_id.as_bytes());
    hasher.update(b"|");
    hasher.update(edge_type.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(to_id.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest[..16].iter().map(|b| format!("{b:02x}")).collect();
    format!("e:{hex}")
}

/// Outcome of [`GraphStore::load`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub nodes_loaded: usize,
    pub edges_loaded: usize,
    pub skipped: usize,
}

/// Outcome of [`GraphStore::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub path: PathBuf,
    pub nodes: usize,
    pub edges: usize,
    pub bytes: usize,
}

/// Persisted edge shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EdgeRecord {
    id: String,
    from: String,
    to: String,
    #[serde(rename = "type")]
    edge_type: EdgeType,
    updated_at: Millis,
    weight: f64,
}

impl From<&Edge> for EdgeRecord {
    fn from(edge: &Edge) -> Self {
        Self {
            id: edge.id.clone(),
            from: edge.from_id.clone(),
            to: edge.to_id.clone(),
            edge_type: edge.edge_type,
            updated_at: edge.updated_at,
            weight: edge.weight,
        }
    }
}

impl From<EdgeRecord> for Edge {
    fn from(rec: EdgeRecord) -> Self {
        Edge {
            id: edge_id(&rec.from, rec.edge_type, &rec.to),
            from_id: rec.from,
            to_id: rec.to,
            edge_type: rec.edge_type,
            weight: rec.weight.max(0.0),
            updated_at: rec.updated_at,
            evidence: None,
            meta: Meta::new(),
        }
    }
}

#[derive(Serialize)]
struct SerializedSnapshot<'a> {
    version: u32,
    nodes: Vec<&'a Node>,
    edges: Vec<EdgeRecord>,
}

#[derive(Deserialize)]
struct DeserializedSnapshot {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    nodes: Vec<Value>,
    #[serde(default)]
    edges: Vec<Value>,
}

/// In-memory node/edge maps with best-effort snapshot persistence.
#[derive(Debug, Default)]
pub struct GraphStore {
    path: Option<PathBuf>,
    nodes: HashMap<String, Node>,
    edges: HashMap<String, Edge>,
    save_lock: Mutex<()>,
}

impl GraphStore {
    /// Create an empty store with no backing file.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Create an empty store backed by `path` without reading it.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Create a store backed by `path` and load whatever it holds.
    ///
    /// A missing or corrupt file yields an empty graph; the problem is logged,
    /// never returned.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let mut store = Self::with_path(path);
        match store.load() {
            Ok(report) => tracing::info!(
                nodes = report.nodes_loaded,
                edges = report.edges_loaded,
                skipped = report.skipped,
                "Graph snapshot loaded"
            ),
            Err(e) => tracing::warn!("Graph snapshot unreadable, starting empty: {e}"),
        }
        store
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replace the in-memory maps with the snapshot on disk.
    ///
    /// Individual malformed records are skipped. If the document itself cannot
    /// be read or parsed, the store is left empty and the error is returned.
    pub fn load(&mut self) -> GraphResult<LoadReport> {
        self.nodes.clear();
        self.edges.clear();

        let Some(path) = self.path.clone() else {
            return Ok(LoadReport::default());
        };
        if !path.exists() {
            tracing::debug!("No graph snapshot at {}", path.display());
            return Ok(LoadReport::default());
        }

        let bytes = std::fs::read(&path)?;
        let doc: DeserializedSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| GraphError::Corrupt(format!("{}: {e}", path.display())))?;

        if let Some(version) = doc.version {
            if version > SNAPSHOT_VERSION {
                tracing::warn!("Snapshot version {version} is newer than {SNAPSHOT_VERSION}");
            }
        }

        let mut report = LoadReport::default();

        for raw in doc.nodes {
            match serde_json::from_value::<Node>(raw) {
                Ok(mut node) if !node.id.is_empty() => {
                    node.score = node.score.max(0.0);
                    self.nodes.insert(node.id.clone(), node);
                    report.nodes_loaded += 1;
                }
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!("Skipping malformed node record: {e}");
                    report.skipped += 1;
                }
            }
        }

        for raw in doc.edges {
            match serde_json::from_value::<EdgeRecord>(raw) {
                Ok(rec) => {
                    let edge = Edge::from(rec);
                    self.edges.insert(edge.id.clone(), edge);
                    report.edges_loaded += 1;
                }
                Err(e) => {
                    tracing::warn!("Skipping malformed edge record: {e}");
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }

    /// Write the current maps to the backing file.
    pub fn save(&self) -> GraphResult<SaveReport> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| GraphError::Storage("store has no backing file".to_string()))?;

        let _guard = self
            .save_lock
            .lock()
            .map_err(|e| GraphError::Storage(format!("save lock poisoned: {e}")))?;

        let mut nodes: Vec<&Node> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut edges: Vec<EdgeRecord> = self.edges.values().map(EdgeRecord::from).collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));

        let payload = serde_json::to_vec(&SerializedSnapshot {
            version: SNAPSHOT_VERSION,
            nodes,
            edges,
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "graph.json".to_string());
        let tmp = path.with_file_name(format!("{file_name}.tmp"));

        let written = std::fs::write(&tmp, &payload).and_then(|()| std::fs::rename(&tmp, path));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        Ok(SaveReport {
            path: path.clone(),
            nodes: self.nodes.len(),
            edges: self.edges.len(),
            bytes: payload.len(),
        })
    }

    // ==================== Node access ====================

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn insert_node(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Keep only nodes for which `keep` returns true. Returns the removed count.
    pub fn retain_nodes(&mut self, mut keep: impl FnMut(&Node) -> bool) -> usize {
        let before = self.nodes.len();
        self.nodes.retain(|_, n| keep(n));
        before - self.nodes.len()
    }

    // ==================== Edge access ====================

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn edge_mut(&mut self, id: &str) -> Option<&mut Edge> {
        self.edges.get_mut(id)
    }

    pub fn insert_edge(&mut self, edge: Edge) {
        self.edges.insert(edge.id.clone(), edge);
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Keep only edges for which `keep` returns true. Returns the removed count.
    pub fn retain_edges(&mut self, mut keep: impl FnMut(&Edge) -> bool) -> usize {
        let before = self.edges.len();
        self.edges.retain(|_, e| keep(e));
        before - self.edges.len()
    }
}
