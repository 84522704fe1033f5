//! Graph service: decayed writes, bounded pruning, and privacy-minimized export.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::GraphConfig;
use crate::decay::{edge_effective_weight, node_effective_score, rank_desc};
use crate::sanitize::{merge_meta, sanitize_meta};
use crate::storage::{edge_id, GraphStore, SaveReport};
use crate::types::{
    now_ms, Edge, EdgeType, Evidence, GraphError, GraphResult, Meta, Millis, Node, NodeKind,
};

/// Version tag of the export document.
pub const EXPORT_VERSION: u32 = 1;

/// Upper bound on neighborhood expansion.
pub const MAX_HOPS: u32 = 2;

const ZONE_PREFIX: &str = "zone:";

/// Arguments for [`GraphService::touch_node`].
#[derive(Debug, Clone)]
pub struct NodeTouch {
    pub id: String,
    pub delta: f64,
    pub kind: Option<NodeKind>,
    pub label: Option<String>,
    pub domain: Option<String>,
    pub tags: Option<Vec<String>>,
    pub source: Option<String>,
    pub meta_patch: Option<Map<String, Value>>,
    pub now: Option<Millis>,
}

impl NodeTouch {
    pub fn new(id: impl Into<String>, delta: f64) -> Self {
        Self {
            id: id.into(),
            delta,
            kind: None,
            label: None,
            domain: None,
            tags: None,
            source: None,
            meta_patch: None,
            now: None,
        }
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_meta(mut self, patch: Map<String, Value>) -> Self {
        self.meta_patch = Some(patch);
        self
    }

    pub fn at(mut self, now: Millis) -> Self {
        self.now = Some(now);
        self
    }
}

/// Arguments for [`GraphService::touch_edge`].
#[derive(Debug, Clone)]
pub struct EdgeTouch {
    pub from_id: String,
    pub edge_type: EdgeType,
    pub to_id: String,
    pub delta: f64,
    pub evidence: Option<Evidence>,
    pub meta_patch: Option<Map<String, Value>>,
    pub now: Option<Millis>,
}

impl EdgeTouch {
    pub fn new(
        from_id: impl Into<String>,
        edge_type: EdgeType,
        to_id: impl Into<String>,
        delta: f64,
    ) -> Self {
        Self {
            from_id: from_id.into(),
            edge_type,
            to_id: to_id.into(),
            delta,
            evidence: None,
            meta_patch: None,
            now: None,
        }
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = Some(evidence);
        self
    }

    pub fn with_meta(mut self, patch: Map<String, Value>) -> Self {
        self.meta_patch = Some(patch);
        self
    }

    pub fn at(mut self, now: Millis) -> Self {
        self.now = Some(now);
        self
    }
}

/// Per-phase removal counts from [`GraphService::prune`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub edges_below_min: usize,
    pub edges_over_cap: usize,
    pub nodes_below_min: usize,
    pub nodes_over_cap: usize,
    pub orphaned_edges: usize,
    pub nodes_remaining: usize,
    pub edges_remaining: usize,
}

impl PruneReport {
    pub fn nodes_removed(&self) -> usize {
        self.nodes_below_min + self.nodes_over_cap
    }

    pub fn edges_removed(&self) -> usize {
        self.edges_below_min + self.edges_over_cap + self.orphaned_edges
    }
}

/// Filters and limits for [`GraphService::export_state`].
#[derive(Debug, Clone)]
pub struct ExportQuery {
    pub kinds: Option<Vec<NodeKind>>,
    pub domains: Option<Vec<String>>,
    pub center: Option<String>,
    pub hops: Option<u32>,
    pub limit_nodes: usize,
    pub limit_edges: usize,
}

impl Default for ExportQuery {
    fn default() -> Self {
        Self {
            kinds: None,
            domains: None,
            center: None,
            hops: None,
            limit_nodes: 200,
            limit_edges: 400,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExportLimits {
    pub nodes_max: usize,
    pub edges_max: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportNode {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub score: f64,
    pub updated_at: Millis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub weight: f64,
    pub updated_at: Millis,
}

/// Privacy-minimized graph view: no meta, no evidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphExport {
    pub version: u32,
    pub generated_at: Millis,
    pub limits: ExportLimits,
    pub nodes: Vec<ExportNode>,
    pub edges: Vec<ExportEdge>,
}

/// Nodes and edges reachable from a center within a hop budget.
#[derive(Debug, Clone, Default)]
pub struct Neighborhood {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// An entity that belongs to a zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneEntity {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Counts and averages over the current graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub nodes_by_kind: BTreeMap<NodeKind, usize>,
    pub edges_by_type: BTreeMap<EdgeType, usize>,
    pub mean_effective_score: f64,
    pub mean_effective_weight: f64,
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Normalize a zone reference to its node id.
pub fn zone_node_id(zone: &str) -> String {
    if zone.starts_with(ZONE_PREFIX) {
        zone.to_string()
    } else {
        format!("{ZONE_PREFIX}{zone}")
    }
}

/// Decaying graph over a [`GraphStore`].
///
/// All mutation goes through `&mut self`; a caller sharing the service across
/// threads must wrap it in a lock.
#[derive(Debug)]
pub struct GraphService {
    store: GraphStore,
    config: GraphConfig,
}

impl GraphService {
    pub fn new(store: GraphStore, config: GraphConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn effective_score(&self, node: &Node, now: Millis) -> f64 {
        node_effective_score(node, now, self.config.node_half_life_ms())
    }

    pub fn effective_weight(&self, edge: &Edge, now: Millis) -> f64 {
        edge_effective_weight(edge, now, self.config.edge_half_life_ms())
    }

    fn sanitized_patch(&self, patch: Option<&Map<String, Value>>) -> Option<Meta> {
        sanitize_meta(
            patch?,
            self.config.meta_max_bytes,
            self.config.meta_max_string_chars,
        )
    }

    // ==================== Writes ====================

    /// Create or accumulate a node and return its new state.
    pub fn touch_node(&mut self, touch: NodeTouch) -> Node {
        let now = touch.now.unwrap_or_else(now_ms);
        let patch = self.sanitized_patch(touch.meta_patch.as_ref());
        let max_bytes = self.config.meta_max_bytes;

        if let Some(node) = self.store.node_mut(&touch.id) {
            node.score = (node.score + touch.delta).max(0.0);
            node.updated_at = now;
            if let Some(label) = touch.label {
                node.label = label;
            }
            if let Some(domain) = touch.domain {
                node.domain = Some(domain);
            }
            if let Some(tags) = touch.tags {
                node.tags = tags;
            }
            if let Some(source) = touch.source {
                node.source = Some(source);
            }
            if let Some(patch) = patch {
                match merge_meta(&node.meta, patch, max_bytes) {
                    Some(merged) => node.meta = merged,
                    None => tracing::debug!(node = %node.id, "meta patch dropped"),
                }
            }
            return node.clone();
        }

        let node = Node {
            label: touch.label.unwrap_or_else(|| touch.id.clone()),
            id: touch.id,
            kind: touch.kind.unwrap_or(NodeKind::Entity),
            domain: touch.domain,
            updated_at: now,
            score: touch.delta.max(0.0),
            tags: touch.tags.unwrap_or_default(),
            meta: patch.unwrap_or_default(),
            source: touch.source,
        };
        self.store.insert_node(node.clone());
        node
    }

    /// Create or accumulate the edge identified by `(from, type, to)`.
    pub fn touch_edge(&mut self, touch: EdgeTouch) -> Edge {
        let now = touch.now.unwrap_or_else(now_ms);
        let id = edge_id(&touch.from_id, touch.edge_type, &touch.to_id);
        let patch = self.sanitized_patch(touch.meta_patch.as_ref());
        let max_bytes = self.config.meta_max_bytes;

        if let Some(edge) = self.store.edge_mut(&id) {
            edge.weight = (edge.weight + touch.delta).max(0.0);
            edge.updated_at = now;
            if let Some(evidence) = touch.evidence {
                edge.evidence = Some(evidence);
            }
            if let Some(patch) = patch {
                match merge_meta(&edge.meta, patch, max_bytes) {
                    Some(merged) => edge.meta = merged,
                    None => tracing::debug!(edge = %edge.id, "meta patch dropped"),
                }
            }
            return edge.clone();
        }

        let edge = Edge {
            id,
            from_id: touch.from_id,
            to_id: touch.to_id,
            edge_type: touch.edge_type,
            weight: touch.delta.max(0.0),
            updated_at: now,
            evidence: touch.evidence,
            meta: patch.unwrap_or_default(),
        };
        self.store.insert_edge(edge.clone());
        edge
    }

    // ==================== Pruning ====================

    /// Evict decayed and over-capacity items.
    ///
    /// Phases run in a fixed order: low-weight edges, edge cap, incidence,
    /// low-score unreferenced nodes, node cap with orphan-edge cleanup.
    pub fn prune(&mut self, now: Option<Millis>) -> PruneReport {
        let now = now.unwrap_or_else(now_ms);
        let edge_hl = self.config.edge_half_life_ms();
        let node_hl = self.config.node_half_life_ms();
        let mut report = PruneReport::default();

        // 1. low effective weight
        let edge_min = self.config.edge_min;
        report.edges_below_min = self
            .store
            .retain_edges(|e| edge_effective_weight(e, now, edge_hl) >= edge_min);

        // 2. edge cap
        if self.store.edge_count() > self.config.edges_max {
            let keep = top_k_ids(
                self.store
                    .edges()
                    .map(|e| (e.id.as_str(), edge_effective_weight(e, now, edge_hl), e.updated_at)),
                self.config.edges_max,
            );
            report.edges_over_cap = self.store.retain_edges(|e| keep.contains(&e.id));
        }

        // 3. incidence
        let incident: HashSet<String> = self
            .store
            .edges()
            .flat_map(|e| [e.from_id.clone(), e.to_id.clone()])
            .collect();

        // 4. low score and unreferenced
        let node_min = self.config.node_min;
        report.nodes_below_min = self.store.retain_nodes(|n| {
            incident.contains(&n.id) || node_effective_score(n, now, node_hl) >= node_min
        });

        // 5. node cap, then edges left dangling by it
        if self.store.node_count() > self.config.nodes_max {
            let keep = top_k_ids(
                self.store
                    .nodes()
                    .map(|n| (n.id.as_str(), node_effective_score(n, now, node_hl), n.updated_at)),
                self.config.nodes_max,
            );
            let mut evicted: HashSet<String> = HashSet::new();
            report.nodes_over_cap = self.store.retain_nodes(|n| {
                let kept = keep.contains(&n.id);
                if !kept {
                    evicted.insert(n.id.clone());
                }
                kept
            });
            report.orphaned_edges = self
                .store
                .retain_edges(|e| !evicted.contains(&e.from_id) && !evicted.contains(&e.to_id));
        }

        report.nodes_remaining = self.store.node_count();
        report.edges_remaining = self.store.edge_count();

        if report.nodes_removed() + report.edges_removed() > 0 {
            tracing::debug!(
                nodes_removed = report.nodes_removed(),
                edges_removed = report.edges_removed(),
                nodes = report.nodes_remaining,
                edges = report.edges_remaining,
                "Pruned graph"
            );
        }
        report
    }

    // ==================== Reads ====================

    pub fn get_node(&self, id: &str) -> Option<Node> {
        self.store.node(id).cloned()
    }

    /// Point-in-time copy of every edge.
    pub fn get_edges(&self) -> Vec<Edge> {
        self.store.edges().cloned().collect()
    }

    /// Point-in-time copy of every node.
    pub fn get_nodes(&self) -> Vec<Node> {
        self.store.nodes().cloned().collect()
    }

    /// Breadth-first expansion from `center` over at most `MAX_HOPS` hops,
    /// following edges in both directions. Only stored nodes are returned.
    fn expand(&self, center: &str, hops: u32) -> HashSet<String> {
        let mut seen: HashSet<String> = HashSet::new();
        if !self.store.contains_node(center) {
            return seen;
        }
        let hops = hops.min(MAX_HOPS);

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in self.store.edges() {
            adjacency
                .entry(edge.from_id.as_str())
                .or_default()
                .push(edge.to_id.as_str());
            adjacency
                .entry(edge.to_id.as_str())
                .or_default()
                .push(edge.from_id.as_str());
        }

        let mut queue: VecDeque<(&str, u32)> = VecDeque::new();
        seen.insert(center.to_string());
        queue.push_back((center, 0));

        while let Some((id, depth)) = queue.pop_front() {
            if depth >= hops {
                continue;
            }
            for &next in adjacency.get(id).into_iter().flatten() {
                if self.store.contains_node(next) && seen.insert(next.to_string()) {
                    queue.push_back((next, depth + 1));
                }
            }
        }
        seen
    }

    /// Nodes within `hops` of `center` and the edges among them.
    pub fn get_neighborhood(&self, center: &str, hops: u32) -> Neighborhood {
        let ids = self.expand(center, hops);
        let nodes = ids.iter().filter_map(|id| self.store.node(id).cloned()).collect();
        let edges = self
            .store
            .edges()
            .filter(|e| ids.contains(&e.from_id) && ids.contains(&e.to_id))
            .cloned()
            .collect();
        Neighborhood { nodes, edges }
    }

    /// Entities linked into a zone by an `in_zone` edge.
    pub fn get_zone_entities(&self, zone: &str) -> GraphResult<Vec<ZoneEntity>> {
        let zone_id = zone_node_id(zone);
        if !self.store.contains_node(&zone_id) {
            return Err(GraphError::ZoneNotFound(zone.to_string()));
        }

        let mut entities: Vec<ZoneEntity> = self
            .store
            .edges()
            .filter(|e| e.edge_type == EdgeType::InZone && e.to_id == zone_id)
            .map(|e| match self.store.node(&e.from_id) {
                Some(node) => ZoneEntity {
                    id: node.id.clone(),
                    label: node.label.clone(),
                    domain: node.domain.clone(),
                },
                None => ZoneEntity {
                    id: e.from_id.clone(),
                    label: e.from_id.clone(),
                    domain: None,
                },
            })
            .collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        entities.dedup_by(|a, b| a.id == b.id);
        Ok(entities)
    }

    /// Prune, then return a filtered or neighborhood view of the graph.
    pub fn export_state(&mut self, query: &ExportQuery, now: Option<Millis>) -> GraphResult<GraphExport> {
        if query.limit_nodes == 0 || query.limit_edges == 0 {
            return Err(GraphError::InvalidInput(
                "limit_nodes and limit_edges must be at least 1".to_string(),
            ));
        }
        let now = now.unwrap_or_else(now_ms);
        self.prune(Some(now));

        let mut candidates: Vec<&Node> = match &query.center {
            Some(center) => {
                let ids = self.expand(center, query.hops.unwrap_or(1));
                ids.iter().filter_map(|id| self.store.node(id)).collect()
            }
            None => self
                .store
                .nodes()
                .filter(|n| query.kinds.as_ref().map_or(true, |ks| ks.contains(&n.kind)))
                .filter(|n| {
                    query.domains.as_ref().map_or(true, |ds| {
                        n.domain.as_ref().is_some_and(|d| ds.iter().any(|x| x == d))
                    })
                })
                .collect(),
        };

        candidates.sort_by(|a, b| {
            rank_desc(
                (self.effective_score(a, now), a.updated_at),
                (self.effective_score(b, now), b.updated_at),
            )
            .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(query.limit_nodes.min(self.config.nodes_max));

        let kept: HashSet<&str> = candidates.iter().map(|n| n.id.as_str()).collect();

        let mut edges: Vec<&Edge> = self
            .store
            .edges()
            .filter(|e| kept.contains(e.from_id.as_str()) && kept.contains(e.to_id.as_str()))
            .collect();
        edges.sort_by(|a, b| {
            rank_desc(
                (self.effective_weight(a, now), a.updated_at),
                (self.effective_weight(b, now), b.updated_at),
            )
            .then_with(|| a.id.cmp(&b.id))
        });
        edges.truncate(query.limit_edges.min(self.config.edges_max));

        Ok(GraphExport {
            version: EXPORT_VERSION,
            generated_at: now,
            limits: ExportLimits {
                nodes_max: self.config.nodes_max,
                edges_max: self.config.edges_max,
            },
            nodes: candidates
                .iter()
                .map(|n| ExportNode {
                    id: n.id.clone(),
                    kind: n.kind,
                    label: n.label.clone(),
                    domain: n.domain.clone(),
                    score: round4(self.effective_score(n, now)),
                    updated_at: n.updated_at,
                })
                .collect(),
            edges: edges
                .iter()
                .map(|e| ExportEdge {
                    id: e.id.clone(),
                    from: e.from_id.clone(),
                    to: e.to_id.clone(),
                    edge_type: e.edge_type,
                    weight: round4(self.effective_weight(e, now)),
                    updated_at: e.updated_at,
                })
                .collect(),
        })
    }

    pub fn stats(&self, now: Option<Millis>) -> GraphStats {
        let now = now.unwrap_or_else(now_ms);
        let mut nodes_by_kind = BTreeMap::new();
        let mut score_sum = 0.0;
        for node in self.store.nodes() {
            *nodes_by_kind.entry(node.kind).or_insert(0) += 1;
            score_sum += self.effective_score(node, now);
        }
        let mut edges_by_type = BTreeMap::new();
        let mut weight_sum = 0.0;
        for edge in self.store.edges() {
            *edges_by_type.entry(edge.edge_type).or_insert(0) += 1;
            weight_sum += self.effective_weight(edge, now);
        }
        let nodes = self.store.node_count();
        let edges = self.store.edge_count();
        GraphStats {
            nodes,
            edges,
            nodes_by_kind,
            edges_by_type,
            mean_effective_score: if nodes == 0 { 0.0 } else { round4(score_sum / nodes as f64) },
            mean_effective_weight: if edges == 0 { 0.0 } else { round4(weight_sum / edges as f64) },
        }
    }

    // ==================== Persistence ====================

    /// Prune, then snapshot to disk. In-memory state is unaffected by failure.
    pub fn persist(&mut self, now: Option<Millis>) -> GraphResult<SaveReport> {
        self.prune(now);
        self.store.save()
    }
}

/// Ids of the `k` highest-ranked items by `(value, updated_at)` descending.
fn top_k_ids<'a>(items: impl Iterator<Item = (&'a str, f64, Millis)>, k: usize) -> HashSet<String> {
    let mut ranked: Vec<(&str, f64, Millis)> = items.collect();
    ranked.sort_by(|a, b| rank_desc((a.1, a.2), (b.1, b.2)).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().take(k).map(|(id, _, _)| id.to_string()).collect()
}
