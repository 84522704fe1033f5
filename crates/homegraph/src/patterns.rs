//! Temporal "A then B" pattern mining over intentional-action edges.
//!
//! Service-call edges are turned into time-ordered actions, split into
//! sessions at quiet gaps, and scanned pairwise within a delta window.
//! Each ordered pair is scored with association-rule statistics against the
//! whole session population: support, confidence and lift.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;

use crate::config::MinerConfig;
use crate::service::{GraphService, ZoneEntity};
use crate::types::{now_ms, Edge, GraphError, GraphResult, Millis, Node};

/// Separator between antecedent and consequent in a pattern id.
pub const PATTERN_ARROW: &str = "→";

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Read access the miner needs from a graph.
pub trait GraphSource {
    /// Point-in-time copy of all edges.
    fn edges_snapshot(&self) -> Vec<Edge>;

    fn node(&self, id: &str) -> Option<Node>;

    fn zone_entities(&self, zone: &str) -> GraphResult<Vec<ZoneEntity>>;
}

impl GraphSource for GraphService {
    fn edges_snapshot(&self) -> Vec<Edge> {
        self.get_edges()
    }

    fn node(&self, id: &str) -> Option<Node> {
        self.get_node(id)
    }

    fn zone_entities(&self, zone: &str) -> GraphResult<Vec<ZoneEntity>> {
        self.get_zone_entities(zone)
    }
}

/// One intentional action: a service applied to an entity at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    pub timestamp: Millis,
    pub service: String,
    pub entity: String,
}

impl Action {
    pub fn new(timestamp: Millis, service: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            timestamp,
            service: service.into(),
            entity: entity.into(),
        }
    }

    /// Label used on either side of a pattern.
    pub fn label(&self) -> String {
        format!("{}:{}", self.service, self.entity)
    }
}

/// A run of actions with no gap above the debounce window.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub index: usize,
    pub actions: Vec<Action>,
}

/// A single antecedent/consequent observation inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub session: usize,
    pub antecedent_at: Millis,
    pub consequent_at: Millis,
}

/// Accumulated observations for one ordered pair.
#[derive(Debug, Clone, Default)]
pub struct Candidate {
    pub antecedent: String,
    pub consequent: String,
    pub occurrences: Vec<Occurrence>,
    pub sessions: BTreeSet<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PatternEvidence {
    pub support: f64,
    pub confidence: f64,
    pub lift: f64,
    pub count: usize,
    pub total_sessions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredPattern {
    pub pattern_id: String,
    pub antecedent: String,
    pub consequent: String,
    pub evidence: PatternEvidence,
    pub discovered_at: Millis,
}

pub fn pattern_id(antecedent: &str, consequent: &str) -> String {
    format!("{antecedent}{PATTERN_ARROW}{consequent}")
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Label for a node: its stored label, or the id after the first `:`.
fn label_for<S: GraphSource + ?Sized>(
    source: &S,
    id: &str,
    cache: &mut HashMap<String, String>,
) -> String {
    if let Some(label) = cache.get(id) {
        return label.clone();
    }
    let label = source
        .node(id)
        .map(|n| n.label)
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| id.split_once(':').map_or(id, |(_, rest)| rest).to_string());
    cache.insert(id.to_string(), label.clone());
    label
}

/// Per-label session membership for one mining run.
///
/// A session "contains" a label when any of its actions carries it, and is
/// "led" by a label when that label opens at least one candidate pair there.
/// Confidence is conditioned on the latter: a trailing action with nothing
/// after it inside the delta window is not an antecedent.
#[derive(Debug, Clone, Default)]
pub struct SessionIndex {
    total: usize,
    containing: HashMap<String, HashSet<usize>>,
    leading: HashMap<String, HashSet<usize>>,
}

impl SessionIndex {
    pub fn build(sessions: &[Session], candidates: &BTreeMap<String, Candidate>) -> Self {
        let mut index = Self {
            total: sessions.len(),
            ..Self::default()
        };
        for session in sessions {
            for action in &session.actions {
                index
                    .containing
                    .entry(action.label())
                    .or_default()
                    .insert(session.index);
            }
        }
        for candidate in candidates.values() {
            index
                .leading
                .entry(candidate.antecedent.clone())
                .or_default()
                .extend(candidate.sessions.iter().copied());
        }
        index
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn containing(&self, label: &str) -> usize {
        self.containing.get(label).map_or(0, HashSet::len)
    }

    pub fn leading(&self, label: &str) -> usize {
        self.leading.get(label).map_or(0, HashSet::len)
    }
}

/// Association-rule miner for temporal action pairs.
#[derive(Debug, Clone, Default)]
pub struct PatternMiner {
    config: MinerConfig,
}

impl PatternMiner {
    pub fn new(config: MinerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MinerConfig {
        &self.config
    }

    /// Collect action edges from the last `lookback_ms`, optionally restricted to
    /// entities in `zone`, and split them into sessions.
    pub fn extract_sessions<S: GraphSource + ?Sized>(
        &self,
        source: &S,
        lookback_ms: Millis,
        zone: Option<&str>,
        now: Millis,
    ) -> GraphResult<Vec<Session>> {
        if lookback_ms <= 0 {
            return Ok(Vec::new());
        }
        let cutoff = now.saturating_sub(lookback_ms);

        let members: Option<HashSet<String>> = match zone {
            Some(z) => Some(source.zone_entities(z)?.into_iter().map(|e| e.id).collect()),
            None => None,
        };

        let mut edges: Vec<Edge> = source
            .edges_snapshot()
            .into_iter()
            .filter(|e| e.edge_type == self.config.action_edge_type)
            .filter(|e| e.from_id.starts_with(&self.config.service_prefix))
            .filter(|e| e.updated_at >= cutoff && e.updated_at <= now)
            .filter(|e| members.as_ref().map_or(true, |m| m.contains(&e.to_id)))
            .collect();
        edges.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));

        let mut labels: HashMap<String, String> = HashMap::new();
        let actions = edges
            .iter()
            .map(|e| {
                let service = match source.node(&e.from_id) {
                    Some(n) if !n.label.is_empty() => n.label,
                    _ => e.from_id[self.config.service_prefix.len()..].to_string(),
                };
                Action {
                    timestamp: e.updated_at,
                    service,
                    entity: label_for(source, &e.to_id, &mut labels),
                }
            })
            .collect();

        Ok(self.sessions_from_actions(actions))
    }

    /// Split time-sorted actions into sessions at gaps above the debounce
    /// window, or when a session reaches `max_session_actions`.
    pub fn sessions_from_actions(&self, actions: Vec<Action>) -> Vec<Session> {
        let debounce = self.config.debounce_window_ms();
        let cap = self.config.max_session_actions.max(1);

        let mut sessions: Vec<Session> = Vec::new();
        let mut current: Vec<Action> = Vec::new();

        for action in actions {
            let split = current.last().is_some_and(|prev| {
                action.timestamp.saturating_sub(prev.timestamp) > debounce
                    || current.len() >= cap
            });
            if split {
                sessions.push(Session {
                    index: sessions.len(),
                    actions: std::mem::take(&mut current),
                });
            }
            current.push(action);
        }
        if !current.is_empty() {
            sessions.push(Session {
                index: sessions.len(),
                actions: current,
            });
        }
        sessions
    }

    /// Ordered pairs within the delta window, keyed by pattern id.
    pub fn discover_candidates(&self, sessions: &[Session]) -> BTreeMap<String, Candidate> {
        let window = self.config.delta_window_ms();
        let mut candidates: BTreeMap<String, Candidate> = BTreeMap::new();

        for session in sessions {
            let labels: Vec<String> = session.actions.iter().map(Action::label).collect();
            for i in 0..session.actions.len() {
                let a = &session.actions[i];
                for j in (i + 1)..session.actions.len() {
                    let b = &session.actions[j];
                    // sorted, so nothing later fits either
                    if b.timestamp.saturating_sub(a.timestamp) > window {
                        break;
                    }
                    if labels[i] == labels[j] {
                        continue;
                    }
                    let entry = candidates
                        .entry(pattern_id(&labels[i], &labels[j]))
                        .or_insert_with(|| Candidate {
                            antecedent: labels[i].clone(),
                            consequent: labels[j].clone(),
                            ..Candidate::default()
                        });
                    entry.occurrences.push(Occurrence {
                        session: session.index,
                        antecedent_at: a.timestamp,
                        consequent_at: b.timestamp,
                    });
                    entry.sessions.insert(session.index);
                }
            }
        }
        candidates
    }

    /// Support, confidence and lift of `candidate` against the indexed
    /// session population.
    pub fn score(&self, candidate: &Candidate, index: &SessionIndex) -> PatternEvidence {
        let total = index.total;
        let with_pair = candidate.sessions.len();
        let with_antecedent = index.leading(&candidate.antecedent);
        let with_consequent = index.containing(&candidate.consequent);

        let support = ratio(with_pair, total);
        let confidence = ratio(with_pair, with_antecedent);
        let p_consequent = ratio(with_consequent, total);
        let lift = if p_consequent > 0.0 {
            confidence / p_consequent
        } else {
            0.0
        };

        PatternEvidence {
            support,
            confidence,
            lift,
            count: candidate.occurrences.len(),
            total_sessions: total,
        }
    }

    fn passes(&self, evidence: &PatternEvidence) -> bool {
        evidence.confidence >= self.config.min_confidence
            && evidence.support >= self.config.min_support
            && evidence.lift >= self.config.min_lift
    }

    /// Discover, score and filter patterns in already-built sessions.
    pub fn mine_sessions(
        &self,
        sessions: &[Session],
        now: Millis,
    ) -> BTreeMap<String, DiscoveredPattern> {
        let candidates = self.discover_candidates(sessions);
        let candidate_count = candidates.len();
        let index = SessionIndex::build(sessions, &candidates);

        let patterns: BTreeMap<String, DiscoveredPattern> = candidates
            .into_iter()
            .filter_map(|(id, candidate)| {
                let evidence = self.score(&candidate, &index);
                self.passes(&evidence).then(|| {
                    (
                        id.clone(),
                        DiscoveredPattern {
                            pattern_id: id,
                            antecedent: candidate.antecedent,
                            consequent: candidate.consequent,
                            evidence,
                            discovered_at: now,
                        },
                    )
                })
            })
            .collect();

        tracing::debug!(
            sessions = sessions.len(),
            candidates = candidate_count,
            patterns = patterns.len(),
            "Mined temporal patterns"
        );
        patterns
    }

    /// Mine patterns from the last `lookback_hours` of action edges.
    ///
    /// Never fails: an empty window yields no patterns, and an unknown zone
    /// yields no patterns plus a warning.
    pub fn mine_patterns<S: GraphSource + ?Sized>(
        &self,
        source: &S,
        lookback_hours: f64,
        zone: Option<&str>,
        now: Option<Millis>,
    ) -> BTreeMap<String, DiscoveredPattern> {
        let now = now.unwrap_or_else(now_ms);
        if !lookback_hours.is_finite() || lookback_hours <= 0.0 {
            return BTreeMap::new();
        }
        let lookback_ms = (lookback_hours * MS_PER_HOUR) as Millis;

        let sessions = match self.extract_sessions(source, lookback_ms, zone, now) {
            Ok(sessions) => sessions,
            Err(GraphError::ZoneNotFound(z)) => {
                tracing::warn!("Zone not found, no patterns mined: {z}");
                return BTreeMap::new();
            }
            Err(e) => {
                tracing::warn!("Session extraction failed: {e}");
                return BTreeMap::new();
            }
        };
        self.mine_sessions(&sessions, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::service::{EdgeTouch, NodeTouch};
    use crate::storage::GraphStore;
    use crate::types::{EdgeType, NodeKind};

    const T0: Millis = 1_700_000_000_000;
    const MIN: Millis = 60_000;

    fn relaxed() -> PatternMiner {
        PatternMiner::new(MinerConfig {
            min_confidence: 0.0,
            min_support: 0.0,
            min_lift: 0.0,
            ..MinerConfig::default()
        })
    }

    fn act(ts: Millis, entity: &str) -> Action {
        Action::new(ts, "turn_on", entity)
    }

    #[test]
    fn test_sessions_split_on_debounce_gap() {
        let miner = PatternMiner::default();
        let sessions = miner.sessions_from_actions(vec![
            act(T0, "a"),
            act(T0 + 4 * MIN, "b"),
            act(T0 + 10 * MIN, "c"),
            act(T0 + 15 * MIN, "d"),
        ]);
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].actions.len(), 2);
        assert_eq!(sessions[1].actions.len(), 2);
        assert_eq!(sessions[1].index, 1);
    }

    #[test]
    fn test_sessions_capped_in_length() {
        let miner = PatternMiner::new(MinerConfig {
            max_session_actions: 3,
            ..MinerConfig::default()
        });
        let actions = (0..7).map(|i| act(T0 + i * 1000, "x")).collect();
        let sessions = miner.sessions_from_actions(actions);
        let lens: Vec<usize> = sessions.iter().map(|s| s.actions.len()).collect();
        assert_eq!(lens, vec![3, 3, 1]);
    }

    #[test]
    fn test_lone_antecedent_session_not_counted_for_confidence() {
        let miner = PatternMiner::default();
        let t1 = T0 + 60 * MIN;
        let sessions = miner.sessions_from_actions(vec![
            act(T0, "kitchen_light"),
            act(t1, "kitchen_light"),
            act(t1 + MIN, "coffee_switch"),
        ]);
        assert_eq!(sessions.len(), 2);

        let patterns = miner.mine_sessions(&sessions, T0);
        let id = pattern_id("turn_on:kitchen_light", "turn_on:coffee_switch");
        let p = patterns.get(&id).expect("pattern mined");
        assert_eq!(p.evidence.support, 0.5);
        assert_eq!(p.evidence.count, 1);
        assert_eq!(p.evidence.confidence, 1.0);
        assert_eq!(p.evidence.lift, 2.0);
        assert_eq!(p.evidence.total_sessions, 2);
        assert_eq!(p.pattern_id, id);
    }

    #[test]
    fn test_always_together_lift_is_inverse_base_rate() {
        let miner = relaxed();
        let mut actions = Vec::new();
        for k in 0..4 {
            let t = T0 + k * 60 * MIN;
            actions.push(act(t, "a"));
            actions.push(act(t + MIN, "b"));
        }
        let sessions = miner.sessions_from_actions(actions);
        let patterns = miner.mine_sessions(&sessions, T0);
        let p = &patterns[&pattern_id("turn_on:a", "turn_on:b")];
        assert_eq!(p.evidence.support, 1.0);
        assert_eq!(p.evidence.confidence, 1.0);
        assert_eq!(p.evidence.lift, 1.0);
        assert_eq!(p.evidence.count, 4);
    }

    #[test]
    fn test_no_self_pairs() {
        let miner = relaxed();
        let sessions = miner.sessions_from_actions(vec![
            act(T0, "a"),
            act(T0 + MIN, "a"),
            act(T0 + 2 * MIN, "a"),
        ]);
        assert!(miner.discover_candidates(&sessions).is_empty());
    }

    #[test]
    fn test_delta_window_breaks_scan() {
        let miner = PatternMiner::new(MinerConfig {
            delta_window_secs: 5 * 60,
            debounce_window_secs: 10 * 60,
            ..MinerConfig::default()
        });
        let sessions = miner.sessions_from_actions(vec![
            act(T0, "a"),
            act(T0 + 4 * MIN, "b"),
            act(T0 + 8 * MIN, "c"),
        ]);
        assert_eq!(sessions.len(), 1);
        let keys: Vec<String> = miner.discover_candidates(&sessions).into_keys().collect();
        assert_eq!(
            keys,
            vec![
                pattern_id("turn_on:a", "turn_on:b"),
                pattern_id("turn_on:b", "turn_on:c"),
            ]
        );
    }

    #[test]
    fn test_count_is_raw_and_sessions_deduplicated() {
        let miner = relaxed();
        let sessions = miner.sessions_from_actions(vec![
            act(T0, "a"),
            act(T0 + MIN, "b"),
            act(T0 + 2 * MIN, "a"),
            act(T0 + 3 * MIN, "b"),
        ]);
        let candidates = miner.discover_candidates(&sessions);
        let c = &candidates[&pattern_id("turn_on:a", "turn_on:b")];
        assert_eq!(c.occurrences.len(), 3);
        assert_eq!(c.sessions.len(), 1);
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let miner = PatternMiner::default();
        let sessions = miner.sessions_from_actions(vec![
            act(i64::MIN, "a"),
            act(i64::MIN + MIN, "b"),
            act(i64::MAX, "c"),
        ]);
        assert_eq!(sessions.len(), 2);
        let keys: Vec<String> = miner.discover_candidates(&sessions).into_keys().collect();
        assert_eq!(keys, vec![pattern_id("turn_on:a", "turn_on:b")]);

        let wide = PatternMiner::new(MinerConfig {
            delta_window_secs: u64::MAX,
            debounce_window_secs: u64::MAX,
            ..MinerConfig::default()
        });
        let sessions = wide.sessions_from_actions(vec![
            act(i64::MIN, "a"),
            act(0, "b"),
            act(i64::MAX, "c"),
        ]);
        assert_eq!(sessions.len(), 1);
        assert_eq!(wide.discover_candidates(&sessions).len(), 3);
    }

    #[test]
    fn test_thresholds_filter() {
        let miner = PatternMiner::new(MinerConfig {
            min_lift: 1.5,
            ..MinerConfig::default()
        });
        let mut actions = Vec::new();
        for k in 0..3 {
            let t = T0 + k * 60 * MIN;
            actions.push(act(t, "a"));
            actions.push(act(t + MIN, "b"));
        }
        let sessions = miner.sessions_from_actions(actions);
        // lift is exactly 1.0 here
        assert!(miner.mine_sessions(&sessions, T0).is_empty());
    }

    #[test]
    fn test_empty_inputs_score_zero() {
        let miner = PatternMiner::default();
        let c = Candidate {
            antecedent: "x".into(),
            consequent: "y".into(),
            ..Candidate::default()
        };
        let ev = miner.score(&c, &SessionIndex::default());
        assert_eq!(ev.support, 0.0);
        assert_eq!(ev.confidence, 0.0);
        assert_eq!(ev.lift, 0.0);
        assert!(miner.mine_sessions(&[], T0).is_empty());
    }

    fn home() -> GraphService {
        let mut svc = GraphService::new(GraphStore::in_memory(), GraphConfig::default());
        svc.touch_node(NodeTouch::new("zone:kitchen", 1.0).with_kind(NodeKind::Zone).at(T0));
        for entity in ["ha.entity:light.kitchen", "ha.entity:switch.coffee"] {
            svc.touch_edge(EdgeTouch::new(entity, EdgeType::InZone, "zone:kitchen", 1.0).at(T0));
        }
        svc.touch_node(
            NodeTouch::new("ha.entity:light.kitchen", 1.0)
                .with_label("kitchen_light")
                .at(T0),
        );
        for day in 0..3 {
            let t = T0 + day * 24 * 60 * MIN;
            // action edges are keyed per (service, entity); distinct services keep
            // one edge per day
            let light = format!("ha.service:light.turn_on_{day}");
            svc.touch_edge(
                EdgeTouch::new(light, EdgeType::Affects, "ha.entity:light.kitchen", 1.0).at(t),
            );
            let coffee = format!("ha.service:switch.turn_on_{day}");
            svc.touch_edge(
                EdgeTouch::new(coffee, EdgeType::Affects, "ha.entity:switch.coffee", 1.0)
                    .at(t + 2 * MIN),
            );
        }
        svc.touch_edge(
            EdgeTouch::new("ha.service:cover.open", EdgeType::Affects, "ha.entity:cover.hall", 1.0)
                .at(T0 + 2 * 24 * 60 * MIN + MIN),
        );
        svc.touch_edge(
            EdgeTouch::new("ha.entity:light.kitchen", EdgeType::Affects, "ha.entity:switch.coffee", 1.0)
                .at(T0),
        );
        svc
    }

    #[test]
    fn test_extract_sessions_from_graph() {
        let svc = home();
        let miner = PatternMiner::default();
        let now = T0 + 3 * 24 * 60 * MIN;
        let sessions = miner
            .extract_sessions(&svc, 4 * 24 * 60 * MIN, None, now)
            .unwrap();
        assert_eq!(sessions.len(), 3);
        assert_eq!(sessions[0].actions[0].service, "light.turn_on_0");
        assert_eq!(sessions[0].actions[0].entity, "kitchen_light");
        assert_eq!(sessions[0].actions[1].entity, "switch.coffee");
        assert_eq!(sessions[2].actions.len(), 3);

        let zoned = miner
            .extract_sessions(&svc, 4 * 24 * 60 * MIN, Some("kitchen"), now)
            .unwrap();
        assert_eq!(zoned[2].actions.len(), 2);

        let recent = miner.extract_sessions(&svc, 12 * 60 * MIN, None, now).unwrap();
        assert!(recent.is_empty());
    }

    #[test]
    fn test_mine_patterns_unknown_zone_and_empty_window() {
        let svc = home();
        let miner = relaxed();
        let now = T0 + 3 * 24 * 60 * MIN;
        assert!(miner.mine_patterns(&svc, 96.0, Some("attic"), Some(now)).is_empty());
        assert!(miner.mine_patterns(&svc, 0.0, None, Some(now)).is_empty());
        assert!(miner.mine_patterns(&svc, -5.0, None, Some(now)).is_empty());
        assert!(!miner.mine_patterns(&svc, 96.0, Some("kitchen"), Some(now)).is_empty());
        assert!(miner.mine_patterns(&svc, 1e12, None, Some(i64::MIN + 1)).is_empty());
    }
}
