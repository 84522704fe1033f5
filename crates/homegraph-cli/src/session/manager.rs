//! Graph session lifecycle: load on open, dirty tracking, auto-save and save on drop.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use homegraph::{
    DiscoveredPattern, Edge, EdgeTouch, ExportQuery, GraphExport, GraphService, GraphStore,
    LoadReport, Millis, Node, NodeTouch, PatternMiner, PruneReport, SaveReport,
};

use crate::config::AppConfig;
use crate::error::{CliError, CliResult};

/// Owns the graph service for one CLI run and persists it when it changes.
pub struct GraphSession {
    service: GraphService,
    miner: PatternMiner,
    file_path: PathBuf,
    load_report: LoadReport,
    dirty: bool,
    last_save: Instant,
    auto_save_interval: Duration,
}

impl GraphSession {
    /// Open or create a graph snapshot at the given path.
    ///
    /// An unreadable snapshot is logged and replaced by an empty graph.
    pub fn open(path: &str, config: &AppConfig) -> CliResult<Self> {
        let file_path = PathBuf::from(path);
        config.graph.validate()?;

        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                CliError::Io(std::io::Error::other(format!(
                    "Failed to create directory {}: {e}",
                    parent.display()
                )))
            })?;
        }

        let mut store = GraphStore::with_path(&file_path);
        let load_report = if file_path.exists() {
            tracing::info!("Opening existing graph file: {}", file_path.display());
            match store.load() {
                Ok(report) => report,
                Err(e) => {
                    tracing::warn!("Graph file unreadable, starting empty: {e}");
                    LoadReport::default()
                }
            }
        } else {
            tracing::info!("Creating new graph file: {}", file_path.display());
            LoadReport::default()
        };

        tracing::info!(
            "Graph has {} nodes and {} edges ({} records skipped)",
            store.node_count(),
            store.edge_count(),
            load_report.skipped
        );

        Ok(Self {
            service: GraphService::new(store, config.graph.clone()),
            miner: PatternMiner::new(config.miner.clone()),
            file_path,
            load_report,
            dirty: false,
            last_save: Instant::now(),
            auto_save_interval: Duration::from_secs(config.auto_save_secs),
        })
    }

    pub fn service(&self) -> &GraphService {
        &self.service
    }

    pub fn miner(&self) -> &PatternMiner {
        &self.miner
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn touch_node(&mut self, touch: NodeTouch) -> Node {
        let node = self.service.touch_node(touch);
        self.mark_dirty();
        node
    }

    pub fn touch_edge(&mut self, touch: EdgeTouch) -> Edge {
        let edge = self.service.touch_edge(touch);
        self.mark_dirty();
        edge
    }

    pub fn prune(&mut self, now: Option<Millis>) -> PruneReport {
        let report = self.service.prune(now);
        if report.nodes_removed() + report.edges_removed() > 0 {
            self.dirty = true;
        }
        report
    }

    /// Export view of the graph. Export prunes first, so this may dirty the session.
    pub fn export(&mut self, query: &ExportQuery, now: Option<Millis>) -> CliResult<GraphExport> {
        let before = (self.service.store().node_count(), self.service.store().edge_count());
        let export = self.service.export_state(query, now)?;
        let after = (self.service.store().node_count(), self.service.store().edge_count());
        if before != after {
            self.dirty = true;
        }
        Ok(export)
    }

    pub fn mine(
        &self,
        lookback_hours: f64,
        zone: Option<&str>,
        now: Option<Millis>,
    ) -> BTreeMap<String, DiscoveredPattern> {
        self.miner.mine_patterns(&self.service, lookback_hours, zone, now)
    }

    /// Save to file if anything changed since the last save.
    pub fn save(&mut self) -> CliResult<Option<SaveReport>> {
        if !self.dirty {
            return Ok(None);
        }

        let report = self.service.store().save()?;

        self.dirty = false;
        self.last_save = Instant::now();
        tracing::debug!(
            "Saved graph file: {} ({} bytes)",
            report.path.display(),
            report.bytes
        );
        Ok(Some(report))
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        if let Err(e) = self.maybe_auto_save() {
            tracing::warn!("Auto-save failed, changes kept in memory: {e}");
        }
    }

    fn maybe_auto_save(&mut self) -> CliResult<()> {
        if self.dirty && self.last_save.elapsed() >= self.auto_save_interval {
            self.save()?;
        }
        Ok(())
    }

    pub fn file_path(&self) -> &PathBuf {
        &self.file_path
    }
}

impl Drop for GraphSession {
    fn drop(&mut self) {
        if self.dirty {
            if let Err(e) = self.save() {
                tracing::error!("Failed to save on drop: {e}");
            }
        }
    }
}
