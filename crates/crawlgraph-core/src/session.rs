//! What a finished run hands back to the driver.

use std::sync::Arc;

use crawlgraph_explore::SchedulerStats;
use crawlgraph_graph::{ExplorationGraph, GraphSummary, InMemoryGraph};
use crawlgraph_model::{CrawlPath, ExitStatus, State, StateId, Transition, INDEX_ID};
use serde::Serialize;

/// The explored graph plus run bookkeeping.
pub struct CrawlSession {
    graph: Arc<InMemoryGraph>,
    status: ExitStatus,
    paths: Vec<CrawlPath>,
    stats: SchedulerStats,
    elapsed_secs: f64,
}

/// Serializable end-of-run report.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub status: ExitStatus,
    pub elapsed_secs: f64,
    pub crawl_paths: usize,
    pub scheduler: SchedulerStats,
    pub graph: GraphSummary,
}

impl CrawlSession {
    pub fn new(
        graph: Arc<InMemoryGraph>,
        status: ExitStatus,
        paths: Vec<CrawlPath>,
        stats: SchedulerStats,
        elapsed_secs: f64,
    ) -> Self {
        Self {
            graph,
            status,
            paths,
            stats,
            elapsed_secs,
        }
    }

    pub fn exit_status(&self) -> &ExitStatus {
        &self.status
    }

    pub fn graph(&self) -> &Arc<InMemoryGraph> {
        &self.graph
    }

    pub fn initial_state(&self) -> Option<Arc<State>> {
        self.graph.initial_state()
    }

    pub fn state(&self, id: StateId) -> Option<Arc<State>> {
        self.graph.state(id)
    }

    pub fn states(&self) -> Vec<Arc<State>> {
        self.graph.all_states()
    }

    pub fn transitions(&self) -> Vec<Arc<Transition>> {
        self.graph.all_transitions()
    }

    pub fn state_count(&self) -> usize {
        self.graph.state_count()
    }

    pub fn transition_count(&self) -> usize {
        self.graph.transition_count()
    }

    pub fn shortest_path(&self, from: StateId, to: StateId) -> Option<Vec<Arc<Transition>>> {
        self.graph.shortest_path(from, to)
    }

    /// Every simple path from the index state to each deep state.
    pub fn all_possible_paths(&self) -> Vec<CrawlPath> {
        self.graph.all_possible_paths(INDEX_ID)
    }

    pub fn mean_markup_size(&self) -> f64 {
        self.graph.mean_markup_size()
    }

    /// Paths the workers followed, in the order they finished them.
    pub fn crawl_paths(&self) -> &[CrawlPath] {
        &self.paths
    }

    pub fn scheduler_stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_secs
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            status: self.status.clone(),
            elapsed_secs: self.elapsed_secs,
            crawl_paths: self.paths.len(),
            scheduler: self.stats.clone(),
            graph: self.graph.summary(),
        }
    }

    pub fn report_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.report())
    }
}
