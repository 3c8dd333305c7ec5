//! Crawl behaviour switches that are not limits.

use crawlgraph_graph::{ExactEquivalence, NearDuplicate, StateEquivalence};
use serde::{Deserialize, Serialize};

use crate::scheduler::policy::{FifoSelection, InfluenceSelection, RandomSelection, SelectionPolicy};

/// Where a state that just gained pending actions joins the pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOrder {
    /// At the front: the newest branch is served next.
    #[default]
    DepthFirst,
    /// At the back.
    Fifo,
}

/// Which pending action `poll_action` hands out for a state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SelectionRule {
    #[default]
    Fifo,
    /// Highest influence first, unexplored before explored, dropping actions
    /// already exercised `max_repeat` times.
    Influence { max_repeat: u32 },
    Random { seed: u64 },
}

impl SelectionRule {
    pub fn build(&self) -> Box<dyn SelectionPolicy> {
        match self {
            Self::Fifo => Box::new(FifoSelection),
            Self::Influence { max_repeat } => Box::new(InfluenceSelection::new(*max_repeat)),
            Self::Random { seed } => Box::new(RandomSelection::new(*seed)),
        }
    }
}

/// How the graph decides two observations are the same state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EquivalenceRule {
    #[default]
    Exact,
    NearDuplicate { threshold: u32 },
}

impl EquivalenceRule {
    pub fn build(&self) -> Box<dyn StateEquivalence> {
        match self {
            Self::Exact => Box::new(ExactEquivalence),
            Self::NearDuplicate { threshold } => Box::new(NearDuplicate::new(*threshold)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlRules {
    pub dispatch: DispatchOrder,
    pub selection: SelectionRule,
    pub equivalence: EquivalenceRule,
    /// Restoring a rediscovered state also restores the states it links to.
    pub restore_connected_states: bool,
    /// Treat navigation away from the start url's host as leaving the app.
    pub stay_on_domain: bool,
}

impl Default for CrawlRules {
    fn default() -> Self {
        Self {
            dispatch: DispatchOrder::DepthFirst,
            selection: SelectionRule::Fifo,
            equivalence: EquivalenceRule::Exact,
            restore_connected_states: false,
            stay_on_domain: true,
        }
    }
}
