use std::sync::Arc;

use crawlgraph_model::{CrawlPath, Event, State, StateId, StateSnapshot, Transition};

use crate::paths::{self, Adjacency};

/// A transition or lookup referenced a vertex the graph never admitted.
///
/// Never a normal outcome: it means the dedup or locking discipline around
/// the graph was broken, and the run treats it as fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("state {0} is not in the graph")]
    UnknownState(StateId),
}

/// Result of offering a snapshot to the graph.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// The snapshot became a new canonical vertex.
    Inserted(Arc<State>),
    /// An equivalent vertex already existed; the snapshot was discarded.
    Existing(Arc<State>),
}

impl InsertOutcome {
    pub fn state(&self) -> &Arc<State> {
        match self {
            Self::Inserted(s) | Self::Existing(s) => s,
        }
    }

    pub fn into_state(self) -> Arc<State> {
        match self {
            Self::Inserted(s) | Self::Existing(s) => s,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Result of offering an edge to the graph.
#[derive(Debug, Clone)]
pub enum EdgeOutcome {
    Added(Arc<Transition>),
    /// An equal (source, event, target) edge was already present.
    Existing(Arc<Transition>),
}

impl EdgeOutcome {
    pub fn transition(&self) -> &Arc<Transition> {
        match self {
            Self::Added(t) | Self::Existing(t) => t,
        }
    }

    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added(_))
    }
}

/// The shared, append-only map of the explored state space.
///
/// Implementations must make `insert_state_if_absent` and `insert_transition`
/// linearizable: concurrent callers offering equivalent values observe exactly
/// one winner. Vertices and edges are never removed during a run.
pub trait ExplorationGraph: Send + Sync {
    fn insert_state_if_absent(&self, snapshot: StateSnapshot) -> InsertOutcome;

    /// Record that firing `event` in `source` led to `target`.
    fn insert_transition(
        &self,
        source: StateId,
        target: StateId,
        event: Event,
    ) -> Result<EdgeOutcome, GraphError>;

    fn state(&self, id: StateId) -> Option<Arc<State>>;

    /// The first state ever admitted, if any.
    fn initial_state(&self) -> Option<Arc<State>>;

    fn outgoing_transitions(&self, id: StateId) -> Vec<Arc<Transition>>;

    fn incoming_transitions(&self, id: StateId) -> Vec<Arc<Transition>>;

    /// Distinct targets of `id`'s outgoing edges, in first-edge order.
    fn outgoing_states(&self, id: StateId) -> Vec<Arc<State>>;

    /// Whether an edge joins `a` and `b` in either direction.
    fn can_reach(&self, a: StateId, b: StateId) -> bool;

    fn all_states(&self) -> Vec<Arc<State>>;

    fn all_transitions(&self) -> Vec<Arc<Transition>>;

    fn state_count(&self) -> usize;

    fn transition_count(&self) -> usize;

    /// Mean raw markup length over all states, in bytes. Zero when empty.
    fn mean_markup_size(&self) -> f64;

    /// Fewest-edges path from `from` to `to`. `Some(vec![])` when they are equal.
    fn shortest_path(&self, from: StateId, to: StateId) -> Option<Vec<Arc<Transition>>> {
        let adjacency = Adjacency::from_transitions(self.all_transitions());
        paths::shortest_path(&adjacency, from, to)
    }

    /// Every simple path from `from` to each deep state reachable from it.
    fn all_possible_paths(&self, from: StateId) -> Vec<CrawlPath> {
        let adjacency = Adjacency::from_transitions(self.all_transitions());
        paths::all_possible_paths(&adjacency, from)
    }
}
