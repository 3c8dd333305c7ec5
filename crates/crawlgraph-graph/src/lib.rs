//! Exploration graph: the deduplicated, append-only store of states and
//! transitions shared by every worker in a run.

pub mod equivalence;
pub mod graph;
pub mod memory;
pub mod paths;

pub use equivalence::{ExactEquivalence, NearDuplicate, StateEquivalence};
pub use graph::{EdgeOutcome, ExplorationGraph, GraphError, InsertOutcome};
pub use memory::{GraphSummary, InMemoryGraph, StateSummary};
