//! Shared vocabulary of the exploration engine: states, events, transitions,
//! candidate actions, crawl paths and the run termination latch.

pub mod action;
pub mod event;
pub mod exit;
pub mod fingerprint;
pub mod path;
pub mod state;

pub use action::CandidateAction;
pub use event::{Event, EventType, FormInput, How, Identification, Transition, TransitionId};
pub use exit::{ExitNotifier, ExitStatus};
pub use fingerprint::{hamming_distance, simhash};
pub use path::CrawlPath;
pub use state::{State, StateId, StateSnapshot, INDEX_ID};
