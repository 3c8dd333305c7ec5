//! In-memory exploration graph guarded by a single read/write lock.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crawlgraph_model::{
    CrawlPath, Event, ExitNotifier, State, StateId, StateSnapshot, Transition, TransitionId,
};

use crate::equivalence::{ExactEquivalence, StateEquivalence};
use crate::graph::{EdgeOutcome, ExplorationGraph, GraphError, InsertOutcome};
use crate::paths::{self, Adjacency, Outgoing};

#[derive(Default)]
struct Inner {
    /// Indexed by `StateId`; ids are dense and assigned in insertion order.
    states: Vec<Arc<State>>,
    by_markup: HashMap<String, StateId>,
    transitions: Vec<Arc<Transition>>,
    outgoing: Vec<Vec<Arc<Transition>>>,
    incoming: Vec<Vec<Arc<Transition>>>,
    edges: HashMap<(StateId, Event, StateId), TransitionId>,
    markup_bytes: usize,
}

impl Inner {
    fn contains(&self, id: StateId) -> bool {
        (id as usize) < self.states.len()
    }

    fn find_equivalent(
        &self,
        snapshot: &StateSnapshot,
        equivalence: &dyn StateEquivalence,
    ) -> Option<Arc<State>> {
        if let Some(&id) = self.by_markup.get(&snapshot.normalized) {
            return Some(Arc::clone(&self.states[id as usize]));
        }
        if equivalence.is_exact() {
            return None;
        }
        let fingerprint = snapshot.fingerprint();
        self.states
            .iter()
            .find(|s| equivalence.equivalent(snapshot, fingerprint, s))
            .cloned()
    }
}

impl Outgoing for Inner {
    fn outgoing(&self, id: StateId) -> &[Arc<Transition>] {
        self.outgoing
            .get(id as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// The shipped `ExplorationGraph`.
///
/// Dedup and insertion happen under one write lock, so two workers that
/// observe equivalent markup at the same instant resolve to a single vertex.
/// Every admitted state is counted on the run's `ExitNotifier`.
pub struct InMemoryGraph {
    inner: RwLock<Inner>,
    notifier: Arc<ExitNotifier>,
    equivalence: Box<dyn StateEquivalence>,
}

impl InMemoryGraph {
    pub fn new(notifier: Arc<ExitNotifier>) -> Self {
        Self::with_equivalence(notifier, Box::new(ExactEquivalence))
    }

    pub fn with_equivalence(
        notifier: Arc<ExitNotifier>,
        equivalence: Box<dyn StateEquivalence>,
    ) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            notifier,
            equivalence,
        }
    }

    pub fn notifier(&self) -> &Arc<ExitNotifier> {
        &self.notifier
    }

    /// Serializable copy of the graph for reporting.
    pub fn summary(&self) -> GraphSummary {
        let inner = self.inner.read().unwrap();
        GraphSummary {
            state_count: inner.states.len(),
            transition_count: inner.transitions.len(),
            mean_markup_size: mean(inner.markup_bytes, inner.states.len()),
            states: inner
                .states
                .iter()
                .map(|s| StateSummary {
                    id: s.id(),
                    name: s.name().to_string(),
                    url: s.url().to_string(),
                    outgoing: inner.outgoing(s.id()).len(),
                })
                .collect(),
            transitions: inner.transitions.iter().map(|t| (**t).clone()).collect(),
        }
    }
}

fn mean(total: usize, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

impl ExplorationGraph for InMemoryGraph {
    fn insert_state_if_absent(&self, snapshot: StateSnapshot) -> InsertOutcome {
        let state = {
            let mut inner = self.inner.write().unwrap();
            if let Some(existing) = inner.find_equivalent(&snapshot, self.equivalence.as_ref()) {
                tracing::debug!(state = %existing.name(), url = %snapshot.url, "clone of existing state");
                return InsertOutcome::Existing(existing);
            }

            let id = inner.states.len() as StateId;
            inner.markup_bytes += snapshot.markup.len();
            inner.by_markup.insert(snapshot.normalized.clone(), id);
            let state = Arc::new(State::from_snapshot(id, snapshot));
            inner.states.push(Arc::clone(&state));
            inner.outgoing.push(Vec::new());
            inner.incoming.push(Vec::new());
            state
        };

        let count = self.notifier.increment_number_of_states();
        tracing::info!(state = %state.name(), url = %state.url(), count, "new state");
        InsertOutcome::Inserted(state)
    }

    fn insert_transition(
        &self,
        source: StateId,
        target: StateId,
        event: Event,
    ) -> Result<EdgeOutcome, GraphError> {
        let mut inner = self.inner.write().unwrap();
        for id in [source, target] {
            if !inner.contains(id) {
                return Err(GraphError::UnknownState(id));
            }
        }

        let key = (source, event, target);
        if let Some(&existing) = inner.edges.get(&key) {
            return Ok(EdgeOutcome::Existing(Arc::clone(
                &inner.transitions[existing as usize],
            )));
        }

        let (source, event, target) = key;
        let id = inner.transitions.len() as TransitionId;
        let transition = Arc::new(Transition::new(id, source, target, event.clone()));
        inner.edges.insert((source, event, target), id);
        inner.transitions.push(Arc::clone(&transition));
        inner.outgoing[source as usize].push(Arc::clone(&transition));
        inner.incoming[target as usize].push(Arc::clone(&transition));
        tracing::debug!(edge = %transition, "transition added");
        Ok(EdgeOutcome::Added(transition))
    }

    fn state(&self, id: StateId) -> Option<Arc<State>> {
        self.inner.read().unwrap().states.get(id as usize).cloned()
    }

    fn initial_state(&self) -> Option<Arc<State>> {
        self.inner.read().unwrap().states.first().cloned()
    }

    fn outgoing_transitions(&self, id: StateId) -> Vec<Arc<Transition>> {
        self.inner.read().unwrap().outgoing(id).to_vec()
    }

    fn incoming_transitions(&self, id: StateId) -> Vec<Arc<Transition>> {
        self.inner
            .read()
            .unwrap()
            .incoming
            .get(id as usize)
            .cloned()
            .unwrap_or_default()
    }

    fn outgoing_states(&self, id: StateId) -> Vec<Arc<State>> {
        let inner = self.inner.read().unwrap();
        let mut seen = HashSet::new();
        inner
            .outgoing(id)
            .iter()
            .map(|t| t.target())
            .filter(|target| seen.insert(*target))
            .filter_map(|target| inner.states.get(target as usize).cloned())
            .collect()
    }

    fn can_reach(&self, a: StateId, b: StateId) -> bool {
        let inner = self.inner.read().unwrap();
        inner.outgoing(a).iter().any(|t| t.target() == b)
            || inner.outgoing(b).iter().any(|t| t.target() == a)
    }

    fn all_states(&self) -> Vec<Arc<State>> {
        self.inner.read().unwrap().states.clone()
    }

    fn all_transitions(&self) -> Vec<Arc<Transition>> {
        self.inner.read().unwrap().transitions.clone()
    }

    fn state_count(&self) -> usize {
        self.inner.read().unwrap().states.len()
    }

    fn transition_count(&self) -> usize {
        self.inner.read().unwrap().transitions.len()
    }

    fn mean_markup_size(&self) -> f64 {
        let inner = self.inner.read().unwrap();
        mean(inner.markup_bytes, inner.states.len())
    }

    fn shortest_path(&self, from: StateId, to: StateId) -> Option<Vec<Arc<Transition>>> {
        let inner = self.inner.read().unwrap();
        if !inner.contains(from) || !inner.contains(to) {
            return None;
        }
        paths::shortest_path(&*inner, from, to)
    }

    fn all_possible_paths(&self, from: StateId) -> Vec<CrawlPath> {
        // Snapshot first: enumeration can be slow and must not hold off writers.
        let adjacency = Adjacency::from_transitions(self.all_transitions());
        paths::all_possible_paths(&adjacency, from)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StateSummary {
    pub id: StateId,
    pub name: String,
    pub url: String,
    pub outgoing: usize,
}

/// Point-in-time report of the graph contents.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GraphSummary {
    pub state_count: usize,
    pub transition_count: usize,
    pub mean_markup_size: f64,
    pub states: Vec<StateSummary>,
    pub transitions: Vec<Transition>,
}
