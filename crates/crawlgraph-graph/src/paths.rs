//! Path queries over an adjacency view of the graph.
//!
//! All traversals use an explicit stack or queue rather than recursion, so
//! long crawl chains cannot overflow the thread stack.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crawlgraph_model::{CrawlPath, StateId, Transition};
use rayon::prelude::*;

/// Read access to outgoing edges by state id.
pub trait Outgoing: Sync {
    fn outgoing(&self, id: StateId) -> &[Arc<Transition>];
}

/// Owned adjacency snapshot built from a transition list.
#[derive(Debug, Default)]
pub struct Adjacency {
    out: HashMap<StateId, Vec<Arc<Transition>>>,
}

impl Adjacency {
    pub fn from_transitions(transitions: impl IntoIterator<Item = Arc<Transition>>) -> Self {
        let mut out: HashMap<StateId, Vec<Arc<Transition>>> = HashMap::new();
        for t in transitions {
            out.entry(t.source()).or_default().push(t);
        }
        Self { out }
    }
}

impl Outgoing for Adjacency {
    fn outgoing(&self, id: StateId) -> &[Arc<Transition>] {
        self.out.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Breadth-first fewest-edges path.
pub fn shortest_path<A: Outgoing + ?Sized>(
    adjacency: &A,
    from: StateId,
    to: StateId,
) -> Option<Vec<Arc<Transition>>> {
    if from == to {
        return Some(Vec::new());
    }

    let mut parent: HashMap<StateId, Arc<Transition>> = HashMap::new();
    let mut seen = HashSet::from([from]);
    let mut queue = VecDeque::from([from]);

    while let Some(id) = queue.pop_front() {
        for t in adjacency.outgoing(id) {
            let next = t.target();
            if !seen.insert(next) {
                continue;
            }
            parent.insert(next, Arc::clone(t));
            if next == to {
                return Some(unwind(&parent, from, to));
            }
            queue.push_back(next);
        }
    }
    None
}

fn unwind(
    parent: &HashMap<StateId, Arc<Transition>>,
    from: StateId,
    to: StateId,
) -> Vec<Arc<Transition>> {
    let mut path = Vec::new();
    let mut current = to;
    while current != from {
        let Some(t) = parent.get(&current) else {
            break;
        };
        path.push(Arc::clone(t));
        current = t.source();
    }
    path.reverse();
    path
}

fn distinct_targets(edges: &[Arc<Transition>]) -> Vec<StateId> {
    let mut seen = HashSet::new();
    edges
        .iter()
        .map(|t| t.target())
        .filter(|id| seen.insert(*id))
        .collect()
}

/// States where a depth-first walk from `from` cannot go any further: no
/// outgoing edges, or every outgoing edge leads somewhere already visited.
pub fn deep_states<A: Outgoing + ?Sized>(adjacency: &A, from: StateId) -> Vec<StateId> {
    let mut visited = HashSet::new();
    let mut deep = Vec::new();
    let mut stack = vec![from];

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let targets = distinct_targets(adjacency.outgoing(id));
        if targets.iter().all(|t| visited.contains(t)) {
            deep.push(id);
            continue;
        }
        // Reversed so the first edge is walked first.
        for t in targets.into_iter().rev() {
            if !visited.contains(&t) {
                stack.push(t);
            }
        }
    }

    deep.sort_unstable();
    deep
}

/// Every path from `from` to `to` that visits no state twice, shortest first.
pub fn all_simple_paths<A: Outgoing + ?Sized>(
    adjacency: &A,
    from: StateId,
    to: StateId,
) -> Vec<CrawlPath> {
    if from == to {
        return vec![CrawlPath::new()];
    }

    let mut found: Vec<Vec<Arc<Transition>>> = Vec::new();
    let mut on_path = HashSet::from([from]);
    let mut path: Vec<Arc<Transition>> = Vec::new();
    // (state, index of the next outgoing edge to try)
    let mut stack: Vec<(StateId, usize)> = vec![(from, 0)];

    while let Some(&(node, next_edge)) = stack.last() {
        let edges = adjacency.outgoing(node);
        if next_edge >= edges.len() {
            stack.pop();
            on_path.remove(&node);
            path.pop();
            continue;
        }
        if let Some(top) = stack.last_mut() {
            top.1 += 1;
        }

        let t = &edges[next_edge];
        let target = t.target();
        if target == to {
            let mut complete = path.clone();
            complete.push(Arc::clone(t));
            found.push(complete);
        } else if on_path.insert(target) {
            path.push(Arc::clone(t));
            stack.push((target, 0));
        }
    }

    found.sort_by_key(Vec::len);
    found.into_iter().map(CrawlPath::from_transitions).collect()
}

/// Simple paths from `from` to each of its deep states. Deep states are
/// searched in parallel.
pub fn all_possible_paths<A: Outgoing + ?Sized>(adjacency: &A, from: StateId) -> Vec<CrawlPath> {
    let deep = deep_states(adjacency, from);
    let per_state: Vec<Vec<CrawlPath>> = deep
        .par_iter()
        .filter(|&&d| d != from)
        .map(|&d| all_simple_paths(adjacency, from, d))
        .collect();
    per_state.into_iter().flatten().collect()
}
