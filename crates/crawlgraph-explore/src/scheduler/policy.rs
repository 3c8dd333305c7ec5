//! Selection policies behind `ActionScheduler::poll_action`.

use std::collections::VecDeque;
use std::sync::Mutex;

use crawlgraph_model::CandidateAction;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Picks the next action to hand out from one state's queue.
///
/// Called with that state's queue locked. A policy may also drop actions it
/// will never select; the scheduler counts those as skipped.
pub trait SelectionPolicy: Send + Sync {
    fn select(&self, queue: &mut VecDeque<CandidateAction>) -> Option<CandidateAction>;

    fn name(&self) -> &'static str;
}

/// Actions in extraction order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FifoSelection;

impl SelectionPolicy for FifoSelection {
    fn select(&self, queue: &mut VecDeque<CandidateAction>) -> Option<CandidateAction> {
        queue.pop_front()
    }

    fn name(&self) -> &'static str {
        "fifo"
    }
}

/// Influence-ranked selection.
///
/// Unexplored actions always beat explored ones; within each group the
/// highest influence wins, ties going to the earlier action. Actions whose
/// element was already exercised `max_repeat` times are dropped.
#[derive(Debug, Clone, Copy)]
pub struct InfluenceSelection {
    max_repeat: u32,
}

impl InfluenceSelection {
    pub fn new(max_repeat: u32) -> Self {
        Self { max_repeat }
    }
}

impl SelectionPolicy for InfluenceSelection {
    fn select(&self, queue: &mut VecDeque<CandidateAction>) -> Option<CandidateAction> {
        if self.max_repeat > 0 {
            queue.retain(|a| a.explored < self.max_repeat);
        }

        let mut best: Option<(usize, bool, f64)> = None;
        for (i, action) in queue.iter().enumerate() {
            let unexplored = !action.was_explored();
            let better = match best {
                None => true,
                Some((_, best_unexplored, best_influence)) => {
                    (unexplored && !best_unexplored)
                        || (unexplored == best_unexplored && action.influence > best_influence)
                }
            };
            if better {
                best = Some((i, unexplored, action.influence));
            }
        }

        best.and_then(|(i, _, _)| queue.remove(i))
    }

    fn name(&self) -> &'static str {
        "influence"
    }
}

/// Uniformly random selection from a seeded generator.
pub struct RandomSelection {
    rng: Mutex<ChaCha8Rng>,
}

impl RandomSelection {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }
}

impl SelectionPolicy for RandomSelection {
    fn select(&self, queue: &mut VecDeque<CandidateAction>) -> Option<CandidateAction> {
        if queue.is_empty() {
            return None;
        }
        let i = self.rng.lock().unwrap().gen_range(0..queue.len());
        queue.remove(i)
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawlgraph_model::{Event, Identification};

    fn action(path: &str) -> CandidateAction {
        CandidateAction::new(Event::click(Identification::xpath(path)))
    }

    fn names(queue: &VecDeque<CandidateAction>) -> Vec<String> {
        queue
            .iter()
            .map(|a| a.event.identification.value.clone())
            .collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut queue: VecDeque<_> = ["/A", "/B", "/C"].into_iter().map(action).collect();
        let policy = FifoSelection;
        assert_eq!(policy.select(&mut queue).unwrap().event.identification.value, "/A");
        assert_eq!(names(&queue), vec!["/B", "/C"]);
    }

    #[test]
    fn test_influence_prefers_unexplored() {
        let mut queue = VecDeque::from(vec![
            action("/explored").with_influence(9.0).with_explored(1),
            action("/low").with_influence(1.0),
            action("/high").with_influence(3.0),
        ]);
        let policy = InfluenceSelection::new(5);
        let picked: Vec<_> = std::iter::from_fn(|| policy.select(&mut queue))
            .map(|a| a.event.identification.value)
            .collect();
        assert_eq!(picked, vec!["/high", "/low", "/explored"]);
    }

    #[test]
    fn test_influence_drops_over_repeated() {
        let mut queue = VecDeque::from(vec![
            action("/worn").with_explored(2),
            action("/fresh"),
        ]);
        let policy = InfluenceSelection::new(2);
        assert_eq!(policy.select(&mut queue).unwrap().event.identification.value, "/fresh");
        assert!(queue.is_empty());
        assert!(policy.select(&mut queue).is_none());
    }

    #[test]
    fn test_random_is_reproducible_and_complete() {
        let run = |seed| {
            let mut queue: VecDeque<_> = (0..10).map(|i| action(&format!("/A[{i}]"))).collect();
            let policy = RandomSelection::new(seed);
            std::iter::from_fn(|| policy.select(&mut queue))
                .map(|a| a.event.identification.value)
                .collect::<Vec<_>>()
        };
        let first = run(7);
        assert_eq!(first, run(7));
        assert_eq!(first.len(), 10);

        let mut sorted = first.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 10);
    }
}
