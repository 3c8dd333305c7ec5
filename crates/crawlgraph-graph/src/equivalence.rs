//! State equality policies used as the graph's admission key.

use crawlgraph_model::{hamming_distance, State, StateSnapshot};

pub trait StateEquivalence: Send + Sync {
    /// Whether `candidate` (with simhash `fingerprint`) is the same state as `existing`.
    fn equivalent(&self, candidate: &StateSnapshot, fingerprint: u64, existing: &State) -> bool;

    /// True when equivalence is plain equality of normalized markup, letting
    /// the graph answer with a hash lookup instead of a scan.
    fn is_exact(&self) -> bool {
        false
    }
}

/// Same state iff normalized markup is byte-equal.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactEquivalence;

impl StateEquivalence for ExactEquivalence {
    fn equivalent(&self, candidate: &StateSnapshot, _fingerprint: u64, existing: &State) -> bool {
        candidate.normalized == existing.normalized()
    }

    fn is_exact(&self) -> bool {
        true
    }
}

/// Same state iff the simhash fingerprints differ in at most `threshold` bits.
#[derive(Debug, Clone, Copy)]
pub struct NearDuplicate {
    pub threshold: u32,
}

impl NearDuplicate {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }
}

impl StateEquivalence for NearDuplicate {
    fn equivalent(&self, candidate: &StateSnapshot, fingerprint: u64, existing: &State) -> bool {
        candidate.normalized == existing.normalized()
            || hamming_distance(fingerprint, existing.fingerprint()) <= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(markup: &str) -> State {
        State::from_snapshot(1, StateSnapshot::raw("http://app/", markup))
    }

    #[test]
    fn test_exact_requires_equal_markup() {
        let existing = state("<p>a</p>");
        let same = StateSnapshot::raw("http://other/", "<p>a</p>");
        let other = StateSnapshot::raw("http://app/", "<p>b</p>");
        assert!(ExactEquivalence.equivalent(&same, same.fingerprint(), &existing));
        assert!(!ExactEquivalence.equivalent(&other, other.fingerprint(), &existing));
    }

    #[test]
    fn test_near_duplicate_zero_threshold_matches_identical_fingerprint() {
        let existing = state("<ul><li>x</li></ul>");
        let reordered = StateSnapshot::raw("http://app/", "<ul> <li>x</li> </ul>");
        let policy = NearDuplicate::new(0);
        assert!(policy.equivalent(&reordered, reordered.fingerprint(), &existing));
    }

    #[test]
    fn test_near_duplicate_rejects_distant_markup() {
        let base: String = (0..100).map(|i| format!("<li>row{i}</li>")).collect();
        let other: String = (0..100).map(|i| format!("<td>cell{i}</td>")).collect();
        let existing = state(&base);
        let candidate = StateSnapshot::raw("http://app/", other);
        let fp = candidate.fingerprint();
        let distance = hamming_distance(fp, existing.fingerprint());
        assert!(distance > 0);

        assert!(!NearDuplicate::new(distance.saturating_sub(1))
            .equivalent(&candidate, fp, &existing));
        assert!(NearDuplicate::new(distance).equivalent(&candidate, fp, &existing));
    }
}
