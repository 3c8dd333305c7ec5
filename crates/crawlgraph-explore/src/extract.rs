use crawlgraph_model::{CandidateAction, State};

/// Turns raw markup into the dedup key of a state. Must be pure.
pub trait MarkupNormalizer: Send + Sync {
    fn normalize(&self, markup: &str) -> String;
}

/// Uses markup as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityNormalizer;

impl MarkupNormalizer for IdentityNormalizer {
    fn normalize(&self, markup: &str) -> String {
        markup.to_string()
    }
}

/// Collapses whitespace runs to one space and drops whitespace next to tags.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceNormalizer;

impl MarkupNormalizer for WhitespaceNormalizer {
    fn normalize(&self, markup: &str) -> String {
        let mut out = String::with_capacity(markup.len());
        let mut pending_space = false;
        for c in markup.chars() {
            if c.is_whitespace() {
                pending_space = true;
                continue;
            }
            if pending_space && !out.is_empty() && !out.ends_with('>') && c != '<' {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        }
        out
    }
}

/// Finds the actions worth firing in a state.
///
/// Called at most once per state, the first time any worker reaches it.
pub trait CandidateExtractor: Send + Sync {
    fn extract(&self, state: &State) -> Vec<CandidateAction>;
}
