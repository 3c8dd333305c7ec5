//! 64-bit simhash over markup tokens, for near-duplicate state detection.

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

fn tokens(markup: &str) -> impl Iterator<Item = &str> {
    markup
        .split(|c: char| c.is_whitespace() || c == '<' || c == '>')
        .filter(|t| !t.is_empty())
}

/// Simhash of `markup`. Equal markup gives equal hashes; markup that differs
/// in a few tokens gives hashes a small Hamming distance apart.
pub fn simhash(markup: &str) -> u64 {
    let mut weights = [0i64; 64];
    for token in tokens(markup) {
        let h = fnv1a(token);
        for (bit, weight) in weights.iter_mut().enumerate() {
            if h & (1 << bit) != 0 {
                *weight += 1;
            } else {
                *weight -= 1;
            }
        }
    }

    weights
        .iter()
        .enumerate()
        .filter(|(_, w)| **w > 0)
        .fold(0u64, |acc, (bit, _)| acc | (1 << bit))
}

pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}
