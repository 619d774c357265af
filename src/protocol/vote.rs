//! Triple modular redundancy
//!
//! Protected regions are sent as three straight copies, `data ++ data ++ data`.
//! Recovery takes, for every position `i` of a `k`-byte region, the bytes at
//! `i`, `i + k` and `i + 2k` and keeps the value seen at least twice. When all
//! three copies disagree the first copy wins.

use crate::core::TMR_COPIES;

/// Outcome of a majority vote over one protected region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    /// Recovered bytes
    pub data: Vec<u8>,
    /// Positions where exactly one copy disagreed and was outvoted
    pub corrected: usize,
    /// Positions where no two copies agreed
    pub unresolved: usize,
}

impl Vote {
    /// Whether every position had at least two agreeing copies
    pub fn is_clean(&self) -> bool {
        self.unresolved == 0
    }
}

/// Builds the redundant form of a region
pub fn expand(data: &[u8]) -> Vec<u8> {
    data.repeat(TMR_COPIES)
}

/// Votes over `run`, treating it as three copies of `run.len() / 3` bytes.
///
/// Trailing bytes beyond the last full triple are ignored.
pub fn majority_vote(run: &[u8]) -> Vote {
    majority_vote_sized(run, run.len() / TMR_COPIES)
}

/// Votes over the first `3 * size` bytes of `run`.
///
/// `size` is clamped so that the three copies fit inside `run`.
pub fn majority_vote_sized(run: &[u8], size: usize) -> Vote {
    let size = size.min(run.len() / TMR_COPIES);
    let mut vote = Vote {
        data: Vec::with_capacity(size),
        corrected: 0,
        unresolved: 0,
    };

    for i in 0..size {
        let (a, b, c) = (run[i], run[i + size], run[i + 2 * size]);
        let byte = if a == b || a == c {
            if a != b || a != c {
                vote.corrected += 1;
            }
            a
        } else if b == c {
            vote.corrected += 1;
            b
        } else {
            vote.unresolved += 1;
            a
        };
        vote.data.push(byte);
    }

    vote
}

/// Recovers the original bytes of a redundant run
pub fn resolve_expansion(run: &[u8]) -> Vec<u8> {
    majority_vote(run).data
}
