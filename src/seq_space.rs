//! Arithmetic on the circular sequence number space.
//!
//! Sequence numbers live on the ring `1..=ring`. Two values are compared with the half-ring rule:
//!  if they are less than half a ring apart, the numerically larger one is ahead; otherwise the
//!  pair straddles the wraparound point and the numerically smaller one is ahead.
//!
//! The same rule is applied to buffer indices, with the buffer capacity as the ring size.

pub type SeqNo = usize;

/// Returns whichever of `a` and `b` is logically ahead on a ring of size `ring`.
pub fn forward_of(a: usize, b: usize, ring: usize) -> usize {
    if a.abs_diff(b) < ring / 2 {
        a.max(b)
    }
    else {
        a.min(b)
    }
}

/// Returns whichever of `a` and `b` is logically behind on a ring of size `ring`.
pub fn behind_of(a: usize, b: usize, ring: usize) -> usize {
    if forward_of(a, b, ring) == a {
        b
    }
    else {
        a
    }
}

/// `true` if `a` is strictly ahead of `b`
pub fn is_ahead(a: usize, b: usize, ring: usize) -> bool {
    a != b && forward_of(a, b, ring) == a
}

/// The sequence number following `seq_no` on the ring `1..=ring`
pub fn next_seq(seq_no: SeqNo, ring: usize) -> SeqNo {
    seq_no % ring + 1
}
