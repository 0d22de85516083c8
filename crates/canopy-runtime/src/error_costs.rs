//! Cost constants ordering competing parses.
//!
//! A version's error cost accumulates as recovery skips input. The
//! constants weight the three things a recovery can discard: whole
//! trees popped off the stack, characters consumed into error leaves,
//! and line breaks crossed while doing so. The values are policy tuned
//! for plausible recoveries, not invariants; only their relative order
//! matters to correctness.

pub const ERROR_COST_PER_SKIPPED_CHAR: u32 = 1;
pub const ERROR_COST_PER_SKIPPED_LINE: u32 = 30;
pub const ERROR_COST_PER_SKIPPED_TREE: u32 = 100;

/// The largest cost gap a shorter-progressed version may close before
/// being discarded outright (scaled by push count in `compare_versions`).
pub const MAX_COST_DIFFERENCE: u32 = 16 * ERROR_COST_PER_SKIPPED_TREE;
