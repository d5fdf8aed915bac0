#![forbid(unsafe_code)]

pub const LCG_MULTIPLIER: u64 = 9301;
pub const LCG_INCREMENT: u64 = 49297;
pub const LCG_MODULUS: u64 = 233280;

/// Seed used by every production trial build.
pub const DEFAULT_TRIAL_SEED: u64 = 12345;

pub const SHUFFLE_REASON_CODES: [&str; 5] = [
    "shuffle_seed_determinism_contract",
    "shuffle_golden_vector_contract",
    "shuffle_input_preserved_contract",
    "shuffle_state_threading_contract",
    "shuffle_structured_log_contract",
];

/// Linear-congruential state driving the reproducible permutation stream.
///
/// The state is an explicit value owned by the caller; two independent
/// instances never share anything, so concurrent allocation runs cannot
/// interfere through a process-wide generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LcgState {
    state: u64,
}

impl LcgState {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    #[must_use]
    pub const fn state(self) -> u64 {
        self.state
    }

    /// Advance the recurrence `state = (state * 9301 + 49297) mod 233280`
    /// and return the new state.
    ///
    /// The multiply runs in 128-bit so seeds above `u64::MAX / 9301` follow
    /// the same recurrence as an arbitrary-precision evaluation would.
    pub fn advance(&mut self) -> u64 {
        let widened = u128::from(self.state) * u128::from(LCG_MULTIPLIER)
            + u128::from(LCG_INCREMENT);
        // widened % LCG_MODULUS < 2^18, the cast is lossless
        self.state = (widened % u128::from(LCG_MODULUS)) as u64;
        self.state
    }

    /// Draw a position in `[0, upper)` from the next state.
    ///
    /// Computed as `floor((state / 233280) * upper)` with double-precision
    /// division and multiplication before truncation. The float semantics
    /// are part of the reproducibility contract and must not be replaced
    /// with integer arithmetic.
    pub fn draw_index(&mut self, upper: usize) -> usize {
        let state = self.advance();
        ((state as f64 / LCG_MODULUS as f64) * upper as f64) as usize
    }

    /// Fisher–Yates pass from the tail down, one index draw per swap.
    pub fn shuffle_in_place<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.draw_index(i + 1);
            items.swap(i, j);
        }
    }
}

/// Return a reproducible permutation of `items` for `seed`.
///
/// Pure: the input slice is never mutated. Identical `(items, seed)` yields
/// an identical permutation on every run and platform.
#[must_use]
pub fn shuffled<T: Clone>(items: &[T], seed: u64) -> Vec<T> {
    let mut permuted = items.to_vec();
    let mut lcg = LcgState::new(seed);
    lcg.shuffle_in_place(&mut permuted);
    permuted
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffleLogRecord {
    pub fixture_id: String,
    pub seed: u64,
    pub item_count: usize,
    pub env_fingerprint: String,
    pub artifact_refs: Vec<String>,
    pub reason_code: String,
    pub passed: bool,
}

impl ShuffleLogRecord {
    #[must_use]
    pub fn is_replay_complete(&self) -> bool {
        !self.fixture_id.trim().is_empty()
            && !self.env_fingerprint.trim().is_empty()
            && !self.reason_code.trim().is_empty()
            && !self.artifact_refs.is_empty()
            && self
                .artifact_refs
                .iter()
                .all(|artifact| !artifact.trim().is_empty())
    }
}
