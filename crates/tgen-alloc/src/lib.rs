#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

/// Production trial shape: 48 trials of 30 test cases each.
pub const DEFAULT_TRIAL_COUNT: usize = 48;
pub const DEFAULT_TRIAL_CAPACITY: usize = 30;

pub const ALLOC_REASON_CODES: [&str; 6] = [
    "alloc_distinct_problem_contract",
    "alloc_capacity_contract",
    "alloc_trial_numbering_contract",
    "alloc_phase_ordering_contract",
    "alloc_coverage_warning",
    "alloc_structured_log_contract",
];

/// Identity of one evaluable test case: which problem it came from and which
/// usable test index inside that problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CaseKey {
    pub problem_index: usize,
    pub test_index: usize,
}

impl CaseKey {
    #[must_use]
    pub const fn new(problem_index: usize, test_index: usize) -> Self {
        Self {
            problem_index,
            test_index,
        }
    }
}

/// One allocatable test case with its opaque payload.
///
/// Immutable once created; the payload is cloned through allocation and
/// serialization untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseUnit<P> {
    pub key: CaseKey,
    pub payload: P,
}

impl<P> CaseUnit<P> {
    #[must_use]
    pub const fn new(problem_index: usize, test_index: usize, payload: P) -> Self {
        Self {
            key: CaseKey::new(problem_index, test_index),
            payload,
        }
    }
}

/// Per-run placement counts, keyed by case identity.
///
/// Initialized to zero for every unit of the run and mutated only by the
/// allocator. BTreeMap keeps the uncovered report in sorted key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageLedger {
    counts: BTreeMap<CaseKey, u32>,
}

impl UsageLedger {
    #[must_use]
    pub fn for_units<P>(units: &[CaseUnit<P>]) -> Self {
        let counts = units.iter().map(|unit| (unit.key, 0)).collect();
        Self { counts }
    }

    fn record_placement(&mut self, key: CaseKey) {
        *self.counts.entry(key).or_insert(0) += 1;
    }

    /// Placement count for `key`; zero for keys outside the run.
    #[must_use]
    pub fn count(&self, key: CaseKey) -> u32 {
        self.counts.get(&key).copied().unwrap_or(0)
    }

    /// Keys never placed into any trial, in sorted order.
    #[must_use]
    pub fn uncovered(&self) -> Vec<CaseKey> {
        self.counts
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(key, _)| *key)
            .collect()
    }

    #[must_use]
    pub fn tracked_case_count(&self) -> usize {
        self.counts.len()
    }
}

/// A finalized bucket of test cases. No two cases share a problem index;
/// the size may fall short of the requested capacity when the supply of
/// distinct-problem candidates runs out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trial<P> {
    pub trial_number: usize,
    pub cases: Vec<CaseUnit<P>>,
}

impl<P> Trial<P> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    #[must_use]
    pub fn problem_indices(&self) -> BTreeSet<usize> {
        self.cases
            .iter()
            .map(|case| case.key.problem_index)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationParams {
    pub trial_count: usize,
    pub trial_capacity: usize,
}

impl Default for AllocationParams {
    fn default() -> Self {
        Self {
            trial_count: DEFAULT_TRIAL_COUNT,
            trial_capacity: DEFAULT_TRIAL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationOutcome<P> {
    pub trials: Vec<Trial<P>>,
    /// Diagnostic only: cases that ended the run with zero placements.
    /// The allocator never retries or fails because of these.
    pub uncovered: Vec<CaseKey>,
    pub ledger: UsageLedger,
}

impl<P> AllocationOutcome<P> {
    #[must_use]
    pub fn placed_case_count(&self) -> usize {
        self.trials.iter().map(Trial::len).sum()
    }
}

/// Pack `shuffled_units` into `params.trial_count` trials of at most
/// `params.trial_capacity` cases each.
///
/// Each trial is built in two named phases over the same fixed scan order:
/// a fresh-first pass that only accepts cases no earlier trial has used,
/// then — only if the trial is still under capacity — a reuse pass that
/// accepts any case whose problem is not already in the trial. Phase-one
/// acceptances precede phase-two acceptances, each in scan order; that
/// ordering is observable in the output and part of the contract.
///
/// Infallible: trials short on distinct-problem supply are finalized
/// under-capacity rather than reported as errors.
#[must_use]
pub fn allocate<P: Clone>(
    shuffled_units: &[CaseUnit<P>],
    params: AllocationParams,
) -> AllocationOutcome<P> {
    let mut ledger = UsageLedger::for_units(shuffled_units);
    let mut trials = Vec::with_capacity(params.trial_count);

    for trial_number in 1..=params.trial_count {
        let mut problems_in_trial = BTreeSet::new();
        let mut cases = Vec::new();

        fill_fresh(
            shuffled_units,
            params.trial_capacity,
            &mut ledger,
            &mut problems_in_trial,
            &mut cases,
        );
        if cases.len() < params.trial_capacity {
            fill_reuse(
                shuffled_units,
                params.trial_capacity,
                &mut ledger,
                &mut problems_in_trial,
                &mut cases,
            );
        }

        trials.push(Trial {
            trial_number,
            cases,
        });
    }

    let uncovered = ledger.uncovered();
    AllocationOutcome {
        trials,
        uncovered,
        ledger,
    }
}

/// Fresh-first phase: accept only cases with zero prior placements.
fn fill_fresh<P: Clone>(
    shuffled_units: &[CaseUnit<P>],
    capacity: usize,
    ledger: &mut UsageLedger,
    problems_in_trial: &mut BTreeSet<usize>,
    cases: &mut Vec<CaseUnit<P>>,
) {
    for unit in shuffled_units {
        if cases.len() >= capacity {
            break;
        }
        if problems_in_trial.contains(&unit.key.problem_index) {
            continue;
        }
        if ledger.count(unit.key) != 0 {
            continue;
        }
        cases.push(unit.clone());
        ledger.record_placement(unit.key);
        problems_in_trial.insert(unit.key.problem_index);
    }
}

/// Reuse-fallback phase: placement counts no longer matter, only the
/// one-case-per-problem constraint within the trial.
fn fill_reuse<P: Clone>(
    shuffled_units: &[CaseUnit<P>],
    capacity: usize,
    ledger: &mut UsageLedger,
    problems_in_trial: &mut BTreeSet<usize>,
    cases: &mut Vec<CaseUnit<P>>,
) {
    for unit in shuffled_units {
        if cases.len() >= capacity {
            break;
        }
        if problems_in_trial.contains(&unit.key.problem_index) {
            continue;
        }
        cases.push(unit.clone());
        ledger.record_placement(unit.key);
        problems_in_trial.insert(unit.key.problem_index);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationLogRecord {
    pub fixture_id: String,
    pub seed: u64,
    pub trial_count: usize,
    pub trial_capacity: usize,
    pub unit_count: usize,
    pub uncovered_count: usize,
    pub env_fingerprint: String,
    pub artifact_refs: Vec<String>,
    pub reason_code: String,
    pub passed: bool,
}

impl AllocationLogRecord {
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
