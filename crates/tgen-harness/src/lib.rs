#![forbid(unsafe_code)]

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tgen_alloc::{AllocationParams, CaseKey, Trial, allocate};
use tgen_corpus::{CasePayload, CategorySpec, SkippedProblem, default_category_manifest, load_corpus};
use tgen_shuffle::{DEFAULT_TRIAL_SEED, shuffled};

pub const PLAN_SCHEMA_VERSION: u8 = 1;
pub const TRIALS_JSON_FILE: &str = "trials.json";
pub const TRIALS_JS_FILE: &str = "js/trials_data.js";
pub const COVERAGE_REPORT_FILE: &str = "coverage_report.json";
const TRIALS_JS_BANNER: &str = "// Auto-generated trials data\nvar TRIALS_DATA = ";

pub const HARNESS_REASON_CODES: [&str; 6] = [
    "plan_corpus_missing",
    "plan_generation_complete",
    "plan_coverage_warning",
    "plan_artifact_write_failed",
    "plan_invariant_suite_failed",
    "plan_structured_log_contract",
];

static PLAN_LOG_PATH: OnceLock<Mutex<Option<PathBuf>>> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub corpus_root: PathBuf,
    pub artifact_root: PathBuf,
    pub manifest: Vec<CategorySpec>,
    pub seed: u64,
    pub trial_count: usize,
    pub trial_capacity: usize,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        let repo_root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..");
        Self {
            corpus_root: repo_root.join("corpus-2"),
            artifact_root: repo_root.join("artifacts/trials"),
            manifest: default_category_manifest(),
            seed: DEFAULT_TRIAL_SEED,
            trial_count: tgen_alloc::DEFAULT_TRIAL_COUNT,
            trial_capacity: tgen_alloc::DEFAULT_TRIAL_CAPACITY,
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

/// Everything one deterministic build produces, before serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialPlan {
    pub seed: u64,
    pub trial_count: usize,
    pub trial_capacity: usize,
    pub task_count: usize,
    pub unit_count: usize,
    pub trials: Vec<Trial<CasePayload>>,
    pub uncovered: Vec<CaseKey>,
    pub skipped: Vec<SkippedProblem>,
}

impl TrialPlan {
    #[must_use]
    pub fn placed_case_count(&self) -> usize {
        self.trials.iter().map(Trial::len).sum()
    }
}

/// Load the corpus, shuffle its units with the configured seed, and pack
/// them into trials. Pure apart from reading the corpus: identical
/// `(corpus contents, seed, trial_count, trial_capacity)` produce an
/// identical plan.
pub fn generate_trial_plan(config: &HarnessConfig) -> Result<TrialPlan, String> {
    if !config.corpus_root.exists() {
        return Err(format!(
            "corpus root {} does not exist",
            config.corpus_root.display()
        ));
    }

    let corpus = load_corpus(&config.corpus_root, &config.manifest);
    let shuffled_units = shuffled(&corpus.units, config.seed);
    let outcome = allocate(
        &shuffled_units,
        AllocationParams {
            trial_count: config.trial_count,
            trial_capacity: config.trial_capacity,
        },
    );

    Ok(TrialPlan {
        seed: config.seed,
        trial_count: config.trial_count,
        trial_capacity: config.trial_capacity,
        task_count: corpus.task_count,
        unit_count: corpus.units.len(),
        trials: outcome.trials,
        uncovered: outcome.uncovered,
        skipped: corpus.skipped,
    })
}

#[must_use]
pub fn env_fingerprint() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialCaseArtifact {
    pub problem_index: usize,
    pub test_index: usize,
    pub task_path: String,
    pub task_name: String,
    pub train: Vec<Value>,
    pub test_case: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialArtifact {
    pub trial_number: usize,
    pub test_cases: Vec<TrialCaseArtifact>,
}

#[must_use]
pub fn trial_artifacts(plan: &TrialPlan) -> Vec<TrialArtifact> {
    plan.trials
        .iter()
        .map(|trial| TrialArtifact {
            trial_number: trial.trial_number,
            test_cases: trial
                .cases
                .iter()
                .map(|case| TrialCaseArtifact {
                    problem_index: case.key.problem_index,
                    test_index: case.key.test_index,
                    task_path: case.payload.task_path.clone(),
                    task_name: case.payload.task_name.clone(),
                    train: case.payload.train.clone(),
                    test_case: case.payload.test_case.clone(),
                })
                .collect(),
        })
        .collect()
}

fn write_artifact_bytes(path: &Path, payload: &[u8]) -> Result<String, String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed creating {}: {err}", parent.display()))?;
    }
    fs::write(path, payload)
        .map_err(|err| format!("failed writing {}: {err}", path.display()))?;
    Ok(sha256_hex(payload))
}

/// Write the trial sequence as pretty JSON. Returns the artifact's sha256.
pub fn write_trials_json(plan: &TrialPlan, path: &Path) -> Result<String, String> {
    let artifacts = trial_artifacts(plan);
    let payload = serde_json::to_string_pretty(&artifacts)
        .map_err(|err| format!("failed serializing trials: {err}"))?;
    write_artifact_bytes(path, payload.as_bytes())
}

/// Write the same payload as an embedded-JS assignment so `file://`
/// consumers can load it without fetch. Returns the artifact's sha256.
pub fn write_trials_js(plan: &TrialPlan, path: &Path) -> Result<String, String> {
    let artifacts = trial_artifacts(plan);
    let json = serde_json::to_string_pretty(&artifacts)
        .map_err(|err| format!("failed serializing trials: {err}"))?;
    let payload = format!("{TRIALS_JS_BANNER}{json};\n");
    write_artifact_bytes(path, payload.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDigest {
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct UncoveredKeyArtifact {
    problem_index: usize,
    test_index: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SkippedProblemArtifact {
    problem_index: usize,
    task_name: String,
    reason_code: String,
    detail: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CoverageReportArtifact {
    schema_version: u8,
    seed: u64,
    trial_count: usize,
    trial_capacity: usize,
    task_count: usize,
    unit_count: usize,
    placed_case_count: usize,
    trial_sizes: Vec<usize>,
    uncovered: Vec<UncoveredKeyArtifact>,
    skipped_problems: Vec<SkippedProblemArtifact>,
    artifacts: Vec<ArtifactDigest>,
    env_fingerprint: String,
}

/// Write the coverage diagnostic: which cases never landed in a trial,
/// which problem files were skipped, and the digests of the emitted
/// artifacts. Informational only; an uncovered remainder is not an error.
pub fn write_coverage_report(
    plan: &TrialPlan,
    path: &Path,
    artifacts: &[ArtifactDigest],
) -> Result<String, String> {
    let report = CoverageReportArtifact {
        schema_version: PLAN_SCHEMA_VERSION,
        seed: plan.seed,
        trial_count: plan.trial_count,
        trial_capacity: plan.trial_capacity,
        task_count: plan.task_count,
        unit_count: plan.unit_count,
        placed_case_count: plan.placed_case_count(),
        trial_sizes: plan.trials.iter().map(Trial::len).collect(),
        uncovered: plan
            .uncovered
            .iter()
            .map(|key| UncoveredKeyArtifact {
                problem_index: key.problem_index,
                test_index: key.test_index,
            })
            .collect(),
        skipped_problems: plan
            .skipped
            .iter()
            .map(|skipped| SkippedProblemArtifact {
                problem_index: skipped.problem_index,
                task_name: skipped.task_name.clone(),
                reason_code: skipped.reason_code.to_string(),
                detail: skipped.detail.clone(),
            })
            .collect(),
        artifacts: artifacts.to_vec(),
        env_fingerprint: env_fingerprint(),
    };
    let payload = serde_json::to_string_pretty(&report)
        .map_err(|err| format!("failed serializing coverage report: {err}"))?;
    write_artifact_bytes(path, payload.as_bytes())
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanLogRecord {
    pub suite: &'static str,
    pub fixture_id: String,
    pub seed: u64,
    pub env_fingerprint: String,
    pub artifact_refs: Vec<String>,
    pub reason_code: String,
    pub unit_count: usize,
    pub trial_count: usize,
    pub uncovered_count: usize,
    pub passed: bool,
}

impl PlanLogRecord {
    #[must_use]
    pub fn is_replay_complete(&self) -> bool {
        !self.suite.trim().is_empty()
            && !self.fixture_id.trim().is_empty()
            && !self.env_fingerprint.trim().is_empty()
            && !self.reason_code.trim().is_empty()
            && !self.artifact_refs.is_empty()
            && self
                .artifact_refs
                .iter()
                .all(|artifact| !artifact.trim().is_empty())
    }
}

pub fn set_plan_log_path(path: Option<PathBuf>) {
    let cell = PLAN_LOG_PATH.get_or_init(|| Mutex::new(None));
    if let Ok(mut slot) = cell.lock() {
        *slot = path;
    }
}

/// Append one JSON object per line to the configured plan log, if any.
/// Falls back to `TRIALGEN_PLAN_LOG_PATH`; silently a no-op when neither
/// is set.
pub fn maybe_append_plan_log(entry: &PlanLogRecord) -> Result<(), String> {
    let configured = PLAN_LOG_PATH
        .get()
        .and_then(|cell| cell.lock().ok())
        .and_then(|slot| slot.clone());
    let from_env = std::env::var_os("TRIALGEN_PLAN_LOG_PATH").map(PathBuf::from);
    let Some(path) = configured.or(from_env) else {
        return Ok(());
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed creating {}: {err}", parent.display()))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| format!("failed opening {}: {err}", path.display()))?;
    let line = serde_json::to_string(entry)
        .map_err(|err| format!("failed serializing plan log entry: {err}"))?;
    let mut payload = line.into_bytes();
    payload.push(b'\n');
    file.write_all(&payload)
        .map_err(|err| format!("failed appending plan log {}: {err}", path.display()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteReport {
    pub suite: &'static str,
    pub case_count: usize,
    pub pass_count: usize,
    pub failures: Vec<String>,
}

impl SuiteReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.case_count == self.pass_count && self.failures.is_empty()
    }
}

fn record_check(report: &mut SuiteReport, passed: bool, failure: String) {
    report.case_count += 1;
    if passed {
        report.pass_count += 1;
    } else {
        report.failures.push(failure);
    }
}

/// Re-derive the plan twice and check every structural contract: trial
/// count and numbering, the capacity bound, one-case-per-problem inside
/// each trial, coverage accounting against the unit total, and
/// bitwise-identical reruns.
pub fn run_plan_invariant_suite(config: &HarnessConfig) -> Result<SuiteReport, String> {
    let plan = generate_trial_plan(config)?;
    let replay = generate_trial_plan(config)?;

    let mut report = SuiteReport {
        suite: "plan_invariants",
        case_count: 0,
        pass_count: 0,
        failures: Vec::new(),
    };

    record_check(
        &mut report,
        plan.trials.len() == config.trial_count,
        format!(
            "expected {} trials, produced {}",
            config.trial_count,
            plan.trials.len()
        ),
    );
    record_check(
        &mut report,
        plan.trials
            .iter()
            .enumerate()
            .all(|(position, trial)| trial.trial_number == position + 1),
        "trial numbering must be 1-based and gapless".to_string(),
    );

    for trial in &plan.trials {
        record_check(
            &mut report,
            trial.len() <= config.trial_capacity,
            format!(
                "trial {} holds {} cases, over capacity {}",
                trial.trial_number,
                trial.len(),
                config.trial_capacity
            ),
        );
        record_check(
            &mut report,
            trial.problem_indices().len() == trial.len(),
            format!("trial {} repeats a problem", trial.trial_number),
        );
    }

    let placed: BTreeSet<CaseKey> = plan
        .trials
        .iter()
        .flat_map(|trial| trial.cases.iter().map(|case| case.key))
        .collect();
    record_check(
        &mut report,
        plan.uncovered.iter().all(|key| !placed.contains(key)),
        "uncovered report lists a placed case".to_string(),
    );
    record_check(
        &mut report,
        placed.len() + plan.uncovered.len() == plan.unit_count,
        format!(
            "{} placed + {} uncovered != {} units",
            placed.len(),
            plan.uncovered.len(),
            plan.unit_count
        ),
    );

    record_check(
        &mut report,
        plan == replay,
        "identical configs produced diverging plans".to_string(),
    );

    Ok(report)
}
