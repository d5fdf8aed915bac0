use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use serde_json::Value;
use tgen_corpus::CategorySpec;
use tgen_harness::{
    ArtifactDigest, HarnessConfig, generate_trial_plan, run_plan_invariant_suite, sha256_hex,
    write_coverage_report, write_trials_js, write_trials_json,
};
use tgen_shuffle::DEFAULT_TRIAL_SEED;

fn fixture_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

fn scratch_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tgen_smoke_{label}_{}", std::process::id()));
    if dir.exists() {
        fs::remove_dir_all(&dir).expect("stale scratch dir removal");
    }
    fs::create_dir_all(&dir).expect("scratch dir creation");
    dir
}

fn synthetic_config(label: &str) -> HarnessConfig {
    HarnessConfig {
        corpus_root: fixture_root().join("corpus"),
        artifact_root: scratch_dir(label),
        manifest: vec![CategorySpec::new("SyntheticSmall", "Synthetic", 3)],
        seed: DEFAULT_TRIAL_SEED,
        trial_count: 2,
        trial_capacity: 3,
    }
}

#[test]
fn synthetic_corpus_packs_into_two_trials() {
    let plan = generate_trial_plan(&synthetic_config("pack")).expect("plan generation");

    // Two + three usable tests, plus nine from the ten-test problem.
    assert_eq!(plan.task_count, 3);
    assert_eq!(plan.unit_count, 14);
    assert!(plan.skipped.is_empty());

    assert_eq!(plan.trials.len(), 2);
    for trial in &plan.trials {
        assert!(trial.len() <= 3);
        assert_eq!(trial.problem_indices().len(), trial.len());
    }

    // Three distinct problems with spare fresh tests each: both trials fill.
    assert_eq!(plan.trials[0].len(), 3);
    assert_eq!(plan.trials[1].len(), 3);
    assert_eq!(plan.trials[0].problem_indices(), BTreeSet::from([0, 1, 2]));
    assert_eq!(plan.trials[1].problem_indices(), BTreeSet::from([0, 1, 2]));

    // Six fresh placements, no reuse, eight cases left uncovered.
    let placed: BTreeSet<_> = plan
        .trials
        .iter()
        .flat_map(|trial| trial.cases.iter().map(|case| case.key))
        .collect();
    assert_eq!(placed.len(), 6);
    assert_eq!(plan.uncovered.len(), 8);
    assert!(plan.uncovered.iter().all(|key| !placed.contains(key)));

    // The ten-test problem only contributes held-in indices.
    assert!(
        plan.trials
            .iter()
            .flat_map(|trial| trial.cases.iter())
            .filter(|case| case.key.problem_index == 2)
            .all(|case| case.key.test_index >= 1)
    );
}

#[test]
fn identical_configs_replay_identically() {
    let config = synthetic_config("replay");
    let first = generate_trial_plan(&config).expect("first plan");
    let second = generate_trial_plan(&config).expect("second plan");
    assert_eq!(first, second);
}

#[test]
fn different_seeds_reorder_the_plan() {
    let mut config = synthetic_config("reseed");
    let baseline = generate_trial_plan(&config).expect("baseline plan");
    config.seed = DEFAULT_TRIAL_SEED + 1;
    let reseeded = generate_trial_plan(&config).expect("reseeded plan");

    // Same shape either way; the seed only changes which cases land where.
    assert_eq!(reseeded.trials.len(), baseline.trials.len());
    assert_eq!(reseeded.unit_count, baseline.unit_count);
}

#[test]
fn plan_invariant_suite_passes_on_fixtures() {
    let suite = run_plan_invariant_suite(&synthetic_config("suite")).expect("suite execution");
    assert!(
        suite.all_passed(),
        "suite {} failed with {:?}",
        suite.suite,
        suite.failures
    );
    assert_eq!(suite.suite, "plan_invariants");
}

#[test]
fn artifacts_round_trip_through_serialization() {
    let config = synthetic_config("roundtrip");
    let plan = generate_trial_plan(&config).expect("plan generation");

    let trials_json_path = config.artifact_root.join("trials.json");
    let trials_js_path = config.artifact_root.join("js/trials_data.js");
    let report_path = config.artifact_root.join("coverage_report.json");

    let json_digest = write_trials_json(&plan, &trials_json_path).expect("trials.json write");
    let js_digest = write_trials_js(&plan, &trials_js_path).expect("trials_data.js write");
    write_coverage_report(
        &plan,
        &report_path,
        &[
            ArtifactDigest {
                path: trials_json_path.display().to_string(),
                sha256: json_digest.clone(),
            },
            ArtifactDigest {
                path: trials_js_path.display().to_string(),
                sha256: js_digest,
            },
        ],
    )
    .expect("coverage report write");

    let raw = fs::read_to_string(&trials_json_path).expect("trials.json read");
    assert_eq!(sha256_hex(raw.as_bytes()), json_digest);
    let trials: Value = serde_json::from_str(&raw).expect("trials.json parses");
    let trials = trials.as_array().expect("trials.json is an array");
    assert_eq!(trials.len(), 2);
    assert_eq!(trials[0]["trialNumber"], 1);
    assert_eq!(trials[1]["trialNumber"], 2);
    let case = &trials[0]["testCases"][0];
    for key in ["problemIndex", "testIndex", "taskPath", "taskName", "train", "testCase"] {
        assert!(!case[key].is_null(), "missing key {key}");
    }
    assert!(
        case["taskPath"]
            .as_str()
            .expect("taskPath is a string")
            .starts_with("corpus/SyntheticSmall/")
    );

    let js_body = fs::read_to_string(&trials_js_path).expect("trials_data.js read");
    let embedded = js_body
        .strip_prefix("// Auto-generated trials data\nvar TRIALS_DATA = ")
        .and_then(|rest| rest.strip_suffix(";\n"))
        .expect("js wrapper shape");
    assert_eq!(embedded, raw);

    let report: Value =
        serde_json::from_str(&fs::read_to_string(&report_path).expect("coverage read"))
            .expect("coverage parses");
    assert_eq!(report["unitCount"], 14);
    assert_eq!(report["placedCaseCount"], 6);
    assert_eq!(report["uncovered"].as_array().map(Vec::len), Some(8));
    assert_eq!(report["artifacts"].as_array().map(Vec::len), Some(2));
}

#[test]
fn malformed_problem_files_are_skipped_not_fatal() {
    let config = HarnessConfig {
        corpus_root: fixture_root().join("corpus_malformed"),
        artifact_root: scratch_dir("malformed_artifacts"),
        manifest: vec![CategorySpec::new("BadCat", "Bad", 2)],
        seed: DEFAULT_TRIAL_SEED,
        trial_count: 1,
        trial_capacity: 1,
    };
    let plan = generate_trial_plan(&config).expect("plan generation");

    assert_eq!(plan.task_count, 2);
    assert_eq!(plan.skipped.len(), 1);
    assert_eq!(plan.skipped[0].reason_code, "corpus_problem_json_invalid");
    assert_eq!(plan.skipped[0].problem_index, 0);

    // The surviving problem keeps its enumeration index.
    assert_eq!(plan.unit_count, 1);
    assert_eq!(plan.trials[0].len(), 1);
    assert_eq!(plan.trials[0].cases[0].key.problem_index, 1);
}

#[test]
fn missing_corpus_root_is_an_error() {
    let config = HarnessConfig {
        corpus_root: fixture_root().join("no_such_corpus"),
        artifact_root: scratch_dir("missing_artifacts"),
        manifest: vec![CategorySpec::new("Nothing", "Nothing", 1)],
        seed: DEFAULT_TRIAL_SEED,
        trial_count: 1,
        trial_capacity: 1,
    };
    let err = generate_trial_plan(&config).expect_err("missing corpus must fail");
    assert!(err.contains("does not exist"), "unexpected error: {err}");
}
