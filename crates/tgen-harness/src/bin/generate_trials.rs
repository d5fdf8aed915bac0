#![forbid(unsafe_code)]

use tgen_harness::{
    ArtifactDigest, COVERAGE_REPORT_FILE, HarnessConfig, PlanLogRecord, TRIALS_JS_FILE,
    TRIALS_JSON_FILE, env_fingerprint, generate_trial_plan, maybe_append_plan_log,
    write_coverage_report, write_trials_js, write_trials_json,
};

fn main() {
    if let Err(err) = run() {
        eprintln!("generate_trials failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let config = HarnessConfig::default_paths();
    let plan = generate_trial_plan(&config)?;

    println!(
        "loaded {} problem files, {} test cases available",
        plan.task_count, plan.unit_count
    );
    for skipped in &plan.skipped {
        println!(
            "skipped {}: {} ({})",
            skipped.task_name, skipped.detail, skipped.reason_code
        );
    }
    for trial in &plan.trials {
        println!("trial {}: {} test cases", trial.trial_number, trial.len());
    }

    let trials_json_path = config.artifact_root.join(TRIALS_JSON_FILE);
    let trials_js_path = config.artifact_root.join(TRIALS_JS_FILE);
    let report_path = config.artifact_root.join(COVERAGE_REPORT_FILE);

    let trials_json_digest = write_trials_json(&plan, &trials_json_path)?;
    let trials_js_digest = write_trials_js(&plan, &trials_js_path)?;
    write_coverage_report(
        &plan,
        &report_path,
        &[
            ArtifactDigest {
                path: trials_json_path.display().to_string(),
                sha256: trials_json_digest,
            },
            ArtifactDigest {
                path: trials_js_path.display().to_string(),
                sha256: trials_js_digest,
            },
        ],
    )?;

    let reason_code = if plan.uncovered.is_empty() {
        println!("all {} test cases are covered in the trials", plan.unit_count);
        "plan_generation_complete"
    } else {
        println!(
            "warning: {} test cases were not used in any trial",
            plan.uncovered.len()
        );
        "plan_coverage_warning"
    };

    maybe_append_plan_log(&PlanLogRecord {
        suite: "generate_trials",
        fixture_id: "production_corpus_plan".to_string(),
        seed: plan.seed,
        env_fingerprint: env_fingerprint(),
        artifact_refs: vec![
            trials_json_path.display().to_string(),
            trials_js_path.display().to_string(),
            report_path.display().to_string(),
        ],
        reason_code: reason_code.to_string(),
        unit_count: plan.unit_count,
        trial_count: plan.trials.len(),
        uncovered_count: plan.uncovered.len(),
        passed: true,
    })?;

    println!("trials saved to {}", trials_json_path.display());
    println!("trials also saved as JavaScript to {}", trials_js_path.display());
    Ok(())
}
