//! Test: Failure Handling - failed steps, skipped dependents and fail-fast

use crate::helpers::*;
use elt_pipeline::core::{Selection, SkipReason, StepState};
use elt_pipeline::execution::{ExecutionEvent, FailurePolicy};
use elt_pipeline::persistence::create_summary;
use elt_pipeline::PipelineError;

const BRANCHES: &str = r#"
name: olist-elt
steps:
  - name: meltano_ingestion
    command: { program: meltano, args: [run, tap-csv, target-bigquery] }
  - name: dbt_run
    depends_on: [meltano_ingestion]
    command: { program: dbt, args: [run] }
  - name: dbt_test
    depends_on: [dbt_run]
    command: { program: dbt, args: [test] }
  - name: dbt_docs
    depends_on: [dbt_test]
    command: { program: dbt, args: [docs, generate] }
  - name: refresh_seeds
    command: { program: dbt, args: [seed] }
"#;

fn failing_dbt_run() -> MockRunner {
    MockRunner::new().on("dbt run", exit(1, "Running with dbt=1.7.4", "table not found"))
}

#[tokio::test]
async fn test_failure_skips_dependents() {
    let project = project_from_yaml(BRANCHES);
    let runner = failing_dbt_run();
    let harness = Harness::new(runner.clone());

    let run = project.plan("olist-elt", &Selection::All).unwrap();
    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();

    assert_run_failed(&outcome);
    assert_step_succeeded(&outcome, "meltano_ingestion");
    assert_step_failed(&outcome, "dbt_run", "exited with code 1");
    assert_step_skipped(&outcome, "dbt_test", "upstream step 'dbt_run' failed");
    assert_step_skipped(&outcome, "dbt_docs", "upstream step 'dbt_run' failed");

    assert!(!runner.commands().contains(&"dbt test".to_string()));
    assert!(!runner.commands().contains(&"dbt docs generate".to_string()));

    let state = &outcome.run.state;
    assert_eq!((state.succeeded_steps, state.failed_steps, state.skipped_steps), (2, 1, 2));
    assert!(outcome.run.is_complete());
}

#[tokio::test]
async fn test_failure_surfaces_captured_streams() {
    let project = project_from_yaml(BRANCHES);
    let harness = Harness::new(failing_dbt_run());

    let run = project.plan("olist-elt", &Selection::All).unwrap();
    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();

    match outcome.state("dbt_run") {
        StepState::Failed { error: PipelineError::Execution(failure), result, .. } => {
            assert_eq!(failure.exit_code, Some(1));
            assert_eq!(failure.stderr, "table not found");
            assert_eq!(failure.stdout, "Running with dbt=1.7.4");
            assert_eq!(result.as_ref().unwrap().exit_code, Some(1));
        }
        other => panic!("expected execution failure, got {:?}", other),
    }

    assert!(outcome.events.iter().any(|e| matches!(
        e,
        ExecutionEvent::StepFailed { step, error } if step == "dbt_run" && error.contains("table not found")
    )));

    let summary = create_summary(&outcome.run);
    let recorded = summary.steps.iter().find(|s| s.name == "dbt_run").unwrap();
    assert_eq!(recorded.status, "failed");
    assert!(recorded.detail.as_deref().unwrap().contains("table not found"));
}

#[tokio::test]
async fn test_independent_branch_keeps_running() {
    let project = project_from_yaml(BRANCHES);
    let runner = failing_dbt_run();
    let harness = Harness::new(runner.clone());

    let run = project.plan("olist-elt", &Selection::All).unwrap();
    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();

    assert_step_succeeded(&outcome, "refresh_seeds");
    assert!(runner.commands().contains(&"dbt seed".to_string()));
}

#[tokio::test]
async fn test_fail_fast_skips_everything_pending() {
    let project = project_from_yaml(BRANCHES);
    let runner = MockRunner::new().on(
        "meltano run tap-csv target-bigquery",
        exit(2, "", "tap-csv: file not found"),
    );
    let harness = Harness::new(runner.clone());

    let run = project.plan("olist-elt", &Selection::All).unwrap();
    let outcome = harness.run(run, FailurePolicy::FailFast).await.unwrap();

    assert_run_failed(&outcome);
    assert_eq!(runner.commands(), vec!["meltano run tap-csv target-bigquery"]);
    assert_step_failed(&outcome, "meltano_ingestion", "tap-csv: file not found");
    for step in ["dbt_run", "dbt_test", "dbt_docs", "refresh_seeds"] {
        match outcome.state(step) {
            StepState::Skipped { reason: SkipReason::FailFast { failed } } => {
                assert_eq!(failed, "meltano_ingestion")
            }
            other => panic!("Step '{}' should be skipped by fail-fast, was {:?}", step, other),
        }
    }
}

#[tokio::test]
async fn test_stderr_fail_policy_fails_clean_exit() {
    let yaml = r#"
name: strict
steps:
  - name: dbt_test
    stderr_policy: fail
    command: { program: dbt, args: [test] }
  - name: dbt_run
    command: { program: dbt, args: [run] }
"#;
    let project = project_from_yaml(yaml);
    let runner = MockRunner::new()
        .on("dbt test", exit(0, "PASS=4", "WARN unused config"))
        .on("dbt run", exit(0, "OK", "WARN unused config"));
    let harness = Harness::new(runner);

    let run = project.plan("strict", &Selection::All).unwrap();
    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();

    assert_step_failed(&outcome, "dbt_test", "wrote to stderr");
    assert_step_succeeded(&outcome, "dbt_run");
}

#[cfg(unix)]
#[tokio::test]
async fn test_real_process_failure() {
    use elt_pipeline::ProcessRunner;

    let yaml = r#"
name: shell
steps:
  - name: transform
    command: { program: /bin/sh, args: ["-c", "echo compiling; echo 'table not found' >&2; exit 1"] }
  - name: test
    depends_on: [transform]
    command: { program: /bin/sh, args: ["-c", "echo never"] }
"#;
    let project = project_from_yaml(yaml);
    let harness = Harness::new(ProcessRunner::new());

    let run = project.plan("shell", &Selection::All).unwrap();
    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();

    assert_run_failed(&outcome);
    assert_step_failed(&outcome, "transform", "table not found");
    assert_step_failed(&outcome, "transform", "compiling");
    assert_step_skipped(&outcome, "test", "transform");
}

#[cfg(unix)]
#[tokio::test]
async fn test_missing_program_is_execution_failure() {
    use elt_pipeline::ProcessRunner;

    let yaml = r#"
name: missing
steps:
  - name: ingest
    command: { program: /nonexistent/meltano, args: [run] }
"#;
    let project = project_from_yaml(yaml);
    let harness = Harness::new(ProcessRunner::new());

    let run = project.plan("missing", &Selection::All).unwrap();
    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();

    assert_step_failed(&outcome, "ingest", "failed to launch");
}
