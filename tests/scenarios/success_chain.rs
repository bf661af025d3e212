//! Test: Success Chain - dependency-ordered runs where every step succeeds

use crate::helpers::*;
use elt_pipeline::core::Selection;
use elt_pipeline::execution::{ExecutionEvent, FailurePolicy};
use elt_pipeline::persistence::create_summary;

const CHAIN: &str = r#"
name: olist-elt
steps:
  - name: dbt_test
    depends_on: [dbt_run]
    command: { program: dbt, args: [test] }
  - name: meltano_ingestion
    command: { program: meltano, args: [run, tap-csv, target-bigquery] }
  - name: dbt_run
    depends_on: [meltano_ingestion]
    command: { program: dbt, args: [run] }
  - name: dbt_docs
    depends_on: [dbt_run]
    command: { program: dbt, args: [docs, generate] }
pipelines:
  - name: full_pipeline
    selection: [meltano_ingestion, dbt_run, dbt_test]
  - name: everything
    selection: "*"
"#;

#[tokio::test]
async fn test_chain_runs_in_dependency_order() {
    let project = project_from_yaml(CHAIN);
    let runner = MockRunner::new().on("dbt run", ok("Completed successfully"));
    let harness = Harness::new(runner.clone());

    let run = project.plan_pipeline("full_pipeline").unwrap();
    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();

    assert_run_completed(&outcome);
    assert_eq!(
        runner.commands(),
        vec!["meltano run tap-csv target-bigquery", "dbt run", "dbt test"]
    );
    assert_eq!(outcome.started(), vec!["meltano_ingestion", "dbt_run", "dbt_test"]);
    for step in ["meltano_ingestion", "dbt_run", "dbt_test"] {
        assert_step_succeeded(&outcome, step);
    }
    assert!(outcome.run.step("dbt_docs").is_none());

    let result = outcome.state("dbt_run").result().unwrap();
    assert_eq!(result.stdout, "Completed successfully");
    assert_eq!(result.exit_code, Some(0));
}

#[tokio::test]
async fn test_run_state_and_events() {
    let project = project_from_yaml(CHAIN);
    let harness = Harness::new(MockRunner::new().on("dbt run", ok("OK=12")));

    let run = project.plan_pipeline("everything").unwrap();
    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();

    let state = &outcome.run.state;
    assert_eq!(state.total_steps, 4);
    assert_eq!(state.succeeded_steps, 4);
    assert_eq!(state.failed_steps, 0);
    assert!(state.started_at.is_some());
    assert!(state.completed_at.is_some());
    assert_eq!(state.progress(), 1.0);

    assert!(matches!(
        outcome.events.first(),
        Some(ExecutionEvent::RunStarted { total_steps: 4, pipeline_name, .. }) if pipeline_name == "everything"
    ));
    assert!(matches!(outcome.events.last(), Some(ExecutionEvent::RunFinished { .. })));
    assert!(outcome.events.iter().any(|e| matches!(
        e,
        ExecutionEvent::StepOutput { step, output } if step == "dbt_run" && output == "OK=12"
    )));

    let summary = create_summary(&outcome.run);
    assert_eq!(summary.steps.len(), 4);
    assert!(summary.steps.iter().all(|s| s.status == "succeeded"));
}

#[tokio::test]
async fn test_single_step_selection_runs_without_upstream() {
    let project = project_from_yaml(CHAIN);
    let runner = MockRunner::new();
    let harness = Harness::new(runner.clone());

    let run = project
        .plan("adhoc", &Selection::Steps(vec!["dbt_test".into()]))
        .unwrap();
    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();

    assert_run_completed(&outcome);
    assert_eq!(runner.commands(), vec!["dbt test"]);
}

#[tokio::test]
async fn test_selection_keeps_order_through_unselected_steps() {
    let project = project_from_yaml(CHAIN);
    let runner = MockRunner::new();
    let harness = Harness::new(runner.clone());

    // dbt_run is not selected but still orders dbt_test after ingestion
    let run = project
        .plan(
            "adhoc",
            &Selection::Steps(vec!["dbt_test".into(), "meltano_ingestion".into()]),
        )
        .unwrap();
    assert_eq!(run.upstream["dbt_test"], vec!["meltano_ingestion"]);

    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();
    assert_run_completed(&outcome);
    assert_eq!(
        runner.commands(),
        vec!["meltano run tap-csv target-bigquery", "dbt test"]
    );
}

#[tokio::test]
async fn test_reported_order_matches_run_order() {
    let project = project_from_yaml(CHAIN);
    let run = project.plan_pipeline("everything").unwrap();
    let planned = run.execution_order().to_vec();

    let runner = MockRunner::new();
    let outcome = Harness::new(runner.clone())
        .run(run, FailurePolicy::Continue)
        .await
        .unwrap();

    assert_eq!(outcome.started(), planned);
    let position = |name: &str| planned.iter().position(|s| s == name).unwrap();
    assert!(position("meltano_ingestion") < position("dbt_run"));
    assert!(position("dbt_run") < position("dbt_test"));
    assert!(position("dbt_run") < position("dbt_docs"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_real_processes_capture_output() {
    use elt_pipeline::ProcessRunner;

    let yaml = r#"
name: shell
steps:
  - name: extract
    command: { program: /bin/sh, args: ["-c", "echo extracted 3 files"] }
  - name: load
    depends_on: [extract]
    command: { program: /bin/sh, args: ["-c", "echo loaded; echo 'deprecation notice' >&2"] }
"#;
    let project = project_from_yaml(yaml);
    let harness = Harness::new(ProcessRunner::new());

    let run = project.plan("shell", &Selection::All).unwrap();
    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();

    assert_run_completed(&outcome);
    let extract = outcome.state("extract").result().unwrap();
    assert_eq!(extract.stdout.trim(), "extracted 3 files");

    // Stderr on a zero exit is logged, not fatal
    let load = outcome.state("load").result().unwrap();
    assert_eq!(load.stdout.trim(), "loaded");
    assert_eq!(load.stderr.trim(), "deprecation notice");
}
