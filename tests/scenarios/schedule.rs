//! Test: Schedule triggers firing pipelines

use crate::helpers::*;
use chrono::{TimeZone, Utc};
use elt_pipeline::core::Overrides;
use elt_pipeline::execution::{FailurePolicy, TriggerLoop};

const SCHEDULED: &str = r#"
name: olist-elt
steps:
  - name: meltano_ingestion
    command: { program: meltano, args: [run, tap-csv, target-bigquery] }
  - name: dbt_run
    depends_on: [meltano_ingestion]
    command: { program: dbt, args: [run] }
  - name: dbt_snapshot
    command: { program: dbt, args: [snapshot] }
pipelines:
  - name: full_pipeline
    selection: [meltano_ingestion, dbt_run]
  - name: snapshots
    selection: [dbt_snapshot]
schedules:
  - name: daily_pipeline
    cron: "0 0 * * *"
    pipeline: full_pipeline
  - name: weekly_snapshot
    cron: "0 0 * * 1"
    pipeline: snapshots
  - name: hourly_snapshot
    cron: "30 * * * *"
    pipeline: snapshots
"#;

#[test]
fn test_next_due_collects_simultaneous_triggers() {
    let project = project_from_yaml(SCHEDULED);
    let harness = Harness::new(MockRunner::new());
    let triggers = TriggerLoop::new(&project, &harness.engine, FailurePolicy::Continue);

    // 2024-03-10 is a Sunday; the next midnight is Monday
    let (at, due) = triggers
        .next_due(Utc.with_ymd_and_hms(2024, 3, 10, 23, 45, 0).unwrap())
        .unwrap();
    assert_eq!(at, Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());
    let names: Vec<&str> = due.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["daily_pipeline", "weekly_snapshot"]);

    let (at, due) = triggers
        .next_due(Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap())
        .unwrap();
    assert_eq!(at, Utc.with_ymd_and_hms(2024, 3, 11, 0, 30, 0).unwrap());
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].name, "hourly_snapshot");
}

#[tokio::test]
async fn test_fire_runs_target_pipeline() {
    let project = project_from_yaml(SCHEDULED);
    let runner = MockRunner::new();
    let harness = Harness::new(runner.clone());
    let triggers = TriggerLoop::new(&project, &harness.engine, FailurePolicy::Continue);

    let daily = &project.schedules[0];
    let run = triggers.fire(daily).await.unwrap();

    assert_eq!(run.name, "full_pipeline");
    assert!(run.is_complete());
    assert!(!run.has_failed());
    assert_eq!(
        runner.commands(),
        vec!["meltano run tap-csv target-bigquery", "dbt run"]
    );
}

#[tokio::test]
async fn test_fired_runs_carry_overrides() {
    let project = project_from_yaml(SCHEDULED);
    let runner = MockRunner::new();
    let harness = Harness::new(runner.clone());
    let mut overrides = Overrides::new();
    overrides.insert("DBT_TARGET".into(), Some("prod".into()));
    let triggers = TriggerLoop::new(&project, &harness.engine, FailurePolicy::Continue).with_overrides(overrides);

    let run = triggers.fire(&project.schedules[0]).await.unwrap();

    assert_eq!(run.overrides["DBT_TARGET"], Some("prod".to_string()));
    assert_eq!(runner.env_of("dbt run").get("DBT_TARGET"), Some("prod"));
    assert_eq!(runner.env_of("meltano run tap-csv target-bigquery").get("DBT_TARGET"), Some("prod"));
}

#[tokio::test]
async fn test_fired_run_records_failures() {
    let project = project_from_yaml(SCHEDULED);
    let runner = MockRunner::new().on("dbt snapshot", exit(1, "", "snapshot target missing"));
    let harness = Harness::new(runner);
    let triggers = TriggerLoop::new(&project, &harness.engine, FailurePolicy::Continue);

    let run = triggers.fire(&project.schedules[1]).await.unwrap();
    assert!(run.has_failed());
    assert_eq!(run.state.failed_steps, 1);
}

#[test]
fn test_bad_cron_rejected_at_load() {
    let yaml = r#"
name: olist-elt
steps:
  - { name: dbt_run, command: { program: dbt, args: [run] } }
pipelines:
  - { name: full_pipeline, selection: "*" }
schedules:
  - { name: broken, cron: "61 * * * *", pipeline: full_pipeline }
"#;
    let err = elt_pipeline::ProjectConfig::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("61 is outside 0-59"));
}
