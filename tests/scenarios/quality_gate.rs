//! Test: Quality Gates and query steps against a warehouse

use crate::helpers::*;
use elt_pipeline::core::{Selection, StepState};
use elt_pipeline::execution::FailurePolicy;
use elt_pipeline::PipelineError;
use std::sync::Arc;

const NULL_CUSTOMERS: &str = "SELECT COUNT(*) FROM olist_marts.fact_sales WHERE customer_id IS NULL";
const NEGATIVE_AMOUNTS: &str = "SELECT COUNT(*) FROM olist_marts.fact_sales WHERE order_amount < 0";

const GATED: &str = r#"
name: olist-elt
environment:
  MARTS_DATASET_NAME: olist_marts
steps:
  - name: dbt_run
    command: { program: dbt, args: [run] }
  - name: run_data_quality_tests
    depends_on: [dbt_run]
    quality_gate:
      - name: null_customer_id
        sql: "SELECT COUNT(*) FROM {{ MARTS_DATASET_NAME }}.fact_sales WHERE customer_id IS NULL"
        max: 0
      - name: negative_order_amount
        sql: "SELECT COUNT(*) FROM {{ MARTS_DATASET_NAME }}.fact_sales WHERE order_amount < 0"
        max: 0
  - name: exploratory_analysis
    depends_on: [run_data_quality_tests]
    command: { program: jupyter, args: [nbconvert, --execute, analysis.ipynb] }
"#;

#[tokio::test]
async fn test_gate_passes_when_all_checks_hold() {
    let project = project_from_yaml(GATED);
    let warehouse = Arc::new(
        FixtureWarehouse::new()
            .count(NULL_CUSTOMERS, 0)
            .count(NEGATIVE_AMOUNTS, 0),
    );
    let runner = MockRunner::new();
    let harness = Harness::new(runner.clone()).warehouse(warehouse.clone());

    let run = project.plan("olist-elt", &Selection::All).unwrap();
    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();

    assert_run_completed(&outcome);
    assert_eq!(warehouse.queries(), vec![NULL_CUSTOMERS, NEGATIVE_AMOUNTS]);
    assert_eq!(
        runner.commands(),
        vec!["dbt run", "jupyter nbconvert --execute analysis.ipynb"]
    );
}

#[tokio::test]
async fn test_gate_stops_at_first_violation() {
    let project = project_from_yaml(GATED);
    let warehouse = Arc::new(
        FixtureWarehouse::new()
            .count(NULL_CUSTOMERS, 3)
            .count(NEGATIVE_AMOUNTS, 0),
    );
    let runner = MockRunner::new();
    let harness = Harness::new(runner.clone()).warehouse(warehouse.clone());

    let run = project.plan("olist-elt", &Selection::All).unwrap();
    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();

    assert_run_failed(&outcome);
    match outcome.state("run_data_quality_tests") {
        StepState::Failed {
            error: PipelineError::QualityGate { gate, check, predicate, count },
            ..
        } => {
            assert_eq!(gate, "run_data_quality_tests");
            assert_eq!(check, "null_customer_id");
            assert_eq!(predicate, "<= 0");
            assert_eq!(*count, 3);
        }
        other => panic!("expected quality gate failure, got {:?}", other),
    }

    // The second check is never queried
    assert_eq!(warehouse.queries(), vec![NULL_CUSTOMERS]);
    assert_step_skipped(&outcome, "exploratory_analysis", "run_data_quality_tests");
    assert_eq!(runner.commands(), vec!["dbt run"]);
}

#[tokio::test]
async fn test_gate_query_error_is_execution_failure() {
    let project = project_from_yaml(GATED);
    // Neither query has an answer, so the first one errors
    let warehouse = Arc::new(FixtureWarehouse::new());
    let harness = Harness::new(MockRunner::new()).warehouse(warehouse.clone());

    let run = project.plan("olist-elt", &Selection::All).unwrap();
    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();

    assert!(matches!(
        outcome.state("run_data_quality_tests"),
        StepState::Failed { error: PipelineError::Execution(_), .. }
    ));
    assert_step_failed(&outcome, "run_data_quality_tests", "no such table");
    assert_eq!(warehouse.queries().len(), 1);
}

#[tokio::test]
async fn test_query_step_threshold_and_export() {
    let dir = tempfile::tempdir().unwrap();
    let export = dir.path().join("outputs").join("monthly_sales.json");
    let yaml = format!(
        r#"
name: analysis
steps:
  - name: orders_loaded
    query:
      sql: "SELECT COUNT(*) FROM orders"
      min: 1
  - name: monthly_sales
    depends_on: [orders_loaded]
    query:
      sql: "SELECT month, total FROM monthly_sales"
      export: "{}"
"#,
        export.display()
    );
    let project = project_from_yaml(&yaml);
    let rows = elt_pipeline::ResultSet::new(
        vec!["month".into(), "total".into()],
        vec![
            vec![serde_json::json!("2018-01"), serde_json::json!(1200.5)],
            vec![serde_json::json!("2018-02"), serde_json::json!(980.0)],
        ],
    );
    let warehouse = Arc::new(
        FixtureWarehouse::new()
            .count("SELECT COUNT(*) FROM orders", 99441)
            .rows("SELECT month, total FROM monthly_sales", rows),
    );
    let harness = Harness::new(MockRunner::new()).warehouse(warehouse);

    let run = project.plan("analysis", &Selection::All).unwrap();
    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();

    assert_run_completed(&outcome);
    let exported: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&export).unwrap()).unwrap();
    assert_eq!(exported[0]["month"], "2018-01");
    assert_eq!(exported[1]["total"], 980.0);
}

#[tokio::test]
async fn test_query_step_below_minimum_fails() {
    let yaml = r#"
name: analysis
steps:
  - name: orders_loaded
    query:
      sql: "SELECT COUNT(*) FROM orders"
      min: 1
"#;
    let project = project_from_yaml(yaml);
    let warehouse = Arc::new(FixtureWarehouse::new().count("SELECT COUNT(*) FROM orders", 0));
    let harness = Harness::new(MockRunner::new()).warehouse(warehouse);

    let run = project.plan("analysis", &Selection::All).unwrap();
    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();

    assert!(matches!(
        outcome.state("orders_loaded"),
        StepState::Failed { error: PipelineError::QueryFailure { actual: 0, .. }, .. }
    ));
    assert_step_failed(&outcome, "orders_loaded", "expected >= 1, got 0");
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_gate_against_sqlite_warehouse() {
    use elt_pipeline::runner::SqliteWarehouse;

    let warehouse = SqliteWarehouse::in_memory().await.unwrap();
    warehouse
        .execute_script(
            r#"
            CREATE TABLE fact_sales (order_id TEXT, customer_id TEXT, order_amount REAL);
            INSERT INTO fact_sales VALUES ('o1', 'c1', 10.0), ('o2', 'c2', 25.5), ('o3', NULL, 4.0);
            "#,
        )
        .await
        .unwrap();

    let yaml = r#"
name: sqlite-gate
steps:
  - name: quality
    quality_gate:
      - name: negative_order_amount
        sql: "SELECT COUNT(*) FROM fact_sales WHERE order_amount < 0"
        max: 0
      - name: null_customer_id
        sql: "SELECT COUNT(*) FROM fact_sales WHERE customer_id IS NULL"
        max: 0
"#;
    let project = project_from_yaml(yaml);
    let harness = Harness::new(MockRunner::new()).warehouse(Arc::new(warehouse));

    let run = project.plan("sqlite-gate", &Selection::All).unwrap();
    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();

    assert_step_failed(
        &outcome,
        "quality",
        "quality gate 'quality' failed at check 'null_customer_id': expected <= 0, got 1",
    );
}
