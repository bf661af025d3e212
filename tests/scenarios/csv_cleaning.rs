//! Test: Cleaning raw extracts ahead of ingestion

use crate::helpers::*;
use elt_pipeline::core::Selection;
use elt_pipeline::execution::FailurePolicy;

fn project_for(data_dir: &std::path::Path) -> elt_pipeline::Project {
    project_from_yaml(&format!(
        r#"
name: olist-elt
steps:
  - name: clean_raw_csv
    clean_csv: {{ dir: "{}" }}
  - name: meltano_ingestion
    depends_on: [clean_raw_csv]
    command: {{ program: meltano, args: [run, tap-csv, target-bigquery] }}
"#,
        data_dir.display()
    ))
}

#[tokio::test]
async fn test_cleaned_files_are_ready_before_ingestion() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("olist_customers_dataset.csv"),
        "\u{feff}\n,,\ncustomer_id , customer_city\nc1, sao paulo \n , \n",
    )
    .unwrap();
    std::fs::write(dir.path().join("olist_orders_dataset_cleaned.csv"), "stale\n").unwrap();

    let project = project_for(dir.path());
    let runner = MockRunner::new();
    let harness = Harness::new(runner.clone());

    let run = project.plan("olist-elt", &Selection::All).unwrap();
    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();

    assert_run_completed(&outcome);
    assert_eq!(outcome.started(), vec!["clean_raw_csv", "meltano_ingestion"]);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("olist_customers_dataset_cleaned.csv")).unwrap(),
        "customer_id,customer_city\nc1,sao paulo\n"
    );
    // Cleaned copies are never inputs themselves
    assert!(!dir.path().join("olist_orders_dataset_cleaned_cleaned.csv").exists());
    assert_eq!(runner.commands(), vec!["meltano run tap-csv target-bigquery"]);
}

#[tokio::test]
async fn test_unreadable_extract_blocks_ingestion() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("olist_sellers_dataset.csv"), b"seller_id\n\xff\xfe\n").unwrap();

    let project = project_for(dir.path());
    let runner = MockRunner::new();
    let harness = Harness::new(runner.clone());

    let run = project.plan("olist-elt", &Selection::All).unwrap();
    let outcome = harness.run(run, FailurePolicy::Continue).await.unwrap();

    assert_run_failed(&outcome);
    assert_step_failed(&outcome, "clean_raw_csv", "olist_sellers_dataset.csv");
    assert_step_skipped(&outcome, "meltano_ingestion", "upstream step 'clean_raw_csv' failed");
    assert!(runner.commands().is_empty());
}
