use anyhow::{Context, Result};
use chrono::Utc;
use elt_pipeline::cli::commands::{
    HistoryCommand, ListCommand, OrderCommand, RunCommand, ScheduleCommand, TargetArgs, ValidateCommand,
};
use elt_pipeline::cli::output::*;
use elt_pipeline::cli::{Cli, Command};
use elt_pipeline::core::{EnvironmentResolver, Overrides, PipelineRun, Project, Selection, StepState};
use elt_pipeline::execution::{ExecutionEngine, ExecutionEvent, TriggerLoop};
use elt_pipeline::persistence::{
    create_summary, ExecutionStatus, ExecutionSummary, InMemoryPersistence, PersistenceBackend,
};
use elt_pipeline::runner::{ProcessRunner, Warehouse};
use elt_pipeline::{PipelineError, ProjectConfig, Step};
use std::path::Path;
use std::sync::Arc;
use tracing::error;
#[cfg(not(feature = "sqlite"))]
use tracing::warn;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_project(cmd)?,
        Command::Order(cmd) => show_order(cmd)?,
        Command::Schedule(cmd) => schedule(cmd).await?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

fn load_project(file: &Path) -> Result<Project> {
    let config = ProjectConfig::from_file(file)
        .with_context(|| format!("Failed to load project {}", file.display()))?;
    Ok(config.to_project()?)
}

/// Plan the run a target asks for; no target means every step
fn plan(project: &Project, target: &TargetArgs) -> Result<PipelineRun, PipelineError> {
    match (&target.pipeline, target.selection()) {
        (Some(name), _) => project.plan_pipeline(name),
        (None, Some(selection)) => project.plan(&project.name, &selection),
        (None, None) => project.plan(&project.name, &Selection::All),
    }
}

fn resolver(env_file: Option<&Path>) -> Result<EnvironmentResolver> {
    let resolver = EnvironmentResolver::from_process();
    match env_file {
        Some(path) => Ok(resolver.with_env_file(path)?),
        None => Ok(resolver),
    }
}

/// Connect the project's warehouse when any of `steps` queries it
async fn connect_warehouse<'a>(
    project: &Project,
    resolver: &EnvironmentResolver,
    overrides: &Overrides,
    mut steps: impl Iterator<Item = &'a Step>,
) -> Result<Option<Arc<dyn Warehouse>>> {
    if !steps.any(|step| step.kind.uses_warehouse()) {
        return Ok(None);
    }
    match project.warehouse_url(resolver, overrides)? {
        Some(url) => Ok(Some(open_warehouse(&url).await?)),
        None => Ok(None),
    }
}

#[cfg(feature = "sqlite")]
async fn open_warehouse(url: &str) -> Result<Arc<dyn Warehouse>> {
    let warehouse = elt_pipeline::runner::SqliteWarehouse::connect(url)
        .await
        .map_err(|e| PipelineError::configuration(e.to_string()))?;
    Ok(Arc::new(warehouse))
}

#[cfg(not(feature = "sqlite"))]
async fn open_warehouse(url: &str) -> Result<Arc<dyn Warehouse>> {
    Err(PipelineError::configuration(format!("cannot connect to {}: built without warehouse support", url)).into())
}

async fn open_store(no_history: bool) -> Result<Arc<dyn PersistenceBackend>> {
    if no_history {
        return Ok(Arc::new(InMemoryPersistence::new()));
    }
    history_store().await
}

#[cfg(feature = "sqlite")]
async fn history_store() -> Result<Arc<dyn PersistenceBackend>> {
    Ok(Arc::new(elt_pipeline::persistence::SqliteExecutionStore::with_default_path().await?))
}

#[cfg(not(feature = "sqlite"))]
async fn history_store() -> Result<Arc<dyn PersistenceBackend>> {
    warn!("Built without sqlite support; history is not persisted");
    Ok(Arc::new(InMemoryPersistence::new()))
}

fn build_engine(
    resolver: EnvironmentResolver,
    warehouse: Option<Arc<dyn Warehouse>>,
) -> ExecutionEngine<ProcessRunner> {
    let engine = ExecutionEngine::new(ProcessRunner::new(), resolver);
    match warehouse {
        Some(warehouse) => engine.with_warehouse(warehouse),
        None => engine,
    }
}

/// Print the full diagnostics of every failed step
fn print_failures(run: &PipelineRun) {
    for step in run.steps.values() {
        if let StepState::Failed { error, .. } = &step.state {
            println!("\n{} {}", CROSS, style(&step.name).red().bold());
            for line in error.to_string().lines() {
                println!("  {}", line);
            }
        }
    }
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let project = load_project(&cmd.file)?;
    println!("{} Loaded project: {}", INFO, style(&project.name).bold());

    let mut run = plan(&project, &cmd.target)?.with_overrides(cmd.overrides());
    for (key, value) in &cmd.set {
        println!("{} Override: {} = {}", INFO, style(key).cyan(), style(value).dim());
    }

    let resolver = resolver(cmd.env_file.as_deref())?;
    let warehouse = connect_warehouse(&project, &resolver, &run.overrides, run.steps.values()).await?;
    let store = open_store(cmd.no_history).await?;

    let mut engine = build_engine(resolver, warehouse);

    // Set up event handler for console output
    let progress = create_progress_bar(run.steps.len());
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        bar.println(format_execution_event(&event));
        match &event {
            ExecutionEvent::StepStarted { step } => bar.set_message(step.clone()),
            ExecutionEvent::StepSucceeded { .. }
            | ExecutionEvent::StepFailed { .. }
            | ExecutionEvent::StepSkipped { .. } => bar.inc(1),
            ExecutionEvent::RunFinished { .. } => bar.finish_and_clear(),
            _ => {}
        }
    });

    println!();
    let status = match engine.execute(&mut run, cmd.policy()).await {
        Ok(status) => status,
        Err(e) => {
            progress.finish_and_clear();
            println!("{} {} could not start:", CROSS, style(&run.name).bold());
            println!("  {}", style(&e).red());
            std::process::exit(2);
        }
    };

    if !cmd.no_history {
        let summary = create_summary(&run);
        store.save_execution(&summary).await?;
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(&summary.execution_id.to_string()[..8]).dim()
        );
    }

    if status == ExecutionStatus::Completed {
        println!(
            "\n{} {} completed {}",
            CHECK,
            style(&run.name).bold(),
            style("successfully").green()
        );
        Ok(())
    } else {
        print_failures(&run);
        println!("\n{} {} {}", CROSS, style(&run.name).bold(), style("failed").red());
        std::process::exit(1);
    }
}

fn validate_project(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating project...", INFO);

    let result = ProjectConfig::from_file(&cmd.file).and_then(|config| {
        let project = config.to_project()?;
        Ok((config, project))
    });

    match result {
        Ok((config, project)) => {
            println!("{} Project configuration is valid!", CHECK);
            println!("  Name: {}", style(&project.name).bold());
            println!("  Steps: {}", style(project.steps.len()).cyan());
            println!("  Pipelines: {}", style(project.pipelines.len()).cyan());
            println!("  Schedules: {}", style(project.schedules.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

fn show_order(cmd: &OrderCommand) -> Result<()> {
    let project = load_project(&cmd.file)?;
    let run = plan(&project, &cmd.target)?;

    println!("{} Execution order for {}:", INFO, style(&run.name).bold());
    for (index, name) in run.execution_order().iter().enumerate() {
        let upstream = run.upstream.get(name).cloned().unwrap_or_default();
        let kind = run.step(name).map(|s| s.kind.label()).unwrap_or_default();
        if upstream.is_empty() {
            println!("  {:>2}. {} {}", index + 1, style(name).cyan(), style(kind).dim());
        } else {
            println!(
                "  {:>2}. {} {} (after {})",
                index + 1,
                style(name).cyan(),
                style(kind).dim(),
                upstream.join(", ")
            );
        }
    }

    Ok(())
}

async fn schedule(cmd: &ScheduleCommand) -> Result<()> {
    let project = load_project(&cmd.file)?;

    if project.schedules.is_empty() {
        println!("{} No schedules defined in {}", INFO, style(&project.name).bold());
        return Ok(());
    }

    if !cmd.serve {
        let now = Utc::now();
        for trigger in &project.schedules {
            println!(
                "{} {} ({}) -> {}",
                CLOCK,
                style(&trigger.name).bold(),
                style(&trigger.schedule).dim(),
                style(&trigger.pipeline).cyan()
            );
            for at in trigger.schedule.upcoming(now, cmd.upcoming) {
                println!("    {}", at.format("%Y-%m-%d %H:%M UTC"));
            }
        }
        return Ok(());
    }

    let overrides = cmd.overrides();
    for (key, value) in &cmd.set {
        println!("{} Override: {} = {}", INFO, style(key).cyan(), style(value).dim());
    }

    let resolver = resolver(cmd.env_file.as_deref())?;
    let warehouse = connect_warehouse(&project, &resolver, &overrides, project.steps.values()).await?;
    let store = open_store(cmd.no_history).await?;
    let mut engine = build_engine(resolver, warehouse);
    engine.add_event_handler(|event| println!("{}", format_execution_event(&event)));

    let triggers = TriggerLoop::new(&project, &engine, cmd.policy()).with_overrides(overrides);

    println!("{} Serving {} schedules (Ctrl-C to stop)", ROCKET, project.schedules.len());
    let no_history = cmd.no_history;
    triggers
        .serve(move |trigger, run| {
            let store = store.clone();
            async move {
                if run.has_failed() {
                    print_failures(&run);
                }
                if !no_history {
                    if let Err(e) = store.save_execution(&create_summary(&run)).await {
                        error!("Failed to save run of '{}': {:#}", trigger.pipeline, e);
                    }
                }
            }
        })
        .await?;

    Ok(())
}

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = open_store(false).await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    if cmd.json {
        let mut json_data = Vec::new();
        for pipeline in &pipelines {
            let executions = store.list_executions(pipeline).await?;
            json_data.push(serde_json::json!({
                "name": pipeline,
                "execution_count": executions.len(),
            }));
        }
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Pipelines in history:", INFO);
    for pipeline_name in &pipelines {
        if cmd.with_counts {
            let executions = store.list_executions(pipeline_name).await?;
            let completed = executions.iter().filter(|e| e.status == ExecutionStatus::Completed).count();
            let failed = executions.iter().filter(|e| e.status == ExecutionStatus::Failed).count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed)",
                style(pipeline_name).bold(),
                style(executions.len()).cyan(),
                style(completed).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_store(false).await?;

    // If specific execution ID is requested
    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id = uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;
        match store.load_execution(exec_id).await? {
            Some(summary) => print_execution_details(&summary),
            None => println!("{} Execution not found", WARN),
        }
        return Ok(());
    }

    let mut executions = match &cmd.pipeline {
        Some(pipeline_name) => store.list_executions(pipeline_name).await?,
        None => {
            let mut all_execs = Vec::new();
            for pipeline in store.list_pipelines().await? {
                all_execs.extend(store.list_executions(&pipeline).await?);
            }
            all_execs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all_execs
        }
    };
    executions.truncate(cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!("{} No executions found", INFO);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, executions.len());
    for summary in &executions {
        println!("  {}", format_execution_summary(summary));
        if cmd.steps {
            for step in &summary.steps {
                println!("      {}", format_step_summary(step));
            }
        }
    }

    Ok(())
}

fn print_execution_details(summary: &ExecutionSummary) {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Progress: {} ({}/{})",
        style(format!("{:.0}%", summary.progress * 100.0)).cyan(),
        summary.succeeded_steps + summary.failed_steps + summary.skipped_steps,
        summary.total_steps
    );
    println!("  Steps:");
    for step in &summary.steps {
        println!("    {}", format_step_summary(step));
        if step.status == "failed" {
            if let Some(detail) = &step.detail {
                for line in detail.lines().skip(1) {
                    println!("        {}", style(line).dim());
                }
            }
        }
    }
}
