//! Subcommand handlers; each returns the process exit code

use super::commands::{PlanArgs, ResourcesArgs, RunArgs};
use super::output::{OutputFormat, OutputFormatter};
use crate::config::SuiteyConfig;
use crate::container::{DockerRuntime, MockRuntime};
use crate::error::SuiteyError;
use crate::executor::EXIT_FATAL;
use crate::orchestrator::Orchestrator;
use crate::steps::{parse_steps, BuildStep};
use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error};

/// Reads a steps document from `path`, or stdin for `-`
pub fn read_steps(path: &Path) -> Result<Vec<BuildStep>> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read build steps from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read build steps from {}", path.display()))?
    };
    let steps = parse_steps(&text).map_err(SuiteyError::from)?;
    debug!(count = steps.len(), "Build steps loaded");
    Ok(steps)
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<SuiteyError>()
        .map(SuiteyError::exit_code)
        .unwrap_or(EXIT_FATAL)
}

fn report_error(err: anyhow::Error) -> i32 {
    error!("{:#}", err);
    eprintln!("Error: {:#}", err);
    exit_code_for(&err)
}

fn emit(output: String, quiet: bool) {
    if !quiet {
        print!("{}", output);
        if !output.ends_with('\n') {
            println!();
        }
    }
}

pub async fn handle_run(args: &RunArgs, quiet: bool) -> i32 {
    match run(args, quiet).await {
        Ok(code) => code,
        Err(e) => report_error(e),
    }
}

async fn run(args: &RunArgs, quiet: bool) -> Result<i32> {
    let mut config = SuiteyConfig::default();
    if args.max_parallel.is_some() {
        config.max_parallel = args.max_parallel;
    }
    if let Some(dir) = &args.temp_dir {
        config.temp_dir = dir.clone();
    }
    if let Some(dir) = &args.artifact_dir {
        config.artifact_dir = dir.clone();
    }
    if let Some(mb) = args.container_memory.filter(|mb| *mb > 0) {
        config.container_memory_mb = Some(mb);
    }

    let steps = read_steps(&args.steps)?;

    let runtime = DockerRuntime::connect().map_err(SuiteyError::from)?;
    runtime.ping().await.map_err(SuiteyError::from)?;

    let orchestrator = Orchestrator::new(config, Arc::new(runtime)).with_signal_handling(true);
    let report = orchestrator.run(&steps).await?;

    let formatter = OutputFormatter::new(OutputFormat::from(args.format));
    emit(formatter.format_report(&report)?, quiet && report.success);
    Ok(report.exit_code())
}

pub async fn handle_plan(args: &PlanArgs) -> i32 {
    match plan(args) {
        Ok(code) => code,
        Err(e) => report_error(e),
    }
}

fn plan(args: &PlanArgs) -> Result<i32> {
    let steps = read_steps(&args.steps)?;
    // Planning never touches the runtime
    let orchestrator = Orchestrator::new(SuiteyConfig::default(), Arc::new(MockRuntime::new()));
    let plan = orchestrator.prepare(&steps)?;

    let formatter = OutputFormatter::new(OutputFormat::from(args.format));
    emit(formatter.format_plan(&plan, &steps)?, false);
    Ok(0)
}

pub async fn handle_resources(args: &ResourcesArgs) -> i32 {
    let mut config = SuiteyConfig::default();
    if args.max_parallel.is_some() {
        config.max_parallel = args.max_parallel;
    }
    let orchestrator = Orchestrator::new(config, Arc::new(MockRuntime::new()));
    let summary = orchestrator.resources();

    let formatter = OutputFormatter::new(OutputFormat::from(args.format));
    match formatter.format_resources(&summary) {
        Ok(output) => {
            emit(output, false);
            0
        }
        Err(e) => report_error(e),
    }
}
