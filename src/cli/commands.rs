use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Runs build and test steps in resource-bounded, isolated containers
#[derive(Parser, Debug)]
#[command(
    name = "suitey",
    about = "Runs build and test steps in resource-bounded, isolated containers",
    version,
    author,
    long_about = "suitey executes build steps inside ephemeral Docker containers. Steps run \
                  in dependency order, independent steps in parallel, bounded by CPU and \
                  memory. Each step's outcome is collected and summarised in a report."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Execute build steps",
        long_about = "Reads a build_steps_* key=value document and executes every step.\n\n\
                      Exit codes: 0 success, 1 steps failed or aborted, 2 fatal error, \
                      130 interrupted.\n\n\
                      Examples:\n  \
                      suitey run steps.env\n  \
                      suitey run steps.env --max-parallel 2 --format json\n  \
                      planner | suitey run -"
    )]
    Run(RunArgs),

    #[command(
        about = "Print the execution plan without running anything",
        long_about = "Validates the steps and prints the parallel groups they would run in.\n\n\
                      Examples:\n  \
                      suitey plan steps.env\n  \
                      suitey plan steps.env --format json"
    )]
    Plan(PlanArgs),

    #[command(about = "Show CPU, memory and concurrency limits")]
    Resources(ResourcesArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[arg(value_name = "STEPS", help = "Build steps file, or - for stdin")]
    pub steps: PathBuf,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Report format"
    )]
    pub format: OutputFormatArg,

    #[arg(
        short = 'j',
        long,
        value_name = "N",
        help = "Maximum concurrent steps (capped at the CPU count)"
    )]
    pub max_parallel: Option<usize>,

    #[arg(long, value_name = "DIR", help = "Directory for result files")]
    pub temp_dir: Option<PathBuf>,

    #[arg(long, value_name = "DIR", help = "Root for per-step artifact directories")]
    pub artifact_dir: Option<PathBuf>,

    #[arg(long, value_name = "MB", help = "Memory limit for each container")]
    pub container_memory: Option<u64>,
}

#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    #[arg(value_name = "STEPS", help = "Build steps file, or - for stdin")]
    pub steps: PathBuf,

    #[arg(short = 'f', long, value_enum, default_value = "kv", help = "Output format")]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct ResourcesArgs {
    #[arg(short = 'j', long, value_name = "N", help = "Requested parallelism")]
    pub max_parallel: Option<usize>,

    #[arg(short = 'f', long, value_enum, default_value = "kv", help = "Output format")]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Kv,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Kv => super::output::OutputFormat::Kv,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}
