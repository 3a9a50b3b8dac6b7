pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{CliArgs, Commands, PlanArgs, ResourcesArgs, RunArgs};
pub use output::{OutputFormat, OutputFormatter};
