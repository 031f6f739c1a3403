//! Command-line interface.

mod commands;
mod output;

pub use commands::{Cli, Commands, DeployOptionArgs, MaterialArgs, OutputFormat, TargetArgs};
pub use output::{OutputFormatter, Status};
