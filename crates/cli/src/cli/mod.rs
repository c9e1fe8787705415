pub mod commands;
pub mod output;

pub use commands::{CliArgs, Commands, DeployArgs, DestroyArgs, EndpointsArgs, TargetArgs, TestArgs};
pub use output::{OutputFormat, OutputFormatter};
