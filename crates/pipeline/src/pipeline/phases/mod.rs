// Coordinator phases, in the order an invocation runs them.

#[path = "01_resolve.rs"]
pub mod resolve;
#[path = "02_dependencies.rs"]
pub mod dependencies;
#[path = "03_build.rs"]
pub mod build;
#[path = "04_commands.rs"]
pub mod commands;
#[path = "05_apply.rs"]
pub mod apply;
#[path = "06_teardown.rs"]
pub mod teardown;
