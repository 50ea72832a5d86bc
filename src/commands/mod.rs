//! CLI command implementations for herakles-vm-collector.
//!
//! - `check`: Configuration and runtime validation
//! - `config`: Configuration file generation
//! - `test`: Bounded collection run

pub mod check;
pub mod config;

// Re-export command functions
pub use check::command_check;
pub use config::command_config;
pub use test::command_test;
