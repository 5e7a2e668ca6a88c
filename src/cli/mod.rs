//! Command-line frontend for the prodapic library
//!
//! This module is only available when the "cli" feature is enabled.

mod config;
#[path = "main.rs"]
mod main_impl;
mod progress;

pub use main_impl::{main, Cli, CliFamily, CliOutputFormat, Command, ComposeArgs, RunArgs};
pub use progress::SpinnerProgressReporter;
