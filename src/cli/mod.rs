//! CLI Module
//!
//! Provides command-line interface support:
//! - Exit codes for supervision and automation
//! - Output formatting for the inspection commands

pub mod exit_codes;
pub mod output;

pub use exit_codes::{exit_code_description, CliResult, ExitCodes};
pub use output::{format_sentence, OutputFormat};
