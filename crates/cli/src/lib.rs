//! ARTK CLI
//!
//! Maps `artk` subcommands onto the pipeline and prints the results.

pub mod commands;
pub mod output;
