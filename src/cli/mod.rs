//! CLI module for tollgate - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
