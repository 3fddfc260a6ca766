//! Command-line interface for workpipe

pub mod commands;

pub use commands::Cli;
