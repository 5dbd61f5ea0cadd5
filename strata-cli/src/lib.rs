//! Strata CLI - Command-line interface for Strata migrations.
//!
//! This crate provides the `strata` binary: it reads `strata.toml`, builds
//! a migration session for the configured plugins and databases, and runs
//! one command against it.

pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod output;
