//! Per-invocation state shared by the commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_migrate::{MigrationSession, Reporter, create_engine};
use tracing::debug;

use crate::config::Config;
use crate::error::CliResult;
use crate::output;

/// Global options and the helpers every command needs.
#[derive(Debug, Clone)]
pub struct Context {
    config_path: PathBuf,
    quiet: bool,
}

impl Context {
    /// Create a context.
    pub fn new(config_path: PathBuf, quiet: bool) -> Self {
        Self { config_path, quiet }
    }

    /// Path of the configuration file.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Whether only errors are printed.
    pub fn quiet(&self) -> bool {
        self.quiet
    }

    /// Load the configuration, falling back to defaults.
    pub fn config(&self) -> CliResult<Config> {
        Config::load_or_default(&self.config_path)
    }

    /// Build a migration session from the configuration.
    pub async fn session(&self) -> CliResult<MigrationSession> {
        let config = self.config()?;
        let mut builder = MigrationSession::builder(config.migrations.clone())
            .plugins(config.plugin_infos())
            .registry(config.registry()?)
            .reporter(Arc::new(ConsoleReporter { quiet: self.quiet }));
        for (bind, url) in config.bind_urls()? {
            debug!(bind = %bind, url = %strata_migrate::obfuscate_url(&url), "Opening database");
            builder = builder.engine(bind, create_engine(&url).await?);
        }
        Ok(builder.build().await?)
    }

    /// Print an informational line unless quiet.
    pub fn info(&self, text: &str) {
        if !self.quiet {
            output::info(text);
        }
    }

    /// Print a success line unless quiet.
    pub fn success(&self, text: &str) {
        if !self.quiet {
            output::success(text);
        }
    }
}

/// Prints migration progress to the terminal.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleReporter {
    quiet: bool,
}

impl Reporter for ConsoleReporter {
    fn step(&self, message: &str) {
        if !self.quiet {
            output::dim(message);
        }
    }

    fn info(&self, message: &str) {
        if !self.quiet {
            output::info(message);
        }
    }

    fn warn(&self, message: &str) {
        output::warn(message);
    }
}
