//! Progress reporting.

use tracing::{info, warn};

/// Receives progress messages from long-running operations.
pub trait Reporter: Send + Sync {
    /// A migration step is about to run.
    fn step(&self, message: &str);

    /// Informational message.
    fn info(&self, message: &str);

    /// Something the user should look at.
    fn warn(&self, message: &str);

    /// A bind finished its part of the run.
    fn bind_finished(&self, bind: &str, ok: bool) {
        let name = if bind.is_empty() { "<default>" } else { bind };
        if ok {
            self.info(&format!("Migrating database {} ... ok", name));
        } else {
            self.warn(&format!("Migrating database {} ... failed", name));
        }
    }
}

/// Forwards progress to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn step(&self, message: &str) {
        info!(target: "strata::migration", "{}", message);
    }

    fn info(&self, message: &str) {
        info!(target: "strata::migration", "{}", message);
    }

    fn warn(&self, message: &str) {
        warn!(target: "strata::migration", "{}", message);
    }
}
