use std::{fs, io, path::Path};

use serde::Serialize;
use tracing::info;

use crate::logging::target;

// SESSION STATS
// ================================================================================================

/// Counters accumulated across a whole session and reported at completion.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct SessionStats {
    /// Findings produced by all analysis runs.
    pub results: usize,
    /// Findings confirmed by a replay.
    pub confirmed: usize,
    /// Runs that produced at least one finding.
    pub tests_with_results: usize,
    /// Runs that failed (parse errors, runtime failures).
    pub errors: usize,
    /// Runs aborted by a phase timeout.
    pub timeouts: usize,
}

impl SessionStats {
    pub fn record_run(&mut self, findings: usize) {
        self.results += findings;
        if findings > 0 {
            self.tests_with_results += 1;
        }
    }

    pub fn log_summary(&self) {
        info!(
            target: target::RESULT,
            results = self.results,
            confirmed = self.confirmed,
            tests_with_results = self.tests_with_results,
            errors = self.errors,
            timeouts = self.timeouts,
            "session complete"
        );
    }

    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(path, json)
    }
}
