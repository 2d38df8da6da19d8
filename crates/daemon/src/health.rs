use serde::Serialize;
use std::fmt;

/// Status of the most recent run of one feed. Recomputed from scratch on
/// every run, never accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    #[default]
    Nominal,
    Degraded,
    Failed,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Nominal => write!(f, "nominal"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub file: String,
    pub error: String,
}

/// What one run attempted and what came of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Files the run needed
    pub attempted: usize,
    /// Files that were decoded (freshly or from the decoded-file cache)
    pub decoded: usize,
    pub failures: Vec<FileFailure>,
    /// Epoch seconds
    pub completed_at: i64,
}

impl RunReport {
    pub fn state(&self) -> HealthState {
        if self.decoded == 0 {
            HealthState::Failed
        } else if self.failures.is_empty() {
            HealthState::Nominal
        } else {
            HealthState::Degraded
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthTracker {
    state: HealthState,
    last_report: Option<RunReport>,
}

impl HealthTracker {
    /// Replaces the state with the one derived from `report`.
    pub fn record(&mut self, report: RunReport) -> HealthState {
        self.state = report.state();
        self.last_report = Some(report);
        self.state
    }

    /// Marks the run failed regardless of how many files decoded.
    pub fn record_failed(&mut self, report: RunReport) -> HealthState {
        self.state = HealthState::Failed;
        self.last_report = Some(report);
        self.state
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(attempted: usize, decoded: usize, failed: usize) -> RunReport {
        RunReport {
            attempted,
            decoded,
            failures: (0..failed)
                .map(|i| FileFailure {
                    file: format!("file-{}", i),
                    error: "request failed".to_string(),
                })
                .collect(),
            completed_at: 0,
        }
    }

    #[test]
    fn state_follows_the_latest_run_only() {
        let mut tracker = HealthTracker::default();
        assert_eq!(tracker.state(), HealthState::Nominal);

        assert_eq!(tracker.record(report(12, 0, 12)), HealthState::Failed);
        assert_eq!(tracker.record(report(12, 11, 1)), HealthState::Degraded);
        assert_eq!(tracker.record(report(12, 12, 0)), HealthState::Nominal);
        assert_eq!(tracker.last_report().map(|r| r.decoded), Some(12));
    }

    #[test]
    fn forced_failure_overrides_decoded_files() {
        let mut tracker = HealthTracker::default();
        assert_eq!(tracker.record_failed(report(2, 2, 0)), HealthState::Failed);
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&HealthState::Degraded).unwrap(),
            "\"degraded\""
        );
    }
}
