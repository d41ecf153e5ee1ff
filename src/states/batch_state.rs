use std::{fmt, io};

use serde::Serialize;
use tracing::info;

/// Result of one host's deployment.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct DeploymentOutcome {
    pub host: String,
    pub succeeded: bool,
    #[serde(rename = "failureReason")]
    pub failure_reason: Option<String>,
}

impl DeploymentOutcome {
    pub fn success(host: impl Into<String>) -> DeploymentOutcome {
        DeploymentOutcome {
            host: host.into(),
            succeeded: true,
            failure_reason: None,
        }
    }

    pub fn failure(host: impl Into<String>, reason: impl Into<String>) -> DeploymentOutcome {
        DeploymentOutcome {
            host: host.into(),
            succeeded: false,
            failure_reason: Some(reason.into()),
        }
    }
}

/// Running counts kept by the outcome collector while a batch is in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchProgress {
    pub fn new(total: usize) -> BatchProgress {
        BatchProgress {
            total,
            ..BatchProgress::default()
        }
    }

    pub fn record(&mut self, outcome: &DeploymentOutcome) -> &mut BatchProgress {
        self.completed += 1;
        if outcome.succeeded {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self
    }
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct FailedHost {
    pub host: String,
    pub reason: String,
}

/// Derived view over a finished batch.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(rename = "failedHosts")]
    pub failed_hosts: Vec<FailedHost>,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[DeploymentOutcome]) -> BatchSummary {
        let failed_hosts: Vec<FailedHost> = outcomes
            .iter()
            .filter(|o| !o.succeeded)
            .map(|o| FailedHost {
                host: o.host.clone(),
                reason: o.failure_reason.clone().unwrap_or_default(),
            })
            .collect();
        BatchSummary {
            total: outcomes.len(),
            succeeded: outcomes.len() - failed_hosts.len(),
            failed: failed_hosts.len(),
            failed_hosts,
        }
    }

    pub fn failed_addresses(&self) -> Vec<&str> {
        self.failed_hosts.iter().map(|f| f.host.as_str()).collect()
    }

    /// Prints the summary to `out` and logs it line by line. The printed copy
    /// does not depend on the log level.
    pub fn report<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        let text = self.to_string();
        writeln!(out, "{}", text)?;
        out.flush()?;
        for line in text.lines() {
            info!("{}", line);
        }
        Ok(())
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.failed_hosts.is_empty() {
            writeln!(f, "Failed installs on the following hosts:")?;
            for failed in &self.failed_hosts {
                writeln!(f, "  {} ({})", failed.host, failed.reason)?;
            }
        }
        writeln!(f, "Total hosts: {}", self.total)?;
        writeln!(f, "Successful installs: {}", self.succeeded)?;
        write!(f, "Failed installs: {}", self.failed)
    }
}
