//! Error types for host deployments.
//!
//! Nothing in here ever escapes the host worker: every variant ends up as
//! the failure reason of a [`crate::states::batch_state::DeploymentOutcome`].

use thiserror::Error;

use crate::serialization::artifact_set::ArtifactRole;

/// Failures of the remote session itself (channel setup, I/O, protocol).
#[derive(Error, Debug)]
pub enum TransportError {
    /// The SSH layer reported an error.
    #[error("ssh error: {0}")]
    Ssh(String),

    /// The channel closed before the remote command reported its exit status.
    #[error("channel closed without exit status for `{0}`")]
    MissingExitStatus(String),

    /// The session was already closed.
    #[error("session is closed")]
    Closed,
}

/// Why a connection attempt with one credential did not produce a session.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Transient network failure, surfaced after the transport's own retries.
    #[error("network error connecting to {address}: {reason}")]
    Network { address: String, reason: String },

    /// The host rejected this credential. Never retried.
    #[error("authentication rejected for {user}@{address}")]
    Auth { address: String, user: String },
}

impl ConnectError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ConnectError::Auth { .. })
    }
}

/// Failure of an installation step. The first one encountered fails the host.
#[derive(Error, Debug)]
pub enum InstallError {
    /// A local artifact required by the profile is missing.
    #[error("local artifact {0} is missing")]
    Precondition(ArtifactRole),

    /// Pushing a file through the sink protocol failed.
    #[error("failed to transfer {path}: {reason}")]
    Transfer { path: String, reason: String },

    /// A remote command exited non-zero.
    #[error("`{step}` exited with status {status}: {stderr}")]
    Command {
        step: String,
        status: u32,
        stderr: String,
    },

    /// The session failed underneath a step.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The service was installed but is not confirmed running.
    #[error("service verification failed")]
    VerificationFailed,
}

/// Result type for installation steps.
pub type InstallResult<T> = std::result::Result<T, InstallError>;
