//! Remote session transport.
//!
//! [`Connector`] opens an authenticated [`Session`] to one host. The SSH
//! implementation lives in [`ssh`]; tests substitute scripted fakes.

pub mod ssh;

use std::{borrow::Cow, future::Future, time::Duration};

use async_trait::async_trait;
use tracing::warn;

use crate::{
    core::error::{ConnectError, TransportError},
    serialization::{config::Credential, host_list::HostTarget},
};

/// Exit status and captured output of one remote command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_status: u32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    pub fn stdout_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// An authenticated command channel to one host.
#[async_trait]
pub trait Session: Send {
    /// Runs `command` to completion. `stdin`, when given, is written to the
    /// command's input. The input is closed in every case.
    async fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput, TransportError>;

    /// Releases the connection. Calling it again is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;

    async fn run(&mut self, command: &str) -> Result<CommandOutput, TransportError> {
        self.exec(command, None).await
    }

    async fn run_with_input(
        &mut self,
        command: &str,
        input: &[u8],
    ) -> Result<CommandOutput, TransportError> {
        self.exec(command, Some(input)).await
    }
}

/// Opens sessions. Host key verification is deliberately not performed:
/// fleet devices come with ephemeral or unknown keys.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: Session + 'static;

    /// Network failures are retried internally according to the connector's
    /// [`RetryPolicy`]; an authentication rejection is returned immediately.
    async fn connect(
        &self,
        host: &HostTarget,
        credential: &Credential,
    ) -> Result<Self::Session, ConnectError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Runs `attempt` until it succeeds, fails authentication, or the
    /// attempts are used up. The delay is only slept between attempts.
    pub async fn retry_network<T, F, Fut>(
        &self,
        address: &str,
        mut attempt: F,
    ) -> Result<T, ConnectError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ConnectError>>,
    {
        let attempts = self.attempts.max(1);
        let mut last_reason = String::new();
        for n in 1..=attempts {
            match attempt(n).await {
                Ok(value) => return Ok(value),
                Err(e @ ConnectError::Auth { .. }) => return Err(e),
                Err(ConnectError::Network { reason, .. }) => {
                    warn!(
                        host = %address,
                        attempt = n,
                        attempts,
                        %reason,
                        "connection attempt failed"
                    );
                    last_reason = reason;
                    if n < attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
        Err(ConnectError::Network {
            address: address.to_string(),
            reason: format!("failed after {} attempts: {}", attempts, last_reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn network(reason: &str) -> ConnectError {
        ConnectError::Network {
            address: "10.0.0.1".to_string(),
            reason: reason.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn network_failures_are_retried_with_delay() {
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_secs(2),
        };
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result = policy
            .retry_network("10.0.0.1", |n| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(network("connection refused"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_all_attempts() {
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_secs(2),
        };
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .retry_network("10.0.0.1", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(network("timed out")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let err = result.unwrap_err();
        assert!(!err.is_auth());
        assert!(err.to_string().contains("after 3 attempts"), "{err}");
    }

    #[tokio::test]
    async fn auth_rejection_is_not_retried() {
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::ZERO,
        };
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .retry_network("10.0.0.1", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ConnectError::Auth {
                        address: "10.0.0.1".to_string(),
                        user: "admin".to_string(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.unwrap_err().is_auth());
    }
}
