//! Scripted in-memory transport shared by the integration tests.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use fleet_deploy::{
    core::error::{ConnectError, TransportError},
    serialization::{
        artifact_set::{ArtifactRole, ArtifactSet},
        config::Credential,
        host_list::HostTarget,
    },
    transport::{CommandOutput, Connector, Session},
};

pub const BUILDROOT: &str = "NAME=Buildroot\nVERSION=2023.02.1\nID=buildroot\n";
pub const DEBIAN: &str = "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nID=debian\n";

#[derive(Default)]
struct Shared {
    /// host -> usernames it accepts; hosts not listed accept everyone
    accepted: HashMap<String, HashSet<String>>,
    /// host -> network failure on every attempt
    unreachable: HashSet<String>,
    os_release: HashMap<String, String>,
    /// host -> substrings of commands that exit non-zero
    failing: HashMap<String, Vec<String>>,
    command_delay: Duration,

    attempts: Mutex<Vec<(String, String)>>,
    commands: Mutex<HashMap<String, Vec<String>>>,
    files: Mutex<HashMap<(String, String), Vec<u8>>>,
    open: AtomicUsize,
    max_open: AtomicUsize,
    closed: AtomicUsize,
}

/// Builder for a [`FakeConnector`].
#[derive(Default)]
pub struct FakeFleet {
    shared: Shared,
}

impl FakeFleet {
    pub fn new() -> FakeFleet {
        FakeFleet::default()
    }

    pub fn accept(mut self, host: &str, users: &[&str]) -> FakeFleet {
        self.shared.accepted.insert(
            host.to_string(),
            users.iter().map(|u| u.to_string()).collect(),
        );
        self
    }

    pub fn unreachable(mut self, host: &str) -> FakeFleet {
        self.shared.unreachable.insert(host.to_string());
        self
    }

    pub fn os_release(mut self, host: &str, contents: &str) -> FakeFleet {
        self.shared
            .os_release
            .insert(host.to_string(), contents.to_string());
        self
    }

    pub fn fail_command(mut self, host: &str, needle: &str) -> FakeFleet {
        self.shared
            .failing
            .entry(host.to_string())
            .or_default()
            .push(needle.to_string());
        self
    }

    pub fn command_delay(mut self, delay: Duration) -> FakeFleet {
        self.shared.command_delay = delay;
        self
    }

    pub fn build(self) -> FakeConnector {
        FakeConnector {
            shared: Arc::new(self.shared),
        }
    }
}

#[derive(Clone)]
pub struct FakeConnector {
    shared: Arc<Shared>,
}

impl FakeConnector {
    pub fn attempts(&self) -> Vec<(String, String)> {
        self.shared.attempts.lock().unwrap().clone()
    }

    pub fn commands(&self, host: &str) -> Vec<String> {
        self.shared
            .commands
            .lock()
            .unwrap()
            .get(host)
            .cloned()
            .unwrap_or_default()
    }

    pub fn file(&self, host: &str, path: &str) -> Option<Vec<u8>> {
        self.shared
            .files
            .lock()
            .unwrap()
            .get(&(host.to_string(), path.to_string()))
            .cloned()
    }

    pub fn max_open(&self) -> usize {
        self.shared.max_open.load(Ordering::SeqCst)
    }

    pub fn open_now(&self) -> usize {
        self.shared.open.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Opens a session without going through credential checks.
    pub fn session(&self, host: &str) -> FakeSession {
        self.open_session(host)
    }

    fn open_session(&self, host: &str) -> FakeSession {
        let open = self.shared.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_open.fetch_max(open, Ordering::SeqCst);
        FakeSession {
            host: host.to_string(),
            shared: Arc::clone(&self.shared),
            closed: false,
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn connect(
        &self,
        host: &HostTarget,
        credential: &Credential,
    ) -> Result<FakeSession, ConnectError> {
        self.shared
            .attempts
            .lock()
            .unwrap()
            .push((host.address.clone(), credential.username.clone()));
        tokio::task::yield_now().await;

        if self.shared.unreachable.contains(&host.address) {
            return Err(ConnectError::Network {
                address: host.address.clone(),
                reason: "connection refused".to_string(),
            });
        }
        if let Some(users) = self.shared.accepted.get(&host.address) {
            if !users.contains(&credential.username) {
                return Err(ConnectError::Auth {
                    address: host.address.clone(),
                    user: credential.username.clone(),
                });
            }
        }
        Ok(self.open_session(&host.address))
    }
}

pub struct FakeSession {
    host: String,
    shared: Arc<Shared>,
    closed: bool,
}

impl FakeSession {
    /// Decodes a single-file sink payload the way `scp -t` would.
    fn receive(&self, path: &str, input: &[u8]) -> CommandOutput {
        let rejected = |msg: &str| CommandOutput {
            exit_status: 1,
            stdout: [&b"\x02"[..], msg.as_bytes(), &b"\n"[..]].concat(),
            stderr: Vec::new(),
        };
        let Some(newline) = input.iter().position(|b| *b == b'\n') else {
            return rejected("protocol error: no header");
        };
        let header = String::from_utf8_lossy(&input[..newline]).to_string();
        let fields: Vec<&str> = header.split(' ').collect();
        if fields.len() != 3 || !fields[0].starts_with('C') {
            return rejected("protocol error: bad header");
        }
        let Ok(len) = fields[1].parse::<usize>() else {
            return rejected("protocol error: bad length");
        };
        let body = &input[newline + 1..];
        if body.len() != len + 1 || body[len] != 0 {
            return rejected("protocol error: bad payload");
        }
        self.shared
            .files
            .lock()
            .unwrap()
            .insert((self.host.clone(), path.to_string()), body[..len].to_vec());
        CommandOutput {
            exit_status: 0,
            stdout: b"\0\0\0".to_vec(),
            stderr: Vec::new(),
        }
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.shared.command_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.shared.command_delay).await;
        }

        self.shared
            .commands
            .lock()
            .unwrap()
            .entry(self.host.clone())
            .or_default()
            .push(command.to_string());

        let fails = self
            .shared
            .failing
            .get(&self.host)
            .map_or(false, |needles| needles.iter().any(|n| command.contains(n.as_str())));
        if fails {
            return Ok(CommandOutput {
                exit_status: 1,
                stdout: Vec::new(),
                stderr: b"command failed".to_vec(),
            });
        }

        if let Some(path) = command.strip_prefix("scp -t ") {
            return Ok(self.receive(path, stdin.unwrap_or_default()));
        }
        if command.starts_with("cat /etc/os-release") {
            let os_release = self
                .shared
                .os_release
                .get(&self.host)
                .cloned()
                .unwrap_or_else(|| BUILDROOT.to_string());
            return Ok(CommandOutput {
                exit_status: 0,
                stdout: os_release.into_bytes(),
                stderr: Vec::new(),
            });
        }
        Ok(CommandOutput {
            exit_status: 0,
            stdout: b"root 812 status-updater\n".to_vec(),
            stderr: Vec::new(),
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.shared.open.fetch_sub(1, Ordering::SeqCst);
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        if !self.closed {
            self.shared.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub fn hosts(addresses: &[&str]) -> Vec<HostTarget> {
    addresses.iter().map(|a| HostTarget::new(*a)).collect()
}

pub fn credentials(users: &[&str]) -> Vec<Credential> {
    users
        .iter()
        .map(|u| Credential::password(*u, format!("{}-secret", u)))
        .collect()
}

pub fn embedded_artifacts() -> ArtifactSet {
    let mut set = ArtifactSet::new();
    set.insert(
        ArtifactRole::MainBinary,
        b"\x7fELF status-updater".to_vec(),
        "/opt/status-updater/status-updater",
    )
    .insert(
        ArtifactRole::TrustBundle,
        b"-----BEGIN CERTIFICATE-----".to_vec(),
        "/opt/status-updater/cacert.pem",
    )
    .insert(
        ArtifactRole::RuntimeConfig,
        b"{\"sleep_interval\": 60}".to_vec(),
        "/opt/status-updater/config",
    );
    set
}

pub fn full_artifacts() -> ArtifactSet {
    let mut set = embedded_artifacts();
    set.insert(
        ArtifactRole::Package,
        b"!<arch>\ndebian-binary".to_vec(),
        "/tmp/status-updater_1.4.0_armhf.deb",
    )
    .insert(
        ArtifactRole::SidePackage,
        b"PK\x03\x04".to_vec(),
        "/tmp/lldpd-packages.zip",
    );
    set
}
