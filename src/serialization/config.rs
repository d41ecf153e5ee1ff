use std::{collections::BTreeMap, fmt, fs::File, io::BufReader, path::Path, path::PathBuf, time::Duration};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::{
    core::constants::{
        CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY_SECS, CONNECT_TIMEOUT_SECS, MAX_CONCURRENCY,
        SSH_DEFAULT_PORT,
    },
    transport::RetryPolicy,
};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub device_classes: BTreeMap<String, DeviceClass>,
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub elevation: ElevationMode,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DeviceClass {
    pub credentials: Vec<Credential>,
}

/// One username/secret pair tried against a host.
///
/// With `identity_file` set the session authenticates by public key and the
/// secret is only used as the sudo password.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub secret: String,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

impl Credential {
    pub fn password(username: impl Into<String>, secret: impl Into<String>) -> Credential {
        Credential {
            username: username.into(),
            secret: secret.into(),
            identity_file: None,
        }
    }
}

// keep secrets out of logs
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("identity_file", &self.identity_file)
            .finish()
    }
}

/// How privileged remote steps get their elevation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ElevationMode {
    /// `sudo -S`, password written to the command's stdin.
    #[default]
    Password,
    /// `sudo -n`, target has a NOPASSWD policy.
    Passwordless,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SshSettings {
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub connect_attempts: u32,
    pub retry_delay_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        SshSettings {
            port: SSH_DEFAULT_PORT,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            connect_attempts: CONNECT_ATTEMPTS,
            retry_delay_secs: CONNECT_RETRY_DELAY_SECS,
        }
    }
}

impl SshSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.connect_attempts.max(1),
            delay: Duration::from_secs(self.retry_delay_secs),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct LogSettings {
    pub file: Option<PathBuf>,
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            file: Some(PathBuf::from("installer.log")),
            level: String::from("info"),
        }
    }
}

fn default_max_concurrency() -> usize {
    MAX_CONCURRENCY
}

impl Config {
    pub fn read_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open config {}", path.display()))?;
        let reader = BufReader::new(file);
        let config: Config = serde_json::from_reader(reader)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Ordered credentials for the device class chosen for this batch.
    pub fn credentials_for(&self, device_class: &str) -> anyhow::Result<Vec<Credential>> {
        let class = self.device_classes.get(device_class).ok_or_else(|| {
            let known: Vec<&str> = self.device_classes.keys().map(String::as_str).collect();
            anyhow!(
                "unknown device class `{}` (known: {})",
                device_class,
                known.join(", ")
            )
        })?;
        if class.credentials.is_empty() {
            return Err(anyhow!("device class `{}` has no credentials", device_class));
        }
        Ok(class.credentials.clone())
    }
}
