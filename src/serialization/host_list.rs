use std::{fmt, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// One remote device targeted by a batch.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct HostTarget {
    pub address: String,
}

impl HostTarget {
    pub fn new(address: impl Into<String>) -> HostTarget {
        HostTarget {
            address: address.into(),
        }
    }

    /// Host and port to dial. An explicit `host:port` (or `[v6]:port`) wins
    /// over `default_port`.
    pub fn endpoint(&self, default_port: u16) -> (String, u16) {
        let address = self.address.as_str();
        if let Some(rest) = address.strip_prefix('[') {
            if let Some((host, tail)) = rest.split_once(']') {
                let port = tail
                    .strip_prefix(':')
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(default_port);
                return (host.to_string(), port);
            }
        }
        match address.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => match port.parse() {
                Ok(port) => (host.to_string(), port),
                Err(_) => (address.to_string(), default_port),
            },
            _ => (address.to_string(), default_port),
        }
    }
}

impl fmt::Display for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// One target per non-blank line. `#` starts a comment line.
pub fn parse_host_list(contents: &str) -> Vec<HostTarget> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(HostTarget::new)
        .collect()
}

pub fn read_host_list<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<HostTarget>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read host list {}", path.display()))?;
    Ok(parse_host_list(&contents))
}
