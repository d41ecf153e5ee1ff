use std::{
    collections::BTreeMap,
    fmt, io,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{debug, info};

use crate::core::{
    constants::{REMOTE_STAGING_DIR, SERVICE_DIR, SERVICE_NAME},
    error::{InstallError, InstallResult},
};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactRole {
    MainBinary,
    TrustBundle,
    RuntimeConfig,
    Package,
    SidePackage,
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArtifactRole::MainBinary => "main-binary",
            ArtifactRole::TrustBundle => "trust-bundle",
            ArtifactRole::RuntimeConfig => "runtime-config",
            ArtifactRole::Package => "package",
            ArtifactRole::SidePackage => "side-package",
        };
        f.write_str(name)
    }
}

/// Local bytes and where they go on the remote host.
#[derive(Clone, Debug)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub remote_path: String,
    pub digest: String,
}

impl Artifact {
    pub fn new(bytes: Vec<u8>, remote_path: impl Into<String>) -> Artifact {
        let digest = format!("{:x}", Sha1::digest(&bytes));
        Artifact {
            bytes,
            remote_path: remote_path.into(),
            digest,
        }
    }
}

/// Where to find an artifact locally and where it should land.
#[derive(Clone, Debug)]
pub struct ArtifactSpec {
    pub role: ArtifactRole,
    pub local_path: PathBuf,
    pub remote_path: String,
}

impl ArtifactSpec {
    /// The three files the embedded profile places under the service directory.
    pub fn embedded(dir: &Path) -> Vec<ArtifactSpec> {
        [
            (ArtifactRole::MainBinary, SERVICE_NAME),
            (ArtifactRole::TrustBundle, "cacert.pem"),
            (ArtifactRole::RuntimeConfig, "config"),
        ]
        .into_iter()
        .map(|(role, name)| ArtifactSpec {
            role,
            local_path: dir.join(name),
            remote_path: format!("{}/{}", SERVICE_DIR, name),
        })
        .collect()
    }

    /// A file staged under the remote staging directory by its basename.
    pub fn staged(role: ArtifactRole, local_path: &Path) -> ArtifactSpec {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| role.to_string());
        ArtifactSpec {
            role,
            local_path: local_path.to_path_buf(),
            remote_path: format!("{}/{}", REMOTE_STAGING_DIR, name),
        }
    }
}

/// Artifacts by role, loaded once and shared read-only by every worker.
#[derive(Clone, Debug, Default)]
pub struct ArtifactSet {
    artifacts: BTreeMap<ArtifactRole, Artifact>,
}

impl ArtifactSet {
    pub fn new() -> ArtifactSet {
        ArtifactSet::default()
    }

    pub fn insert(
        &mut self,
        role: ArtifactRole,
        bytes: Vec<u8>,
        remote_path: impl Into<String>,
    ) -> &mut ArtifactSet {
        self.artifacts.insert(role, Artifact::new(bytes, remote_path));
        self
    }

    pub fn get(&self, role: ArtifactRole) -> Option<&Artifact> {
        self.artifacts.get(&role)
    }

    pub fn require(&self, role: ArtifactRole) -> InstallResult<&Artifact> {
        self.get(role).ok_or(InstallError::Precondition(role))
    }

    pub fn contains(&self, role: ArtifactRole) -> bool {
        self.artifacts.contains_key(&role)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Reads every artifact whose local file exists. Missing files are left out
    /// and only fail the hosts whose profile needs them.
    pub fn load(specs: &[ArtifactSpec]) -> anyhow::Result<ArtifactSet> {
        let mut set = ArtifactSet::new();
        for spec in specs {
            match std::fs::read(&spec.local_path) {
                Ok(bytes) => {
                    set.insert(spec.role, bytes, spec.remote_path.clone());
                    if let Some(artifact) = set.get(spec.role) {
                        info!(
                            role = %spec.role,
                            path = %spec.local_path.display(),
                            size = artifact.bytes.len(),
                            sha1 = %artifact.digest,
                            "loaded artifact"
                        );
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(role = %spec.role, path = %spec.local_path.display(), "artifact not present");
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("failed to read artifact {}", spec.local_path.display())
                    });
                }
            }
        }
        Ok(set)
    }
}
