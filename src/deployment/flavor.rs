use std::fmt;

use tracing::{debug, warn};

use crate::{
    core::constants::{EMBEDDED_OS_MARKER, OS_RELEASE_PATH},
    transport::Session,
};

/// Installation profile of a connected host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flavor {
    /// No package manager: files placed directly, init script generated.
    Embedded,
    /// Package manager and service manager available.
    PackageManaged,
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flavor::Embedded => f.write_str("embedded"),
            Flavor::PackageManaged => f.write_str("package-managed"),
        }
    }
}

pub fn classify(os_release: &str) -> Flavor {
    if os_release.contains(EMBEDDED_OS_MARKER) {
        Flavor::Embedded
    } else {
        Flavor::PackageManaged
    }
}

/// Never fails: an unreadable os-release means a package-managed host.
pub async fn detect(session: &mut dyn Session) -> Flavor {
    let command = format!("cat {}", OS_RELEASE_PATH);
    match session.run(&command).await {
        Ok(output) if output.success() => {
            let flavor = classify(&output.stdout_str());
            debug!(%flavor, "detected host flavor");
            flavor
        }
        Ok(output) => {
            warn!(
                status = output.exit_status,
                "reading os-release failed, assuming package-managed host"
            );
            Flavor::PackageManaged
        }
        Err(e) => {
            warn!(error = %e, "reading os-release failed, assuming package-managed host");
            Flavor::PackageManaged
        }
    }
}
