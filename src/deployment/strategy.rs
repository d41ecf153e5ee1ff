//! Installation strategies.
//!
//! Both profiles walk the same machine:
//! `Transferring -> Configuring -> Starting -> Verifying -> Done`, and the
//! first error moves them to `Failed`. There is no partial success.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::{flavor::Flavor, init_script, shell_quote, transfer};
use crate::{
    core::{
        constants::{INIT_SCRIPT_PATH, SERVICE_NAME, SIDE_BUNDLE_UNPACK_DIR},
        error::{InstallError, InstallResult},
    },
    serialization::{
        artifact_set::{ArtifactRole, ArtifactSet},
        config::{Credential, ElevationMode},
    },
    transport::{CommandOutput, Session},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstallState {
    Transferring,
    Configuring,
    Starting,
    Verifying,
    Done,
    Failed(String),
}

impl InstallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstallState::Done | InstallState::Failed(_))
    }
}

/// Per-batch install choices, fixed before any host is contacted.
#[derive(Clone, Copy, Debug, Default)]
pub struct InstallOptions {
    pub elevation: ElevationMode,
    pub side_bundle: bool,
}

/// Wraps privileged commands. In password mode the secret goes to `sudo -S`
/// over stdin and never appears in the command line.
#[derive(Clone, Copy)]
pub struct Elevation<'a> {
    mode: ElevationMode,
    secret: &'a str,
}

impl<'a> Elevation<'a> {
    pub fn new(mode: ElevationMode, secret: &'a str) -> Elevation<'a> {
        Elevation { mode, secret }
    }

    pub fn command(&self, command: &str) -> String {
        match self.mode {
            ElevationMode::Password => format!("sudo -S -p '' {}", command),
            ElevationMode::Passwordless => format!("sudo -n {}", command),
        }
    }

    pub fn input(&self) -> Option<Vec<u8>> {
        match self.mode {
            ElevationMode::Password => Some(format!("{}\n", self.secret).into_bytes()),
            ElevationMode::Passwordless => None,
        }
    }

    async fn run(&self, session: &mut dyn Session, command: &str) -> InstallResult<CommandOutput> {
        let input = self.input();
        run_checked(session, &self.command(command), input.as_deref()).await
    }
}

async fn run_checked(
    session: &mut dyn Session,
    command: &str,
    input: Option<&[u8]>,
) -> InstallResult<CommandOutput> {
    debug!(%command, "running remote command");
    let output = session.exec(command, input).await?;
    if !output.success() {
        return Err(InstallError::Command {
            step: command.to_string(),
            status: output.exit_status,
            stderr: output.stderr_str().trim().to_string(),
        });
    }
    Ok(output)
}

fn parent_dir(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((dir, _)) => dir,
        None => ".",
    }
}

const EMBEDDED_ROLES: [ArtifactRole; 3] = [
    ArtifactRole::MainBinary,
    ArtifactRole::TrustBundle,
    ArtifactRole::RuntimeConfig,
];

/// Direct file placement plus a generated SysV init script.
pub struct EmbeddedInstall<'a> {
    artifacts: &'a ArtifactSet,
    jitter: Duration,
}

impl<'a> EmbeddedInstall<'a> {
    pub fn new(artifacts: &'a ArtifactSet, jitter: Duration) -> EmbeddedInstall<'a> {
        EmbeddedInstall { artifacts, jitter }
    }

    fn check_preconditions(&self) -> InstallResult<()> {
        for role in EMBEDDED_ROLES {
            self.artifacts.require(role)?;
        }
        Ok(())
    }

    async fn transfer(&self, session: &mut dyn Session) -> InstallResult<()> {
        for role in EMBEDDED_ROLES {
            let artifact = self.artifacts.require(role)?;
            let dir = parent_dir(&artifact.remote_path);
            run_checked(session, &format!("mkdir -p {}", shell_quote(dir)), None).await?;
        }
        for role in EMBEDDED_ROLES {
            let artifact = self.artifacts.require(role)?;
            transfer::push(session, &artifact.bytes, &artifact.remote_path).await?;
        }
        Ok(())
    }

    async fn configure(&self, session: &mut dyn Session) -> InstallResult<()> {
        info!(jitter_secs = self.jitter.as_secs(), "installing init script");
        let script = init_script::render(self.jitter);
        transfer::push(session, script.as_bytes(), INIT_SCRIPT_PATH).await?;
        run_checked(session, &format!("chmod +x {}", INIT_SCRIPT_PATH), None).await?;
        run_checked(
            session,
            &format!("update-rc.d {} defaults", SERVICE_NAME),
            None,
        )
        .await?;
        Ok(())
    }

    async fn start(&self, session: &mut dyn Session) -> InstallResult<()> {
        run_checked(session, &format!("{} start", INIT_SCRIPT_PATH), None).await?;
        Ok(())
    }

    async fn verify(&self, session: &mut dyn Session) -> InstallResult<()> {
        let command = format!("ps aux | grep {} | grep -v grep", SERVICE_NAME);
        let output = session.run(&command).await?;
        if !output.success() || output.stdout.is_empty() {
            return Err(InstallError::VerificationFailed);
        }
        Ok(())
    }
}

/// dpkg install plus systemd service management, both under elevation.
pub struct PackageInstall<'a> {
    artifacts: &'a ArtifactSet,
    elevation: Elevation<'a>,
    side_bundle: bool,
}

impl<'a> PackageInstall<'a> {
    pub fn new(
        artifacts: &'a ArtifactSet,
        elevation: Elevation<'a>,
        side_bundle: bool,
    ) -> PackageInstall<'a> {
        PackageInstall {
            artifacts,
            elevation,
            side_bundle,
        }
    }

    fn check_preconditions(&self) -> InstallResult<()> {
        self.artifacts.require(ArtifactRole::Package)?;
        if self.side_bundle {
            self.artifacts.require(ArtifactRole::SidePackage)?;
        }
        Ok(())
    }

    // The side bundle carries dependencies of the main package, so it is
    // installed first and any failure is fatal for the host.
    async fn install_side_bundle(&self, session: &mut dyn Session) -> InstallResult<()> {
        let bundle = self.artifacts.require(ArtifactRole::SidePackage)?;
        transfer::push(session, &bundle.bytes, &bundle.remote_path).await?;

        let archive = shell_quote(&bundle.remote_path);
        run_checked(
            session,
            &format!("unzip -o {} -d {}", archive, SIDE_BUNDLE_UNPACK_DIR),
            None,
        )
        .await?;
        self.elevation
            .run(session, &format!("dpkg -i {}/*.deb", SIDE_BUNDLE_UNPACK_DIR))
            .await?;
        run_checked(
            session,
            &format!("rm -rf {} {}", SIDE_BUNDLE_UNPACK_DIR, archive),
            None,
        )
        .await?;
        info!("side bundle installed");
        Ok(())
    }

    async fn transfer(&self, session: &mut dyn Session) -> InstallResult<()> {
        if self.side_bundle {
            self.install_side_bundle(session).await?;
        }
        let package = self.artifacts.require(ArtifactRole::Package)?;
        transfer::push(session, &package.bytes, &package.remote_path).await
    }

    async fn configure(&self, session: &mut dyn Session) -> InstallResult<()> {
        let package = self.artifacts.require(ArtifactRole::Package)?;
        self.elevation
            .run(session, &format!("dpkg -i {}", shell_quote(&package.remote_path)))
            .await?;
        Ok(())
    }

    async fn start(&self, session: &mut dyn Session) -> InstallResult<()> {
        self.elevation
            .run(session, &format!("systemctl start {}", SERVICE_NAME))
            .await?;
        Ok(())
    }

    async fn verify(&self, session: &mut dyn Session) -> InstallResult<()> {
        match self
            .elevation
            .run(session, &format!("systemctl status {}", SERVICE_NAME))
            .await
        {
            Ok(_) => Ok(()),
            Err(InstallError::Command { .. }) => Err(InstallError::VerificationFailed),
            Err(e) => Err(e),
        }
    }
}

/// The closed set of installation strategies, picked by the flavor detector.
pub enum Installation<'a> {
    Embedded(EmbeddedInstall<'a>),
    Package(PackageInstall<'a>),
}

impl<'a> Installation<'a> {
    pub fn for_flavor(
        flavor: Flavor,
        artifacts: &'a ArtifactSet,
        credential: &'a Credential,
        options: InstallOptions,
    ) -> Installation<'a> {
        match flavor {
            Flavor::Embedded => {
                Installation::Embedded(EmbeddedInstall::new(artifacts, init_script::startup_jitter()))
            }
            Flavor::PackageManaged => Installation::Package(PackageInstall::new(
                artifacts,
                Elevation::new(options.elevation, &credential.secret),
                options.side_bundle,
            )),
        }
    }

    fn check_preconditions(&self) -> InstallResult<()> {
        match self {
            Installation::Embedded(install) => install.check_preconditions(),
            Installation::Package(install) => install.check_preconditions(),
        }
    }

    async fn advance(
        &self,
        session: &mut dyn Session,
        state: &InstallState,
    ) -> InstallResult<InstallState> {
        let next = match (self, state) {
            (Installation::Embedded(install), InstallState::Transferring) => {
                install.transfer(session).await?;
                InstallState::Configuring
            }
            (Installation::Embedded(install), InstallState::Configuring) => {
                install.configure(session).await?;
                InstallState::Starting
            }
            (Installation::Embedded(install), InstallState::Starting) => {
                install.start(session).await?;
                InstallState::Verifying
            }
            (Installation::Embedded(install), InstallState::Verifying) => {
                install.verify(session).await?;
                InstallState::Done
            }
            (Installation::Package(install), InstallState::Transferring) => {
                install.transfer(session).await?;
                InstallState::Configuring
            }
            (Installation::Package(install), InstallState::Configuring) => {
                install.configure(session).await?;
                InstallState::Starting
            }
            (Installation::Package(install), InstallState::Starting) => {
                install.start(session).await?;
                InstallState::Verifying
            }
            (Installation::Package(install), InstallState::Verifying) => {
                install.verify(session).await?;
                InstallState::Done
            }
            (_, terminal) => terminal.clone(),
        };
        Ok(next)
    }

    /// Drives the machine to a terminal state. Local preconditions are
    /// checked before anything is sent to the host.
    pub async fn run(&self, session: &mut dyn Session) -> InstallState {
        if let Err(e) = self.check_preconditions() {
            warn!(error = %e, "precondition failed, nothing transferred");
            return InstallState::Failed(e.to_string());
        }

        let mut state = InstallState::Transferring;
        while !state.is_terminal() {
            state = match self.advance(session, &state).await {
                Ok(next) => {
                    debug!(from = ?state, to = ?next, "install step finished");
                    next
                }
                Err(e) => {
                    warn!(step = ?state, error = %e, "install step failed");
                    InstallState::Failed(e.to_string())
                }
            };
        }
        state
    }
}
