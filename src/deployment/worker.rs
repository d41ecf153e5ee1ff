use tracing::{debug, info, warn};

use super::{
    flavor,
    strategy::{InstallOptions, InstallState, Installation},
};
use crate::{
    serialization::{artifact_set::ArtifactSet, config::Credential, host_list::HostTarget},
    states::batch_state::DeploymentOutcome,
    transport::{Connector, Session},
};

pub static NO_CREDENTIAL_AUTHENTICATED: &str = "no credential authenticated";

/// Connects with the first credential that works, detects the flavor and
/// runs the matching installation. Always yields exactly one outcome and
/// always closes the session it opened.
pub async fn run<C: Connector>(
    connector: &C,
    host: &HostTarget,
    credentials: &[Credential],
    artifacts: &ArtifactSet,
    options: InstallOptions,
) -> DeploymentOutcome {
    info!("processing host");

    let mut connected = None;
    for credential in credentials {
        match connector.connect(host, credential).await {
            Ok(session) => {
                info!(user = %credential.username, "connected");
                connected = Some((session, credential));
                break;
            }
            Err(e) if e.is_auth() => {
                warn!(user = %credential.username, error = %e, "credential rejected");
            }
            Err(e) => {
                warn!(user = %credential.username, error = %e, "failed to connect");
            }
        }
    }

    let Some((mut session, credential)) = connected else {
        warn!("failed to connect with any credential");
        return DeploymentOutcome::failure(&host.address, NO_CREDENTIAL_AUTHENTICATED);
    };

    let state = install(&mut session, credential, artifacts, options).await;

    if let Err(e) = session.close().await {
        debug!(error = %e, "error while closing session");
    }

    match state {
        InstallState::Done => {
            info!("successfully installed");
            DeploymentOutcome::success(&host.address)
        }
        InstallState::Failed(reason) => {
            warn!(%reason, "failed to install");
            DeploymentOutcome::failure(&host.address, reason)
        }
        other => DeploymentOutcome::failure(
            &host.address,
            format!("installation stopped in state {:?}", other),
        ),
    }
}

async fn install(
    session: &mut dyn Session,
    credential: &Credential,
    artifacts: &ArtifactSet,
    options: InstallOptions,
) -> InstallState {
    let flavor = flavor::detect(session).await;
    info!(%flavor, "installing");
    Installation::for_flavor(flavor, artifacts, credential, options)
        .run(session)
        .await
}
