use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use russh::{client, client::Handle, Channel, ChannelMsg, Disconnect};
use russh_keys::key;
use tracing::{debug, warn};

use super::{CommandOutput, Connector, RetryPolicy, Session};
use crate::{
    core::error::{ConnectError, TransportError},
    serialization::{
        config::{Credential, SshSettings},
        host_list::HostTarget,
    },
};

struct Client {}

#[async_trait]
impl client::Handler for Client {
    type Error = russh::Error;

    // fleet devices have ephemeral or unknown host keys; accept all of them
    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

fn ssh_err(e: russh::Error) -> TransportError {
    TransportError::Ssh(e.to_string())
}

/// Password or public-key SSH connections with bounded, retried dialing.
pub struct SshConnector {
    config: Arc<client::Config>,
    port: u16,
    timeout: Duration,
    retry: RetryPolicy,
}

impl SshConnector {
    pub fn new(settings: &SshSettings) -> SshConnector {
        SshConnector {
            config: Arc::new(client::Config::default()),
            port: settings.port,
            timeout: settings.connect_timeout(),
            retry: settings.retry_policy(),
        }
    }

    /// One dial plus authentication, bounded as a whole by the connect timeout.
    async fn attempt(
        &self,
        host: &str,
        port: u16,
        credential: &Credential,
    ) -> Result<Handle<Client>, ConnectError> {
        match tokio::time::timeout(self.timeout, self.handshake(host, port, credential)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Network {
                address: host.to_string(),
                reason: format!("timed out after {:?}", self.timeout),
            }),
        }
    }

    async fn handshake(
        &self,
        host: &str,
        port: u16,
        credential: &Credential,
    ) -> Result<Handle<Client>, ConnectError> {
        let network = |reason: String| ConnectError::Network {
            address: host.to_string(),
            reason,
        };
        let rejected = || ConnectError::Auth {
            address: host.to_string(),
            user: credential.username.clone(),
        };

        let mut handle = client::connect(self.config.clone(), (host.to_string(), port), Client {})
            .await
            .map_err(|e| network(e.to_string()))?;

        let auth = match &credential.identity_file {
            Some(path) => {
                let key = match russh_keys::load_secret_key(path, None) {
                    Ok(key) => Arc::new(key),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "unable to load identity file");
                        return Err(rejected());
                    }
                };
                handle
                    .authenticate_publickey(credential.username.clone(), key)
                    .await
            }
            None => {
                handle
                    .authenticate_password(credential.username.clone(), credential.secret.clone())
                    .await
            }
        };

        match auth {
            Err(e) => Err(network(e.to_string())),
            Ok(false) => Err(rejected()),
            Ok(true) => Ok(handle),
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Session = SshSession;

    async fn connect(
        &self,
        host: &HostTarget,
        credential: &Credential,
    ) -> Result<SshSession, ConnectError> {
        let (hostname, port) = host.endpoint(self.port);
        let handle = self
            .retry
            .retry_network(&host.address, |_| self.attempt(&hostname, port, credential))
            .await?;
        debug!(host = %host, user = %credential.username, "ssh session established");
        Ok(SshSession {
            handle: Some(handle),
        })
    }
}

/// Write side of an exec channel.
#[async_trait]
trait ChannelInput: Send {
    async fn send(&mut self, data: &[u8]) -> Result<(), russh::Error>;
    async fn close_input(&mut self) -> Result<(), russh::Error>;
}

#[async_trait]
impl ChannelInput for Channel<client::Msg> {
    async fn send(&mut self, data: &[u8]) -> Result<(), russh::Error> {
        self.data(data).await
    }

    async fn close_input(&mut self) -> Result<(), russh::Error> {
        self.eof().await
    }
}

/// Writes `stdin` if there is any, then always sends EOF so a remote command
/// that reads its input (a sudo prompt, a dpkg conffile question) sees the
/// end of it instead of blocking.
async fn send_input(
    channel: &mut dyn ChannelInput,
    stdin: Option<&[u8]>,
) -> Result<(), russh::Error> {
    if let Some(input) = stdin {
        channel.send(input).await?;
    }
    channel.close_input().await
}

pub struct SshSession {
    handle: Option<Handle<Client>>,
}

#[async_trait]
impl Session for SshSession {
    async fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput, TransportError> {
        let handle = self.handle.as_ref().ok_or(TransportError::Closed)?;
        let mut channel = handle.channel_open_session().await.map_err(ssh_err)?;
        channel.exec(true, command).await.map_err(ssh_err)?;

        send_input(&mut channel, stdin).await.map_err(ssh_err)?;

        let mut output = CommandOutput::default();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.stdout.extend_from_slice(data),
                // ext 1 is stderr
                ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                    output.stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                _ => continue,
            }
        }

        match exit_status {
            Some(status) => {
                output.exit_status = status;
                Ok(output)
            }
            None => Err(TransportError::MissingExitStatus(command.to_string())),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(handle) = self.handle.take() {
            handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(ssh_err)?;
        }
        Ok(())
    }
}
