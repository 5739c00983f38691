//! SSH implementation of the remote shell traits, built on `russh`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use russh::client;
use russh::keys::agent::client::AgentClient;
use russh::keys::{load_secret_key, HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh::{ChannelMsg, ChannelReadHalf, ChannelWriteHalf, Disconnect};

use super::remote::{
    PtyRequest, RemoteConnector, RemoteError, RemoteOutput, RemoteShell, RemoteTarget,
};
use crate::config::SshConfig;

/// Host keys are accepted without verification.
struct AcceptAnyHostKey;

impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Opens PTY shells over SSH using public-key authentication.
///
/// Keys held by a running ssh-agent are offered first, then the configured
/// identity files.
#[derive(Debug, Clone)]
pub struct SshConnector {
    port: u16,
    use_agent: bool,
    identity_files: Vec<PathBuf>,
    keepalive: Option<Duration>,
}

impl SshConnector {
    /// Build a connector from the `[ssh]` configuration section.
    pub fn new(config: &SshConfig) -> Self {
        Self {
            port: config.port,
            use_agent: config.use_agent,
            identity_files: config.identity_files.clone(),
            keepalive: config.keepalive(),
        }
    }

    async fn authenticate(
        &self,
        handle: &mut client::Handle<AcceptAnyHostKey>,
        user: &str,
    ) -> Result<(), RemoteError> {
        let mut offered = 0usize;

        if self.use_agent && self.authenticate_with_agent(handle, user, &mut offered).await? {
            return Ok(());
        }

        for path in &self.identity_files {
            if !path.exists() {
                continue;
            }

            let key = match load_secret_key(path, None) {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable identity file");
                    continue;
                }
            };

            offered += 1;
            let hash_alg = rsa_hash(handle).await?;
            let result = handle
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
                .await
                .map_err(|e| RemoteError::Authentication(e.to_string()))?;

            if result.success() {
                tracing::debug!(user = %user, path = %path.display(), "Public key accepted");
                return Ok(());
            }
        }

        if offered == 0 {
            Err(RemoteError::Authentication(
                "no usable identity files or agent keys".to_string(),
            ))
        } else {
            Err(RemoteError::Authentication(format!(
                "{user} rejected {offered} key(s)"
            )))
        }
    }

    /// Offers each agent identity in turn. An unreachable agent is skipped.
    async fn authenticate_with_agent(
        &self,
        handle: &mut client::Handle<AcceptAnyHostKey>,
        user: &str,
        offered: &mut usize,
    ) -> Result<bool, RemoteError> {
        let mut agent = match AgentClient::connect_env().await {
            Ok(agent) => agent,
            Err(e) => {
                tracing::debug!(error = %e, "No ssh-agent available");
                return Ok(false);
            }
        };

        let keys = match agent.request_identities().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list ssh-agent identities");
                return Ok(false);
            }
        };

        for key in keys {
            *offered += 1;
            let hash_alg = rsa_hash(handle).await?;
            match handle
                .authenticate_publickey_with(user, key, hash_alg, &mut agent)
                .await
            {
                Ok(result) if result.success() => {
                    tracing::debug!(user = %user, "Agent key accepted");
                    return Ok(true);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "ssh-agent signing failed"),
            }
        }
        Ok(false)
    }
}

async fn rsa_hash(
    handle: &client::Handle<AcceptAnyHostKey>,
) -> Result<Option<HashAlg>, RemoteError> {
    Ok(handle
        .best_supported_rsa_hash()
        .await
        .map_err(|e| RemoteError::Connection(e.to_string()))?
        .flatten())
}

impl RemoteConnector for SshConnector {
    type Shell = SshShell;
    type Output = SshOutput;

    async fn connect(
        &self,
        target: &RemoteTarget,
        pty: &PtyRequest,
    ) -> Result<(SshShell, SshOutput), RemoteError> {
        let config = Arc::new(client::Config {
            keepalive_interval: self.keepalive,
            ..Default::default()
        });

        let mut handle = client::connect(
            config,
            (target.address.as_str(), self.port),
            AcceptAnyHostKey,
        )
        .await
        .map_err(|e| RemoteError::Connection(format!("{}:{}: {}", target.address, self.port, e)))?;

        self.authenticate(&mut handle, &target.user).await?;

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))?;

        channel
            .request_pty(
                false,
                &pty.term,
                u32::from(pty.cols),
                u32::from(pty.rows),
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| RemoteError::Channel(format!("pty request failed: {e}")))?;

        channel
            .request_shell(false)
            .await
            .map_err(|e| RemoteError::Channel(format!("shell request failed: {e}")))?;

        let (read_half, write_half) = channel.split();

        Ok((
            SshShell {
                handle,
                channel: write_half,
            },
            SshOutput { channel: read_half },
        ))
    }
}

/// Write half of an SSH shell channel plus the owning connection.
pub struct SshShell {
    handle: client::Handle<AcceptAnyHostKey>,
    channel: ChannelWriteHalf<client::Msg>,
}

impl RemoteShell for SshShell {
    async fn write(&mut self, data: &[u8]) -> Result<(), RemoteError> {
        self.channel
            .data(data)
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))
    }

    async fn resize(&mut self, cols: u16, rows: u16) -> Result<(), RemoteError> {
        self.channel
            .window_change(u32::from(cols), u32::from(rows), 0, 0)
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.channel.close().await {
            tracing::debug!(error = %e, "Channel close failed");
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "session closed", "en")
            .await
        {
            tracing::debug!(error = %e, "SSH disconnect failed");
        }
    }
}

/// Read half of an SSH shell channel.
pub struct SshOutput {
    channel: ChannelReadHalf,
}

impl RemoteOutput for SshOutput {
    async fn recv(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.channel.wait().await? {
                ChannelMsg::Data { data } => return Some(data.to_vec()),
                // stderr shares the terminal
                ChannelMsg::ExtendedData { data, .. } => return Some(data.to_vec()),
                ChannelMsg::Eof | ChannelMsg::Close => return None,
                ChannelMsg::ExitStatus { exit_status } => {
                    tracing::debug!(exit_status, "Remote shell exited");
                }
                _ => {}
            }
        }
    }
}
