use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use russh::client::{self, Config, Handle};
use russh::keys::key;
use russh::Disconnect;
use russh_keys::PublicKeyBase64;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::channel::SshExecChannel;
use super::known_hosts::{host_label, HostKeyStatus, KnownHostsFile};
use crate::executor::ChannelOpener;
use crate::models::error::OssecError;
use crate::models::options::{ClientOptions, HostKeyPolicy};

/// Format a host:port pair, bracketing IPv6 addresses to avoid ambiguity.
fn host_port(hostname: &str, port: u16) -> String {
    if hostname.contains(':') {
        format!("[{}]:{}", hostname, port)
    } else {
        format!("{}:{}", hostname, port)
    }
}

/// Reason a host key was rejected during verification.
enum HostKeyRejection {
    Mismatch { expected: String, actual: String },
    Revoked,
    Unreadable(String),
}

/// Because russh takes ownership of the handler, the rejection reason is shared
/// through this handle so the caller can report it after the handshake fails.
pub struct HostKeyWatcher(Arc<SyncMutex<Option<HostKeyRejection>>>);

impl HostKeyWatcher {
    pub fn check(&self, hostname: &str, port: u16) -> Option<OssecError> {
        let reason = match self.0.lock().take()? {
            HostKeyRejection::Mismatch { expected, actual } => format!(
                "Host key has changed!\nPort: {}\nExpected: {}\nReceived: {}",
                port, expected, actual
            ),
            HostKeyRejection::Revoked => "Host key has been revoked".to_string(),
            HostKeyRejection::Unreadable(e) => e,
        };
        Some(OssecError::HostKeyVerificationFailed {
            hostname: hostname.to_string(),
            reason,
        })
    }
}

/// SSH connection handler applying the configured host key policy.
pub struct SshHandler {
    hostname: String,
    port: u16,
    policy: HostKeyPolicy,
    rejection: Arc<SyncMutex<Option<HostKeyRejection>>>,
}

impl SshHandler {
    pub fn new(hostname: String, port: u16, policy: HostKeyPolicy) -> (Self, HostKeyWatcher) {
        let rejection = Arc::new(SyncMutex::new(None));
        let watcher = HostKeyWatcher(rejection.clone());
        (
            Self {
                hostname,
                port,
                policy,
                rejection,
            },
            watcher,
        )
    }

    fn reject(&self, reason: HostKeyRejection) -> bool {
        *self.rejection.lock() = Some(reason);
        false
    }

    fn check_fixed(&self, expected: &str, server_key: &key::PublicKey) -> bool {
        let offered = server_key.public_key_base64();
        if expected.split_whitespace().nth(1) == Some(offered.as_str()) {
            tracing::debug!("Host key for {}:{} matches the pinned key", self.hostname, self.port);
            return true;
        }
        tracing::error!(
            "Host key for {}:{} does not match the pinned key (got {})",
            self.hostname,
            self.port,
            server_key.fingerprint()
        );
        self.reject(HostKeyRejection::Mismatch {
            expected: expected.to_string(),
            actual: format!("{} {}", server_key.name(), offered),
        })
    }

    fn check_known_hosts(&self, server_key: &key::PublicKey) -> bool {
        let status = KnownHostsFile::user_default()
            .and_then(|file| Ok((file.check(&self.hostname, self.port, server_key)?, file)));

        match status {
            Ok((HostKeyStatus::Matched, _)) => {
                tracing::debug!("Host key verified for {}", host_label(&self.hostname, self.port));
                true
            }
            Ok((HostKeyStatus::Unknown { key_type, fingerprint }, file)) => {
                tracing::info!(
                    "Unknown host key for {} ({} {}), accepting and recording",
                    host_label(&self.hostname, self.port),
                    key_type,
                    fingerprint
                );
                if let Err(e) = file.record(&self.hostname, self.port, server_key) {
                    tracing::warn!("Failed to save host key: {}", e);
                }
                true
            }
            Ok((HostKeyStatus::Mismatch { expected, actual }, _)) => {
                tracing::error!(
                    "HOST KEY MISMATCH for {}: expected {}, got {}",
                    host_label(&self.hostname, self.port),
                    expected,
                    actual
                );
                self.reject(HostKeyRejection::Mismatch { expected, actual })
            }
            Ok((HostKeyStatus::Revoked, _)) => {
                tracing::error!("Host key for {} has been REVOKED", host_label(&self.hostname, self.port));
                self.reject(HostKeyRejection::Revoked)
            }
            Err(e) => {
                tracing::error!("Host key verification failed: {}", e);
                self.reject(HostKeyRejection::Unreadable(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &key::PublicKey) -> Result<bool, Self::Error> {
        let accepted = match &self.policy {
            HostKeyPolicy::AcceptAny => {
                tracing::warn!(
                    "Accepting host key {} for {}:{} without verification",
                    server_public_key.fingerprint(),
                    self.hostname,
                    self.port
                );
                true
            }
            HostKeyPolicy::Fixed(expected) => self.check_fixed(expected, server_public_key),
            HostKeyPolicy::KnownHosts => self.check_known_hosts(server_public_key),
        };
        Ok(accepted)
    }
}

/// One authenticated SSH connection to an OSSEC server
pub struct SshClient {
    session: Mutex<Handle<SshHandler>>,
    address: String,
}

impl SshClient {
    pub async fn connect(options: &ClientOptions) -> Result<Self, OssecError> {
        options.validate()?;

        let address = host_port(&options.host, options.port);
        let timeout = options.connection_timeout();
        tracing::info!("Connecting to SSH server at {}", address);

        let (handler, watcher) =
            SshHandler::new(options.host.clone(), options.port, options.host_key_policy.clone());
        let connect_future = client::connect(Arc::new(Config::default()), address.as_str(), handler);
        let mut session = tokio::time::timeout(timeout, connect_future)
            .await
            .map_err(|_| {
                OssecError::NetworkTimeout(format!(
                    "SSH connection to {} timed out after {} seconds",
                    address, options.connection_timeout_secs
                ))
            })?
            .map_err(|e| {
                watcher
                    .check(&options.host, options.port)
                    .unwrap_or_else(|| OssecError::ConnectionFailed(address.clone(), e.to_string()))
            })?;

        Self::authenticate(&mut session, options).await?;
        tracing::info!("Successfully connected to {} as {}", address, options.username);

        Ok(Self {
            session: Mutex::new(session),
            address,
        })
    }

    async fn authenticate(session: &mut Handle<SshHandler>, options: &ClientOptions) -> Result<(), OssecError> {
        if options.password.is_empty() {
            return Err(OssecError::SshAuthenticationFailed(
                "Password required for authentication".to_string(),
            ));
        }

        let accepted = session
            .authenticate_password(&options.username, options.password.expose())
            .await
            .map_err(|e| {
                tracing::error!("SSH password authentication error: {}", e);
                OssecError::SshAuthenticationFailed(e.to_string())
            })?;

        if !accepted {
            tracing::error!("SSH password authentication rejected for user {}", options.username);
            return Err(OssecError::SshAuthenticationFailed(
                "Password authentication failed - server rejected credentials".to_string(),
            ));
        }
        Ok(())
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Disconnect. Any channel still open is torn down with the session.
    pub async fn close(&self) -> Result<(), OssecError> {
        tracing::info!("Closing connection to OSSEC server: {}", self.address);
        self.session
            .lock()
            .await
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| OssecError::ConnectionFailed(self.address.clone(), e.to_string()))
    }
}

#[async_trait]
impl ChannelOpener for SshClient {
    type Channel = SshExecChannel;

    async fn open_channel(&self) -> Result<SshExecChannel, String> {
        let session = self.session.lock().await;
        session
            .channel_open_session()
            .await
            .map(SshExecChannel::new)
            .map_err(|e| e.to_string())
    }
}
