use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::executor::SUDO_PROMPT_MARKER;
use crate::models::error::OssecError;

pub const DEFAULT_BIN_DIR: &str = "/var/ossec/bin";
pub const DEFAULT_TEMP_DIR: &str = "/tmp";
pub const DEFAULT_SSH_PORT: u16 = 22;

/// How the server's host key is checked during the handshake
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode", content = "key")]
pub enum HostKeyPolicy {
    /// Only accept this key, given in authorized_keys format (`ssh-ed25519 AAAA... comment`)
    Fixed(String),
    /// Accept any host key
    AcceptAny,
    /// Check against ~/.ssh/known_hosts, recording unknown hosts on first use
    #[default]
    KnownHosts,
}

/// Password used to answer the remote sudo prompt. Never printed or serialized.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Options for connecting to an OSSEC server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientOptions {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    /// Used for SSH password authentication and to answer the sudo prompt
    #[serde(skip_serializing)]
    pub password: Credential,
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    /// Directory containing manage_agents
    #[serde(default = "default_bin_dir")]
    pub bin_dir: String,
    /// Remote scratch directory for import files
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
    /// Run manage_agents without sudo
    #[serde(default)]
    pub no_sudo: bool,
    /// Text sudo prints when it asks for the password
    #[serde(default = "default_sudo_prompt")]
    pub sudo_prompt: String,
    /// Log raw command output
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
    /// Per-command deadline; no deadline when unset
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_bin_dir() -> String {
    DEFAULT_BIN_DIR.to_string()
}

fn default_temp_dir() -> String {
    DEFAULT_TEMP_DIR.to_string()
}

fn default_sudo_prompt() -> String {
    SUDO_PROMPT_MARKER.to_string()
}

fn default_connection_timeout() -> u64 {
    30
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_SSH_PORT,
            username: String::new(),
            password: Credential::default(),
            host_key_policy: HostKeyPolicy::default(),
            bin_dir: default_bin_dir(),
            temp_dir: default_temp_dir(),
            no_sudo: false,
            sudo_prompt: default_sudo_prompt(),
            debug: false,
            connection_timeout_secs: default_connection_timeout(),
            command_timeout_secs: None,
        }
    }
}

impl ClientOptions {
    pub fn validate(&self) -> Result<(), OssecError> {
        if self.host.trim().is_empty() {
            return Err(OssecError::InvalidConfiguration("No host specified".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(OssecError::InvalidConfiguration("No username specified".to_string()));
        }
        if self.port == 0 {
            return Err(OssecError::InvalidConfiguration("Port must be non-zero".to_string()));
        }
        if let HostKeyPolicy::Fixed(key) = &self.host_key_policy {
            if key.split_whitespace().nth(1).is_none() {
                return Err(OssecError::InvalidConfiguration(
                    "Host key must be in authorized_keys format: <type> <base64>".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Full path of the manage_agents binary on the server
    pub fn manage_exec(&self) -> String {
        PathBuf::from(&self.bin_dir)
            .join("manage_agents")
            .to_string_lossy()
            .into_owned()
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    /// Credential to feed the sudo prompt, if sudo is in use and a password is known
    pub fn escalation_credential(&self) -> Option<Credential> {
        if self.no_sudo || self.password.is_empty() {
            None
        } else {
            Some(self.password.clone())
        }
    }
}
