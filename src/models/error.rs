use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::models::agent::Agent;

/// Which half of an invocation an [`ExecError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStage {
    /// The command never ran (or never got its input); nothing it printed can be trusted.
    Setup,
    /// The command ran and terminated abnormally.
    Command,
}

/// Failure of a single interactive command invocation.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum ExecError {
    #[error("Failed to open SSH channel: {0}")]
    ChannelOpen(String),

    #[error("Failed to request PTY: {0}")]
    PtyRequest(String),

    #[error("Failed to start command: {0}")]
    Start(String),

    /// `output` is kept when the command went on to fail
    #[error("Failed to write credential to command input: {reason}")]
    CredentialWrite {
        reason: String,
        output: Option<String>,
    },

    #[error("Command exited with status {exit_status}")]
    NonZeroExit { exit_status: u32, output: String },

    #[error("Command terminated by signal {signal}")]
    Signal { signal: String, output: String },

    #[error("Command ended without reporting an exit status")]
    MissingExitStatus { output: String },

    #[error("Command timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl ExecError {
    pub fn stage(&self) -> ExecStage {
        match self {
            ExecError::ChannelOpen(_)
            | ExecError::PtyRequest(_)
            | ExecError::Start(_)
            | ExecError::CredentialWrite { .. } => ExecStage::Setup,
            ExecError::NonZeroExit { .. }
            | ExecError::Signal { .. }
            | ExecError::MissingExitStatus { .. }
            | ExecError::Timeout(_) => ExecStage::Command,
        }
    }

    /// Output captured before the command terminated abnormally, if any was kept.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            ExecError::NonZeroExit { output, .. }
            | ExecError::Signal { output, .. }
            | ExecError::MissingExitStatus { output } => Some(output),
            ExecError::CredentialWrite { output, .. } => output.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum OssecError {
    #[error("Connection failed to {0}: {1}")]
    ConnectionFailed(String, String),

    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    #[error("SSH authentication failed: {0}")]
    SshAuthenticationFailed(String),

    #[error("Host key verification failed for {hostname}: {reason}")]
    HostKeyVerificationFailed { hostname: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Command execution failed: {command}: {source}")]
    Execution {
        command: String,
        #[source]
        source: ExecError,
    },

    #[error("Search key {0:?} is invalid")]
    InvalidSearchKey(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Agent already registered: {0}")]
    AgentExists(Agent),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OssecError {
    pub fn execution(command: &str, source: ExecError) -> Self {
        OssecError::Execution {
            command: command.to_string(),
            source,
        }
    }

    /// Get a suggestion for recovering from this error
    pub fn recovery_suggestion(&self) -> &str {
        match self {
            OssecError::ConnectionFailed(_, _) => "Check network connectivity and try again",
            OssecError::NetworkTimeout(_) => "Check network connection and firewall settings",
            OssecError::SshAuthenticationFailed(_) => "Verify your SSH credentials",
            OssecError::HostKeyVerificationFailed { .. } => {
                "Confirm the server's host key out of band before connecting"
            }
            OssecError::InvalidConfiguration(_) => "Review your connection options",
            OssecError::Execution { source, .. } => match source.stage() {
                ExecStage::Setup => "Check that the SSH server allows PTY allocation and exec",
                ExecStage::Command => "Check the manage_agents path and sudo rights of the user",
            },
            OssecError::InvalidSearchKey(_) => "Search by id, name or ip",
            OssecError::InvalidArgument(_) => "Check the arguments passed to the operation",
            OssecError::ParseError(_) => "Enable debug output to inspect the raw response",
            OssecError::AgentExists(_) => "Remove the existing agent or reuse its key",
            OssecError::VerificationFailed(_) => "Inspect the agent list on the server",
            OssecError::Internal(_) => "Report this as a bug",
        }
    }
}

pub type Result<T> = std::result::Result<T, OssecError>;
