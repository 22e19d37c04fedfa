//! Registry Operations
//!
//! List, Find, Import, Key and Remove on top of a [`CommandRunner`]. Each
//! operation builds one manage_agents command line, runs it, and reads the
//! response with the compiled patterns in [`ParserConfig`]. Mutations are
//! confirmed by looking the agent up again (see [`verify`]).

pub mod verify;

use crate::executor::{CommandRunner, InteractiveRunner};
use crate::models::agent::{Agent, SearchKey};
use crate::models::error::{OssecError, Result};
use crate::models::options::ClientOptions;
use crate::runtime::{CommandBuilder, OutputParser, ParserConfig};
use crate::ssh::SshClient;

pub use verify::{Expectation, PostCondition};

/// IP recorded for agents imported without one
pub const ANY_IP: &str = "any";

/// Registry client over an SSH session to the OSSEC server
pub type OssecClient = RegistryClient<InteractiveRunner<SshClient>>;

pub struct RegistryClient<R: CommandRunner> {
    runner: R,
    commands: CommandBuilder,
    parser: ParserConfig,
}

impl<R: CommandRunner> RegistryClient<R> {
    pub fn new(runner: R, commands: CommandBuilder) -> Result<Self> {
        Ok(Self::with_parser(runner, commands, ParserConfig::new()?))
    }

    pub fn with_parser(runner: R, commands: CommandBuilder, parser: ParserConfig) -> Self {
        Self {
            runner,
            commands,
            parser,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    async fn run(&self, command: &str) -> Result<String> {
        tracing::debug!("Running: {}", command);
        self.runner
            .execute(command)
            .await
            .map_err(|e| OssecError::execution(command, e))
    }

    /// All registered agents, in the order the tool prints them
    pub async fn list(&self) -> Result<Vec<Agent>> {
        let output = self.run(&self.commands.list_agents()).await?;
        let agents = OutputParser::parse_agent_list(&output, &self.parser);
        tracing::debug!("Listed {} agents", agents.len());
        Ok(agents)
    }

    /// First agent whose `key` field equals `value`. `key` is `id`, `name`, `ip`, or empty for `name`.
    pub async fn find(&self, key: &str, value: &str) -> Result<Option<Agent>> {
        let key: SearchKey = key.parse()?;
        self.find_by(key, value).await
    }

    pub async fn find_by(&self, key: SearchKey, value: &str) -> Result<Option<Agent>> {
        let agents = self.list().await?;
        Ok(agents.into_iter().find(|agent| agent.matches(key, value)))
    }

    /// Register `host`. An empty `ip` registers the agent for any address.
    pub async fn import(&self, host: &str, ip: &str) -> Result<Agent> {
        let host = host.trim();
        validate_host(host)?;
        let ip = match ip.trim() {
            "" => ANY_IP,
            ip => ip,
        };
        validate_ip(ip)?;

        if let Some(existing) = self.find_by(SearchKey::Name, host).await? {
            return Err(OssecError::AgentExists(existing));
        }

        tracing::info!("Importing agent {} ({})", host, ip);
        let expected = Expectation::present(SearchKey::Name, host);
        self.mutate_and_verify(&self.commands.import_agent(host, ip), &expected)
            .await?
            .ok_or_else(|| OssecError::VerificationFailed(format!("agent {} was not imported", host)))
    }

    /// Authentication key of agent `id`
    pub async fn key(&self, id: &str) -> Result<String> {
        let id = validate_id(id)?;
        let output = self.run(&self.commands.export_key(id)).await?;
        OutputParser::parse_agent_key(&output, &self.parser)
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        let id = validate_id(id)?;
        tracing::info!("Removing agent {}", id);
        let expected = Expectation::absent(SearchKey::Id, id);
        self.mutate_and_verify(&self.commands.remove_agent(id), &expected)
            .await?;
        Ok(())
    }
}

impl OssecClient {
    /// Open an SSH session and wire a runner for it from `options`
    pub async fn connect(options: &ClientOptions) -> Result<Self> {
        let session = SshClient::connect(options).await?;
        let runner = InteractiveRunner::new(session)
            .with_credential(options.escalation_credential())
            .with_marker(options.sudo_prompt.clone())
            .with_command_timeout(options.command_timeout())
            .with_debug(options.debug);
        Self::new(runner, CommandBuilder::from_options(options))
    }

    pub async fn close(&self) -> Result<()> {
        self.runner.opener().close().await
    }
}

fn validate_host(host: &str) -> Result<()> {
    if host.is_empty() {
        return Err(OssecError::InvalidArgument("Host name is required".to_string()));
    }
    if host.chars().any(|c| c.is_whitespace() || c == ',' || c == '/') {
        return Err(OssecError::InvalidArgument(format!(
            "Host name {:?} may not contain whitespace, ',' or '/'",
            host
        )));
    }
    Ok(())
}

fn validate_ip(ip: &str) -> Result<()> {
    if ip.chars().any(|c| c.is_whitespace() || c == ',') {
        return Err(OssecError::InvalidArgument(format!("Invalid IP {:?}", ip)));
    }
    Ok(())
}

fn validate_id(id: &str) -> Result<&str> {
    match id.trim() {
        "" => Err(OssecError::InvalidArgument("Agent ID is required".to_string())),
        id => Ok(id),
    }
}
