use clap::{Parser, Subcommand};
use serde::Serialize;
use std::process::ExitCode;

use ossec_remote::executor::SUDO_PROMPT_MARKER;
use ossec_remote::models::options::{DEFAULT_BIN_DIR, DEFAULT_SSH_PORT, DEFAULT_TEMP_DIR};
use ossec_remote::{ClientOptions, Credential, HostKeyPolicy, OssecClient, OssecError};

/// Manage the agent registry of a remote OSSEC server over SSH.
#[derive(Parser, Debug)]
#[command(name = "ossec-remote", version, about)]
struct Cli {
    /// OSSEC server host name or address
    #[arg(long, env = "OSSEC_SERVER")]
    server: String,

    #[arg(long, default_value_t = DEFAULT_SSH_PORT)]
    port: u16,

    /// SSH user, also the account sudo asks the password for
    #[arg(long, env = "OSSEC_USER")]
    user: String,

    /// SSH password, reused for sudo
    #[arg(long, env = "OSSEC_PASSWORD", hide_env_values = true, default_value = "")]
    password: String,

    /// Pinned server key in authorized_keys format ("ssh-ed25519 AAAA...")
    #[arg(long, env = "OSSEC_HOST_KEY", conflicts_with = "ignore_host_key")]
    host_key: Option<String>,

    /// Accept any server key
    #[arg(long)]
    ignore_host_key: bool,

    #[arg(long, default_value = DEFAULT_BIN_DIR)]
    bin_dir: String,

    #[arg(long, default_value = DEFAULT_TEMP_DIR)]
    temp_dir: String,

    /// Run manage_agents without sudo
    #[arg(long)]
    no_sudo: bool,

    /// Prompt text sudo prints before reading the password (differs by locale)
    #[arg(long, default_value = SUDO_PROMPT_MARKER)]
    sudo_prompt: String,

    /// Log the raw response of every command
    #[arg(long)]
    debug: bool,

    /// Per-command deadline in seconds
    #[arg(long)]
    command_timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List all registered agents
    List,
    /// Find one agent by id, name or ip
    Find { key: String, value: String },
    /// Register a host; the IP defaults to "any"
    Import {
        host: String,
        #[arg(default_value = "")]
        ip: String,
    },
    /// Print the authentication key of an agent
    Key { id: String },
    /// Remove an agent
    Remove { id: String },
}

impl Cli {
    fn options(&self) -> ClientOptions {
        let host_key_policy = match (&self.host_key, self.ignore_host_key) {
            (_, true) => HostKeyPolicy::AcceptAny,
            (Some(key), false) => HostKeyPolicy::Fixed(key.clone()),
            (None, false) => HostKeyPolicy::KnownHosts,
        };
        ClientOptions {
            host: self.server.clone(),
            port: self.port,
            username: self.user.clone(),
            password: Credential::new(self.password.clone()),
            host_key_policy,
            bin_dir: self.bin_dir.clone(),
            temp_dir: self.temp_dir.clone(),
            no_sudo: self.no_sudo,
            sudo_prompt: self.sudo_prompt.clone(),
            debug: self.debug,
            command_timeout_secs: self.command_timeout,
            ..Default::default()
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), OssecError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| OssecError::Internal(format!("Failed to encode output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

async fn dispatch(client: &OssecClient, command: &Commands) -> Result<(), OssecError> {
    match command {
        Commands::List => print_json(&client.list().await?),
        // `null` when nothing matches
        Commands::Find { key, value } => print_json(&client.find(key, value).await?),
        Commands::Import { host, ip } => print_json(&client.import(host, ip).await?),
        Commands::Key { id } => {
            println!("{}", client.key(id).await?);
            Ok(())
        }
        Commands::Remove { id } => client.remove(id).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    ossec_remote::init_tracing();
    let cli = Cli::parse();

    let client = match OssecClient::connect(&cli.options()).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error: {}\n{}", e, e.recovery_suggestion());
            return ExitCode::FAILURE;
        }
    };

    let result = dispatch(&client, &cli.command).await;
    if let Err(e) = client.close().await {
        tracing::warn!("Failed to close session: {}", e);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}\n{}", e, e.recovery_suggestion());
            ExitCode::FAILURE
        }
    }
}
