pub mod executor;
pub mod models;
pub mod registry;
pub mod runtime;
pub mod ssh;

pub use executor::{CommandRunner, InteractiveRunner};
pub use models::{
    Agent, ClientOptions, Credential, ExecError, ExecStage, HostKeyPolicy, OssecError, Result,
    SearchKey,
};
pub use registry::{OssecClient, RegistryClient};
pub use ssh::SshClient;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
/// Log lines go to stderr so command output on stdout stays machine-readable.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ossec_remote=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
