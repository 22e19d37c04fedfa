pub mod channel;
pub mod client;
pub mod known_hosts;

pub use channel::SshExecChannel;
pub use client::{SshClient, SshHandler};
pub use known_hosts::{HostKeyStatus, KnownHostsFile};
