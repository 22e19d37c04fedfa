pub mod interactive;
pub mod prompt;

use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::AsyncWrite;

use crate::models::error::ExecError;

pub use interactive::InteractiveRunner;
pub use prompt::{PromptWatcher, SUDO_PROMPT_MARKER};

/// Writable handle to a command's standard input
pub type InputWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Terminal mode opcodes from RFC 4254 section 8
pub mod tty_op {
    pub const ECHO: u8 = 53;
    pub const TTY_OP_ISPEED: u8 = 128;
    pub const TTY_OP_OSPEED: u8 = 129;
}

/// PTY allocation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
    /// (opcode, value) pairs, see [`tty_op`]
    pub modes: Vec<(u8, u32)>,
}

impl Default for PtyRequest {
    /// xterm, 80x40, local echo off so the injected password never shows up in the output
    fn default() -> Self {
        Self {
            term: "xterm".to_string(),
            cols: 80,
            rows: 40,
            modes: vec![
                (tty_op::ECHO, 0),
                (tty_op::TTY_OP_ISPEED, 14400),
                (tty_op::TTY_OP_OSPEED, 14400),
            ],
        }
    }
}

/// Something that happened on an exec channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Data(Vec<u8>),
    ExtendedData(Vec<u8>),
    ExitStatus(u32),
    ExitSignal(String),
    Eof,
}

/// One session channel, used for exactly one command
#[async_trait]
pub trait ExecChannel: Send {
    async fn request_pty(&mut self, pty: &PtyRequest) -> Result<(), String>;

    /// Start the command. Returns once the server has accepted or refused it.
    async fn exec(&mut self, command: &str) -> Result<(), String>;

    fn input_writer(&self) -> InputWriter;

    /// Next event, or `None` once the channel is closed
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    async fn close(&mut self);
}

/// Source of fresh exec channels (a live transport session)
#[async_trait]
pub trait ChannelOpener: Send + Sync {
    type Channel: ExecChannel;

    async fn open_channel(&self) -> Result<Self::Channel, String>;
}

/// Runs a fully assembled shell command and returns its captured output
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(&self, command: &str) -> Result<String, ExecError>;
}
