use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Pty};
use std::collections::VecDeque;

use crate::executor::{tty_op, ChannelEvent, ExecChannel, InputWriter, PtyRequest};

/// A russh session channel driving one command
pub struct SshExecChannel {
    channel: Channel<Msg>,
    /// Events that arrived while waiting for a request reply
    pending: VecDeque<ChannelEvent>,
}

impl SshExecChannel {
    pub fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel,
            pending: VecDeque::new(),
        }
    }

    /// Wait for the server's SUCCESS/FAILURE reply to the last want-reply request
    async fn await_reply(&mut self, request: &str) -> Result<(), String> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Success) => return Ok(()),
                Some(ChannelMsg::Failure) => return Err(format!("server refused {} request", request)),
                Some(ChannelMsg::Close) | None => {
                    return Err(format!("channel closed before {} request was answered", request))
                }
                Some(msg) => {
                    if let Some(event) = to_event(msg) {
                        self.pending.push_back(event);
                    }
                }
            }
        }
    }
}

fn to_pty_modes(modes: &[(u8, u32)]) -> Vec<(Pty, u32)> {
    modes
        .iter()
        .filter_map(|(opcode, value)| {
            let mode = match *opcode {
                tty_op::ECHO => Pty::ECHO,
                tty_op::TTY_OP_ISPEED => Pty::TTY_OP_ISPEED,
                tty_op::TTY_OP_OSPEED => Pty::TTY_OP_OSPEED,
                other => {
                    tracing::warn!("Skipping unsupported terminal mode opcode {}", other);
                    return None;
                }
            };
            Some((mode, *value))
        })
        .collect()
}

fn to_event(msg: ChannelMsg) -> Option<ChannelEvent> {
    match msg {
        ChannelMsg::Data { data } => Some(ChannelEvent::Data(data.to_vec())),
        ChannelMsg::ExtendedData { data, .. } => Some(ChannelEvent::ExtendedData(data.to_vec())),
        ChannelMsg::ExitStatus { exit_status } => Some(ChannelEvent::ExitStatus(exit_status)),
        ChannelMsg::ExitSignal { signal_name, .. } => {
            Some(ChannelEvent::ExitSignal(format!("{:?}", signal_name)))
        }
        ChannelMsg::Eof => Some(ChannelEvent::Eof),
        _ => None,
    }
}

#[async_trait]
impl ExecChannel for SshExecChannel {
    async fn request_pty(&mut self, pty: &PtyRequest) -> Result<(), String> {
        let modes = to_pty_modes(&pty.modes);
        self.channel
            .request_pty(true, &pty.term, pty.cols, pty.rows, 0, 0, &modes)
            .await
            .map_err(|e| e.to_string())?;
        self.await_reply("pty").await
    }

    async fn exec(&mut self, command: &str) -> Result<(), String> {
        self.channel
            .exec(true, command)
            .await
            .map_err(|e| e.to_string())?;
        self.await_reply("exec").await
    }

    fn input_writer(&self) -> InputWriter {
        Box::pin(self.channel.make_writer())
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Close) | None => return None,
                Some(msg) => {
                    if let Some(event) = to_event(msg) {
                        return Some(event);
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.channel.close().await {
            tracing::trace!("Channel close after command: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_modes_translate() {
        let modes = to_pty_modes(&PtyRequest::default().modes);
        assert_eq!(modes.len(), 3);
        assert!(modes.iter().any(|(m, v)| matches!(m, Pty::ECHO) && *v == 0));
        assert!(modes.iter().any(|(m, v)| matches!(m, Pty::TTY_OP_ISPEED) && *v == 14400));
    }

    #[test]
    fn test_unknown_mode_skipped() {
        assert!(to_pty_modes(&[(250, 1)]).is_empty());
    }

    #[test]
    fn test_exit_status_event() {
        assert_eq!(
            to_event(ChannelMsg::ExitStatus { exit_status: 3 }),
            Some(ChannelEvent::ExitStatus(3))
        );
        assert_eq!(to_event(ChannelMsg::Eof), Some(ChannelEvent::Eof));
        assert_eq!(to_event(ChannelMsg::Success), None);
    }
}
