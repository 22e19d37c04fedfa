//! Interactive command execution over a PTY.
//!
//! Each call opens its own channel, allocates a PTY with echo disabled and
//! starts the command. The read loop appends every chunk of output to the
//! capture buffer and hands it to a [`PromptWatcher`]. On the first sudo
//! prompt the loop signals a credential writer task, which owns the
//! channel's input handle and writes the password plus a newline once.
//! The writer is joined before the call returns.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::prompt::{PromptWatcher, SUDO_PROMPT_MARKER};
use super::{ChannelEvent, ChannelOpener, CommandRunner, ExecChannel, InputWriter, PtyRequest};
use crate::models::error::ExecError;
use crate::models::options::Credential;

/// How the remote command ended
enum Termination {
    Status(u32),
    Signal(String),
}

pub struct InteractiveRunner<O: ChannelOpener> {
    opener: O,
    credential: Option<Credential>,
    marker: String,
    pty: PtyRequest,
    command_timeout: Option<Duration>,
    debug: bool,
    /// Serialises invocations on one session
    gate: Mutex<()>,
}

impl<O: ChannelOpener> InteractiveRunner<O> {
    pub fn new(opener: O) -> Self {
        Self {
            opener,
            credential: None,
            marker: SUDO_PROMPT_MARKER.to_string(),
            pty: PtyRequest::default(),
            command_timeout: None,
            debug: false,
            gate: Mutex::new(()),
        }
    }

    /// Password written when the prompt marker shows up. `None` disables prompt handling.
    pub fn with_credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential.filter(|c| !c.is_empty());
        self
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn with_pty(mut self, pty: PtyRequest) -> Self {
        self.pty = pty;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Log the raw output of every command
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Run one command and return everything it wrote to the terminal.
    pub async fn run(&self, command: &str) -> Result<String, ExecError> {
        let _turn = self.gate.lock().await;
        tracing::debug!("Executing: {}", command);

        let result = self.invoke(command).await;

        if self.debug {
            let raw = match &result {
                Ok(output) => Some(output.as_str()),
                Err(e) => e.partial_output(),
            };
            if let Some(raw) = raw {
                tracing::info!("-- Start Raw Response --\n{}\n-- End Raw Response --", raw);
            }
        }

        if let Err(e) = &result {
            tracing::debug!("Command failed ({:?} stage): {}", e.stage(), e);
        }
        result
    }

    async fn invoke(&self, command: &str) -> Result<String, ExecError> {
        let mut channel = self
            .opener
            .open_channel()
            .await
            .map_err(ExecError::ChannelOpen)?;

        let result = self.drive(&mut channel, command).await;
        channel.close().await;
        result
    }

    async fn drive(&self, channel: &mut O::Channel, command: &str) -> Result<String, ExecError> {
        channel
            .request_pty(&self.pty)
            .await
            .map_err(ExecError::PtyRequest)?;

        let (prompt_tx, prompt_rx) = oneshot::channel();
        let (mut watcher, feeder) = match &self.credential {
            Some(credential) => (
                PromptWatcher::new(&self.marker),
                Some(tokio::spawn(feed_credential(
                    channel.input_writer(),
                    credential.clone(),
                    prompt_rx,
                ))),
            ),
            None => (PromptWatcher::disarmed(), None),
        };

        // prompt_tx is dropped when the stream ends, which releases an idle feeder
        let streaming = Self::stream(channel, command, &mut watcher, Some(prompt_tx));
        let outcome = match self.command_timeout {
            Some(limit) => match tokio::time::timeout(limit, streaming).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    if let Some(handle) = feeder {
                        handle.abort();
                        let _ = handle.await;
                    }
                    return Err(ExecError::Timeout(limit));
                }
            },
            None => streaming.await,
        };
        if watcher.is_armed() {
            tracing::trace!("Command finished without a privilege escalation prompt");
        }

        let fed = match feeder {
            Some(handle) => join_feeder(handle).await,
            None => Ok(false),
        };

        match (outcome, fed) {
            (Ok(output), Ok(_)) => Ok(output),
            (Ok(output), Err(write_err)) => {
                tracing::warn!("Command succeeded but the credential write failed: {}", write_err);
                Ok(output)
            }
            (Err(e), Err(write_err)) => {
                tracing::debug!("Command failed after the credential write failed: {}", e);
                Err(with_command_output(write_err, &e))
            }
            (Err(e), Ok(_)) => Err(e),
        }
    }

    async fn stream(
        channel: &mut O::Channel,
        command: &str,
        watcher: &mut PromptWatcher,
        mut prompt: Option<oneshot::Sender<()>>,
    ) -> Result<String, ExecError> {
        channel.exec(command).await.map_err(ExecError::Start)?;

        let mut captured = Vec::new();
        let mut termination = None;

        while let Some(event) = channel.next_event().await {
            match event {
                ChannelEvent::Data(data) => {
                    captured.extend_from_slice(&data);
                    if watcher.observe(&data) {
                        tracing::debug!("Privilege escalation prompt detected");
                        if let Some(tx) = prompt.take() {
                            let _ = tx.send(());
                        }
                    }
                }
                ChannelEvent::ExtendedData(data) => {
                    tracing::trace!("Ignoring {} bytes of extended data", data.len());
                }
                ChannelEvent::ExitStatus(code) => termination = Some(Termination::Status(code)),
                ChannelEvent::ExitSignal(signal) => termination = Some(Termination::Signal(signal)),
                ChannelEvent::Eof => tracing::trace!("Remote end sent EOF"),
            }
        }

        let output = String::from_utf8_lossy(&captured).into_owned();
        match termination {
            Some(Termination::Status(0)) => Ok(output),
            Some(Termination::Status(exit_status)) => Err(ExecError::NonZeroExit { exit_status, output }),
            Some(Termination::Signal(signal)) => Err(ExecError::Signal { signal, output }),
            None => Err(ExecError::MissingExitStatus { output }),
        }
    }
}

/// Waits for the prompt signal and writes the credential once.
/// Returns `Ok(false)` when the command ended without ever prompting.
async fn feed_credential(
    mut input: InputWriter,
    credential: Credential,
    prompt: oneshot::Receiver<()>,
) -> Result<bool, ExecError> {
    if prompt.await.is_err() {
        return Ok(false);
    }

    let mut line = Vec::with_capacity(credential.expose().len() + 1);
    line.extend_from_slice(credential.expose().as_bytes());
    line.push(b'\n');

    input
        .write_all(&line)
        .await
        .map_err(|e| credential_write(e.to_string()))?;
    input
        .flush()
        .await
        .map_err(|e| credential_write(e.to_string()))?;

    tracing::debug!("Credential sent to privilege escalation prompt");
    Ok(true)
}

async fn join_feeder(handle: JoinHandle<Result<bool, ExecError>>) -> Result<bool, ExecError> {
    handle
        .await
        .map_err(|e| credential_write(format!("credential writer task failed: {}", e)))?
}

fn credential_write(reason: String) -> ExecError {
    ExecError::CredentialWrite { reason, output: None }
}

/// Carry what the failed command printed on the credential write error
fn with_command_output(write_err: ExecError, command_err: &ExecError) -> ExecError {
    match write_err {
        ExecError::CredentialWrite { reason, .. } => ExecError::CredentialWrite {
            reason,
            output: command_err.partial_output().map(str::to_string),
        },
        other => other,
    }
}

#[async_trait]
impl<O: ChannelOpener> CommandRunner for InteractiveRunner<O> {
    async fn execute(&self, command: &str) -> Result<String, ExecError> {
        self.run(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::VecDeque;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tokio::io::AsyncWrite;
    use tokio::sync::Notify;

    enum Step {
        Emit(ChannelEvent),
        /// Block until something is written to stdin, like sudo waiting on its prompt
        AwaitInput,
        Hang,
    }

    #[derive(Default)]
    struct Recorder {
        writes: SyncMutex<Vec<Vec<u8>>>,
        input: Notify,
        broken: AtomicBool,
        closed: AtomicBool,
        commands: SyncMutex<Vec<String>>,
    }

    impl Recorder {
        fn written(&self) -> Vec<Vec<u8>> {
            self.writes.lock().clone()
        }
    }

    struct RecordingWriter(Arc<Recorder>);

    impl AsyncWrite for RecordingWriter {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            if self.0.broken.load(Ordering::SeqCst) {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed")));
            }
            self.0.writes.lock().push(buf.to_vec());
            self.0.input.notify_one();
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct ScriptedChannel {
        steps: VecDeque<Step>,
        recorder: Arc<Recorder>,
        pty_error: Option<String>,
        exec_error: Option<String>,
    }

    #[async_trait]
    impl ExecChannel for ScriptedChannel {
        async fn request_pty(&mut self, pty: &PtyRequest) -> Result<(), String> {
            assert_eq!(pty, &PtyRequest::default());
            match self.pty_error.take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        async fn exec(&mut self, command: &str) -> Result<(), String> {
            self.recorder.commands.lock().push(command.to_string());
            match self.exec_error.take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        fn input_writer(&self) -> InputWriter {
            Box::pin(RecordingWriter(self.recorder.clone()))
        }

        async fn next_event(&mut self) -> Option<ChannelEvent> {
            loop {
                match self.steps.pop_front()? {
                    Step::Emit(event) => return Some(event),
                    Step::AwaitInput => self.recorder.input.notified().await,
                    Step::Hang => std::future::pending::<()>().await,
                }
            }
        }

        async fn close(&mut self) {
            self.recorder.closed.store(true, Ordering::SeqCst);
        }
    }

    struct ScriptedOpener {
        channel: SyncMutex<Option<ScriptedChannel>>,
        open_error: Option<String>,
    }

    #[async_trait]
    impl ChannelOpener for ScriptedOpener {
        type Channel = ScriptedChannel;

        async fn open_channel(&self) -> Result<ScriptedChannel, String> {
            if let Some(e) = &self.open_error {
                return Err(e.clone());
            }
            self.channel
                .lock()
                .take()
                .ok_or_else(|| "no scripted channel left".to_string())
        }
    }

    fn data(s: &str) -> Step {
        Step::Emit(ChannelEvent::Data(s.as_bytes().to_vec()))
    }

    fn exit(code: u32) -> Step {
        Step::Emit(ChannelEvent::ExitStatus(code))
    }

    fn scripted(steps: Vec<Step>) -> (ScriptedOpener, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let channel = ScriptedChannel {
            steps: steps.into(),
            recorder: recorder.clone(),
            pty_error: None,
            exec_error: None,
        };
        let opener = ScriptedOpener {
            channel: SyncMutex::new(Some(channel)),
            open_error: None,
        };
        (opener, recorder)
    }

    fn runner(opener: ScriptedOpener) -> InteractiveRunner<ScriptedOpener> {
        InteractiveRunner::new(opener).with_credential(Some(Credential::new("s3cret")))
    }

    #[tokio::test]
    async fn test_output_without_prompt_is_returned_verbatim() {
        let (opener, recorder) = scripted(vec![
            data("ID: 001, Name: web-1, IP: any\r\n"),
            data("ID: 002, Name: db-1, IP: 10.0.0.2\r\n"),
            Step::Emit(ChannelEvent::Eof),
            exit(0),
        ]);

        let output = runner(opener).run("sudo manage_agents -l").await.unwrap();

        assert_eq!(
            output,
            "ID: 001, Name: web-1, IP: any\r\nID: 002, Name: db-1, IP: 10.0.0.2\r\n"
        );
        assert!(recorder.written().is_empty());
        assert!(recorder.closed.load(Ordering::SeqCst));
        assert_eq!(recorder.commands.lock().as_slice(), ["sudo manage_agents -l"]);
    }

    #[tokio::test]
    async fn test_credential_written_once_when_prompted() {
        let (opener, recorder) = scripted(vec![
            data("[sudo] password for admin: "),
            Step::AwaitInput,
            data("\r\nAvailable agents:\r\n"),
            exit(0),
        ]);

        let output = runner(opener).run("sudo manage_agents -l").await.unwrap();

        assert_eq!(recorder.written(), vec![b"s3cret\n".to_vec()]);
        assert!(output.ends_with("Available agents:\r\n"));
    }

    #[tokio::test]
    async fn test_repeated_marker_writes_once() {
        let (opener, recorder) = scripted(vec![
            data("[sudo] password for admin: "),
            Step::AwaitInput,
            data("echo '[sudo] password for admin: '\r\n"),
            data("[sudo] password for admin: \r\n"),
            exit(0),
        ]);

        runner(opener).run("some command").await.unwrap();

        assert_eq!(recorder.written().len(), 1);
    }

    #[tokio::test]
    async fn test_marker_split_across_reads() {
        let (opener, recorder) = scripted(vec![
            data("[sudo] passw"),
            data("ord for admin: "),
            Step::AwaitInput,
            exit(0),
        ]);

        runner(opener).run("sudo true").await.unwrap();

        assert_eq!(recorder.written(), vec![b"s3cret\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_no_credential_means_no_write() {
        let (opener, recorder) = scripted(vec![data("[sudo] password for admin: "), exit(0)]);

        let runner = InteractiveRunner::new(opener).with_credential(None);
        runner.run("sudo true").await.unwrap();

        assert!(recorder.written().is_empty());
    }

    #[tokio::test]
    async fn test_credential_writer_is_joined() {
        let (opener, recorder) = scripted(vec![data("plain output\r\n"), exit(0)]);

        runner(opener).run("true").await.unwrap();

        // channel and writer task both released their handles
        assert_eq!(Arc::strong_count(&recorder), 1);
    }

    #[tokio::test]
    async fn test_non_zero_exit_keeps_partial_output() {
        let (opener, _recorder) = scripted(vec![data("** Invalid ID '999' given.\r\n"), exit(1)]);

        let err = runner(opener).run("sudo manage_agents -r 999").await.unwrap_err();

        match &err {
            ExecError::NonZeroExit { exit_status, output } => {
                assert_eq!(*exit_status, 1);
                assert!(output.contains("Invalid ID"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(err.stage(), crate::models::error::ExecStage::Command);
    }

    #[tokio::test]
    async fn test_exit_signal_is_abnormal() {
        let (opener, _recorder) = scripted(vec![
            data("partial"),
            Step::Emit(ChannelEvent::ExitSignal("KILL".to_string())),
        ]);

        let err = runner(opener).run("sleep 100").await.unwrap_err();
        assert!(matches!(err, ExecError::Signal { ref signal, .. } if signal == "KILL"));
    }

    #[tokio::test]
    async fn test_close_without_exit_status() {
        let (opener, _recorder) = scripted(vec![data("partial")]);

        let err = runner(opener).run("true").await.unwrap_err();
        assert!(matches!(err, ExecError::MissingExitStatus { .. }));
    }

    #[tokio::test]
    async fn test_channel_open_failure() {
        let (mut opener, _recorder) = scripted(vec![exit(0)]);
        opener.open_error = Some("session closed".to_string());

        let err = runner(opener).run("true").await.unwrap_err();
        assert!(matches!(err, ExecError::ChannelOpen(ref m) if m == "session closed"));
    }

    #[tokio::test]
    async fn test_pty_failure_releases_channel() {
        let (opener, recorder) = scripted(vec![exit(0)]);
        if let Some(channel) = opener.channel.lock().as_mut() {
            channel.pty_error = Some("pty refused".to_string());
        }

        let err = runner(opener).run("true").await.unwrap_err();

        assert!(matches!(err, ExecError::PtyRequest(_)));
        assert!(recorder.closed.load(Ordering::SeqCst));
        assert!(recorder.commands.lock().is_empty());
    }

    #[tokio::test]
    async fn test_exec_failure_releases_channel() {
        let (opener, recorder) = scripted(vec![exit(0)]);
        if let Some(channel) = opener.channel.lock().as_mut() {
            channel.exec_error = Some("exec refused".to_string());
        }

        let err = runner(opener).run("true").await.unwrap_err();

        assert!(matches!(err, ExecError::Start(_)));
        assert!(recorder.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_credential_write_failure_on_failed_command() {
        let (opener, recorder) = scripted(vec![data("[sudo] password for admin: "), exit(1)]);
        recorder.broken.store(true, Ordering::SeqCst);

        let err = runner(opener).run("sudo true").await.unwrap_err();

        match &err {
            ExecError::CredentialWrite { reason, output } => {
                assert!(reason.contains("stdin closed"));
                assert_eq!(output.as_deref(), Some("[sudo] password for admin: "));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(err.partial_output(), Some("[sudo] password for admin: "));
    }

    #[tokio::test]
    async fn test_credential_write_failure_ignored_on_success() {
        let (opener, recorder) = scripted(vec![data("[sudo] password for admin: done"), exit(0)]);
        recorder.broken.store(true, Ordering::SeqCst);

        let output = runner(opener).run("echo").await.unwrap();
        assert_eq!(output, "[sudo] password for admin: done");
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let (opener, _recorder) = scripted(vec![data("working"), Step::Hang]);

        let runner = runner(opener).with_command_timeout(Some(Duration::from_millis(50)));
        let err = runner.run("sleep 100").await.unwrap_err();

        assert!(matches!(err, ExecError::Timeout(d) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_timeout_while_prompted_releases_channel_and_writer() {
        let (opener, recorder) = scripted(vec![data("[sudo] password for admin: "), Step::Hang]);

        let runner = runner(opener).with_command_timeout(Some(Duration::from_millis(50)));
        let err = runner.run("sudo manage_agents -l").await.unwrap_err();

        assert!(matches!(err, ExecError::Timeout(_)));
        assert!(recorder.closed.load(Ordering::SeqCst));
        assert_eq!(Arc::strong_count(&recorder), 1);
    }

    #[tokio::test]
    async fn test_timeout_before_prompt_releases_channel_and_writer() {
        let (opener, recorder) = scripted(vec![Step::Hang]);

        let runner = runner(opener).with_command_timeout(Some(Duration::from_millis(50)));
        let err = runner.run("sudo manage_agents -l").await.unwrap_err();

        assert!(matches!(err, ExecError::Timeout(_)));
        assert!(recorder.closed.load(Ordering::SeqCst));
        assert!(recorder.written().is_empty());
        assert_eq!(Arc::strong_count(&recorder), 1);
    }

    #[tokio::test]
    async fn test_custom_marker() {
        let (opener, recorder) = scripted(vec![
            data("[sudo] password for admin: "),
            data("Mot de passe de admin : "),
            Step::AwaitInput,
            exit(0),
        ]);

        runner(opener)
            .with_marker("Mot de passe de ")
            .run("sudo true")
            .await
            .unwrap();

        assert_eq!(recorder.written(), vec![b"s3cret\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_debug_echo_does_not_change_result() {
        let (opener, _recorder) = scripted(vec![data("hello\r\n"), exit(0)]);

        let output = runner(opener).with_debug(true).run("echo hello").await.unwrap();
        assert_eq!(output, "hello\r\n");
    }
}
