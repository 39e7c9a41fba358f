//! A command running inside a remote shell, with subprocess-style I/O.

use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use winrm_protocol::rsp::ShellSignal;

use crate::error::WinRmError;
use crate::shell::Shell;
use crate::shell::stdin::ShellStdin;

/// Capacity of each stdout/stderr pipe. The receive loop applies
/// backpressure when a pipe fills faster than the caller reads it.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Where a command's stdin comes from.
pub enum InputSource {
    /// The caller writes through [`Process::stdin`].
    Pipe,
    /// A single empty `End=true` send: the command sees immediate EOF.
    Null,
    /// Streamed from any reader until EOF.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    /// Streamed from a file on the local filesystem.
    File(PathBuf),
}

/// Where a command's output stream goes.
pub enum OutputTarget {
    /// Buffered for the caller to read through [`Process::stdout`] /
    /// [`Process::stderr`].
    Pipe,
    /// Requested from the server but discarded on arrival.
    Null,
    /// Forwarded to any writer.
    Writer(Box<dyn AsyncWrite + Send + Sync + Unpin>),
    /// Appended to a file on the local filesystem.
    File(PathBuf),
    /// Not requested from the server at all.
    Ignore,
}

/// Receive-loop side of an output stream.
pub(crate) enum StreamSink {
    Pipe(DuplexStream),
    Writer(Box<dyn AsyncWrite + Send + Sync + Unpin>),
    File(tokio::fs::File),
    Null,
}

impl StreamSink {
    pub async fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        match self {
            StreamSink::Pipe(writer) => writer.write_all(data).await,
            StreamSink::Writer(writer) => {
                writer.write_all(data).await?;
                writer.flush().await
            }
            StreamSink::File(file) => {
                file.write_all(data).await?;
                file.flush().await
            }
            StreamSink::Null => Ok(()),
        }
    }

    /// Signals EOF to the consumer side.
    pub async fn close(&mut self) {
        let result = match self {
            StreamSink::Pipe(writer) => writer.shutdown().await,
            StreamSink::Writer(writer) => writer.shutdown().await,
            StreamSink::File(file) => file.shutdown().await,
            StreamSink::Null => Ok(()),
        };
        if let Err(err) = result {
            debug!(%err, "output sink close failed");
        }
    }
}

impl OutputTarget {
    /// Splits the target into the caller-side pipe reader (if any), the
    /// receive-loop sink (if any), and whether the stream is requested
    /// from the server.
    pub(crate) async fn into_sink(
        self,
    ) -> Result<(Option<DuplexStream>, Option<StreamSink>, bool), WinRmError> {
        Ok(match self {
            OutputTarget::Pipe => {
                let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
                (Some(reader), Some(StreamSink::Pipe(writer)), true)
            }
            OutputTarget::Null => (None, Some(StreamSink::Null), true),
            OutputTarget::Writer(writer) => (None, Some(StreamSink::Writer(writer)), true),
            OutputTarget::File(path) => {
                let file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await?;
                (None, Some(StreamSink::File(file)), true)
            }
            OutputTarget::Ignore => (None, None, false),
        })
    }
}

/// A spawned remote command.
///
/// Mirrors the shape of an OS child process: optional stdin writer,
/// optional stdout/stderr readers, and an exit code observed with
/// [`Process::wait`].
pub struct Process {
    shell: Shell,
    command_id: String,
    pub stdin: Option<ShellStdin>,
    pub stdout: Option<DuplexStream>,
    pub stderr: Option<DuplexStream>,
    #[allow(dead_code)]
    receive_task: JoinHandle<()>,
    exit_rx: Option<oneshot::Receiver<Result<i32, WinRmError>>>,
    exit_code: Option<i32>,
    failed: bool,
}

impl Process {
    pub(crate) fn new(
        shell: Shell,
        command_id: String,
        stdin: Option<ShellStdin>,
        stdout: Option<DuplexStream>,
        stderr: Option<DuplexStream>,
        receive_task: JoinHandle<()>,
        exit_rx: oneshot::Receiver<Result<i32, WinRmError>>,
    ) -> Self {
        Self {
            shell,
            command_id,
            stdin,
            stdout,
            stderr,
            receive_task,
            exit_rx: Some(exit_rx),
            exit_code: None,
            failed: false,
        }
    }

    pub fn command_id(&self) -> &str {
        &self.command_id
    }

    /// The exit code, when the command has already been waited on.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Waits for `CommandState/Done` and returns the exit code. A missing
    /// `ExitCode` in the response counts as 0. Errors from the receive
    /// loop surface here exactly once.
    pub async fn wait(&mut self) -> Result<i32, WinRmError> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }
        if self.failed {
            return Err(WinRmError::protocol("command previously failed"));
        }

        let exit_rx = self
            .exit_rx
            .take()
            .ok_or_else(|| WinRmError::protocol("command previously failed"))?;

        match exit_rx.await {
            Ok(Ok(code)) => {
                self.exit_code = Some(code);
                Ok(code)
            }
            Ok(Err(err)) => {
                self.failed = true;
                Err(err)
            }
            Err(_) => {
                self.failed = true;
                Err(WinRmError::protocol(
                    "receive loop terminated without reporting an exit code",
                ))
            }
        }
    }

    /// Feeds optional input, closes stdin, reads both output pipes to EOF
    /// and waits for the exit code.
    pub async fn communicate(
        &mut self,
        input: Option<&[u8]>,
    ) -> Result<(Vec<u8>, Vec<u8>), WinRmError> {
        if let Some(input) = input {
            let stdin = self.stdin.as_mut().ok_or_else(|| {
                WinRmError::Config("process stdin is not a pipe".to_string())
            })?;
            stdin.write(input).await?;
        }
        if let Some(stdin) = self.stdin.as_mut() {
            stdin.drain().await?;
            stdin.close().await;
        }

        // Both pipes drain concurrently so neither can stall the receive
        // loop while the other is being read.
        let stdout = self.stdout.take();
        let stderr = self.stderr.take();
        let (stdout_data, stderr_data) =
            futures::future::join(read_to_end(stdout), read_to_end(stderr)).await;

        self.wait().await?;
        Ok((stdout_data?, stderr_data?))
    }

    pub async fn send_signal(&self, signal: ShellSignal) -> Result<(), WinRmError> {
        self.shell.signal(&self.command_id, signal).await
    }

    /// Delivers the Terminate signal.
    pub async fn terminate(&self) -> Result<(), WinRmError> {
        self.send_signal(ShellSignal::Terminate).await
    }

    /// Alias for [`Process::terminate`]; the shell protocol has no
    /// stronger signal.
    pub async fn kill(&self) -> Result<(), WinRmError> {
        self.terminate().await
    }
}

async fn read_to_end(pipe: Option<DuplexStream>) -> Result<Vec<u8>, WinRmError> {
    let Some(mut pipe) = pipe else {
        return Ok(Vec::new());
    };
    let mut data = Vec::new();
    pipe.read_to_end(&mut data).await?;
    Ok(data)
}

/// Result of [`Shell::run`]: the captured streams plus the exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedProcess {
    pub args: Vec<String>,
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CompletedProcess {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
