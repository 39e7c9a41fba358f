//! Stdin delivery: the pipe writer plus the feeder tasks for reader and
//! file sources.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::WinRmError;
use crate::shell::{CommandContext, Shell};

const QUEUE_DEPTH: usize = 32;

enum StdinMessage {
    Data(Vec<u8>),
    Flush(oneshot::Sender<()>),
    Close,
}

/// Async writer feeding a command's stdin. Writes are chunked, queued and
/// delivered by a dedicated task; each delivery preempts an in-flight
/// `Receive` so interactive input is not delayed by the long poll.
pub struct ShellStdin {
    tx: mpsc::Sender<StdinMessage>,
    chunk_size: usize,
    closed: bool,
}

impl ShellStdin {
    /// The delivery task outlives `CommandState/Done` on purpose: late
    /// writes are discarded inside the loop, not cancelled, so `drain` and
    /// `close` stay well-defined after the command finished.
    pub(crate) fn new(shell: Shell, context: Arc<CommandContext>, chunk_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(send_loop(shell, context, rx));
        Self {
            tx,
            chunk_size: chunk_size.max(1),
            closed: false,
        }
    }

    /// Queues bytes for delivery, splitting them on the chunk size.
    /// Writes after the command finished are silently discarded.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), WinRmError> {
        if self.closed {
            return Err(WinRmError::Config("stdin is closed".to_string()));
        }
        for chunk in data.chunks(self.chunk_size) {
            self.tx
                .send(StdinMessage::Data(chunk.to_vec()))
                .await
                .map_err(|_| WinRmError::protocol("stdin writer task stopped"))?;
        }
        Ok(())
    }

    /// Resolves once every previously queued chunk has been delivered.
    pub async fn drain(&self) -> Result<(), WinRmError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(StdinMessage::Flush(ack_tx))
            .await
            .map_err(|_| WinRmError::protocol("stdin writer task stopped"))?;
        ack_rx
            .await
            .map_err(|_| WinRmError::protocol("stdin writer task stopped"))
    }

    /// Closes stdin: after queued data is delivered, an `End=true` send
    /// tells the command no more input is coming.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.tx.send(StdinMessage::Close).await;
    }

    pub fn is_closing(&self) -> bool {
        self.closed
    }
}

async fn send_loop(
    shell: Shell,
    context: Arc<CommandContext>,
    mut rx: mpsc::Receiver<StdinMessage>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            StdinMessage::Data(data) => {
                if context.done.is_set() {
                    continue;
                }
                if let Err(err) = shell.send_stdin(&context.id, &data, false, true).await {
                    warn!(%err, "stdin send failed");
                    return;
                }
            }
            StdinMessage::Flush(ack) => {
                let _ = ack.send(());
            }
            StdinMessage::Close => {
                if !context.done.is_set() {
                    // Transport failures on the final close are suppressed:
                    // the command may have exited between the check and the
                    // send.
                    if let Err(err) = shell.send_stdin(&context.id, b"", true, true).await {
                        debug!(%err, "stdin close send suppressed");
                    }
                }
                return;
            }
        }
    }
}

/// Streams a reader into stdin until EOF, then closes the stream if the
/// command is still running. Used for reader and file sources.
pub(crate) async fn feed_from_reader(
    shell: Shell,
    context: Arc<CommandContext>,
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    chunk_size: usize,
) {
    let mut buffer = vec![0u8; chunk_size.max(1)];
    loop {
        if context.done.is_set() {
            return;
        }
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(read) => {
                if let Err(err) = shell
                    .send_stdin(&context.id, &buffer[..read], false, false)
                    .await
                {
                    warn!(%err, "stdin feed failed");
                    return;
                }
            }
            Err(err) => {
                warn!(%err, "stdin source read failed");
                break;
            }
        }
    }
    if !context.done.is_set() {
        let _ = shell.send_stdin(&context.id, b"", true, false).await;
    }
}

/// The null source: immediate EOF.
pub(crate) async fn feed_null(shell: Shell, context: Arc<CommandContext>) {
    let _ = shell.send_stdin(&context.id, b"", true, false).await;
}
