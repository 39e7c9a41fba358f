//! The per-command receive loop: a short-timeout long poll that dispatches
//! stream chunks and command-state transitions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};
use winrm_protocol::rsp::{self, ReceiveEvent, ShellSignal};

use crate::client::WinRmClient;
use crate::error::WinRmError;
use crate::shell::{CommandContext, Shell};
use crate::shell::process::StreamSink;

/// Short server-side timeout so an idle `Receive` faults quickly with the
/// operation-timeout code, which the loop absorbs and retries.
const RECEIVE_POLL_TIMEOUT: Duration = Duration::from_secs(1);

pub(crate) struct ReceiveLoop {
    pub shell: Shell,
    pub context: Arc<CommandContext>,
    pub stdout: Option<StreamSink>,
    pub stderr: Option<StreamSink>,
    pub want_stdout: bool,
    pub want_stderr: bool,
    pub exit_tx: oneshot::Sender<Result<i32, WinRmError>>,
}

enum Round {
    Events(Vec<ReceiveEvent>),
    /// Preempted by the stdin path before the response arrived.
    Cancelled,
}

impl ReceiveLoop {
    #[instrument(skip_all, fields(command_id = %self.context.id))]
    pub async fn run(mut self) {
        let mut stdout_eof = false;
        let mut stderr_eof = false;
        let mut done_seen = false;
        let mut exit_code = 0;

        let outcome = 'outer: loop {
            let events = match self.round().await {
                Ok(Round::Cancelled) => continue,
                Err(err) if err.is_operation_timeout() => continue,
                Err(err) => break Err(err),
                Ok(Round::Events(events)) => events,
            };

            for event in events {
                match event {
                    ReceiveEvent::Stream(chunk) => match chunk.stream.as_str() {
                        "stdout" => {
                            if let Some(sink) = self.stdout.as_mut()
                                && let Err(err) = sink.write(&chunk.content).await
                            {
                                break 'outer Err(err.into());
                            }
                            if chunk.end {
                                stdout_eof = true;
                                if let Some(mut sink) = self.stdout.take() {
                                    sink.close().await;
                                }
                            }
                        }
                        "stderr" => {
                            if let Some(sink) = self.stderr.as_mut()
                                && let Err(err) = sink.write(&chunk.content).await
                            {
                                break 'outer Err(err.into());
                            }
                            if chunk.end {
                                stderr_eof = true;
                                if let Some(mut sink) = self.stderr.take() {
                                    sink.close().await;
                                }
                            }
                        }
                        // Any other stream name is silently ignored.
                        _ => {}
                    },
                    ReceiveEvent::CommandState(state) => {
                        if state.is_done() {
                            exit_code = state.exit_code.unwrap_or(0);
                            done_seen = true;
                            self.context.done.set();
                            self.context.abort_stdin_task();
                            break;
                        }
                    }
                }
            }

            if done_seen || (stdout_eof && stderr_eof) {
                break Ok(exit_code);
            }
        };

        match outcome {
            Ok(code) => {
                debug!(exit_code = code, "command finished");
                let _ = self.exit_tx.send(Ok(code));
            }
            Err(err) => {
                warn!(%err, "receive loop failed");
                let _ = self.exit_tx.send(Err(err));
            }
        }

        if done_seen {
            // Server-side cleanup after a clean completion; failures are
            // irrelevant because the command is already gone.
            if let Err(err) = self
                .shell
                .signal(&self.context.id, ShellSignal::Terminate)
                .await
            {
                debug!(%err, "post-completion terminate suppressed");
            }
        }

        if let Some(mut sink) = self.stdout.take() {
            sink.close().await;
        }
        if let Some(mut sink) = self.stderr.take() {
            sink.close().await;
        }

        self.shell.close_command_context(&self.context.id);
    }

    /// One `Receive` round under the shell's receive lock, racing the
    /// request against the stdin path's cancel signal.
    async fn round(&self) -> Result<Round, WinRmError> {
        let guard = self.shell.receive_lock().lock().await;
        self.context.receive_idle.clear();

        let request = self
            .shell
            .shell_request(winrm_protocol::schema::Action::Receive.uri())
            .timeout(RECEIVE_POLL_TIMEOUT)
            .body(rsp::receive_body(
                &self.context.id,
                self.want_stdout,
                self.want_stderr,
            ));

        let result = tokio::select! {
            () = self.context.receive_cancel.wait() => Ok(None),
            response = self.shell.client().run_request(request) => response.map(Some),
        };

        self.context.receive_idle.set();
        drop(guard);

        match result {
            Ok(None) => Ok(Round::Cancelled),
            Ok(Some(response)) => WinRmClient::with_body(&response, |body| {
                Ok(Round::Events(rsp::parse_receive_response(body)?))
            }),
            Err(err) => Err(err),
        }
    }
}
