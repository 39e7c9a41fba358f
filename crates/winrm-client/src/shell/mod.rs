//! The remote shell engine: shell lifecycle, command spawning, and the
//! concurrency controls shared by the send and receive paths.

mod event;
mod process;
mod receive;
mod stdin;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};
use winrm_protocol::rsp::{self, ShellSignal, command_line_body, send_body, signal_body};
use winrm_protocol::schema::{Action, shell_resource};
use winrm_protocol::wsman::{OptionSet, SelectorSet};

use crate::client::{WinRmClient, WsRequest};
use crate::error::WinRmError;
use event::Event;
use receive::ReceiveLoop;

pub use process::{CompletedProcess, InputSource, OutputTarget, Process};
pub use stdin::ShellStdin;
pub use winrm_protocol::rsp::ShellDefinition as ShellConfig;

const DEFAULT_STDIN_CHUNK: usize = 64 * 1024;

/// How to run one command inside a shell.
#[derive(typed_builder::TypedBuilder)]
pub struct Command {
    #[builder(setter(into))]
    pub program: String,
    #[builder(default)]
    pub args: Vec<String>,
    #[builder(default = InputSource::Pipe)]
    pub stdin: InputSource,
    #[builder(default = OutputTarget::Pipe)]
    pub stdout: OutputTarget,
    #[builder(default = OutputTarget::Pipe)]
    pub stderr: OutputTarget,
    /// `WINRS_CONSOLEMODE_STDIN`.
    #[builder(default = true)]
    pub console_mode_stdin: bool,
    /// `WINRS_SKIP_CMD_SHELL`.
    #[builder(default = true)]
    pub skip_cmd_shell: bool,
    /// Large stdin writes are split on this size before queueing.
    #[builder(default = DEFAULT_STDIN_CHUNK)]
    pub stdin_chunk_size: usize,
}

/// Coordination state of one running command.
pub(crate) struct CommandContext {
    pub id: String,
    /// Set once `CommandState/Done` was observed.
    pub done: Event,
    /// Set by the stdin path to preempt an in-flight Receive.
    pub receive_cancel: Event,
    /// Set while no Receive holds the receive lock.
    pub receive_idle: Event,
    stdin_task: StdMutex<Option<JoinHandle<()>>>,
}

impl CommandContext {
    fn new(id: String) -> Self {
        Self {
            id,
            done: Event::new(),
            receive_cancel: Event::new(),
            receive_idle: Event::new_set(),
            stdin_task: StdMutex::new(None),
        }
    }

    fn set_stdin_task(&self, task: JoinHandle<()>) {
        *self.stdin_task.lock().expect("stdin task lock poisoned") = Some(task);
    }

    pub(crate) fn abort_stdin_task(&self) {
        if let Some(task) = self
            .stdin_task
            .lock()
            .expect("stdin task lock poisoned")
            .take()
        {
            task.abort();
        }
    }
}

struct ShellInner {
    client: WinRmClient,
    id: String,
    destroyed: AtomicBool,
    send_lock: Mutex<()>,
    receive_lock: Mutex<()>,
    commands: StdMutex<HashMap<String, Arc<CommandContext>>>,
}

/// A Windows cmd shell on the remote host. Cheap to clone; clones share
/// the shell state and locks.
#[derive(Clone)]
pub struct Shell {
    inner: Arc<ShellInner>,
}

impl std::fmt::Debug for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("id", &self.inner.id)
            .field("destroyed", &self.inner.destroyed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Shell {
    /// WS-Transfer Create against the cmd-shell resource. The response must
    /// carry the server-assigned ShellId.
    pub(crate) async fn create(
        client: WinRmClient,
        config: ShellConfig,
    ) -> Result<Self, WinRmError> {
        let response = client
            .run_request(
                WsRequest::new(Action::Create.uri(), shell_resource())
                    .body(config.into_element()),
            )
            .await?;
        let id = WinRmClient::with_body(&response, |body| Ok(rsp::created_shell_id(body)?))?;
        info!(shell_id = %id, "shell created");

        Ok(Self {
            inner: Arc::new(ShellInner {
                client,
                id,
                destroyed: AtomicBool::new(false),
                send_lock: Mutex::new(()),
                receive_lock: Mutex::new(()),
                commands: StdMutex::new(HashMap::new()),
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub(crate) fn client(&self) -> &WinRmClient {
        &self.inner.client
    }

    pub(crate) fn receive_lock(&self) -> &Mutex<()> {
        &self.inner.receive_lock
    }

    /// A request against the cmd-shell resource addressing this shell.
    pub(crate) fn shell_request(&self, action: impl Into<String>) -> WsRequest {
        WsRequest::new(action, shell_resource())
            .selectors(SelectorSet::new().add("ShellId", self.inner.id.clone()))
    }

    fn ensure_alive(&self) -> Result<(), WinRmError> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(WinRmError::ShellDestroyed);
        }
        Ok(())
    }

    fn command_context(&self, command_id: &str) -> Option<Arc<CommandContext>> {
        self.inner
            .commands
            .lock()
            .expect("command map lock poisoned")
            .get(command_id)
            .cloned()
    }

    fn open_command_context(&self, command_id: &str) -> Arc<CommandContext> {
        let context = Arc::new(CommandContext::new(command_id.to_string()));
        self.inner
            .commands
            .lock()
            .expect("command map lock poisoned")
            .insert(command_id.to_string(), context.clone());
        context
    }

    pub(crate) fn close_command_context(&self, command_id: &str) {
        self.inner
            .commands
            .lock()
            .expect("command map lock poisoned")
            .remove(command_id);
    }

    /// WS-Transfer Delete of this shell. Every later operation fails with
    /// [`WinRmError::ShellDestroyed`].
    pub async fn destroy(&self) -> Result<(), WinRmError> {
        self.ensure_alive()?;
        self.inner
            .client
            .run_request(self.shell_request(Action::Delete.uri()))
            .await?;
        self.inner.destroyed.store(true, Ordering::SeqCst);
        info!(shell_id = %self.inner.id, "shell destroyed");
        Ok(())
    }

    /// Spawns a command and wires up its I/O and receive loop.
    #[instrument(skip_all, fields(shell_id = %self.inner.id, program = %command.program))]
    pub async fn spawn(&self, command: Command) -> Result<Process, WinRmError> {
        self.ensure_alive()?;

        let Command {
            program,
            args,
            stdin,
            stdout,
            stderr,
            console_mode_stdin,
            skip_cmd_shell,
            stdin_chunk_size,
        } = command;

        let options = OptionSet::new()
            .add(
                "WINRS_CONSOLEMODE_STDIN",
                if console_mode_stdin { "TRUE" } else { "FALSE" },
            )
            .add(
                "WINRS_SKIP_CMD_SHELL",
                if skip_cmd_shell { "TRUE" } else { "FALSE" },
            );

        let response = self
            .inner
            .client
            .run_request(
                self.shell_request(Action::Command.uri())
                    .options(options)
                    .body(command_line_body(&program, &args)),
            )
            .await?;
        let command_id =
            WinRmClient::with_body(&response, |body| Ok(rsp::spawned_command_id(body)?))?;
        debug!(%command_id, "command spawned");

        let context = self.open_command_context(&command_id);

        let (stdout_pipe, stdout_sink, want_stdout) = stdout.into_sink().await?;
        let (stderr_pipe, stderr_sink, want_stderr) = stderr.into_sink().await?;

        let (exit_tx, exit_rx) = oneshot::channel();
        let receive_task = tokio::spawn(
            ReceiveLoop {
                shell: self.clone(),
                context: context.clone(),
                stdout: stdout_sink,
                stderr: stderr_sink,
                want_stdout,
                want_stderr,
                exit_tx,
            }
            .run(),
        );

        let stdin_writer = match stdin {
            // The pipe writer is not registered as the command's stdin
            // task: it must survive Done so drain/close keep working.
            InputSource::Pipe => Some(ShellStdin::new(
                self.clone(),
                context.clone(),
                stdin_chunk_size,
            )),
            InputSource::Null => {
                let task = tokio::spawn(stdin::feed_null(self.clone(), context.clone()));
                context.set_stdin_task(task);
                None
            }
            InputSource::Reader(reader) => {
                let task = tokio::spawn(stdin::feed_from_reader(
                    self.clone(),
                    context.clone(),
                    reader,
                    stdin_chunk_size,
                ));
                context.set_stdin_task(task);
                None
            }
            InputSource::File(path) => {
                let file = tokio::fs::File::open(&path).await?;
                let task = tokio::spawn(stdin::feed_from_reader(
                    self.clone(),
                    context.clone(),
                    Box::new(file),
                    stdin_chunk_size,
                ));
                context.set_stdin_task(task);
                None
            }
        };

        Ok(Process::new(
            self.clone(),
            command_id,
            stdin_writer,
            stdout_pipe,
            stderr_pipe,
            receive_task,
            exit_rx,
        ))
    }

    /// Runs a command to completion with captured output.
    pub async fn run(
        &self,
        program: &str,
        args: &[&str],
        input: Option<&[u8]>,
    ) -> Result<CompletedProcess, WinRmError> {
        let stdin = if input.is_some() {
            InputSource::Pipe
        } else {
            InputSource::Null
        };

        let mut process = self
            .spawn(
                Command::builder()
                    .program(program)
                    .args(args.iter().map(ToString::to_string).collect())
                    .stdin(stdin)
                    .build(),
            )
            .await?;

        let (stdout, stderr) = process.communicate(input).await?;
        let exit_code = process.wait().await?;

        let mut all_args = vec![program.to_string()];
        all_args.extend(args.iter().map(ToString::to_string));

        Ok(CompletedProcess {
            args: all_args,
            exit_code,
            stdout,
            stderr,
        })
    }

    /// One stdin delivery. When `cancel_receive` is set, the in-flight
    /// Receive is preempted first: signal cancel, wait for the receive
    /// task to go idle, clear the signal, then take the send lock.
    pub(crate) async fn send_stdin(
        &self,
        command_id: &str,
        data: &[u8],
        end: bool,
        cancel_receive: bool,
    ) -> Result<(), WinRmError> {
        self.ensure_alive()?;

        if cancel_receive && let Some(context) = self.command_context(command_id) {
            context.receive_cancel.set();
            context.receive_idle.wait().await;
            context.receive_cancel.clear();
        }

        let _guard = self.inner.send_lock.lock().await;
        self.inner
            .client
            .run_request(
                self.shell_request(Action::Send.uri())
                    .body(send_body(command_id, data, end)),
            )
            .await?;
        Ok(())
    }

    /// Delivers a signal to one command.
    pub(crate) async fn signal(
        &self,
        command_id: &str,
        signal: ShellSignal,
    ) -> Result<(), WinRmError> {
        self.inner
            .client
            .run_request(
                self.shell_request(Action::Signal.uri())
                    .body(signal_body(command_id, signal)),
            )
            .await?;
        Ok(())
    }
}
