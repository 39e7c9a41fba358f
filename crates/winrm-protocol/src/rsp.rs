//! Windows remote shell ("winrs") message family: shell lifecycle bodies,
//! command/send/receive/signal bodies, and `ReceiveResponse` parsing.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use winrm_xml::builder::{Attribute, Element};
use winrm_xml::parser::{Node, NodeExt};

use crate::schema::{ns, q};
use crate::{ProtocolFault, duration};

/// Signal codes the shell understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellSignal {
    CtrlC,
    Terminate,
}

impl ShellSignal {
    pub fn uri(self) -> &'static str {
        match self {
            ShellSignal::CtrlC => {
                "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/ctrl_c"
            }
            ShellSignal::Terminate => {
                "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/Terminate"
            }
        }
    }
}

/// `CommandState/@State` URIs.
pub mod command_state {
    pub const RUNNING: &str =
        "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Running";
    pub const DONE: &str =
        "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done";
}

/// Declarative description of the shell to create.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct ShellDefinition {
    #[builder(default, setter(into, strip_option))]
    pub working_directory: Option<String>,
    #[builder(default)]
    pub environment: BTreeMap<String, String>,
    /// Whether the shell accepts a stdin stream.
    #[builder(default = true)]
    pub stdin: bool,
    #[builder(default = true)]
    pub stdout: bool,
    #[builder(default = true)]
    pub stderr: bool,
    #[builder(default, setter(strip_option))]
    pub lifetime: Option<Duration>,
}

impl ShellDefinition {
    /// The `<rsp:Shell>` body for a WS-Transfer Create.
    pub fn into_element(self) -> Element {
        let mut shell = q::SHELL.element().declare("rsp", ns::SHELL);

        if let Some(directory) = self.working_directory {
            shell = shell.add_child(q::WORKING_DIRECTORY.element().set_text(directory));
        }

        if !self.environment.is_empty() {
            let mut environment = q::ENVIRONMENT.element();
            for (name, value) in self.environment {
                environment = environment.add_child(
                    q::VARIABLE
                        .element()
                        .add_attribute(Attribute::new("Name", name))
                        .set_text(value),
                );
            }
            shell = shell.add_child(environment);
        }

        let input_streams = q::INPUT_STREAMS.element();
        shell = shell.add_child(if self.stdin {
            input_streams.set_text("stdin")
        } else {
            input_streams.set_text("")
        });

        let mut output_streams = Vec::new();
        if self.stdout {
            output_streams.push("stdout");
        }
        if self.stderr {
            output_streams.push("stderr");
        }
        shell = shell.add_child(
            q::OUTPUT_STREAMS
                .element()
                .set_text(output_streams.join(" ")),
        );

        if let Some(lifetime) = self.lifetime {
            shell = shell.add_child(
                q::LIFETIME
                    .element()
                    .set_text(duration::to_iso8601(lifetime)),
            );
        }

        shell
    }
}

/// Extracts the server-assigned `ShellId` from a Create response body.
pub fn created_shell_id(body: Node<'_, '_>) -> Result<String, ProtocolFault> {
    body.child(ns::SHELL, q::SHELL.name)
        .and_then(|shell| shell.child_text(ns::SHELL, q::SHELL_ID.name))
        .map(str::to_string)
        .ok_or_else(|| ProtocolFault::unexpected("CreateShell response missing ShellId"))
}

/// `<rsp:CommandLine>` body for spawning a command.
pub fn command_line_body(command: &str, arguments: &[String]) -> Element {
    let mut command_line = q::COMMAND_LINE
        .element()
        .declare("rsp", ns::SHELL)
        .add_child(q::COMMAND.element().set_text(command));
    for argument in arguments {
        command_line = command_line.add_child(q::ARGUMENTS.element().set_text(argument.clone()));
    }
    command_line
}

/// Extracts the `CommandId` from a Command response body.
pub fn spawned_command_id(body: Node<'_, '_>) -> Result<String, ProtocolFault> {
    body.child(ns::SHELL, q::COMMAND_RESPONSE.name)
        .and_then(|response| response.child_text(ns::SHELL, q::COMMAND_ID.name))
        .map(str::to_string)
        .ok_or_else(|| ProtocolFault::unexpected("Command response missing CommandId"))
}

/// `<rsp:Receive>` body requesting the given streams of one command.
pub fn receive_body(command_id: &str, stdout: bool, stderr: bool) -> Element {
    let mut streams = Vec::new();
    if stdout {
        streams.push("stdout");
    }
    if stderr {
        streams.push("stderr");
    }

    q::RECEIVE.element().declare("rsp", ns::SHELL).add_child(
        q::DESIRED_STREAM
            .element()
            .add_attribute(Attribute::new("CommandId", command_id))
            .set_text(streams.join(" ")),
    )
}

/// `<rsp:Send>` body carrying one stdin chunk.
pub fn send_body(command_id: &str, data: &[u8], end: bool) -> Element {
    let mut stream = q::STREAM
        .element()
        .add_attribute(Attribute::new("Name", "stdin"))
        .add_attribute(Attribute::new("CommandId", command_id));
    if end {
        stream = stream.add_attribute(Attribute::new("End", "true"));
    }
    if !data.is_empty() {
        stream = stream.set_text(BASE64.encode(data));
    }

    q::SEND.element().declare("rsp", ns::SHELL).add_child(stream)
}

/// `<rsp:Signal>` body delivering a control code to one command.
pub fn signal_body(command_id: &str, signal: ShellSignal) -> Element {
    q::SIGNAL
        .element()
        .declare("rsp", ns::SHELL)
        .add_attribute(Attribute::new("CommandId", command_id))
        .add_child(q::SIGNAL_CODE.element().set_text(signal.uri()))
}

/// A chunk of stream output from a `ReceiveResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub stream: String,
    pub command_id: String,
    pub content: Vec<u8>,
    /// `End="true"`: the stream will produce no further data.
    pub end: bool,
}

/// A command-state transition from a `ReceiveResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStateChange {
    pub state: String,
    pub exit_code: Option<i32>,
}

impl CommandStateChange {
    pub fn is_done(&self) -> bool {
        self.state == command_state::DONE
    }
}

/// The events a single `Receive` round can deliver, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveEvent {
    Stream(StreamChunk),
    CommandState(CommandStateChange),
}

/// Parses `rsp:ReceiveResponse` children into events.
pub fn parse_receive_response(body: Node<'_, '_>) -> Result<Vec<ReceiveEvent>, ProtocolFault> {
    let response = body.expect_child(ns::SHELL, q::RECEIVE_RESPONSE.name)?;

    let mut events = Vec::new();
    for child in response.element_children() {
        if child.is(ns::SHELL, q::STREAM.name) {
            let (Some(stream), Some(command_id)) =
                (child.attribute("Name"), child.attribute("CommandId"))
            else {
                return Err(ProtocolFault::unexpected(
                    "ReceiveResponse stream missing Name or CommandId",
                ));
            };

            let content = match child.text() {
                Some(text) if !text.is_empty() => BASE64.decode(text.trim()).map_err(|err| {
                    ProtocolFault::unexpected(format!("invalid stream payload: {err}"))
                })?,
                _ => Vec::new(),
            };

            events.push(ReceiveEvent::Stream(StreamChunk {
                stream: stream.to_string(),
                command_id: command_id.to_string(),
                content,
                end: child.attribute("End") == Some("true"),
            }));
        } else if child.is(ns::SHELL, q::COMMAND_STATE.name) {
            let state = child
                .attribute("State")
                .unwrap_or_default()
                .to_string();
            let exit_code = child
                .child_text(ns::SHELL, q::EXIT_CODE.name)
                .map(|text| {
                    text.trim().parse::<i32>().map_err(|_| {
                        ProtocolFault::unexpected(format!("invalid ExitCode: {text}"))
                    })
                })
                .transpose()?;

            events.push(ReceiveEvent::CommandState(CommandStateChange {
                state,
                exit_code,
            }));
        } else {
            return Err(ProtocolFault::unexpected(format!(
                "unknown ReceiveResponse element: {}",
                child.tag_name().name()
            )));
        }
    }

    Ok(events)
}
