//! Parsing of real-shaped shell responses: create, command, receive.

use winrm_protocol::rsp::{
    ReceiveEvent, created_shell_id, parse_receive_response, spawned_command_id,
};
use winrm_protocol::soap::body_node;
use winrm_xml::parser::parse;

const CREATE_RESPONSE: &str = r#"<?xml version="1.0"?>
<s:Envelope xml:lang="en-US"
    xmlns:s="http://www.w3.org/2003/05/soap-envelope"
    xmlns:x="http://schemas.xmlsoap.org/ws/2004/09/transfer"
    xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell">
  <s:Header/>
  <s:Body>
    <x:ResourceCreated>
      <x:ReferenceParameters/>
    </x:ResourceCreated>
    <rsp:Shell>
      <rsp:ShellId>79D62EFB-3E83-4D41-92D1-4F67B0C9B737</rsp:ShellId>
      <rsp:ResourceUri>http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd</rsp:ResourceUri>
      <rsp:Owner>winhost\Administrator</rsp:Owner>
      <rsp:InputStreams>stdin</rsp:InputStreams>
      <rsp:OutputStreams>stdout stderr</rsp:OutputStreams>
    </rsp:Shell>
  </s:Body>
</s:Envelope>"#;

const COMMAND_RESPONSE: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
    xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell">
  <s:Header/>
  <s:Body>
    <rsp:CommandResponse>
      <rsp:CommandId>1A6DEE6B-EC68-4DD6-87E7-030C76F5D2D5</rsp:CommandId>
    </rsp:CommandResponse>
  </s:Body>
</s:Envelope>"#;

const RECEIVE_RESPONSE: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
    xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell">
  <s:Header/>
  <s:Body>
    <rsp:ReceiveResponse>
      <rsp:Stream Name="stdout" CommandId="1A6DEE6B-EC68-4DD6-87E7-030C76F5D2D5">TWljcm9zb2Z0IFdpbmRvd3MgW1ZlcnNpb24gMTAuMC4yMDM0OC4yODQ5XQ==</rsp:Stream>
      <rsp:Stream Name="stdout" CommandId="1A6DEE6B-EC68-4DD6-87E7-030C76F5D2D5" End="true"></rsp:Stream>
      <rsp:Stream Name="stderr" CommandId="1A6DEE6B-EC68-4DD6-87E7-030C76F5D2D5" End="true"></rsp:Stream>
      <rsp:CommandState CommandId="1A6DEE6B-EC68-4DD6-87E7-030C76F5D2D5"
          State="http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done">
        <rsp:ExitCode>0</rsp:ExitCode>
      </rsp:CommandState>
    </rsp:ReceiveResponse>
  </s:Body>
</s:Envelope>"#;

#[test]
fn create_response_yields_shell_id() {
    let doc = parse(CREATE_RESPONSE).unwrap();
    let body = body_node(&doc).unwrap();
    assert_eq!(
        created_shell_id(body).unwrap(),
        "79D62EFB-3E83-4D41-92D1-4F67B0C9B737"
    );
}

#[test]
fn command_response_yields_command_id() {
    let doc = parse(COMMAND_RESPONSE).unwrap();
    let body = body_node(&doc).unwrap();
    assert_eq!(
        spawned_command_id(body).unwrap(),
        "1A6DEE6B-EC68-4DD6-87E7-030C76F5D2D5"
    );
}

#[test]
fn receive_response_yields_ordered_events() {
    let doc = parse(RECEIVE_RESPONSE).unwrap();
    let body = body_node(&doc).unwrap();
    let events = parse_receive_response(body).unwrap();
    assert_eq!(events.len(), 4);

    let ReceiveEvent::Stream(first) = &events[0] else {
        panic!("expected a stream event first");
    };
    assert_eq!(first.stream, "stdout");
    assert!(!first.end);
    assert_eq!(
        String::from_utf8_lossy(&first.content),
        "Microsoft Windows [Version 10.0.20348.2849]"
    );

    let ReceiveEvent::Stream(second) = &events[1] else {
        panic!("expected a stream event second");
    };
    assert!(second.end);
    assert!(second.content.is_empty());

    let ReceiveEvent::CommandState(state) = &events[3] else {
        panic!("expected a command-state event last");
    };
    assert!(state.is_done());
    assert_eq!(state.exit_code, Some(0));
}
