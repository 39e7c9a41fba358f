//! End-to-end request building: a Get request rendered and re-parsed.

use std::time::Duration;

use winrm_protocol::schema::{self, Action, ns};
use winrm_protocol::wsman::{SelectorSet, WsManEnvelope, WsManHeader, new_message_id};
use winrm_xml::parser::{NodeExt, parse};

fn service_get_envelope() -> (String, String) {
    let message_id = new_message_id();
    let header = WsManHeader::builder()
        .to("http://winhost:5985/wsman")
        .reply_to(format!("{}/role/anonymous", ns::WS_ADDRESSING))
        .action(Action::Get.uri())
        .message_id(message_id.clone())
        .resource_uri(schema::cim("Win32_Service"))
        .selectors(SelectorSet::new().add("Name", "Spooler"))
        .locale("en-US")
        .data_locale("en-US")
        .operation_timeout(Duration::from_secs(60))
        .max_envelope_size(512 * 1024)
        .build();
    (WsManEnvelope::new(header).to_xml(), message_id)
}

#[test]
fn get_request_has_all_headers() {
    let (xml, message_id) = service_get_envelope();

    let doc = parse(&xml).unwrap();
    let root = doc.root_element();
    assert!(root.is(ns::SOAP, "Envelope"));

    let header = root.child(ns::SOAP, "Header").unwrap();
    assert_eq!(
        header.child_text(ns::WS_ADDRESSING, "To"),
        Some("http://winhost:5985/wsman")
    );
    assert_eq!(
        header.child_text(ns::WS_ADDRESSING, "Action"),
        Some("http://schemas.xmlsoap.org/ws/2004/09/transfer/Get")
    );
    assert_eq!(
        header.child_text(ns::WS_ADDRESSING, "MessageID"),
        Some(message_id.as_str())
    );
    assert_eq!(
        header.child_text(ns::WSMAN, "ResourceURI"),
        Some("http://schemas.microsoft.com/wbem/wsman/1/wmi/root/cimv2/Win32_Service")
    );
    assert_eq!(
        header.child_text(ns::WSMAN, "OperationTimeout"),
        Some("PT60S")
    );
    assert_eq!(
        header.child_text(ns::WSMAN, "MaxEnvelopeSize"),
        Some("524288")
    );

    let selector_set = header.child(ns::WSMAN, "SelectorSet").unwrap();
    let selector = selector_set.child(ns::WSMAN, "Selector").unwrap();
    assert_eq!(selector.attribute("Name"), Some("Name"));
    assert_eq!(selector.text(), Some("Spooler"));

    // The body is present even though Get carries none.
    let body = root.child(ns::SOAP, "Body").unwrap();
    assert_eq!(body.element_children().len(), 0);
}

#[test]
fn request_round_trips_through_the_typed_parser() {
    let (xml, _) = service_get_envelope();
    let doc = parse(&xml).unwrap();
    let header_node = doc.root_element().child(ns::SOAP, "Header").unwrap();
    let parsed = WsManHeader::parse(header_node).unwrap();

    assert_eq!(parsed.action.as_deref(), Some(Action::Get.uri()));
    assert_eq!(
        parsed.selectors.unwrap().get("Name"),
        Some("Spooler")
    );
    assert_eq!(parsed.operation_timeout, Some(Duration::from_secs(60)));
    assert_eq!(parsed.max_envelope_size, Some(512 * 1024));
    assert_eq!(parsed.locale.as_deref(), Some("en-US"));
    assert_eq!(parsed.data_locale.as_deref(), Some("en-US"));
}

#[test]
fn prefixes_match_winrm_abbreviations() {
    let (xml, _) = service_get_envelope();
    assert!(xml.contains("<s:Envelope"));
    assert!(xml.contains("xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\""));
    assert!(xml.contains("xmlns:a=\"http://schemas.xmlsoap.org/ws/2004/08/addressing\""));
    assert!(xml.contains("xmlns:w=\"http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd\""));
    assert!(xml.contains("<a:To s:mustUnderstand=\"true\">"));
    assert!(xml.contains("<w:Locale s:mustUnderstand=\"false\" xml:lang=\"en-US\"/>"));
}
