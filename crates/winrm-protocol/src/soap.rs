//! SOAP 1.2 envelope assembly and fault extraction.

use winrm_xml::builder::Element;
use winrm_xml::parser::{Document, Node, NodeExt};

use crate::ProtocolFault;
use crate::schema::{ns, q};

/// A SOAP 1.2 envelope under construction. Header and Body always exist in
/// the serialized form, even when empty.
#[derive(Debug, Clone)]
pub struct SoapEnvelope {
    prefixes: Vec<(String, String)>,
    header: Vec<Element>,
    body: Vec<Element>,
}

impl SoapEnvelope {
    /// Creates an empty envelope with the given prefix declarations
    /// (prefix, namespace URI).
    pub fn new<I, P, U>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = (P, U)>,
        P: Into<String>,
        U: Into<String>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(|(p, u)| (p.into(), u.into()))
                .collect(),
            header: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn push_header(&mut self, element: Element) {
        self.header.push(element);
    }

    pub fn push_body(&mut self, element: Element) {
        self.body.push(element);
    }

    /// Serializes to UTF-8 text with an XML declaration.
    pub fn to_xml(&self) -> String {
        let mut envelope = q::ENVELOPE.element();
        for (prefix, uri) in &self.prefixes {
            envelope = envelope.declare(prefix.clone(), uri.clone());
        }

        let header = q::HEADER.element().add_children(self.header.iter().cloned());
        let body = q::BODY.element().add_children(self.body.iter().cloned());

        envelope.add_child(header).add_child(body).to_document()
    }
}

/// The fault triple carried by a SOAP fault response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapFault {
    /// `s:Code/s:Value`, e.g. `s:Receiver`.
    pub code: Option<String>,
    /// Human-readable `s:Reason/s:Text`.
    pub reason: Option<String>,
    /// `WSManFault/@Code` under `s:Detail`, when the server attached one.
    pub wsman_code: Option<String>,
}

/// Locates the `s:Body` element of a response document.
pub fn body_node<'a, 'input>(
    document: &'a Document<'input>,
) -> Result<Node<'a, 'input>, ProtocolFault> {
    let root = document.root_element();
    if !root.is(ns::SOAP, q::ENVELOPE.name) {
        return Err(ProtocolFault::unexpected(format!(
            "expected SOAP Envelope, found {}",
            root.tag_name().name()
        )));
    }
    Ok(root.expect_child(ns::SOAP, q::BODY.name)?)
}

/// Extracts the fault triple if `Body/Fault` is present.
pub fn extract_fault(document: &Document<'_>) -> Result<Option<SoapFault>, ProtocolFault> {
    let body = body_node(document)?;
    let Some(fault) = body.child(ns::SOAP, q::FAULT.name) else {
        return Ok(None);
    };

    let code = fault
        .child(ns::SOAP, q::CODE.name)
        .and_then(|code| code.child_text(ns::SOAP, q::VALUE.name))
        .map(str::to_string);

    let reason = fault
        .child(ns::SOAP, q::REASON.name)
        .and_then(|reason| reason.child_text(ns::SOAP, q::TEXT.name))
        .map(|text| text.trim().to_string());

    let wsman_code = fault
        .child(ns::SOAP, q::DETAIL.name)
        .and_then(|detail| find_wsman_fault(detail))
        .and_then(|node| node.attribute("Code"))
        .map(str::to_string);

    Ok(Some(SoapFault {
        code,
        reason,
        wsman_code,
    }))
}

fn find_wsman_fault<'a, 'input>(detail: Node<'a, 'input>) -> Option<Node<'a, 'input>> {
    detail
        .descendants()
        .find(|node| node.is(ns::WSMAN_FAULT, q::WSMAN_FAULT.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::prefix_map;
    use winrm_xml::parser::parse;

    const FAULT_RESPONSE: &str = r#"<?xml version="1.0"?>
        <s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
                    xmlns:f="http://schemas.microsoft.com/wbem/wsman/1/wsmanfault">
          <s:Header/>
          <s:Body>
            <s:Fault>
              <s:Code><s:Value>s:Receiver</s:Value></s:Code>
              <s:Reason><s:Text xml:lang="en-US">The operation timed out.</s:Text></s:Reason>
              <s:Detail>
                <f:WSManFault Code="2150858793" Machine="host"><f:Message>timeout</f:Message></f:WSManFault>
              </s:Detail>
            </s:Fault>
          </s:Body>
        </s:Envelope>"#;

    #[test]
    fn serializes_header_and_body_even_when_empty() {
        let envelope = SoapEnvelope::new(prefix_map());
        let xml = envelope.to_xml();
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains("<s:Header/>"));
        assert!(xml.contains("<s:Body/>"));
    }

    #[test]
    fn extracts_full_fault_triple() {
        let doc = parse(FAULT_RESPONSE).unwrap();
        let fault = extract_fault(&doc).unwrap().unwrap();
        assert_eq!(fault.code.as_deref(), Some("s:Receiver"));
        assert_eq!(fault.reason.as_deref(), Some("The operation timed out."));
        assert_eq!(fault.wsman_code.as_deref(), Some("2150858793"));
    }

    #[test]
    fn no_fault_yields_none() {
        let envelope = SoapEnvelope::new(prefix_map()).to_xml();
        let doc = parse(&envelope).unwrap();
        assert_eq!(extract_fault(&doc).unwrap(), None);
    }

    #[test]
    fn missing_body_is_a_protocol_fault() {
        let doc = parse(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Header/></s:Envelope>"#,
        )
        .unwrap();
        assert!(body_node(&doc).is_err());
    }
}
