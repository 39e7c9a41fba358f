//! WS-Management envelope: the typed header block and its parse-side twin.

use std::collections::BTreeMap;
use std::time::Duration;

use winrm_xml::builder::{Attribute, Element};
use winrm_xml::parser::{Node, NodeExt};

use crate::schema::{ns, q};
use crate::soap::SoapEnvelope;
use crate::{ProtocolFault, duration, schema};

/// Selectors pinpointing a non-singleton resource instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorSet {
    entries: BTreeMap<String, String>,
}

impl SelectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a selector as a key-value pair.
    /// `SelectorSet::new().add("ShellId", id)` renders
    /// `<w:Selector Name="ShellId">{id}</w:Selector>`.
    pub fn add(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Per-operation options such as `WINRS_SKIP_CMD_SHELL`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    entries: BTreeMap<String, String>,
}

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// The WS-Management header block. Every field is optional; the request
/// builder decides which ones a given operation carries.
#[derive(Debug, Clone, Default, PartialEq, typed_builder::TypedBuilder)]
pub struct WsManHeader {
    #[builder(default, setter(into, strip_option))]
    pub to: Option<String>,
    #[builder(default, setter(into, strip_option))]
    pub reply_to: Option<String>,
    #[builder(default, setter(into, strip_option))]
    pub action: Option<String>,
    #[builder(default, setter(into, strip_option))]
    pub message_id: Option<String>,
    #[builder(default, setter(into, strip_option))]
    pub resource_uri: Option<String>,
    #[builder(default, setter(strip_option))]
    pub selectors: Option<SelectorSet>,
    #[builder(default, setter(strip_option))]
    pub options: Option<OptionSet>,
    #[builder(default, setter(into, strip_option))]
    pub locale: Option<String>,
    #[builder(default, setter(into, strip_option))]
    pub data_locale: Option<String>,
    #[builder(default, setter(strip_option))]
    pub operation_timeout: Option<Duration>,
    #[builder(default, setter(strip_option))]
    pub max_envelope_size: Option<u32>,
}

fn must_understand(value: bool) -> Attribute {
    Attribute::new(q::MUST_UNDERSTAND.name, if value { "true" } else { "false" })
        .with_namespace(ns::SOAP)
}

fn lang(value: &str) -> Attribute {
    Attribute::new("lang", value).with_namespace(ns::XML)
}

impl WsManHeader {
    /// Renders the header fields as `s:Header` children, in the canonical
    /// order WinRM emits them.
    pub fn render(&self) -> Vec<Element> {
        let mut children = Vec::new();

        if let Some(to) = &self.to {
            children.push(
                q::TO
                    .element()
                    .add_attribute(must_understand(true))
                    .set_text(to.clone()),
            );
        }

        if let Some(reply_to) = &self.reply_to {
            children.push(
                q::REPLY_TO.element().add_attribute(must_understand(true)).add_child(
                    q::ADDRESS
                        .element()
                        .add_attribute(must_understand(true))
                        .set_text(reply_to.clone()),
                ),
            );
        }

        if let Some(action) = &self.action {
            children.push(
                q::ACTION
                    .element()
                    .add_attribute(must_understand(true))
                    .set_text(action.clone()),
            );
        }

        if let Some(message_id) = &self.message_id {
            children.push(q::MESSAGE_ID.element().set_text(message_id.clone()));
        }

        if let Some(resource_uri) = &self.resource_uri {
            children.push(
                q::RESOURCE_URI
                    .element()
                    .add_attribute(must_understand(true))
                    .set_text(resource_uri.clone()),
            );
        }

        if let Some(selectors) = self.selectors.as_ref().filter(|s| !s.is_empty()) {
            let mut set = q::SELECTOR_SET.element();
            for (name, value) in selectors.iter() {
                set = set.add_child(
                    q::SELECTOR
                        .element()
                        .add_attribute(Attribute::new("Name", name))
                        .set_text(value),
                );
            }
            children.push(set);
        }

        if let Some(options) = self.options.as_ref().filter(|o| !o.is_empty()) {
            let mut set = q::OPTION_SET.element().add_attribute(must_understand(true));
            for (name, value) in options.iter() {
                set = set.add_child(
                    q::OPTION
                        .element()
                        .add_attribute(Attribute::new("Name", name))
                        .set_text(value),
                );
            }
            children.push(set);
        }

        if let Some(locale) = &self.locale {
            children.push(
                q::LOCALE
                    .element()
                    .add_attribute(must_understand(false))
                    .add_attribute(lang(locale)),
            );
        }

        if let Some(data_locale) = &self.data_locale {
            children.push(
                q::DATA_LOCALE
                    .element()
                    .add_attribute(must_understand(false))
                    .add_attribute(lang(data_locale)),
            );
        }

        if let Some(timeout) = self.operation_timeout {
            children.push(
                q::OPERATION_TIMEOUT
                    .element()
                    .set_text(duration::to_iso8601(timeout)),
            );
        }

        if let Some(max_size) = self.max_envelope_size {
            children.push(
                q::MAX_ENVELOPE_SIZE
                    .element()
                    .add_attribute(must_understand(true))
                    .set_text(max_size.to_string()),
            );
        }

        children
    }

    /// Recovers the typed header from a parsed `s:Header` node.
    pub fn parse(header: Node<'_, '_>) -> Result<Self, ProtocolFault> {
        let selectors = header
            .child(ns::WSMAN, q::SELECTOR_SET.name)
            .map(|set| {
                let mut selectors = SelectorSet::new();
                for selector in set.children_named(ns::WSMAN, q::SELECTOR.name) {
                    let name = selector.attribute("Name").ok_or_else(|| {
                        ProtocolFault::unexpected("Selector missing Name attribute")
                    })?;
                    selectors = selectors.add(name, selector.text().unwrap_or_default());
                }
                Ok::<_, ProtocolFault>(selectors)
            })
            .transpose()?;

        let options = header
            .child(ns::WSMAN, q::OPTION_SET.name)
            .map(|set| {
                let mut options = OptionSet::new();
                for option in set.children_named(ns::WSMAN, q::OPTION.name) {
                    let name = option.attribute("Name").ok_or_else(|| {
                        ProtocolFault::unexpected("Option missing Name attribute")
                    })?;
                    options = options.add(name, option.text().unwrap_or_default());
                }
                Ok::<_, ProtocolFault>(options)
            })
            .transpose()?;

        let operation_timeout = header
            .child_text(ns::WSMAN, q::OPERATION_TIMEOUT.name)
            .map(duration::from_iso8601)
            .transpose()?;

        let max_envelope_size = header
            .child_text(ns::WSMAN, q::MAX_ENVELOPE_SIZE.name)
            .map(|text| {
                text.trim().parse::<u32>().map_err(|_| {
                    ProtocolFault::unexpected(format!("invalid MaxEnvelopeSize: {text}"))
                })
            })
            .transpose()?;

        Ok(WsManHeader {
            to: header
                .child_text(ns::WS_ADDRESSING, q::TO.name)
                .map(str::to_string),
            reply_to: header
                .child(ns::WS_ADDRESSING, q::REPLY_TO.name)
                .and_then(|reply_to| reply_to.child_text(ns::WS_ADDRESSING, q::ADDRESS.name))
                .map(str::to_string),
            action: header
                .child_text(ns::WS_ADDRESSING, q::ACTION.name)
                .map(str::to_string),
            message_id: header
                .child_text(ns::WS_ADDRESSING, q::MESSAGE_ID.name)
                .map(str::to_string),
            resource_uri: header
                .child_text(ns::WSMAN, q::RESOURCE_URI.name)
                .map(str::to_string),
            selectors,
            options,
            locale: header
                .child(ns::WSMAN, q::LOCALE.name)
                .and_then(|node| node.attribute((ns::XML, "lang")))
                .map(str::to_string),
            data_locale: header
                .child(ns::WSMAN, q::DATA_LOCALE.name)
                .and_then(|node| node.attribute((ns::XML, "lang")))
                .map(str::to_string),
            operation_timeout,
            max_envelope_size,
        })
    }
}

/// A WS-Management envelope: typed header plus an optional body element.
#[derive(Debug, Clone)]
pub struct WsManEnvelope {
    pub header: WsManHeader,
    pub body: Option<Element>,
}

impl WsManEnvelope {
    pub fn new(header: WsManHeader) -> Self {
        Self { header, body: None }
    }

    pub fn with_body(mut self, body: Element) -> Self {
        self.body = Some(body);
        self
    }

    pub fn to_xml(&self) -> String {
        let mut envelope = SoapEnvelope::new(schema::prefix_map());
        for child in self.header.render() {
            envelope.push_header(child);
        }
        if let Some(body) = &self.body {
            envelope.push_body(body.clone());
        }
        envelope.to_xml()
    }
}

/// Fresh `urn:uuid:{v4}` message identifier.
pub fn new_message_id() -> String {
    format!("urn:uuid:{}", uuid::Uuid::new_v4())
}

/// Typed view of a WS-Management `IdentifyResponse`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifyInfo {
    pub protocol_version: Option<String>,
    pub product_vendor: Option<String>,
    pub product_version: Option<String>,
    pub security_profiles: Vec<String>,
}

/// The singleton `wsmid:Identify` body element.
pub fn identify_body() -> Element {
    q::IDENTIFY.element().declare("wsmid", ns::WSMAN_IDENTITY)
}

/// Parses `wsmid:IdentifyResponse` from a response body node.
pub fn parse_identify(body: Node<'_, '_>) -> Result<IdentifyInfo, ProtocolFault> {
    let response = body.expect_child(ns::WSMAN_IDENTITY, q::IDENTIFY_RESPONSE.name)?;

    let security_profiles = response
        .child(ns::WSMAN_IDENTITY, q::SECURITY_PROFILES.name)
        .map(|profiles| {
            profiles
                .children_named(ns::WSMAN_IDENTITY, q::SECURITY_PROFILE_NAME.name)
                .iter()
                .filter_map(|node| node.text())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(IdentifyInfo {
        protocol_version: response
            .child_text(ns::WSMAN_IDENTITY, q::PROTOCOL_VERSION.name)
            .map(str::to_string),
        product_vendor: response
            .child_text(ns::WSMAN_IDENTITY, q::PRODUCT_VENDOR.name)
            .map(str::to_string),
        product_version: response
            .child_text(ns::WSMAN_IDENTITY, q::PRODUCT_VERSION.name)
            .map(str::to_string),
        security_profiles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use winrm_xml::parser::parse;

    fn full_header() -> WsManHeader {
        WsManHeader::builder()
            .to("http://host:5985/wsman")
            .reply_to("http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous")
            .action("http://schemas.xmlsoap.org/ws/2004/09/transfer/Get")
            .message_id("urn:uuid:11111111-2222-3333-4444-555555555555")
            .resource_uri("http://schemas.microsoft.com/wbem/wsman/1/wmi/root/cimv2/Win32_Service")
            .selectors(SelectorSet::new().add("Name", "Spooler"))
            .options(OptionSet::new().add("WINRS_SKIP_CMD_SHELL", "TRUE"))
            .locale("en-US")
            .data_locale("en-US")
            .operation_timeout(Duration::from_secs(20))
            .max_envelope_size(512 * 1024)
            .build()
    }

    #[test]
    fn round_trips_every_field() {
        let header = full_header();
        let xml = WsManEnvelope::new(header.clone()).to_xml();

        let doc = parse(&xml).unwrap();
        let header_node = doc
            .root_element()
            .child(ns::SOAP, "Header")
            .expect("envelope has a header");
        let parsed = WsManHeader::parse(header_node).unwrap();

        assert_eq!(parsed, header);
    }

    #[test]
    fn must_understand_contract() {
        let xml = WsManEnvelope::new(full_header()).to_xml();
        let doc = parse(&xml).unwrap();
        let header = doc.root_element().child(ns::SOAP, "Header").unwrap();

        for name in ["To", "Action"] {
            let node = header
                .children()
                .find(|n| n.tag_name().name() == name)
                .unwrap();
            assert_eq!(node.attribute((ns::SOAP, "mustUnderstand")), Some("true"));
        }
        let resource = header
            .children()
            .find(|n| n.tag_name().name() == "ResourceURI")
            .unwrap();
        assert_eq!(
            resource.attribute((ns::SOAP, "mustUnderstand")),
            Some("true")
        );
        let reply_to = header
            .children()
            .find(|n| n.tag_name().name() == "ReplyTo")
            .unwrap();
        assert_eq!(
            reply_to.attribute((ns::SOAP, "mustUnderstand")),
            Some("true")
        );

        for name in ["Locale", "DataLocale"] {
            let node = header
                .children()
                .find(|n| n.tag_name().name() == name)
                .unwrap();
            assert_eq!(node.attribute((ns::SOAP, "mustUnderstand")), Some("false"));
        }
    }

    #[test]
    fn omitted_fields_render_nothing() {
        let xml = WsManEnvelope::new(WsManHeader::default()).to_xml();
        assert!(xml.contains("<s:Header/>"));
    }

    #[test]
    fn timeout_renders_iso8601() {
        let header = WsManHeader::builder()
            .operation_timeout(Duration::from_secs(1))
            .build();
        let xml = WsManEnvelope::new(header).to_xml();
        assert!(xml.contains("<w:OperationTimeout>PT1S</w:OperationTimeout>"));
    }

    #[test]
    fn message_ids_are_uuid_urns_and_fresh() {
        let a = new_message_id();
        let b = new_message_id();
        assert!(a.starts_with("urn:uuid:"));
        assert_ne!(a, b);
    }

    #[test]
    fn parses_identify_response() {
        let xml = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
                xmlns:wsmid="http://schemas.dmtf.org/wbem/wsman/identity/1/wsmanidentity.xsd">
            <s:Header/>
            <s:Body>
              <wsmid:IdentifyResponse>
                <wsmid:ProtocolVersion>http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd</wsmid:ProtocolVersion>
                <wsmid:ProductVendor>Microsoft Corporation</wsmid:ProductVendor>
                <wsmid:ProductVersion>OS: 10.0.20348 SP: 0.0 Stack: 3.0</wsmid:ProductVersion>
                <wsmid:SecurityProfiles>
                  <wsmid:SecurityProfileName>http://schemas.dmtf.org/wbem/wsman/1/wsman/secprofile/http/spnego-kerberos</wsmid:SecurityProfileName>
                </wsmid:SecurityProfiles>
              </wsmid:IdentifyResponse>
            </s:Body>
        </s:Envelope>"#;

        let doc = parse(xml).unwrap();
        let body = crate::soap::body_node(&doc).unwrap();
        let info = parse_identify(body).unwrap();
        assert_eq!(
            info.protocol_version.as_deref(),
            Some("http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd")
        );
        assert_eq!(info.product_vendor.as_deref(), Some("Microsoft Corporation"));
        assert_eq!(info.security_profiles.len(), 1);
    }
}
