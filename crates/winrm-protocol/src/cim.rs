//! CIM payload handling: text coercion ("dictify"), method invocation
//! bodies and enumeration messages.
//!
//! The coercion is intentionally lossy ergonomics: a WMI string equal to
//! `"true"` is indistinguishable from a boolean. Callers needing exact types
//! must consult the CIM schema instead.

use std::collections::BTreeMap;

use winrm_xml::builder::Element;
use winrm_xml::parser::{Node, NodeExt};

use crate::ProtocolFault;
use crate::schema::{ns, q};

/// A scalar or array property value decoded from a CIM response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CimValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Array(Vec<CimValue>),
}

impl CimValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CimValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            CimValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CimValue::Str(value) => Some(value),
            _ => None,
        }
    }

    /// String form regardless of the coerced type; `None` for nil.
    pub fn display(&self) -> Option<String> {
        match self {
            CimValue::Null => None,
            CimValue::Bool(value) => Some(value.to_string()),
            CimValue::Int(value) => Some(value.to_string()),
            CimValue::Str(value) => Some(value.clone()),
            CimValue::Array(_) => None,
        }
    }

    /// The value as a list: arrays as-is, nil as empty, scalars as a
    /// singleton. Mirrors how WMI emits arrays (repeated elements).
    pub fn into_vec(self) -> Vec<CimValue> {
        match self {
            CimValue::Array(items) => items,
            CimValue::Null => Vec::new(),
            scalar => vec![scalar],
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CimValue::Null)
    }
}

/// Property map of a single CIM instance or method output.
pub type CimProperties = BTreeMap<String, CimValue>;

fn coerce(text: &str) -> CimValue {
    match text {
        "true" => return CimValue::Bool(true),
        "false" => return CimValue::Bool(false),
        _ => {}
    }
    if let Ok(number) = text.parse::<i64>() {
        // Only the canonical decimal form counts; "+5", " 5" and "05" stay strings.
        if number.to_string() == text {
            return CimValue::Int(number);
        }
    }
    CimValue::Str(text.to_string())
}

/// Converts an element's typed children into a property map. Repeated
/// children with the same local name accumulate into an ordered array.
pub fn dictify(node: Node<'_, '_>) -> CimProperties {
    use std::collections::btree_map::Entry;

    let mut properties = CimProperties::new();

    for child in node.element_children() {
        let name = child.tag_name().name().to_string();
        let value = if child.attribute((ns::XSI, "nil")) == Some("true") {
            CimValue::Null
        } else {
            coerce(child.text().unwrap_or_default())
        };

        match properties.entry(name) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(mut slot) => match slot.get_mut() {
                CimValue::Array(items) => items.push(value),
                existing => {
                    let first = std::mem::replace(existing, CimValue::Null);
                    *existing = CimValue::Array(vec![first, value]);
                }
            },
        }
    }

    properties
}

/// An input parameter for a WMI method invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    UInt(u64),
    Bool(bool),
    StrArray(Vec<String>),
    UIntArray(Vec<u64>),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::UInt(u64::from(value))
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        ParamValue::UInt(value)
    }
}

/// Builds the `<p:{Method}_INPUT>` body element for a WMI method call.
/// Array parameters render as repeated children with the same name.
pub fn method_input(
    resource_uri: &str,
    method: &str,
    params: &[(&str, ParamValue)],
) -> Element {
    let mut input = Element::in_namespace(resource_uri, format!("{method}_INPUT"))
        .declare("p", resource_uri);

    for (name, value) in params {
        match value {
            ParamValue::Str(text) => {
                input = input.add_child(param_child(resource_uri, name, text.clone()));
            }
            ParamValue::Int(number) => {
                input = input.add_child(param_child(resource_uri, name, number.to_string()));
            }
            ParamValue::UInt(number) => {
                input = input.add_child(param_child(resource_uri, name, number.to_string()));
            }
            ParamValue::Bool(flag) => {
                input = input.add_child(param_child(resource_uri, name, flag.to_string()));
            }
            ParamValue::StrArray(items) => {
                for item in items {
                    input = input.add_child(param_child(resource_uri, name, item.clone()));
                }
            }
            ParamValue::UIntArray(items) => {
                for item in items {
                    input = input.add_child(param_child(resource_uri, name, item.to_string()));
                }
            }
        }
    }

    input
}

fn param_child(resource_uri: &str, name: &str, text: String) -> Element {
    Element::in_namespace(resource_uri, name).set_text(text)
}

/// Action URI for a WMI method call: `{ResourceURI}/{Method}`.
pub fn method_action(resource_uri: &str, method: &str) -> String {
    format!("{resource_uri}/{method}")
}

/// Dictifies the method output: the first element child of the body, which
/// contains the out-parameters and `ReturnValue`.
pub fn parse_method_output(body: Node<'_, '_>) -> Result<CimProperties, ProtocolFault> {
    let output = body
        .element_children()
        .into_iter()
        .next()
        .ok_or_else(|| ProtocolFault::unexpected("method response body is empty"))?;
    Ok(dictify(output))
}

/// One page of an enumeration: the replacement context, the dictified
/// items, and whether the server declared the end of the sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumerationPage {
    pub context: Option<String>,
    pub items: Vec<CimProperties>,
    pub end_of_sequence: bool,
}

/// Body for the initial `Enumerate` request.
pub fn enumerate_body(max_elements: u32) -> Element {
    q::ENUMERATE
        .element()
        .add_child(q::OPTIMIZE_OPERATION.element())
        .add_child(q::MAX_ELEMENTS.element().set_text(max_elements.to_string()))
}

/// Body for a `Pull` request continuing from `context`.
pub fn pull_body(context: &str, max_elements: u32) -> Element {
    q::PULL
        .element()
        .add_child(q::ENUMERATION_CONTEXT.element().set_text(context))
        .add_child(q::MAX_ELEMENTS.element().set_text(max_elements.to_string()))
}

/// Body for a `Release` request abandoning `context`.
pub fn release_body(context: &str) -> Element {
    q::RELEASE
        .element()
        .add_child(q::ENUMERATION_CONTEXT.element().set_text(context))
}

/// Walks an `EnumerateResponse` or `PullResponse` element.
pub fn parse_enumeration_page(body: Node<'_, '_>, response_name: &str) -> Result<EnumerationPage, ProtocolFault> {
    let response = body.expect_child(ns::WS_ENUMERATION, response_name)?;

    let mut page = EnumerationPage::default();
    for child in response.element_children() {
        if child.is(ns::WS_ENUMERATION, q::ENUMERATION_CONTEXT.name) {
            page.context = Some(child.text().unwrap_or_default().trim().to_string());
        } else if child.is(ns::WS_ENUMERATION, q::ITEMS.name) || child.is(ns::WSMAN, q::ITEMS.name)
        {
            for item in child.element_children() {
                page.items.push(dictify(item));
            }
        } else if child.is(ns::WS_ENUMERATION, q::END_OF_SEQUENCE.name)
            || child.is(ns::WSMAN, q::END_OF_SEQUENCE.name)
        {
            page.end_of_sequence = true;
        } else {
            tracing::warn!(
                element = child.tag_name().name(),
                "unexpected child in enumeration response"
            );
        }
    }

    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use winrm_xml::parser::parse;

    fn dictify_str(xml: &str) -> CimProperties {
        let doc = parse(xml).unwrap();
        dictify(doc.root_element())
    }

    #[test]
    fn coercion_laws() {
        let props = dictify_str(
            r#"<r xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
                <t>true</t><f>false</f><n>42</n><neg>-7</neg>
                <padded>05</padded><signed>+5</signed><s>hello</s>
                <nil xsi:nil="true">ignored</nil>
               </r>"#,
        );

        assert_eq!(props["t"], CimValue::Bool(true));
        assert_eq!(props["f"], CimValue::Bool(false));
        assert_eq!(props["n"], CimValue::Int(42));
        assert_eq!(props["neg"], CimValue::Int(-7));
        assert_eq!(props["padded"], CimValue::Str("05".into()));
        assert_eq!(props["signed"], CimValue::Str("+5".into()));
        assert_eq!(props["s"], CimValue::Str("hello".into()));
        assert_eq!(props["nil"], CimValue::Null);
    }

    #[test]
    fn repeated_children_accumulate_in_order() {
        let props = dictify_str("<r><x>1</x><x>2</x><x>3</x></r>");
        assert_eq!(
            props["x"],
            CimValue::Array(vec![
                CimValue::Int(1),
                CimValue::Int(2),
                CimValue::Int(3)
            ])
        );
    }

    #[test]
    fn empty_element_coerces_to_empty_string() {
        let props = dictify_str("<r><x/></r>");
        assert_eq!(props["x"], CimValue::Str(String::new()));
    }

    #[test]
    fn method_input_renders_params_and_arrays() {
        let uri = "http://schemas.microsoft.com/wbem/wsman/1/wmi/root/default/StdRegProv";
        let input = method_input(
            uri,
            "SetMultiStringValue",
            &[
                ("hDefKey", ParamValue::UInt(0x8000_0002)),
                ("sSubKeyName", "SOFTWARE\\Test".into()),
                (
                    "sValue",
                    ParamValue::StrArray(vec!["one".into(), "two".into()]),
                ),
            ],
        );
        let xml = input.to_document();
        assert!(xml.contains("<p:SetMultiStringValue_INPUT"));
        assert!(xml.contains("<p:hDefKey>2147483650</p:hDefKey>"));
        assert!(xml.contains("<p:sValue>one</p:sValue><p:sValue>two</p:sValue>"));
    }

    #[test]
    fn enumeration_page_walk() {
        let xml = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
                xmlns:n="http://schemas.xmlsoap.org/ws/2004/09/enumeration"
                xmlns:w="http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd">
            <s:Header/>
            <s:Body>
              <n:EnumerateResponse>
                <n:EnumerationContext>uuid:ctx-0</n:EnumerationContext>
                <w:Items>
                  <p:Win32_Service xmlns:p="urn:svc"><p:Name>Spooler</p:Name></p:Win32_Service>
                  <p:Win32_Service xmlns:p="urn:svc"><p:Name>W32Time</p:Name></p:Win32_Service>
                </w:Items>
                <w:EndOfSequence/>
              </n:EnumerateResponse>
            </s:Body>
        </s:Envelope>"#;

        let doc = parse(xml).unwrap();
        let body = crate::soap::body_node(&doc).unwrap();
        let page = parse_enumeration_page(body, "EnumerateResponse").unwrap();

        assert_eq!(page.context.as_deref(), Some("uuid:ctx-0"));
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0]["Name"], CimValue::Str("Spooler".into()));
        assert!(page.end_of_sequence);
    }
}
