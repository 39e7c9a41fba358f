//! Owned XML document builder.
//!
//! Elements carry their namespace as a full URI; prefixes are resolved at
//! render time from the `xmlns` declarations in scope. The reserved `xml`
//! prefix is always available.

use std::collections::HashMap;
use std::fmt::Write;

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// An XML attribute. The namespace, when present, must resolve to a prefix
/// declared on the element or one of its ancestors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    name: String,
    namespace: Option<String>,
    value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            value: value.into(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// An XML element with owned content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    namespace: Option<String>,
    declarations: Vec<(String, String)>,
    attributes: Vec<Attribute>,
    children: Vec<Element>,
    text: Option<String>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            declarations: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
            text: None,
        }
    }

    /// Creates an element in the given namespace URI.
    pub fn in_namespace(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(name).set_namespace(namespace)
    }

    pub fn set_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Declares `xmlns:{prefix}="{uri}"` on this element, making the prefix
    /// available to it and its subtree.
    pub fn declare(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.declarations.push((prefix.into(), uri.into()));
        self
    }

    pub fn add_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn add_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn add_children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn set_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Serializes the element as a standalone document with an XML
    /// declaration, UTF-8 encoded.
    pub fn to_document(&self) -> String {
        let mut out = String::with_capacity(512);
        out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        let mut scope = HashMap::new();
        scope.insert(XML_NAMESPACE.to_string(), "xml".to_string());
        self.render(&mut out, &scope);
        out
    }

    /// Serializes the element without a declaration, resolving prefixes from
    /// the provided outer scope (URI to prefix).
    pub fn to_fragment(&self, outer_scope: &HashMap<String, String>) -> String {
        let mut out = String::new();
        let mut scope = outer_scope.clone();
        scope
            .entry(XML_NAMESPACE.to_string())
            .or_insert_with(|| "xml".to_string());
        self.render(&mut out, &scope);
        out
    }

    fn render(&self, out: &mut String, scope: &HashMap<String, String>) {
        let mut local = scope;
        let merged;
        if !self.declarations.is_empty() {
            let mut map = scope.clone();
            for (prefix, uri) in &self.declarations {
                map.insert(uri.clone(), prefix.clone());
            }
            merged = map;
            local = &merged;
        }

        let name = self.qualified_name(local);
        out.push('<');
        out.push_str(&name);

        for (prefix, uri) in &self.declarations {
            let _ = write!(out, " xmlns:{prefix}=\"{}\"", escape_attr(uri));
        }

        for attribute in &self.attributes {
            let attr_name = match &attribute.namespace {
                Some(ns) => match local.get(ns) {
                    Some(prefix) => format!("{prefix}:{}", attribute.name),
                    None => attribute.name.clone(),
                },
                None => attribute.name.clone(),
            };
            let _ = write!(out, " {attr_name}=\"{}\"", escape_attr(&attribute.value));
        }

        match (&self.text, self.children.is_empty()) {
            (None, true) => out.push_str("/>"),
            (Some(text), _) => {
                out.push('>');
                out.push_str(&escape_text(text));
                for child in &self.children {
                    child.render(out, local);
                }
                let _ = write!(out, "</{name}>");
            }
            (None, false) => {
                out.push('>');
                for child in &self.children {
                    child.render(out, local);
                }
                let _ = write!(out, "</{name}>");
            }
        }
    }

    fn qualified_name(&self, scope: &HashMap<String, String>) -> String {
        match self.namespace.as_ref().and_then(|ns| scope.get(ns)) {
            Some(prefix) => format!("{prefix}:{}", self.name),
            None => self.name.clone(),
        }
    }
}

fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_prefixed_element_with_declarations() {
        let root = Element::in_namespace("urn:a", "Envelope")
            .declare("a", "urn:a")
            .declare("b", "urn:b")
            .add_child(Element::in_namespace("urn:b", "Child").set_text("x<y"));

        let xml = root.to_document();
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains(r#"<a:Envelope xmlns:a="urn:a" xmlns:b="urn:b">"#));
        assert!(xml.contains("<b:Child>x&lt;y</b:Child>"));
        assert!(xml.ends_with("</a:Envelope>"));
    }

    #[test]
    fn renders_namespaced_attribute_from_scope() {
        let root = Element::in_namespace("urn:a", "Root")
            .declare("a", "urn:a")
            .add_child(
                Element::in_namespace("urn:a", "Item")
                    .add_attribute(Attribute::new("mustUnderstand", "true").with_namespace("urn:a")),
            );

        let xml = root.to_document();
        assert!(xml.contains(r#"<a:Item a:mustUnderstand="true"/>"#));
    }

    #[test]
    fn xml_prefix_is_reserved() {
        let root = Element::new("Locale").add_attribute(
            Attribute::new("lang", "en-US").with_namespace("http://www.w3.org/XML/1998/namespace"),
        );
        assert!(root.to_document().contains(r#"<Locale xml:lang="en-US"/>"#));
    }

    #[test]
    fn escapes_attribute_quotes() {
        let root = Element::new("E").add_attribute(Attribute::new("v", "a\"b&c"));
        assert!(root.to_document().contains(r#"v="a&quot;b&amp;c""#));
    }

    #[test]
    fn round_trips_through_parser() {
        let root = Element::in_namespace("urn:a", "Envelope")
            .declare("a", "urn:a")
            .add_child(Element::in_namespace("urn:a", "Body").set_text("payload"));
        let xml = root.to_document();

        let doc = crate::parser::parse(&xml).unwrap();
        let body = doc
            .root_element()
            .children()
            .find(|n| n.tag_name().name() == "Body")
            .unwrap();
        assert_eq!(body.tag_name().namespace(), Some("urn:a"));
        assert_eq!(body.text(), Some("payload"));
    }
}
