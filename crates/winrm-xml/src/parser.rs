//! Parsing layer over `roxmltree`.

use crate::XmlError;

pub use roxmltree::{Document, Node};

/// Parses a complete XML document.
pub fn parse(text: &str) -> Result<Document<'_>, XmlError> {
    Document::parse(text).map_err(XmlError::from)
}

/// Namespace-aware helpers on parsed nodes.
pub trait NodeExt<'a, 'input> {
    /// True when the node is an element with the given expanded name.
    fn is(&self, namespace: &str, name: &str) -> bool;

    /// First child element with the given expanded name.
    fn child(&self, namespace: &str, name: &str) -> Option<Node<'a, 'input>>;

    /// First child element with the given expanded name, or a typed error.
    fn expect_child(&self, namespace: &str, name: &str) -> Result<Node<'a, 'input>, XmlError>;

    /// All child elements with the given expanded name, in document order.
    fn children_named(&self, namespace: &str, name: &str) -> Vec<Node<'a, 'input>>;

    /// Child element text, if both the child and its text exist.
    fn child_text(&self, namespace: &str, name: &str) -> Option<&'a str>;

    /// All element children, in document order.
    fn element_children(&self) -> Vec<Node<'a, 'input>>;
}

impl<'a, 'input> NodeExt<'a, 'input> for Node<'a, 'input> {
    fn is(&self, namespace: &str, name: &str) -> bool {
        self.is_element()
            && self.tag_name().name() == name
            && self.tag_name().namespace() == Some(namespace)
    }

    fn child(&self, namespace: &str, name: &str) -> Option<Node<'a, 'input>> {
        self.children().find(|n| n.is(namespace, name))
    }

    fn expect_child(&self, namespace: &str, name: &str) -> Result<Node<'a, 'input>, XmlError> {
        self.child(namespace, name)
            .ok_or_else(|| XmlError::MissingElement {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    fn children_named(&self, namespace: &str, name: &str) -> Vec<Node<'a, 'input>> {
        self.children().filter(|n| n.is(namespace, name)).collect()
    }

    fn child_text(&self, namespace: &str, name: &str) -> Option<&'a str> {
        self.child(namespace, name).and_then(|n| n.text())
    }

    fn element_children(&self) -> Vec<Node<'a, 'input>> {
        self.children().filter(Node::is_element).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
        <root xmlns:a="urn:a">
            <a:one>first</a:one>
            <a:two/>
            <a:one>second</a:one>
        </root>"#;

    #[test]
    fn finds_namespaced_children() {
        let doc = parse(SAMPLE).unwrap();
        let root = doc.root_element();

        assert!(root.child("urn:a", "two").is_some());
        assert!(root.child("urn:b", "two").is_none());
        assert_eq!(root.child_text("urn:a", "one"), Some("first"));
        assert_eq!(root.children_named("urn:a", "one").len(), 2);
    }

    #[test]
    fn expect_child_reports_expanded_name() {
        let doc = parse(SAMPLE).unwrap();
        let err = doc.root_element().expect_child("urn:a", "three").unwrap_err();
        assert_eq!(
            err,
            XmlError::MissingElement {
                namespace: "urn:a".into(),
                name: "three".into()
            }
        );
    }
}
