pub mod builder;
pub mod parser;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XmlError {
    #[error("invalid XML: {0}")]
    Parse(String),

    #[error("missing element: {name} ({namespace})")]
    MissingElement { namespace: String, name: String },

    #[error("missing attribute '{0}'")]
    MissingAttribute(String),

    #[error("invalid text content: {0}")]
    InvalidText(String),
}

impl From<roxmltree::Error> for XmlError {
    fn from(err: roxmltree::Error) -> Self {
        XmlError::Parse(err.to_string())
    }
}
