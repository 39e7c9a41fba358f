pub mod cim;
pub mod duration;
pub mod rsp;
pub mod schema;
pub mod soap;
pub mod wsman;

/// Structurally valid XML that does not carry the WS-Management content an
/// operation requires.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolFault {
    #[error("{0}")]
    Xml(#[from] winrm_xml::XmlError),

    #[error("{0}")]
    Unexpected(String),
}

impl ProtocolFault {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
