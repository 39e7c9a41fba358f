use winrm_protocol::ProtocolFault;

/// Errors surfaced by the client, mirroring the protocol's failure domains.
#[derive(Debug, thiserror::Error)]
pub enum WinRmError {
    /// Failure at or below HTTP: connect/TLS problems, a non-2xx status
    /// with no SOAP fault attached, or an unreadable response.
    #[error("transport error: {0}")]
    Transport(String),

    /// Structurally valid but semantically wrong SOAP/WSMan content.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// SOAP fault without WSMan detail.
    #[error("SOAP fault: {} ({})", reason.as_deref().unwrap_or("unknown/generic SOAP fault"), code.as_deref().unwrap_or("no code"))]
    SoapFault {
        code: Option<String>,
        reason: Option<String>,
    },

    /// SOAP fault carrying a `WSManFault/@Code`.
    #[error("WSMan fault {wsman_code}: {} ({})", reason.as_deref().unwrap_or("unknown fault"), code.as_deref().unwrap_or("no code"))]
    WsManFault {
        code: Option<String>,
        reason: Option<String>,
        wsman_code: String,
    },

    /// Ill-formed multipart/encrypted content or a length mismatch.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// SPNEGO handshake or sealing failure.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Invalid endpoint or client configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The shell was already destroyed.
    #[error("shell has been destroyed")]
    ShellDestroyed,
}

impl WinRmError {
    /// WSMan code the server raises when a `Receive` long poll expires with
    /// no data. The shell receive loop absorbs it silently.
    pub const OPERATION_TIMEOUT_CODE: &'static str = "2150858793";

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn encryption(message: impl Into<String>) -> Self {
        Self::Encryption(message.into())
    }

    /// True for the operation-timeout fault described above.
    pub fn is_operation_timeout(&self) -> bool {
        matches!(
            self,
            WinRmError::WsManFault { wsman_code, .. }
                if wsman_code == Self::OPERATION_TIMEOUT_CODE
        )
    }
}

impl From<reqwest::Error> for WinRmError {
    fn from(err: reqwest::Error) -> Self {
        WinRmError::Transport(err.to_string())
    }
}

impl From<ProtocolFault> for WinRmError {
    fn from(err: ProtocolFault) -> Self {
        WinRmError::Protocol(err.to_string())
    }
}

impl From<winrm_xml::XmlError> for WinRmError {
    fn from(err: winrm_xml::XmlError) -> Self {
        WinRmError::Transport(format!("malformed response: {err}"))
    }
}

impl From<sspi::Error> for WinRmError {
    fn from(err: sspi::Error) -> Self {
        WinRmError::Auth(err.to_string())
    }
}

impl From<std::io::Error> for WinRmError {
    fn from(err: std::io::Error) -> Self {
        WinRmError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_timeout_detection() {
        let fault = WinRmError::WsManFault {
            code: Some("s:Receiver".into()),
            reason: Some("The operation timed out.".into()),
            wsman_code: "2150858793".into(),
        };
        assert!(fault.is_operation_timeout());

        let other = WinRmError::WsManFault {
            code: None,
            reason: None,
            wsman_code: "2150858770".into(),
        };
        assert!(!other.is_operation_timeout());
        assert!(!WinRmError::protocol("x").is_operation_timeout());
    }

    #[test]
    fn fault_display_includes_reason_and_code() {
        let fault = WinRmError::SoapFault {
            code: Some("s:Sender".into()),
            reason: Some("bad request".into()),
        };
        let text = fault.to_string();
        assert!(text.contains("bad request"));
        assert!(text.contains("s:Sender"));
    }
}
