//! XML schema catalog: namespace URIs, qualified names, action URIs and
//! resource URI constructors. Constants only.

/// Namespace URIs used across WS-Management traffic.
pub mod ns {
    pub const XML: &str = "http://www.w3.org/XML/1998/namespace";
    pub const XSD: &str = "http://www.w3.org/2001/XMLSchema";
    pub const XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";

    pub const SOAP: &str = "http://www.w3.org/2003/05/soap-envelope";
    pub const WS_ADDRESSING: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
    pub const WS_TRANSFER: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer";
    pub const WS_EVENTING: &str = "http://schemas.xmlsoap.org/ws/2004/08/eventing";
    pub const WS_ENUMERATION: &str = "http://schemas.xmlsoap.org/ws/2004/09/enumeration";
    pub const WSMAN: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
    pub const WSMAN_IDENTITY: &str =
        "http://schemas.dmtf.org/wbem/wsman/identity/1/wsmanidentity.xsd";
    pub const WSMAN_FAULT: &str = "http://schemas.microsoft.com/wbem/wsman/1/wsmanfault";
    pub const SHELL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";
}

/// Root of the Microsoft WS-Management resource URI space.
pub const WINDOWS_WSMAN_PREFIX: &str = "http://schemas.microsoft.com/wbem/wsman/1";

/// The prefix map used for every request envelope. WinRM responses use the
/// same abbreviations.
pub fn prefix_map() -> Vec<(&'static str, &'static str)> {
    vec![
        ("s", ns::SOAP),
        ("a", ns::WS_ADDRESSING),
        ("x", ns::WS_TRANSFER),
        ("e", ns::WS_EVENTING),
        ("n", ns::WS_ENUMERATION),
        ("w", ns::WSMAN),
    ]
}

/// A namespace-qualified element or attribute name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QName {
    pub namespace: &'static str,
    pub name: &'static str,
}

impl QName {
    pub const fn new(namespace: &'static str, name: &'static str) -> Self {
        Self { namespace, name }
    }

    pub fn element(self) -> winrm_xml::builder::Element {
        winrm_xml::builder::Element::in_namespace(self.namespace, self.name)
    }
}

/// Qualified names for every element and attribute in play.
pub mod q {
    use super::{QName, ns};

    // SOAP envelope
    pub const ENVELOPE: QName = QName::new(ns::SOAP, "Envelope");
    pub const HEADER: QName = QName::new(ns::SOAP, "Header");
    pub const BODY: QName = QName::new(ns::SOAP, "Body");
    pub const FAULT: QName = QName::new(ns::SOAP, "Fault");
    pub const CODE: QName = QName::new(ns::SOAP, "Code");
    pub const VALUE: QName = QName::new(ns::SOAP, "Value");
    pub const REASON: QName = QName::new(ns::SOAP, "Reason");
    pub const TEXT: QName = QName::new(ns::SOAP, "Text");
    pub const DETAIL: QName = QName::new(ns::SOAP, "Detail");
    pub const MUST_UNDERSTAND: QName = QName::new(ns::SOAP, "mustUnderstand");

    // WS-Addressing
    pub const TO: QName = QName::new(ns::WS_ADDRESSING, "To");
    pub const ACTION: QName = QName::new(ns::WS_ADDRESSING, "Action");
    pub const ADDRESS: QName = QName::new(ns::WS_ADDRESSING, "Address");
    pub const REPLY_TO: QName = QName::new(ns::WS_ADDRESSING, "ReplyTo");
    pub const MESSAGE_ID: QName = QName::new(ns::WS_ADDRESSING, "MessageID");

    // WS-Enumeration
    pub const ENUMERATE: QName = QName::new(ns::WS_ENUMERATION, "Enumerate");
    pub const ENUMERATE_RESPONSE: QName = QName::new(ns::WS_ENUMERATION, "EnumerateResponse");
    pub const PULL: QName = QName::new(ns::WS_ENUMERATION, "Pull");
    pub const PULL_RESPONSE: QName = QName::new(ns::WS_ENUMERATION, "PullResponse");
    pub const RELEASE: QName = QName::new(ns::WS_ENUMERATION, "Release");
    pub const ENUMERATION_CONTEXT: QName = QName::new(ns::WS_ENUMERATION, "EnumerationContext");
    pub const MAX_ELEMENTS: QName = QName::new(ns::WS_ENUMERATION, "MaxElements");
    pub const ITEMS: QName = QName::new(ns::WS_ENUMERATION, "Items");
    pub const END_OF_SEQUENCE: QName = QName::new(ns::WS_ENUMERATION, "EndOfSequence");

    // WS-Management
    pub const RESOURCE_URI: QName = QName::new(ns::WSMAN, "ResourceURI");
    pub const MAX_ENVELOPE_SIZE: QName = QName::new(ns::WSMAN, "MaxEnvelopeSize");
    pub const LOCALE: QName = QName::new(ns::WSMAN, "Locale");
    pub const DATA_LOCALE: QName = QName::new(ns::WSMAN, "DataLocale");
    pub const SELECTOR_SET: QName = QName::new(ns::WSMAN, "SelectorSet");
    pub const SELECTOR: QName = QName::new(ns::WSMAN, "Selector");
    pub const OPTION_SET: QName = QName::new(ns::WSMAN, "OptionSet");
    pub const OPTION: QName = QName::new(ns::WSMAN, "Option");
    pub const OPERATION_TIMEOUT: QName = QName::new(ns::WSMAN, "OperationTimeout");
    pub const OPTIMIZE_OPERATION: QName = QName::new(ns::WSMAN, "OptimizeOperation");

    // WS-Management identity
    pub const IDENTIFY: QName = QName::new(ns::WSMAN_IDENTITY, "Identify");
    pub const IDENTIFY_RESPONSE: QName = QName::new(ns::WSMAN_IDENTITY, "IdentifyResponse");
    pub const PROTOCOL_VERSION: QName = QName::new(ns::WSMAN_IDENTITY, "ProtocolVersion");
    pub const PRODUCT_VENDOR: QName = QName::new(ns::WSMAN_IDENTITY, "ProductVendor");
    pub const PRODUCT_VERSION: QName = QName::new(ns::WSMAN_IDENTITY, "ProductVersion");
    pub const SECURITY_PROFILES: QName = QName::new(ns::WSMAN_IDENTITY, "SecurityProfiles");
    pub const SECURITY_PROFILE_NAME: QName =
        QName::new(ns::WSMAN_IDENTITY, "SecurityProfileName");

    // Microsoft WSMan fault detail
    pub const WSMAN_FAULT: QName = QName::new(ns::WSMAN_FAULT, "WSManFault");

    // Windows remote shell
    pub const SHELL: QName = QName::new(ns::SHELL, "Shell");
    pub const SHELL_ID: QName = QName::new(ns::SHELL, "ShellId");
    pub const ENVIRONMENT: QName = QName::new(ns::SHELL, "Environment");
    pub const VARIABLE: QName = QName::new(ns::SHELL, "Variable");
    pub const WORKING_DIRECTORY: QName = QName::new(ns::SHELL, "WorkingDirectory");
    pub const LIFETIME: QName = QName::new(ns::SHELL, "Lifetime");
    pub const INPUT_STREAMS: QName = QName::new(ns::SHELL, "InputStreams");
    pub const OUTPUT_STREAMS: QName = QName::new(ns::SHELL, "OutputStreams");
    pub const COMMAND_LINE: QName = QName::new(ns::SHELL, "CommandLine");
    pub const COMMAND: QName = QName::new(ns::SHELL, "Command");
    pub const ARGUMENTS: QName = QName::new(ns::SHELL, "Arguments");
    pub const COMMAND_RESPONSE: QName = QName::new(ns::SHELL, "CommandResponse");
    pub const COMMAND_ID: QName = QName::new(ns::SHELL, "CommandId");
    pub const RECEIVE: QName = QName::new(ns::SHELL, "Receive");
    pub const DESIRED_STREAM: QName = QName::new(ns::SHELL, "DesiredStream");
    pub const RECEIVE_RESPONSE: QName = QName::new(ns::SHELL, "ReceiveResponse");
    pub const STREAM: QName = QName::new(ns::SHELL, "Stream");
    pub const COMMAND_STATE: QName = QName::new(ns::SHELL, "CommandState");
    pub const EXIT_CODE: QName = QName::new(ns::SHELL, "ExitCode");
    pub const SEND: QName = QName::new(ns::SHELL, "Send");
    pub const SIGNAL: QName = QName::new(ns::SHELL, "Signal");
    pub const SIGNAL_CODE: QName = QName::new(ns::SHELL, "Code");
}

/// Action URIs carried in the `a:Action` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Get,
    Put,
    Create,
    Delete,
    Enumerate,
    Pull,
    Release,
    Renew,
    GetStatus,
    Subscribe,
    Unsubscribe,
    Command,
    Send,
    Receive,
    Signal,
}

impl Action {
    pub fn uri(self) -> &'static str {
        match self {
            Action::Get => "http://schemas.xmlsoap.org/ws/2004/09/transfer/Get",
            Action::Put => "http://schemas.xmlsoap.org/ws/2004/09/transfer/Put",
            Action::Create => "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create",
            Action::Delete => "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete",
            Action::Enumerate => "http://schemas.xmlsoap.org/ws/2004/09/enumeration/Enumerate",
            Action::Pull => "http://schemas.xmlsoap.org/ws/2004/09/enumeration/Pull",
            Action::Release => "http://schemas.xmlsoap.org/ws/2004/09/enumeration/Release",
            Action::Renew => "http://schemas.xmlsoap.org/ws/2004/09/enumeration/Renew",
            Action::GetStatus => "http://schemas.xmlsoap.org/ws/2004/09/enumeration/GetStatus",
            Action::Subscribe => "http://schemas.xmlsoap.org/ws/2004/08/eventing/Subscribe",
            Action::Unsubscribe => "http://schemas.xmlsoap.org/ws/2004/08/eventing/Unsubscribe",
            Action::Command => {
                "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command"
            }
            Action::Send => "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Send",
            Action::Receive => {
                "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive"
            }
            Action::Signal => {
                "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal"
            }
        }
    }
}

/// Joins segments under the Microsoft WS-Management resource URI root.
pub fn uri<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::from(WINDOWS_WSMAN_PREFIX);
    for segment in segments {
        out.push('/');
        out.push_str(segment.as_ref());
    }
    out
}

/// Resource URI for a WMI class in `root\{namespace}`.
pub fn wmi(class: &str, namespace: &str) -> String {
    uri(["wmi", "root", namespace, class])
}

/// Resource URI for a CIM class in `root\cimv2`.
pub fn cim(class: &str) -> String {
    wmi(class, "cimv2")
}

/// Resource URI of the Windows cmd shell.
pub fn shell_resource() -> String {
    format!("{}/cmd", ns::SHELL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_uri_constructors() {
        assert_eq!(
            cim("Win32_Service"),
            "http://schemas.microsoft.com/wbem/wsman/1/wmi/root/cimv2/Win32_Service"
        );
        assert_eq!(
            wmi("StdRegProv", "default"),
            "http://schemas.microsoft.com/wbem/wsman/1/wmi/root/default/StdRegProv"
        );
        assert_eq!(
            shell_resource(),
            "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd"
        );
    }

    #[test]
    fn action_uris() {
        assert_eq!(
            Action::Get.uri(),
            "http://schemas.xmlsoap.org/ws/2004/09/transfer/Get"
        );
        assert_eq!(
            Action::Pull.uri(),
            "http://schemas.xmlsoap.org/ws/2004/09/enumeration/Pull"
        );
        assert_eq!(
            Action::Receive.uri(),
            "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive"
        );
    }

    #[test]
    fn prefix_map_uses_winrm_abbreviations() {
        let map = prefix_map();
        assert_eq!(map.iter().find(|(p, _)| *p == "w").unwrap().1, ns::WSMAN);
        assert_eq!(
            map.iter().find(|(p, _)| *p == "a").unwrap().1,
            ns::WS_ADDRESSING
        );
    }
}
