//! The WS-Management client: request building, fault raising, Identify,
//! Get, Enumerate and WMI method invocation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use winrm_protocol::cim::{
    self, CimProperties, ParamValue, enumerate_body, method_action, method_input,
    parse_enumeration_page, pull_body, release_body,
};
use winrm_protocol::schema::{self, Action};
use winrm_protocol::soap::{self, SoapEnvelope};
use winrm_protocol::wsman::{
    IdentifyInfo, OptionSet, SelectorSet, WsManEnvelope, WsManHeader, identify_body,
    new_message_id, parse_identify,
};
use winrm_xml::builder::Element;
use winrm_xml::parser::{Node, parse};

use crate::credentials::AuthMethod;
use crate::endpoint::Endpoint;
use crate::error::WinRmError;
use crate::registry::Registry;
use crate::services::Services;
use crate::shell::{Shell, ShellConfig};
use crate::transport::Transport;

pub const DEFAULT_MAX_ENVELOPE_SIZE: u32 = 512 * 1024;
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_ELEMENTS: u32 = 100;

/// Client configuration. Encryption defaults to on for plain HTTP and off
/// for HTTPS, matching what WinRM servers expect.
#[derive(typed_builder::TypedBuilder)]
pub struct ClientOptions {
    #[builder(setter(into))]
    pub endpoint: String,
    pub auth: AuthMethod,
    #[builder(default = true)]
    pub verify_tls: bool,
    #[builder(default = String::from("en-US"), setter(into))]
    pub locale: String,
    #[builder(default = DEFAULT_OPERATION_TIMEOUT)]
    pub operation_timeout: Duration,
    #[builder(default = DEFAULT_MAX_ENVELOPE_SIZE)]
    pub max_envelope_size: u32,
    #[builder(default, setter(strip_option))]
    pub require_encryption: Option<bool>,
}

struct ClientInner {
    transport: Transport,
    endpoint: Endpoint,
    locale: String,
    operation_timeout: Duration,
    max_envelope_size: u32,
}

/// Asynchronous WinRM client. Cheap to clone; clones share the HTTP
/// connection pool and the authentication context.
#[derive(Clone)]
pub struct WinRmClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for WinRmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WinRmClient")
            .field("endpoint", &self.inner.endpoint)
            .finish_non_exhaustive()
    }
}

/// One WS-Management request, before the envelope is rendered.
pub(crate) struct WsRequest {
    pub action: String,
    pub resource_uri: String,
    pub selectors: Option<SelectorSet>,
    pub options: Option<OptionSet>,
    pub timeout: Option<Duration>,
    pub body: Option<Element>,
}

impl WsRequest {
    pub fn new(action: impl Into<String>, resource_uri: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource_uri: resource_uri.into(),
            selectors: None,
            options: None,
            timeout: None,
            body: None,
        }
    }

    pub fn selectors(mut self, selectors: SelectorSet) -> Self {
        self.selectors = Some(selectors);
        self
    }

    pub fn options(mut self, options: OptionSet) -> Self {
        self.options = Some(options);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn body(mut self, body: Element) -> Self {
        self.body = Some(body);
        self
    }
}

impl WinRmClient {
    pub fn new(options: ClientOptions) -> Result<Self, WinRmError> {
        let endpoint = Endpoint::parse(&options.endpoint)?;
        // Message encryption is what makes plain-HTTP WinRM usable; TLS
        // already covers HTTPS.
        let require_encryption = options
            .require_encryption
            .unwrap_or(!endpoint.is_https());

        if matches!(options.auth, AuthMethod::Basic(_)) && require_encryption {
            return Err(WinRmError::Config(
                "basic authentication cannot encrypt messages; use https or SPNEGO".to_string(),
            ));
        }

        let transport = Transport::new(
            &endpoint,
            &options.auth,
            options.verify_tls,
            require_encryption,
        )?;

        info!(endpoint = %endpoint, encrypted = require_encryption, "WinRM client ready");

        Ok(Self {
            inner: Arc::new(ClientInner {
                transport,
                endpoint,
                locale: options.locale,
                operation_timeout: options.operation_timeout,
                max_envelope_size: options.max_envelope_size,
            }),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Builds the envelope for one request with the client defaults applied.
    fn build_envelope(&self, request: &WsRequest) -> WsManEnvelope {
        let mut header = WsManHeader::builder()
            .to(self.inner.endpoint.as_str())
            .reply_to(format!("{}/role/anonymous", schema::ns::WS_ADDRESSING))
            .action(request.action.clone())
            .message_id(new_message_id())
            .resource_uri(request.resource_uri.clone())
            .locale(self.inner.locale.clone())
            .data_locale(self.inner.locale.clone())
            .operation_timeout(request.timeout.unwrap_or(self.inner.operation_timeout))
            .max_envelope_size(self.inner.max_envelope_size)
            .build();
        header.selectors = request.selectors.clone();
        header.options = request.options.clone();

        let envelope = WsManEnvelope::new(header);
        match &request.body {
            Some(body) => envelope.with_body(body.clone()),
            None => envelope,
        }
    }

    /// Sends a request and returns the raw response XML after fault
    /// inspection.
    #[instrument(skip_all, fields(action = %request.action, resource = %request.resource_uri))]
    pub(crate) async fn run_request(&self, request: WsRequest) -> Result<String, WinRmError> {
        let envelope = self.build_envelope(&request).to_xml();
        let reply = self.inner.transport.send_soap(envelope).await?;
        Self::check_reply(reply.status, reply.body)
    }

    /// Raises the typed error for a fault response, or the HTTP status when
    /// the server failed without SOAP content.
    fn check_reply(status: u16, body: String) -> Result<String, WinRmError> {
        let success = (200..300).contains(&status);

        if body.trim().is_empty() {
            return if success {
                Ok(body)
            } else {
                Err(WinRmError::transport(format!("HTTP status {status}")))
            };
        }

        let document = match parse(&body) {
            Ok(document) => document,
            Err(err) if success => return Err(err.into()),
            Err(_) => return Err(WinRmError::transport(format!("HTTP status {status}"))),
        };

        match soap::extract_fault(&document) {
            Ok(Some(fault)) => {
                debug!(?fault, "server returned a fault");
                return Err(match fault.wsman_code {
                    Some(wsman_code) => WinRmError::WsManFault {
                        code: fault.code,
                        reason: fault.reason,
                        wsman_code,
                    },
                    None => WinRmError::SoapFault {
                        code: fault.code,
                        reason: fault.reason,
                    },
                });
            }
            Ok(None) => {}
            // Not a SOAP document at all, e.g. a proxy error page.
            Err(err) if success => {
                return Err(WinRmError::transport(format!("malformed response: {err}")));
            }
            Err(_) => return Err(WinRmError::transport(format!("HTTP status {status}"))),
        }

        if !success {
            return Err(WinRmError::transport(format!("HTTP status {status}")));
        }

        drop(document);
        Ok(body)
    }

    /// Parses the response body and hands the `s:Body` node to `read`.
    pub(crate) fn with_body<T>(
        xml: &str,
        read: impl FnOnce(Node<'_, '_>) -> Result<T, WinRmError>,
    ) -> Result<T, WinRmError> {
        let document = parse(xml)?;
        let body = soap::body_node(&document)?;
        read(body)
    }

    /// Tests the connection and returns protocol information.
    pub async fn identify(&self) -> Result<IdentifyInfo, WinRmError> {
        let mut envelope = SoapEnvelope::new([("s", schema::ns::SOAP)]);
        envelope.push_body(identify_body());

        let reply = self.inner.transport.send_soap(envelope.to_xml()).await?;
        let body = Self::check_reply(reply.status, reply.body)?;
        Self::with_body(&body, |node| Ok(parse_identify(node)?))
    }

    /// WS-Transfer Get of a single instance, dictified.
    pub async fn get(
        &self,
        resource_uri: impl Into<String>,
        selectors: Option<SelectorSet>,
    ) -> Result<CimProperties, WinRmError> {
        let mut request = WsRequest::new(Action::Get.uri(), resource_uri);
        if let Some(selectors) = selectors {
            request = request.selectors(selectors);
        }
        let response = self.run_request(request).await?;
        Self::with_body(&response, |body| {
            let data = body
                .children()
                .find(|node| node.is_element())
                .ok_or_else(|| WinRmError::protocol("Get response body is empty"))?;
            Ok(cim::dictify(data))
        })
    }

    /// Operating-system information from `Win32_OperatingSystem`.
    pub async fn get_operating_system(&self) -> Result<CimProperties, WinRmError> {
        self.get(schema::cim("Win32_OperatingSystem"), None).await
    }

    /// WMI method invocation: action `{ResourceURI}/{Method}` with a
    /// `<Method>_INPUT` body; returns the dictified out-parameters.
    pub async fn invoke(
        &self,
        resource_uri: &str,
        method: &str,
        params: &[(&str, ParamValue)],
        selectors: Option<SelectorSet>,
    ) -> Result<CimProperties, WinRmError> {
        debug!(resource_uri, method, "invoking WMI method");
        let mut request = WsRequest::new(method_action(resource_uri, method), resource_uri)
            .body(method_input(resource_uri, method, params));
        if let Some(selectors) = selectors {
            request = request.selectors(selectors);
        }
        let response = self.run_request(request).await?;
        Self::with_body(&response, |node| Ok(cim::parse_method_output(node)?))
    }

    /// Lazily enumerates instances of a resource. Items are pulled in
    /// batches of `DEFAULT_MAX_ELEMENTS`.
    pub fn enumerate(
        &self,
        resource_uri: impl Into<String>,
        selectors: Option<SelectorSet>,
    ) -> Enumerator {
        Enumerator {
            client: self.clone(),
            resource_uri: resource_uri.into(),
            selectors,
            max_elements: DEFAULT_MAX_ELEMENTS,
            context: None,
            buffer: VecDeque::new(),
            started: false,
            finished: false,
        }
    }

    /// Registry accessor rooted at this client.
    pub fn registry(&self) -> Registry {
        Registry::new(self.clone())
    }

    /// `Win32_Service` accessor.
    pub fn services(&self) -> Services {
        Services::new(self.clone())
    }

    /// Creates a remote cmd shell.
    pub async fn shell(&self, config: ShellConfig) -> Result<Shell, WinRmError> {
        Shell::create(self.clone(), config).await
    }
}

/// Pull-based cursor over an enumeration. Dropping it before exhaustion
/// releases the server-side context best-effort.
pub struct Enumerator {
    client: WinRmClient,
    resource_uri: String,
    selectors: Option<SelectorSet>,
    max_elements: u32,
    context: Option<String>,
    buffer: VecDeque<CimProperties>,
    started: bool,
    finished: bool,
}

impl Enumerator {
    /// Batch size per pull. Each page is buffered in memory, so keep this
    /// moderate.
    pub fn max_elements(mut self, max_elements: u32) -> Self {
        self.max_elements = max_elements;
        self
    }

    /// The next instance, fetching pages as needed. `None` once the server
    /// declared `EndOfSequence`.
    pub async fn next(&mut self) -> Result<Option<CimProperties>, WinRmError> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            if self.finished {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    /// Collects every remaining instance.
    pub async fn collect_all(mut self) -> Result<Vec<CimProperties>, WinRmError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    async fn fetch_page(&mut self) -> Result<(), WinRmError> {
        let (request, response_name) = if self.started {
            let context = self.context.as_deref().ok_or_else(|| {
                WinRmError::protocol("EnumerationContext missing from response")
            })?;
            (
                WsRequest::new(Action::Pull.uri(), self.resource_uri.clone())
                    .body(pull_body(context, self.max_elements)),
                "PullResponse",
            )
        } else {
            (
                WsRequest::new(Action::Enumerate.uri(), self.resource_uri.clone())
                    .body(enumerate_body(self.max_elements)),
                "EnumerateResponse",
            )
        };

        let request = match &self.selectors {
            Some(selectors) => request.selectors(selectors.clone()),
            None => request,
        };

        let response = self.client.run_request(request).await?;
        let page = WinRmClient::with_body(&response, |body| {
            Ok(parse_enumeration_page(body, response_name)?)
        })?;

        self.started = true;
        if let Some(context) = page.context {
            self.context = Some(context);
        }
        if page.end_of_sequence {
            self.finished = true;
            self.context = None;
        } else if self.context.is_none() {
            return Err(WinRmError::protocol(
                "EnumerationContext missing from response",
            ));
        }

        self.buffer.extend(page.items);
        Ok(())
    }

    /// Explicitly abandons the enumeration, releasing the server context.
    pub async fn release(&mut self) -> Result<(), WinRmError> {
        let Some(context) = self.context.take() else {
            return Ok(());
        };
        self.finished = true;
        self.client
            .run_request(
                WsRequest::new(Action::Release.uri(), self.resource_uri.clone())
                    .body(release_body(&context)),
            )
            .await?;
        Ok(())
    }
}

impl Drop for Enumerator {
    fn drop(&mut self) {
        // Abandoned mid-sequence: release the server-side context without
        // blocking the caller. Errors are logged and swallowed.
        if let Some(context) = self.context.take() {
            if self.finished {
                return;
            }
            let client = self.client.clone();
            let resource_uri = self.resource_uri.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let request = WsRequest::new(Action::Release.uri(), resource_uri)
                        .body(release_body(&context));
                    if let Err(err) = client.run_request(request).await {
                        warn!(%err, "failed to release abandoned enumeration");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_reply_raises_wsman_fault_over_soap_fault() {
        let body = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
                xmlns:f="http://schemas.microsoft.com/wbem/wsman/1/wsmanfault">
            <s:Header/>
            <s:Body><s:Fault>
              <s:Code><s:Value>s:Receiver</s:Value></s:Code>
              <s:Reason><s:Text>The operation timed out.</s:Text></s:Reason>
              <s:Detail><f:WSManFault Code="2150858793"/></s:Detail>
            </s:Fault></s:Body>
        </s:Envelope>"#;

        let err = WinRmClient::check_reply(500, body.to_string()).unwrap_err();
        assert!(err.is_operation_timeout());
    }

    #[test]
    fn check_reply_without_wsman_detail_is_soap_fault() {
        let body = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
            <s:Header/>
            <s:Body><s:Fault>
              <s:Code><s:Value>s:Sender</s:Value></s:Code>
              <s:Reason><s:Text>bad request</s:Text></s:Reason>
            </s:Fault></s:Body>
        </s:Envelope>"#;

        let err = WinRmClient::check_reply(500, body.to_string()).unwrap_err();
        assert!(matches!(err, WinRmError::SoapFault { .. }));
    }

    #[test]
    fn check_reply_maps_bare_http_errors_to_transport() {
        let err = WinRmClient::check_reply(401, String::new()).unwrap_err();
        assert!(matches!(err, WinRmError::Transport(_)));

        let err = WinRmClient::check_reply(502, "<html>gateway</html>".to_string()).unwrap_err();
        assert!(matches!(err, WinRmError::Transport(_)));
    }

    #[test]
    fn check_reply_passes_clean_responses_through() {
        let body = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
            <s:Header/><s:Body><x/></s:Body></s:Envelope>"#;
        let out = WinRmClient::check_reply(200, body.to_string()).unwrap();
        assert_eq!(out, body);
    }
}
