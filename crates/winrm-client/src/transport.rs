//! HTTP transport: POSTs SOAP envelopes, driving the SPNEGO handshake and
//! WinRM message encryption underneath.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, WWW_AUTHENTICATE};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use url::Url;

use crate::auth::encryption::{
    self, ENCRYPTED_CONTENT_TYPE, SOAP_CONTENT_TYPE, is_encrypted_content_type,
};
use crate::auth::{SecurityContext, authorization_header, negotiate_token_from_headers};
use crate::credentials::AuthMethod;
use crate::endpoint::Endpoint;
use crate::error::WinRmError;

const HANDSHAKE_ROUND_LIMIT: usize = 10;

/// A decrypted HTTP reply: status plus the SOAP body text.
#[derive(Debug, Clone)]
pub(crate) struct HttpReply {
    pub status: u16,
    pub body: String,
}

struct RawResponse {
    status: StatusCode,
    content_type: String,
    www_authenticate: Vec<String>,
    body: Vec<u8>,
}

struct SpnegoSession {
    // Option: the context travels to a blocking worker for each step.
    context: Option<SecurityContext>,
    accepted_schemes: &'static [&'static str],
    encrypt: bool,
    established: bool,
}

impl SpnegoSession {
    async fn step(&mut self, input: Option<Vec<u8>>) -> Result<Option<Vec<u8>>, WinRmError> {
        let mut context = self
            .context
            .take()
            .ok_or_else(|| WinRmError::Auth("security context unavailable".to_string()))?;

        // KDC exchanges inside a step are blocking network I/O.
        let (context, result) = tokio::task::spawn_blocking(move || {
            let result = context.step(input.as_deref());
            (context, result)
        })
        .await
        .map_err(|err| WinRmError::Auth(format!("authentication task failed: {err}")))?;

        self.context = Some(context);
        result
    }

    fn context_mut(&mut self) -> Result<&mut SecurityContext, WinRmError> {
        self.context
            .as_mut()
            .ok_or_else(|| WinRmError::Auth("security context unavailable".to_string()))
    }

    fn is_complete(&self) -> bool {
        self.context
            .as_ref()
            .is_some_and(SecurityContext::is_complete)
    }
}

enum AuthFlavor {
    Basic { header: String },
    Spnego(Mutex<SpnegoSession>),
}

/// Shared per-client HTTP channel. Connections are pooled by `reqwest`;
/// the SPNEGO session is serialized behind its own lock.
pub(crate) struct Transport {
    http: reqwest::Client,
    url: Url,
    auth: AuthFlavor,
}

impl Transport {
    pub fn new(
        endpoint: &Endpoint,
        method: &AuthMethod,
        verify_tls: bool,
        require_encryption: bool,
    ) -> Result<Self, WinRmError> {
        let mut builder = reqwest::Client::builder()
            .use_native_tls()
            .pool_max_idle_per_host(10)
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(60));

        if !verify_tls {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }

        let http = builder
            .build()
            .map_err(|err| WinRmError::Config(format!("failed to build HTTP client: {err}")))?;

        let auth = match method {
            AuthMethod::Basic(credentials) => {
                let encoded = BASE64
                    .encode(format!("{}:{}", credentials.username, credentials.password));
                AuthFlavor::Basic {
                    header: format!("Basic {encoded}"),
                }
            }
            _ => AuthFlavor::Spnego(Mutex::new(SpnegoSession {
                context: Some(SecurityContext::new(
                    method,
                    endpoint.host(),
                    require_encryption,
                )?),
                accepted_schemes: method.accepted_schemes(),
                encrypt: require_encryption,
                established: false,
            })),
        };

        Ok(Self {
            http,
            url: endpoint.url().clone(),
            auth,
        })
    }

    /// Sends one SOAP envelope and returns the (decrypted) response body.
    #[instrument(skip_all, fields(body_len = body.len()))]
    pub async fn send_soap(&self, body: String) -> Result<HttpReply, WinRmError> {
        match &self.auth {
            AuthFlavor::Basic { header } => {
                let response = self
                    .post(
                        body.into_bytes(),
                        SOAP_CONTENT_TYPE,
                        Some(header.clone()),
                        false,
                    )
                    .await?;
                Self::into_reply(response)
            }
            AuthFlavor::Spnego(session) => {
                let mut session = session.lock().await;
                if session.encrypt {
                    self.send_encrypted(&mut session, body).await
                } else {
                    self.send_negotiated(&mut session, body).await
                }
            }
        }
    }

    /// Plain SPNEGO: the Authorization handshake rides on the real request.
    async fn send_negotiated(
        &self,
        session: &mut SpnegoSession,
        body: String,
    ) -> Result<HttpReply, WinRmError> {
        let payload = body.into_bytes();

        if session.established {
            let response = self
                .post(payload, SOAP_CONTENT_TYPE, None, false)
                .await?;
            return Self::into_reply(response);
        }

        let token = session.step(None).await?;
        let mut authorization = token.map(|token| authorization_header(&token));
        let mut response = self
            .post(payload.clone(), SOAP_CONTENT_TYPE, authorization, false)
            .await?;

        for _ in 0..HANDSHAKE_ROUND_LIMIT {
            if session.is_complete() {
                break;
            }
            let Some(input) = negotiate_token_from_headers(
                response.www_authenticate.iter().map(String::as_str),
                session.accepted_schemes,
            ) else {
                break;
            };
            let Some(token) = session.step(Some(input)).await? else {
                break;
            };
            authorization = Some(authorization_header(&token));
            response = self
                .post(payload.clone(), SOAP_CONTENT_TYPE, authorization, false)
                .await?;
        }

        session.established = session.is_complete();
        Self::into_reply(response)
    }

    /// Encrypted SPNEGO: empty preflight posts carry the handshake, then
    /// every SOAP body travels inside the multipart/encrypted envelope.
    async fn send_encrypted(
        &self,
        session: &mut SpnegoSession,
        body: String,
    ) -> Result<HttpReply, WinRmError> {
        if !session.established {
            self.preflight_handshake(session).await?;
        }

        let sealed = encryption::encrypt_payload(session.context_mut()?, body.as_bytes())?;
        let response = self
            .post(sealed, ENCRYPTED_CONTENT_TYPE, None, false)
            .await?;

        let body = if is_encrypted_content_type(&response.content_type) {
            encryption::decrypt_payload(session.context_mut()?, &response.body)?
        } else {
            response.body
        };

        let body = String::from_utf8(body)
            .map_err(|err| WinRmError::transport(format!("response is not UTF-8: {err}")))?;
        Ok(HttpReply {
            status: response.status.as_u16(),
            body,
        })
    }

    async fn preflight_handshake(&self, session: &mut SpnegoSession) -> Result<(), WinRmError> {
        info!("starting SPNEGO handshake");
        let mut input: Option<Vec<u8>> = None;

        for _ in 0..HANDSHAKE_ROUND_LIMIT {
            if session.is_complete() {
                break;
            }
            let Some(token) = session.step(input.take()).await? else {
                break;
            };

            // Response bodies of preflight rounds are read and discarded.
            let response = self
                .post(
                    Vec::new(),
                    SOAP_CONTENT_TYPE,
                    Some(authorization_header(&token)),
                    true,
                )
                .await?;

            input = negotiate_token_from_headers(
                response.www_authenticate.iter().map(String::as_str),
                session.accepted_schemes,
            );
            if input.is_none() {
                break;
            }
        }

        if !session.is_complete() {
            return Err(WinRmError::Auth(
                "SPNEGO handshake did not complete".to_string(),
            ));
        }

        let rounds = session
            .context
            .as_ref()
            .map_or(0, SecurityContext::input_rounds);
        info!(server_tokens = rounds, "SPNEGO handshake complete");
        session.established = true;
        Ok(())
    }

    async fn post(
        &self,
        body: Vec<u8>,
        content_type: &str,
        authorization: Option<String>,
        explicit_zero_length: bool,
    ) -> Result<RawResponse, WinRmError> {
        debug!(
            url = %self.url,
            content_type,
            body_len = body.len(),
            authenticated = authorization.is_some(),
            "POST"
        );

        let mut request = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, content_type);
        if explicit_zero_length {
            request = request.header(CONTENT_LENGTH, "0");
        }
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }

        let response = request.body(body).send().await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let www_authenticate = response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect();
        let body = response.bytes().await?.to_vec();

        debug!(status = status.as_u16(), body_len = body.len(), "response");

        Ok(RawResponse {
            status,
            content_type,
            www_authenticate,
            body,
        })
    }

    fn into_reply(response: RawResponse) -> Result<HttpReply, WinRmError> {
        let body = String::from_utf8(response.body)
            .map_err(|err| WinRmError::transport(format!("response is not UTF-8: {err}")))?;
        Ok(HttpReply {
            status: response.status.as_u16(),
            body,
        })
    }
}
