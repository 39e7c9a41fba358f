//! SPNEGO security context over the `sspi` providers.
//!
//! One context is a serial state machine: callers must hold the
//! transport's auth lock across a whole step/seal flow. A step that the
//! provider suspends on (Kerberos KDC round trips) is resolved inline with
//! the blocking KDC client, so `step` must run on a blocking worker.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sspi::generator::GeneratorState;
use sspi::{
    BufferType, ClientRequestFlags, CredentialUse, Credentials, DataRepresentation,
    EncryptionFlags, Kerberos, Negotiate, NegotiateConfig, Ntlm, SecurityBuffer,
    SecurityBufferFlags, SecurityBufferRef, SecurityStatus, Sspi, SspiImpl,
};
use tracing::{debug, instrument};

use crate::auth::encryption::MessageSealer;
use crate::auth::kdc;
use crate::credentials::{AuthMethod, KerberosSettings};
use crate::error::WinRmError;

struct MechContext<P: Sspi + SspiImpl> {
    provider: P,
    // Box gives the credentials handle a stable address for the ISC builder.
    cred: Box<P::CredentialsHandle>,
    target_name: String,
    require_encryption: bool,
}

impl<P> MechContext<P>
where
    P: Sspi + SspiImpl<AuthenticationData = sspi::AuthIdentity>,
{
    fn with_identity(
        mut provider: P,
        identity: sspi::AuthIdentity,
        target_name: String,
        require_encryption: bool,
    ) -> Result<Self, WinRmError> {
        let acquisition = provider
            .acquire_credentials_handle()
            .with_credential_use(CredentialUse::Outbound)
            .with_auth_data(&identity);
        let cred = acquisition.execute(&mut provider)?.credentials_handle;
        Ok(Self {
            provider,
            cred: Box::new(cred),
            target_name,
            require_encryption,
        })
    }
}

impl<P> MechContext<P>
where
    P: Sspi + SspiImpl<AuthenticationData = Credentials>,
{
    fn with_credentials(
        mut provider: P,
        identity: sspi::AuthIdentity,
        target_name: String,
        require_encryption: bool,
    ) -> Result<Self, WinRmError> {
        let credentials = Credentials::AuthIdentity(identity);
        let acquisition = provider
            .acquire_credentials_handle()
            .with_credential_use(CredentialUse::Outbound)
            .with_auth_data(&credentials);
        let cred = acquisition.execute(&mut provider)?.credentials_handle;
        Ok(Self {
            provider,
            cred: Box::new(cred),
            target_name,
            require_encryption,
        })
    }
}

impl<P: Sspi + SspiImpl> MechContext<P> {
    /// Runs one `InitializeSecurityContext` round, resolving any generator
    /// suspensions through the KDC client.
    fn step_round(
        &mut self,
        input: Option<&[u8]>,
    ) -> Result<(Option<Vec<u8>>, SecurityStatus), WinRmError> {
        let mut out = [SecurityBuffer::new(Vec::new(), BufferType::Token)];
        let mut inbuf =
            input.map(|token| [SecurityBuffer::new(token.to_vec(), BufferType::Token)]);

        let flags = if self.require_encryption {
            ClientRequestFlags::CONFIDENTIALITY | ClientRequestFlags::INTEGRITY
        } else {
            ClientRequestFlags::empty()
        };

        let mut builder = self
            .provider
            .initialize_security_context()
            .with_credentials_handle(&mut *self.cred)
            .with_context_requirements(
                ClientRequestFlags::ALLOCATE_MEMORY | ClientRequestFlags::MUTUAL_AUTH | flags,
            )
            .with_target_data_representation(DataRepresentation::Native)
            .with_target_name(&self.target_name)
            .with_output(&mut out);

        if let Some(input_buffer) = inbuf.as_mut() {
            builder = builder.with_input(input_buffer);
        }

        let mut generator = self.provider.initialize_security_context_impl(&mut builder)?;

        let mut state = generator.start();
        let completed = loop {
            match state {
                GeneratorState::Suspended(network_request) => {
                    debug!("security context suspended on a network round");
                    let response = kdc::exchange(&network_request)?;
                    state = generator.resume(Ok(response));
                }
                GeneratorState::Completed(result) => break result?,
            }
        };

        drop(generator);
        drop(builder);

        let token = std::mem::take(&mut out[0].buffer);
        let token = if token.is_empty() { None } else { Some(token) };
        Ok((token, completed.status))
    }

    fn wrap(
        &mut self,
        data: &[u8],
        _sequence_number: u32,
    ) -> Result<(Vec<u8>, Vec<u8>), WinRmError> {
        let sizes = self.provider.query_context_sizes()?;
        let mut token_buffer = vec![0u8; sizes.security_trailer as usize];
        let mut sealed = data.to_vec();

        let sec_token_buffer = SecurityBufferRef::token_buf(&mut token_buffer);
        let sec_data_buffer =
            SecurityBufferRef::data_buf(&mut sealed).with_flags(SecurityBufferFlags::NONE);
        let mut buffers = [sec_token_buffer, sec_data_buffer];

        let status = self
            .provider
            .encrypt_message(EncryptionFlags::empty(), &mut buffers)?;
        if status != SecurityStatus::Ok {
            return Err(WinRmError::Auth(format!(
                "EncryptMessage returned {status:?}"
            )));
        }

        let trailer_len = buffers[0].buf_len();
        token_buffer.truncate(trailer_len);
        Ok((token_buffer, sealed))
    }

    fn unwrap(
        &mut self,
        header: &[u8],
        ciphertext: &[u8],
        _sequence_number: u32,
    ) -> Result<Vec<u8>, WinRmError> {
        let mut token_buffer = header.to_vec();
        let mut data = ciphertext.to_vec();

        let sec_token_buffer = SecurityBufferRef::token_buf(&mut token_buffer);
        let sec_data_buffer = SecurityBufferRef::data_buf(&mut data);
        let mut buffers = [sec_token_buffer, sec_data_buffer];

        self.provider.decrypt_message(&mut buffers)?;
        Ok(buffers[1].data().to_vec())
    }
}

enum Mech {
    Ntlm(MechContext<Ntlm>),
    Kerberos(MechContext<Kerberos>),
    Negotiate(MechContext<Negotiate>),
}

/// One per-connection SPNEGO state machine. Mutated by exactly one
/// in-flight request at a time; the transport's auth lock enforces this.
pub(crate) struct SecurityContext {
    mech: Mech,
    complete: bool,
    input_tokens: Vec<Vec<u8>>,
    send_sequence: u32,
    recv_sequence: u32,
}

impl SecurityContext {
    /// Builds the mechanism context for the selected protocol. The target
    /// service name is `HTTP/{host}`.
    pub fn new(
        method: &AuthMethod,
        host: &str,
        require_encryption: bool,
    ) -> Result<Self, WinRmError> {
        let target_name = format!("HTTP/{host}");

        let mech = match method {
            AuthMethod::Basic(_) => {
                return Err(WinRmError::Auth(
                    "basic authentication does not use a security context".to_string(),
                ));
            }
            AuthMethod::Ntlm(credentials) => Mech::Ntlm(MechContext::with_identity(
                Ntlm::new(),
                credentials.identity()?,
                target_name,
                require_encryption,
            )?),
            AuthMethod::Kerberos {
                credentials,
                settings,
            } => Mech::Kerberos(MechContext::with_credentials(
                Kerberos::new_client_from_config(kerberos_config(settings))?,
                credentials.identity()?,
                target_name,
                require_encryption,
            )?),
            AuthMethod::Negotiate {
                credentials,
                kerberos,
            } => Mech::Negotiate(MechContext::with_credentials(
                Negotiate::new_client(negotiate_config(kerberos.as_ref()))?,
                credentials.identity()?,
                target_name,
                require_encryption,
            )?),
        };

        Ok(Self {
            mech,
            complete: false,
            input_tokens: Vec::new(),
            send_sequence: 0,
            recv_sequence: 0,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Number of server tokens consumed so far.
    pub fn input_rounds(&self) -> usize {
        self.input_tokens.len()
    }

    /// Advances the handshake with an optional server token and returns the
    /// next output token, if the mechanism produced one.
    ///
    /// Blocking: may perform KDC network I/O.
    #[instrument(skip_all, fields(has_input = input.is_some()))]
    pub fn step(&mut self, input: Option<&[u8]>) -> Result<Option<Vec<u8>>, WinRmError> {
        if let Some(token) = input {
            self.input_tokens.push(token.to_vec());
        }

        let (token, status) = match &mut self.mech {
            Mech::Ntlm(context) => context.step_round(input)?,
            Mech::Kerberos(context) => context.step_round(input)?,
            Mech::Negotiate(context) => context.step_round(input)?,
        };

        match status {
            SecurityStatus::Ok => {
                debug!("security context established");
                self.complete = true;
            }
            SecurityStatus::ContinueNeeded => {
                if token.is_none() {
                    return Err(WinRmError::Auth(
                        "ContinueNeeded but no token produced".to_string(),
                    ));
                }
            }
            other => {
                return Err(WinRmError::Auth(format!(
                    "InitializeSecurityContext returned {other:?}"
                )));
            }
        }

        Ok(token)
    }
}

impl MessageSealer for SecurityContext {
    fn seal(&mut self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), WinRmError> {
        let sequence_number = self.send_sequence;
        self.send_sequence = self.send_sequence.wrapping_add(1);
        match &mut self.mech {
            Mech::Ntlm(context) => context.wrap(plaintext, sequence_number),
            Mech::Kerberos(context) => context.wrap(plaintext, sequence_number),
            Mech::Negotiate(context) => context.wrap(plaintext, sequence_number),
        }
    }

    fn unseal(&mut self, header: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, WinRmError> {
        let sequence_number = self.recv_sequence;
        self.recv_sequence = self.recv_sequence.wrapping_add(1);
        match &mut self.mech {
            Mech::Ntlm(context) => context.unwrap(header, ciphertext, sequence_number),
            Mech::Kerberos(context) => context.unwrap(header, ciphertext, sequence_number),
            Mech::Negotiate(context) => context.unwrap(header, ciphertext, sequence_number),
        }
    }
}

fn kerberos_config(settings: &KerberosSettings) -> sspi::KerberosConfig {
    sspi::KerberosConfig {
        kdc_url: settings.kdc_url.clone(),
        client_computer_name: client_computer_name(settings),
    }
}

fn negotiate_config(kerberos: Option<&KerberosSettings>) -> NegotiateConfig {
    let computer_name = kerberos
        .map(client_computer_name)
        .unwrap_or_else(local_computer_name);

    // Kerberos stays available even without explicit settings: with no
    // kdc_url the KDC is discovered through DNS SRV records, and the
    // mechanism falls back to NTLM when that fails.
    let protocol_config: Box<dyn sspi::negotiate::ProtocolConfig + Send> = match kerberos {
        Some(settings) => Box::new(kerberos_config(settings)),
        None => Box::new(sspi::KerberosConfig {
            kdc_url: None,
            client_computer_name: computer_name.clone(),
        }),
    };

    NegotiateConfig::new(protocol_config, None, computer_name)
}

fn client_computer_name(settings: &KerberosSettings) -> String {
    settings
        .client_computer_name
        .clone()
        .unwrap_or_else(local_computer_name)
}

fn local_computer_name() -> String {
    whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string())
}

/// Formats an output token as the `Authorization` header value.
pub(crate) fn authorization_header(token: &[u8]) -> String {
    format!("Negotiate {}", BASE64.encode(token))
}

/// Parses `WWW-Authenticate` header values case-insensitively, returning
/// the first token whose scheme is acceptable for the selected protocol.
pub(crate) fn negotiate_token_from_headers<'a>(
    values: impl Iterator<Item = &'a str>,
    accepted_schemes: &[&str],
) -> Option<Vec<u8>> {
    for value in values {
        let mut parts = value.splitn(2, ' ');
        let scheme = parts.next().unwrap_or_default().to_ascii_lowercase();
        if !accepted_schemes.contains(&scheme.as_str()) {
            continue;
        }
        if let Some(payload) = parts.next()
            && let Ok(token) = BASE64.decode(payload.trim())
            && !token.is_empty()
        {
            return Some(token);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_header_is_base64_negotiate() {
        assert_eq!(authorization_header(b"abc"), "Negotiate YWJj");
    }

    #[test]
    fn picks_first_acceptable_scheme() {
        let headers = ["Basic realm=\"x\"", "Negotiate YWJj", "NTLM ZGVm"];
        let token = negotiate_token_from_headers(
            headers.iter().copied(),
            &["negotiate", "kerberos", "ntlm"],
        );
        assert_eq!(token, Some(b"abc".to_vec()));
    }

    #[test]
    fn scheme_filter_respects_protocol_selection() {
        let headers = ["NTLM ZGVm"];
        assert_eq!(
            negotiate_token_from_headers(headers.iter().copied(), &["negotiate", "kerberos"]),
            None
        );
        assert_eq!(
            negotiate_token_from_headers(headers.iter().copied(), &["negotiate", "ntlm"]),
            Some(b"def".to_vec())
        );
    }

    #[test]
    fn header_without_payload_is_skipped() {
        let headers = ["Negotiate"];
        assert_eq!(
            negotiate_token_from_headers(headers.iter().copied(), &["negotiate"]),
            None
        );
    }
}
