//! Authentication configuration: who to authenticate as and which SPNEGO
//! mechanism to drive.

use url::Url;

use crate::error::WinRmError;

/// Username/password pair. The username may be a UPN (`user@REALM`) or a
/// down-level logon name (`DOMAIN\user`).
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub(crate) fn identity(&self) -> Result<sspi::AuthIdentity, WinRmError> {
        let username = sspi::Username::parse(&self.username)
            .map_err(|err| WinRmError::Auth(format!("invalid username: {err}")))?;
        Ok(sspi::AuthIdentity {
            username,
            password: self.password.clone().into(),
        })
    }
}

// Never print the password.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Kerberos specifics: where the KDC lives when DNS cannot resolve the
/// realm. The address is handed to the mechanism in memory; no process-wide
/// configuration file is written.
#[derive(Debug, Clone, Default)]
pub struct KerberosSettings {
    /// KDC URL, e.g. `tcp://dc01.example.test:88`. When absent the KDC is
    /// discovered through DNS SRV records for the realm.
    pub kdc_url: Option<Url>,
    /// Client computer name presented to the KDC; defaults to the local
    /// hostname.
    pub client_computer_name: Option<String>,
}

/// Which mechanism the SPNEGO handshake drives.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// `Authorization: Basic`; only sensible over TLS.
    Basic(Credentials),
    /// SPNEGO letting the server pick between Kerberos and NTLM.
    Negotiate {
        credentials: Credentials,
        kerberos: Option<KerberosSettings>,
    },
    /// SPNEGO pinned to Kerberos.
    Kerberos {
        credentials: Credentials,
        settings: KerberosSettings,
    },
    /// SPNEGO pinned to NTLM.
    Ntlm(Credentials),
}

impl AuthMethod {
    /// Response `WWW-Authenticate` schemes acceptable for this protocol
    /// selection.
    pub(crate) fn accepted_schemes(&self) -> &'static [&'static str] {
        match self {
            AuthMethod::Basic(_) => &[],
            AuthMethod::Negotiate { .. } => &["negotiate", "kerberos", "ntlm"],
            AuthMethod::Kerberos { .. } => &["negotiate", "kerberos"],
            AuthMethod::Ntlm(_) => &["negotiate", "ntlm"],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_password() {
        let creds = Credentials::new("user", "hunter2");
        let text = format!("{creds:?}");
        assert!(!text.contains("hunter2"));
        assert!(text.contains("user"));
    }

    #[test]
    fn accepted_schemes_per_protocol() {
        let creds = Credentials::new("u", "p");
        assert_eq!(
            AuthMethod::Negotiate {
                credentials: creds.clone(),
                kerberos: None
            }
            .accepted_schemes(),
            ["negotiate", "kerberos", "ntlm"]
        );
        assert_eq!(
            AuthMethod::Kerberos {
                credentials: creds.clone(),
                settings: KerberosSettings::default()
            }
            .accepted_schemes(),
            ["negotiate", "kerberos"]
        );
        assert_eq!(
            AuthMethod::Ntlm(creds).accepted_schemes(),
            ["negotiate", "ntlm"]
        );
    }
}
