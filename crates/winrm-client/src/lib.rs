//! Asynchronous WinRM client.
//!
//! Authenticates to a Windows host over SPNEGO (Negotiate, Kerberos or
//! NTLM) with WinRM message encryption, executes commands in remote cmd
//! shells with bidirectional streaming, reads and manipulates CIM/WMI
//! instances, and accesses the registry through `StdRegProv`.
//!
//! ```no_run
//! use winrm_client::{AuthMethod, ClientOptions, Credentials, ShellConfig, WinRmClient};
//!
//! # async fn example() -> Result<(), winrm_client::WinRmError> {
//! let client = WinRmClient::new(
//!     ClientOptions::builder()
//!         .endpoint("winhost.example.test")
//!         .auth(AuthMethod::Negotiate {
//!             credentials: Credentials::new("Administrator", "secret"),
//!             kerberos: None,
//!         })
//!         .build(),
//! )?;
//!
//! let shell = client.shell(ShellConfig::builder().build()).await?;
//! let result = shell.run("cmd.exe", &["/c", "ver"], None).await?;
//! println!("{}", String::from_utf8_lossy(&result.stdout));
//! shell.destroy().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
mod client;
mod credentials;
mod endpoint;
mod error;
pub mod registry;
pub mod services;
pub mod shell;
mod transport;

pub use client::{
    ClientOptions, DEFAULT_MAX_ENVELOPE_SIZE, DEFAULT_OPERATION_TIMEOUT, Enumerator, WinRmClient,
};
pub use credentials::{AuthMethod, Credentials, KerberosSettings};
pub use endpoint::Endpoint;
pub use error::WinRmError;
pub use shell::{Command, CompletedProcess, InputSource, OutputTarget, Process, Shell, ShellConfig};

pub use winrm_protocol::cim::{CimProperties, CimValue, ParamValue};
pub use winrm_protocol::rsp::ShellSignal;
pub use winrm_protocol::wsman::{IdentifyInfo, OptionSet, SelectorSet};
