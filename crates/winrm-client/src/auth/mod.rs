pub(crate) mod context;
pub mod encryption;
mod kdc;

pub(crate) use context::{SecurityContext, authorization_header, negotiate_token_from_headers};
pub use encryption::MessageSealer;
