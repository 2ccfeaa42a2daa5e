use thiserror::Error;

use crate::provider::{MediaKind, ProviderError};

#[derive(Debug, Error)]
pub enum HuddleError {
    #[error("the client does not support real-time communication")]
    UnsupportedClient,
    #[error("token issuance failed: {0}")]
    TokenIssuance(String),
    #[error("connection failed: {name}: {message}")]
    Connection { name: String, message: String },
    #[error("device enumeration unavailable: {0}")]
    Capability(String),
    #[error("no {0} input device available")]
    NoDevice(MediaKind),
    #[error("session provisioning failed: {0}")]
    Provisioning(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<ProviderError> for HuddleError {
    fn from(e: ProviderError) -> Self {
        HuddleError::Connection {
            name: e.name,
            message: e.message,
        }
    }
}
