use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::HuddleError;

/// What a token bearer is allowed to do in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Publisher,
    Subscriber,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Publisher => "publisher",
            Self::Subscriber => "subscriber",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = HuddleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "publisher" => Ok(Self::Publisher),
            "subscriber" => Ok(Self::Subscriber),
            other => Err(HuddleError::Config(format!("{other} is not a valid role"))),
        }
    }
}

/// A credential for one session, as handed out by the token issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub session_id: String,
    /// Role the token was originally requested for.
    pub role: Role,
    pub issued_at: DateTime<Utc>,
}

impl Token {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn is_expired(&self, lifetime: Duration, now: DateTime<Utc>) -> bool {
        match self.issued_at.checked_add_signed(lifetime) {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }
}

/// Mints access tokens for a (session, role) pair.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue_token(&self, session_id: &str, role: Role) -> Result<String, HuddleError>;
}

/// Memoizes one token per session identifier.
///
/// The role is forwarded on the first request only; later requests for the
/// same session return the cached token whatever role they ask for.
pub struct TokenCache {
    issuer: Arc<dyn TokenIssuer>,
    tokens: HashMap<String, Token>,
    lifetime: Duration,
}

impl TokenCache {
    pub fn new(issuer: Arc<dyn TokenIssuer>, lifetime: Duration) -> Self {
        Self {
            issuer,
            tokens: HashMap::new(),
            lifetime,
        }
    }

    pub async fn get_token(&mut self, session_id: &str, role: Role) -> Result<Token, HuddleError> {
        if let Some(token) = self.tokens.get(session_id) {
            if token.role != role {
                tracing::debug!(
                    "reusing {} token of session {session_id} for role {role}",
                    token.role
                );
            }
            if token.is_expired(self.lifetime, Utc::now()) {
                tracing::warn!("cached token of session {session_id} is past its lifetime");
            }
            return Ok(token.clone());
        }

        tracing::info!("requesting {role} token for session {session_id}");
        let value = self.issuer.issue_token(session_id, role).await?;
        if value.is_empty() {
            return Err(HuddleError::TokenIssuance(
                "issuer returned an empty token".into(),
            ));
        }

        let token = Token {
            value,
            session_id: session_id.to_string(),
            role,
            issued_at: Utc::now(),
        };
        self.tokens.insert(session_id.to_string(), token.clone());
        Ok(token)
    }

    pub fn cached(&self, session_id: &str) -> Option<&Token> {
        self.tokens.get(session_id)
    }
}
