//! Authenticated session lookup.
//!
//! Crediting is an authenticated backend call. The session is looked up
//! right before each grant, because the user may have signed in or out
//! since the purchase started.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::{EntitlementError, Result};

/// Opaque bearer credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// Source of the signed-in user's credential.
#[async_trait]
pub trait AuthSession: Send + Sync {
    /// Current bearer token, or `SessionUnavailable` if signed out.
    async fn bearer_token(&self) -> Result<BearerToken>;
}

/// A session whose token is set by the host.
#[derive(Debug, Default)]
pub struct StaticSession {
    token: Mutex<Option<BearerToken>>,
}

impl StaticSession {
    /// A signed-in session.
    pub fn signed_in(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(BearerToken::new(token))),
        }
    }

    /// A signed-out session.
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Replace the token (`None` signs out).
    pub fn set_token(&self, token: Option<BearerToken>) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }
}

#[async_trait]
impl AuthSession for StaticSession {
    async fn bearer_token(&self) -> Result<BearerToken> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| EntitlementError::SessionUnavailable("no signed-in user".into()))
    }
}
