use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{
    model::UserId,
    token::{Claims, TokenCodec},
};

pub const BEARER_PREFIX: &str = "Bearer ";

/// Caller identity derived from a validated token. Lives for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub username: String,
    pub user_id: UserId,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            username: claims.sub,
            user_id: claims.user_id,
        }
    }
}

/// Per-request authentication state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    NoToken,
    TokenPresent(String),
    Validated(Identity),
    Rejected,
}

impl AuthState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            AuthState::Validated(identity) => Some(identity),
            _ => None,
        }
    }
}

/// Token after the exact `"Bearer "` prefix; missing header, other schemes and an empty
/// remainder all mean no token.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .filter(|token| !token.is_empty())
}

/// Resolves the authentication state of a request. Never fails: a bad token only means the
/// request carries no identity.
#[derive(Debug, Clone)]
pub struct AuthGate {
    codec: Arc<TokenCodec>,
}

impl AuthGate {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn resolve(&self, authorization: Option<&str>) -> AuthState {
        let state = match bearer_token(authorization) {
            Some(token) => AuthState::TokenPresent(token.to_string()),
            None => AuthState::NoToken,
        };
        self.advance(state)
    }

    fn advance(&self, state: AuthState) -> AuthState {
        match state {
            AuthState::TokenPresent(token) => match self.codec.validate(&token) {
                Ok(claims) => AuthState::Validated(claims.into()),
                Err(_) => {
                    tracing::debug!("bearer token rejected, continuing without identity");
                    AuthState::Rejected
                }
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn gate() -> AuthGate {
        AuthGate::new(Arc::new(TokenCodec::new(
            b"0123456789abcdef0123456789abcdef",
            Duration::from_secs(3600),
        )))
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(Some("Bearer abc.def.ghi")), Some("abc.def.ghi"));
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(Some("bearer abc")), None);
        assert_eq!(bearer_token(Some("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(Some("Bearerabc")), None);
        assert_eq!(bearer_token(None), None);
    }

    #[test]
    fn test_resolve_valid_token() {
        let gate = gate();
        let token = gate.codec().issue(7, "ada").unwrap();
        let state = gate.resolve(Some(&format!("Bearer {token}")));
        assert_eq!(
            state.identity(),
            Some(&Identity {
                username: "ada".to_string(),
                user_id: 7,
            })
        );
    }

    #[test]
    fn test_resolve_without_token() {
        assert_eq!(gate().resolve(None), AuthState::NoToken);
        assert_eq!(gate().resolve(Some("Bearer ")), AuthState::NoToken);
    }

    #[test]
    fn test_resolve_bad_token() {
        let state = gate().resolve(Some("Bearer not-a-token"));
        assert_eq!(state, AuthState::Rejected);
        assert!(state.identity().is_none());
    }
}
