use thiserror::Error;

use crate::{core::token::TokenError, ports::catalog_store::StoreError};

/// Errors surfaced by the core operations.
///
/// Transport, protocol and semantic failures of the recommendation service never appear
/// here individually; they collapse into [`DomainError::ServiceUnavailable`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DomainError {
    /// Bad signature, malformed structure or expired token. Deliberately one kind.
    #[error("invalid or expired token")]
    InvalidToken,

    #[error("authentication required")]
    Unauthenticated,

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::BookNotFound(book_id) => DomainError::NotFound(format!("book {book_id}")),
            StoreError::UserNotFound(user_id) => DomainError::NotFound(format!("user {user_id}")),
            StoreError::DuplicateUsername(name) => {
                DomainError::Conflict(format!("username '{name}' is already registered"))
            }
            other => DomainError::Storage(other.to_string()),
        }
    }
}

impl From<TokenError> for DomainError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Invalid => DomainError::InvalidToken,
            TokenError::Signing(message) => DomainError::Internal(message),
        }
    }
}
