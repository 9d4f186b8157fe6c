//! User registration, login and profile lookups.
//!
//! Passwords are stored as Argon2id PHC strings. Hashing and verification run on the blocking
//! pool.
use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use chrono::Utc;
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::{
    core::{
        error::{DomainError, DomainResult},
        model::{NewUser, UserAccount, UserId},
        token::TokenCodec,
    },
    ports::catalog_store::CatalogStore,
};

const MIN_PASSWORD_CHARS: usize = 6;
const MAX_USERNAME_CHARS: usize = 50;

/// Verified against when the username is unknown. The password is random, so nothing matches.
static UNKNOWN_USER_HASH: Lazy<Option<String>> = Lazy::new(|| {
    let password = hex_string(&rand::random::<[u8; 16]>());
    hash_password(&password)
        .inspect_err(|e| tracing::warn!(error = %e, "failed to build unknown-user hash"))
        .ok()
});

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Hash a password into a PHC string with a fresh random salt.
pub fn hash_password(password: &str) -> DomainResult<String> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|e| DomainError::Internal(format!("failed to encode salt: {e}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DomainError::Internal(format!("failed to hash password: {e}")))
}

/// `false` for a wrong password and for a stored hash that does not parse.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash is not a valid PHC string");
            false
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginSuccess {
    pub user: UserAccount,
    pub token: String,
}

#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub nickname: Option<String>,
}

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn CatalogStore>,
    codec: Arc<TokenCodec>,
}

impl AccountService {
    pub fn new(store: Arc<dyn CatalogStore>, codec: Arc<TokenCodec>) -> Self {
        Self { store, codec }
    }

    pub async fn register(&self, registration: Registration) -> DomainResult<UserAccount> {
        let username = registration.username.trim().to_string();
        if username.is_empty() {
            return Err(DomainError::Validation("username must not be blank".to_string()));
        }
        if username.chars().count() > MAX_USERNAME_CHARS {
            return Err(DomainError::Validation(format!(
                "username must be at most {MAX_USERNAME_CHARS} characters"
            )));
        }
        if registration.password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(DomainError::Validation(format!(
                "password must be at least {MIN_PASSWORD_CHARS} characters"
            )));
        }
        if self.store.find_user_by_username(&username).await?.is_some() {
            return Err(DomainError::Conflict(format!(
                "username '{username}' is already registered"
            )));
        }

        let password = registration.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| DomainError::Internal(format!("password hashing task failed: {e}")))??;

        let account = self
            .store
            .create_user(
                NewUser {
                    username,
                    password_hash,
                    email: non_blank(registration.email),
                    nickname: non_blank(registration.nickname),
                },
                Utc::now(),
            )
            .await?;
        tracing::info!(user_id = account.user_id, username = %account.username, "user registered");
        Ok(account)
    }

    /// Unknown usernames and wrong passwords are indistinguishable to the caller. Both paths
    /// run one Argon2 verification.
    pub async fn login(&self, username: &str, password: &str) -> DomainResult<LoginSuccess> {
        let account = self.store.find_user_by_username(username.trim()).await?;

        let password = password.to_string();
        let stored_hash = account.as_ref().map(|a| a.password_hash.clone());
        let verified = tokio::task::spawn_blocking(move || match stored_hash {
            Some(stored_hash) => verify_password(&password, &stored_hash),
            None => {
                if let Some(dummy) = UNKNOWN_USER_HASH.as_deref() {
                    verify_password(&password, dummy);
                }
                false
            }
        })
        .await
        .map_err(|e| DomainError::Internal(format!("password check task failed: {e}")))?;

        let Some(account) = account else {
            tracing::debug!(username, "login for unknown username");
            return Err(DomainError::Unauthenticated);
        };
        if !verified {
            tracing::debug!(user_id = account.user_id, "login with wrong password");
            return Err(DomainError::Unauthenticated);
        }

        let now = Utc::now();
        let token = self.codec.issue_at(account.user_id, &account.username, now)?;
        self.store.record_login(account.user_id, now).await?;
        tracing::info!(user_id = account.user_id, "user logged in");

        Ok(LoginSuccess {
            user: UserAccount {
                last_login_at: Some(now),
                ..account
            },
            token,
        })
    }

    pub async fn profile(&self, user_id: UserId) -> DomainResult<UserAccount> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("user {user_id}")))
    }

    pub async fn update_profile(
        &self,
        user_id: UserId,
        nickname: Option<String>,
        email: Option<String>,
    ) -> DomainResult<UserAccount> {
        Ok(self
            .store
            .update_profile(user_id, non_blank(nickname), non_blank(email))
            .await?)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::adapters::memory_store::MemoryCatalogStore;

    fn service() -> (AccountService, Arc<TokenCodec>) {
        let codec = Arc::new(TokenCodec::new(
            b"0123456789abcdef0123456789abcdef",
            Duration::from_secs(3600),
        ));
        (
            AccountService::new(Arc::new(MemoryCatalogStore::new()), codec.clone()),
            codec,
        )
    }

    fn registration(username: &str, password: &str) -> Registration {
        Registration {
            username: username.to_string(),
            password: password.to_string(),
            email: Some("  ".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("battery staple", &hash));
        assert!(!verify_password("correct horse", "not-a-phc-string"));
        assert_ne!(hash, hash_password("correct horse").unwrap());
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let (accounts, codec) = service();
        let account = accounts
            .register(registration(" ada ", "secret-pass"))
            .await
            .unwrap();
        assert_eq!(account.username, "ada");
        assert_eq!(account.email, None);
        assert_ne!(account.password_hash, "secret-pass");

        let login = accounts.login("ada", "secret-pass").await.unwrap();
        assert_eq!(login.user.user_id, account.user_id);
        assert!(login.user.last_login_at.is_some());
        let claims = codec.validate(&login.token).unwrap();
        assert_eq!(claims.user_id, account.user_id);
        assert_eq!(claims.sub, "ada");
    }

    #[test]
    fn test_unknown_user_hash_is_verifiable_and_matches_nothing() {
        let dummy = UNKNOWN_USER_HASH.as_deref().unwrap();
        assert!(PasswordHash::new(dummy).is_ok());
        assert!(!verify_password("secret-pass", dummy));
        assert!(!verify_password("", dummy));
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let (accounts, _) = service();
        accounts.register(registration("ada", "secret-pass")).await.unwrap();
        let err = accounts
            .register(registration("ada", "another-pass"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (accounts, _) = service();
        assert!(matches!(
            accounts.register(registration("   ", "secret-pass")).await,
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            accounts.register(registration("ada", "short")).await,
            Err(DomainError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_credentials_are_unauthenticated() {
        let (accounts, _) = service();
        accounts.register(registration("ada", "secret-pass")).await.unwrap();

        assert_eq!(
            accounts.login("ada", "wrong-pass").await.unwrap_err(),
            DomainError::Unauthenticated
        );
        assert_eq!(
            accounts.login("grace", "secret-pass").await.unwrap_err(),
            DomainError::Unauthenticated
        );
    }

    #[tokio::test]
    async fn test_profile_lookup_and_update() {
        let (accounts, _) = service();
        let account = accounts.register(registration("ada", "secret-pass")).await.unwrap();

        let updated = accounts
            .update_profile(account.user_id, Some("Countess".to_string()), None)
            .await
            .unwrap();
        assert_eq!(updated.nickname.as_deref(), Some("Countess"));
        assert_eq!(
            accounts.profile(account.user_id).await.unwrap().nickname,
            updated.nickname
        );
        assert!(matches!(
            accounts.profile(999).await,
            Err(DomainError::NotFound(_))
        ));
    }
}
