use std::net::SocketAddr;

use crate::config::models::{
    AuthConfig, RecommendationServiceConfig, ServerConfig, StorageBackend, StorageConfig,
};

/// HS256 keys shorter than the digest size weaken the MAC
pub const MIN_SECRET_BYTES: usize = 32;

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration, reporting every problem at once
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }
        errors.extend(Self::validate_auth(&config.auth));
        errors.extend(Self::validate_recommendation(&config.recommendation));
        errors.extend(Self::validate_storage(&config.storage));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_auth(auth: &AuthConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if auth.secret.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "auth.secret".to_string(),
            });
        } else if auth.secret.len() < MIN_SECRET_BYTES {
            errors.push(ValidationError::InvalidField {
                field: "auth.secret".to_string(),
                message: format!(
                    "must be at least {MIN_SECRET_BYTES} bytes, got {}",
                    auth.secret.len()
                ),
            });
        }

        if auth.token_ttl_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "auth.token_ttl_secs".to_string(),
                message: "Token lifetime must be greater than 0".to_string(),
            });
        }

        errors
    }

    fn validate_recommendation(service: &RecommendationServiceConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_url(&service.base_url, "recommendation.base_url") {
            errors.push(e);
        }
        if service.timeout_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: "recommendation.timeout_ms".to_string(),
                message: "Timeout must be greater than 0".to_string(),
            });
        }

        errors
    }

    fn validate_storage(storage: &StorageConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if storage.backend == StorageBackend::Sqlite
            && storage.path.as_deref().is_none_or(|p| p.trim().is_empty())
        {
            errors.push(ValidationError::MissingField {
                field: "storage.path (required for the sqlite backend)".to_string(),
            });
        }

        errors
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn minimal_valid_config() -> ServerConfig {
        ServerConfig::builder().secret(SECRET).build()
    }

    #[test]
    fn validate_accepts_minimal_config() {
        assert!(ServerConfigValidator::validate(&minimal_valid_config()).is_ok());
    }

    #[test]
    fn validate_rejects_short_secret() {
        let config = ServerConfig::builder().secret("too-short").build();
        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("auth.secret"));
    }

    #[test]
    fn validate_rejects_missing_secret() {
        let err = ServerConfigValidator::validate(&ServerConfig::default()).unwrap_err();
        assert!(err.to_string().contains("Missing required field: auth.secret"));
    }

    #[test]
    fn validate_rejects_non_http_base_url() {
        let config = ServerConfig::builder()
            .secret(SECRET)
            .recommendation_url("ftp://algo")
            .build();
        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("recommendation.base_url"));
    }

    #[test]
    fn validate_rejects_sqlite_without_path() {
        let mut config = minimal_valid_config();
        config.storage.backend = StorageBackend::Sqlite;
        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("storage.path"));
    }

    #[test]
    fn validate_collects_every_error() {
        let config = ServerConfig::builder()
            .listen_addr("not-an-addr")
            .token_ttl_secs(0)
            .recommendation_timeout_ms(0)
            .build();
        let err = ServerConfigValidator::validate(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Found 4 validation errors"), "{message}");
    }
}
