//! Recommendation gateway.
//!
//! Every request maps to exactly one call on the external service. When that call fails, the
//! request's [`FallbackPolicy`] decides what happens next: variants with local fallbacks always
//! answer with data, all others answer with a single normalized unavailable message.
use std::{sync::Arc, time::Duration};

use serde_json::{Value, json};

use crate::{
    config::ServerConfig,
    core::model::{Book, BookId, UserId},
    metrics,
    ports::{
        catalog_store::CatalogStore,
        recommendation_client::{ClientError, Endpoint, RecommendationClient, ServiceReply},
    },
};

pub const UNAVAILABLE_MESSAGE: &str =
    "recommendation service is temporarily unavailable, please retry later";

pub const DEFAULT_TOP_N: usize = 10;
pub const DEFAULT_MIN_RATING: f64 = 3.0;
pub const DEFAULT_TOP_K: usize = 10;
pub const DEFAULT_SIMILAR_ITEMS_LIMIT: usize = 6;

#[derive(Debug, Clone, PartialEq)]
pub enum RecommendationRequest {
    UserBased {
        user_id: UserId,
        top_n: usize,
        min_rating: f64,
    },
    ItemBased {
        user_id: UserId,
        top_n: usize,
        min_rating: f64,
    },
    SimilarUsers {
        user_id: UserId,
        top_k: usize,
    },
    SimilarItems {
        book_id: BookId,
        top_k: usize,
    },
    AlgorithmInfo,
    Health,
}

impl RecommendationRequest {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            RecommendationRequest::UserBased { .. } => Endpoint::UserBased,
            RecommendationRequest::ItemBased { .. } => Endpoint::ItemBased,
            RecommendationRequest::SimilarUsers { .. } => Endpoint::SimilarUsers,
            RecommendationRequest::SimilarItems { .. } => Endpoint::SimilarItems,
            RecommendationRequest::AlgorithmInfo => Endpoint::AlgorithmInfo,
            RecommendationRequest::Health => Endpoint::Health,
        }
    }

    pub fn variant(&self) -> &'static str {
        self.endpoint().label()
    }

    /// JSON body sent to the service
    pub fn body(&self) -> Option<Value> {
        match self {
            RecommendationRequest::UserBased {
                user_id,
                top_n,
                min_rating,
            }
            | RecommendationRequest::ItemBased {
                user_id,
                top_n,
                min_rating,
            } => Some(json!({
                "user_id": user_id,
                "top_n": top_n,
                "min_rating": min_rating,
            })),
            RecommendationRequest::SimilarUsers { user_id, top_k } => Some(json!({
                "user_id": user_id,
                "top_k": top_k,
            })),
            RecommendationRequest::SimilarItems { book_id, top_k } => Some(json!({
                "item_id": book_id,
                "top_k": top_k,
            })),
            RecommendationRequest::AlgorithmInfo | RecommendationRequest::Health => None,
        }
    }

    pub fn fallback_policy(&self) -> FallbackPolicy {
        match self {
            RecommendationRequest::SimilarItems { .. } => FallbackPolicy::SIMILAR_ITEMS,
            _ => FallbackPolicy::NONE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecommendationOutcome {
    Success(Value),
    Unavailable(String),
}

impl RecommendationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RecommendationOutcome::Success(_))
    }
}

/// One local alternative computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStep {
    /// Other books by the queried book's author
    SameAuthor,
    /// Globally most popular books; never fails
    GlobalPopularity,
}

impl FallbackStep {
    pub fn label(self) -> &'static str {
        match self {
            FallbackStep::SameAuthor => "same_author",
            FallbackStep::GlobalPopularity => "global_popularity",
        }
    }
}

/// Ordered fallback chain for one request variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackPolicy {
    steps: &'static [FallbackStep],
}

impl FallbackPolicy {
    pub const NONE: FallbackPolicy = FallbackPolicy { steps: &[] };
    pub const SIMILAR_ITEMS: FallbackPolicy = FallbackPolicy {
        steps: &[FallbackStep::SameAuthor, FallbackStep::GlobalPopularity],
    };

    pub fn steps(&self) -> &'static [FallbackStep] {
        self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Why a primary call failed. Only ever logged and counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// Connect failure or timeout
    Transport,
    /// Non-2xx status or undecodable envelope
    Protocol,
    /// Well-formed envelope with `success: false`
    Semantic,
}

impl FailureCause {
    pub fn label(self) -> &'static str {
        match self {
            FailureCause::Transport => "transport",
            FailureCause::Protocol => "protocol",
            FailureCause::Semantic => "semantic",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceFailure {
    pub cause: FailureCause,
    pub detail: String,
}

impl From<ClientError> for ServiceFailure {
    fn from(err: ClientError) -> Self {
        let cause = if err.is_transport() {
            FailureCause::Transport
        } else {
            FailureCause::Protocol
        };
        Self {
            cause,
            detail: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatewayOptions {
    /// Bound on every outbound call, enforced here regardless of the client adapter
    pub call_timeout: Duration,
    pub popular_min_rating_count: u32,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            popular_min_rating_count: 10,
        }
    }
}

impl GatewayOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            call_timeout: config.recommendation.timeout(),
            popular_min_rating_count: config.fallback.popular_min_rating_count,
        }
    }
}

pub struct RecommendationGateway {
    client: Arc<dyn RecommendationClient>,
    store: Arc<dyn CatalogStore>,
    options: GatewayOptions,
}

impl RecommendationGateway {
    pub fn new(
        client: Arc<dyn RecommendationClient>,
        store: Arc<dyn CatalogStore>,
        options: GatewayOptions,
    ) -> Self {
        Self {
            client,
            store,
            options,
        }
    }

    pub async fn recommend(&self, request: &RecommendationRequest) -> RecommendationOutcome {
        if let RecommendationRequest::Health = request {
            return RecommendationOutcome::Success(Value::Bool(self.service_healthy().await));
        }

        let variant = request.variant();
        let failure = match self.call_primary(request).await {
            Ok(data) => return RecommendationOutcome::Success(data),
            Err(failure) => failure,
        };

        tracing::warn!(
            variant,
            cause = failure.cause.label(),
            detail = %failure.detail,
            "recommendation service call failed"
        );

        let policy = request.fallback_policy();
        match request {
            RecommendationRequest::SimilarItems { book_id, top_k } if !policy.is_empty() => {
                let books = self.similar_books_locally(policy, book_id, *top_k).await;
                RecommendationOutcome::Success(similar_items_payload(book_id, books))
            }
            _ => {
                metrics::increment_unavailable(variant);
                RecommendationOutcome::Unavailable(UNAVAILABLE_MESSAGE.to_string())
            }
        }
    }

    /// Never errors: any failure to reach the service reads as unhealthy.
    pub async fn service_healthy(&self) -> bool {
        let endpoint = Endpoint::Health.label();
        let _timer = metrics::ExternalCallTimer::new(endpoint);

        match tokio::time::timeout(self.options.call_timeout, self.client.health_check()).await {
            Ok(Ok(healthy)) => {
                metrics::increment_external_call(endpoint, if healthy { "success" } else { "protocol" });
                healthy
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "recommendation service health check failed");
                metrics::increment_external_call(endpoint, FailureCause::Transport.label());
                false
            }
            Err(_) => {
                tracing::warn!(
                    timeout = ?self.options.call_timeout,
                    "recommendation service health check timed out"
                );
                metrics::increment_external_call(endpoint, FailureCause::Transport.label());
                false
            }
        }
    }

    /// Globally popular books under the configured rating-count threshold.
    pub async fn popular_books(&self, limit: usize) -> Vec<Book> {
        match self
            .store
            .popular_books(self.options.popular_min_rating_count, limit)
            .await
        {
            Ok(books) => books,
            Err(e) => {
                tracing::error!(error = %e, "popular books lookup failed, serving empty list");
                Vec::new()
            }
        }
    }

    async fn call_primary(&self, request: &RecommendationRequest) -> Result<Value, ServiceFailure> {
        let endpoint = request.endpoint();
        let _timer = metrics::ExternalCallTimer::new(endpoint.label());

        let result = match tokio::time::timeout(
            self.options.call_timeout,
            self.client.call(endpoint, request.body()),
        )
        .await
        {
            Ok(Ok(ServiceReply::Success(data))) => Ok(data),
            Ok(Ok(ServiceReply::Failure(message))) => Err(ServiceFailure {
                cause: FailureCause::Semantic,
                detail: message,
            }),
            Ok(Err(e)) => Err(ServiceFailure::from(e)),
            Err(_) => Err(ServiceFailure::from(ClientError::Timeout(
                self.options.call_timeout,
            ))),
        };

        let outcome = match &result {
            Ok(_) => "success",
            Err(failure) => failure.cause.label(),
        };
        metrics::increment_external_call(endpoint.label(), outcome);
        result
    }

    async fn similar_books_locally(
        &self,
        policy: FallbackPolicy,
        book_id: &str,
        limit: usize,
    ) -> Vec<Book> {
        for step in policy.steps() {
            let books = match step {
                FallbackStep::SameAuthor => self.same_author_books(book_id, limit).await,
                FallbackStep::GlobalPopularity => Some(self.popular_books(limit).await),
            };
            if let Some(books) = books {
                tracing::info!(
                    book_id,
                    step = step.label(),
                    count = books.len(),
                    "serving local similar-books fallback"
                );
                metrics::increment_fallback(Endpoint::SimilarItems.label(), step.label());
                return books;
            }
        }
        Vec::new()
    }

    /// `None` when the chain should move on: unknown book, blank author or a storage error.
    async fn same_author_books(&self, book_id: &str, limit: usize) -> Option<Vec<Book>> {
        let book = match self.store.find_book(book_id).await {
            Ok(book) => book?,
            Err(e) => {
                tracing::error!(book_id, error = %e, "book lookup failed during fallback");
                return None;
            }
        };
        let author = book.known_author()?;

        match self.store.books_by_author(author, book_id, limit).await {
            Ok(books) => Some(books),
            Err(e) => {
                tracing::error!(book_id, author, error = %e, "same-author lookup failed");
                None
            }
        }
    }
}

/// Same shape the service uses for similar-items answers.
fn similar_items_payload(book_id: &str, books: Vec<Book>) -> Value {
    let total = books.len();
    json!({
        "item_id": book_id,
        "similar_books": books,
        "total": total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_bodies() {
        let request = RecommendationRequest::UserBased {
            user_id: 3,
            top_n: DEFAULT_TOP_N,
            min_rating: DEFAULT_MIN_RATING,
        };
        assert_eq!(
            request.body(),
            Some(json!({"user_id": 3, "top_n": 10, "min_rating": 3.0}))
        );

        let request = RecommendationRequest::SimilarItems {
            book_id: "0439023483".to_string(),
            top_k: DEFAULT_SIMILAR_ITEMS_LIMIT,
        };
        assert_eq!(
            request.body(),
            Some(json!({"item_id": "0439023483", "top_k": 6}))
        );
        assert_eq!(RecommendationRequest::AlgorithmInfo.body(), None);
    }

    #[test]
    fn test_only_similar_items_has_fallback() {
        let similar = RecommendationRequest::SimilarItems {
            book_id: "b".to_string(),
            top_k: 1,
        };
        assert_eq!(
            similar.fallback_policy().steps(),
            &[FallbackStep::SameAuthor, FallbackStep::GlobalPopularity]
        );

        for request in [
            RecommendationRequest::UserBased {
                user_id: 1,
                top_n: 1,
                min_rating: 0.0,
            },
            RecommendationRequest::ItemBased {
                user_id: 1,
                top_n: 1,
                min_rating: 0.0,
            },
            RecommendationRequest::SimilarUsers { user_id: 1, top_k: 1 },
            RecommendationRequest::AlgorithmInfo,
        ] {
            assert!(request.fallback_policy().is_empty(), "{request:?}");
        }
    }

    #[test]
    fn test_client_errors_classify() {
        assert_eq!(
            ServiceFailure::from(ClientError::Timeout(Duration::from_millis(5))).cause,
            FailureCause::Transport
        );
        assert_eq!(
            ServiceFailure::from(ClientError::Connection("refused".to_string())).cause,
            FailureCause::Transport
        );
        assert_eq!(
            ServiceFailure::from(ClientError::Status {
                url: "http://algo/api".to_string(),
                status: 502,
            })
            .cause,
            FailureCause::Protocol
        );
        assert_eq!(
            ServiceFailure::from(ClientError::Decode("eof".to_string())).cause,
            FailureCause::Protocol
        );
    }

    #[test]
    fn test_similar_items_payload_shape() {
        let payload = similar_items_payload("b1", vec![Book::new("b2", "Two")]);
        assert_eq!(payload["item_id"], "b1");
        assert_eq!(payload["total"], 1);
        assert_eq!(payload["similar_books"][0]["bookId"], "b2");
    }
}
