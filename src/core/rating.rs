use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::{
    core::{
        error::DomainResult,
        model::{BookId, RatingSubmission, RatingValue, RatingWrite, UserId},
    },
    metrics,
    ports::{
        catalog_store::CatalogStore,
        recommendation_client::{Endpoint, RecommendationClient, ServiceReply},
    },
};

/// What the background notification task managed to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotificationReport {
    pub cache_cleared: bool,
    pub precompute_requested: bool,
}

/// Committed write plus a handle on the detached cache notifications.
#[derive(Debug)]
pub struct RatingReceipt {
    pub write: RatingWrite,
    pub notifications: JoinHandle<NotificationReport>,
}

/// Sends the per-user cache-clear and precompute signals. Failures are logged and counted,
/// never returned.
#[derive(Clone)]
pub struct CacheNotifier {
    client: Arc<dyn RecommendationClient>,
    call_timeout: Duration,
}

impl CacheNotifier {
    pub fn new(client: Arc<dyn RecommendationClient>, call_timeout: Duration) -> Self {
        Self {
            client,
            call_timeout,
        }
    }

    /// Clear then precompute, each attempted once regardless of the other.
    pub async fn notify(&self, user_id: UserId) -> NotificationReport {
        NotificationReport {
            cache_cleared: self.send(Endpoint::CacheClear, user_id).await,
            precompute_requested: self.send(Endpoint::CachePrecompute, user_id).await,
        }
    }

    async fn send(&self, endpoint: Endpoint, user_id: UserId) -> bool {
        let kind = endpoint.label();
        let body = Some(json!({ "user_id": user_id }));

        let failure = match tokio::time::timeout(self.call_timeout, self.client.call(endpoint, body))
            .await
        {
            Ok(Ok(ServiceReply::Success(_))) => None,
            Ok(Ok(ServiceReply::Failure(message))) => Some(message),
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("timed out after {:?}", self.call_timeout)),
        };

        match failure {
            None => {
                tracing::debug!(user_id, kind, "cache notification delivered");
                metrics::increment_cache_notification(kind, "success");
                true
            }
            Some(reason) => {
                tracing::warn!(user_id, kind, reason = %reason, "cache notification failed");
                metrics::increment_cache_notification(kind, "failure");
                false
            }
        }
    }
}

/// Commits rating writes and keeps the book aggregate in step with them.
pub struct RatingMutationCoordinator {
    store: Arc<dyn CatalogStore>,
    notifier: CacheNotifier,
}

impl RatingMutationCoordinator {
    pub fn new(store: Arc<dyn CatalogStore>, notifier: CacheNotifier) -> Self {
        Self { store, notifier }
    }

    /// Validate a raw value, then [`submit`](Self::submit). Nothing is written when the value is
    /// off the half-point grid or outside `[0, 5]`.
    pub async fn rate(
        &self,
        user_id: UserId,
        book_id: impl Into<BookId>,
        value: f64,
    ) -> DomainResult<RatingReceipt> {
        let value = RatingValue::try_from(value)?;
        self.submit(RatingSubmission {
            user_id,
            book_id: book_id.into(),
            value,
        })
        .await
    }

    /// Upsert and recompute in one store operation, then fire the cache notifications.
    ///
    /// The returned write is final: notification failures never affect it.
    pub async fn submit(&self, submission: RatingSubmission) -> DomainResult<RatingReceipt> {
        let write = self.store.apply_rating(&submission, Utc::now()).await?;

        metrics::increment_rating_write(write.inserted);
        tracing::info!(
            user_id = submission.user_id,
            book_id = %submission.book_id,
            rating = submission.value.as_f64(),
            inserted = write.inserted,
            avg_rating = write.aggregate.avg_rating,
            rating_count = write.aggregate.rating_count,
            "rating committed"
        );

        let notifier = self.notifier.clone();
        let user_id = submission.user_id;
        let notifications = tokio::spawn(async move { notifier.notify(user_id).await });

        Ok(RatingReceipt {
            write,
            notifications,
        })
    }
}
