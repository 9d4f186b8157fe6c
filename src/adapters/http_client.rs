use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use tracing::Instrument;
use url::Url;

use crate::ports::recommendation_client::{
    ClientError, ClientResult, Endpoint, RecommendationClient, ServiceEnvelope, ServiceReply,
};

/// Recommendation service client built on reqwest.
///
/// Responsibilities:
/// * Joins endpoint paths onto the configured base URL
/// * Bounds every call with the configured timeout
/// * Maps transport, status and decode failures onto [`ClientError`]
///
/// No retries.
#[derive(Clone)]
pub struct HttpRecommendationClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpRecommendationClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid recommendation service URL: {base_url}"))?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("lectern/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build recommendation HTTP client")?;

        tracing::info!(base_url = %base_url, ?timeout, "created recommendation service client");
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn endpoint_url(&self, endpoint: Endpoint) -> ClientResult<Url> {
        self.base_url
            .join(endpoint.path())
            .map_err(|e| ClientError::Connection(format!("invalid endpoint URL: {e}")))
    }

    async fn send(
        &self,
        endpoint: Endpoint,
        url: Url,
        body: Option<Value>,
    ) -> ClientResult<ServiceReply> {
        let request = if endpoint.is_get() {
            self.client.get(url.clone())
        } else {
            self.client
                .post(url.clone())
                .json(&body.unwrap_or(Value::Object(Default::default())))
        };

        let response = request
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());
        if !status.is_success() {
            return Err(ClientError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let envelope: ServiceEnvelope = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout(self.timeout)
            } else {
                ClientError::Decode(e.to_string())
            }
        })?;
        Ok(envelope.into())
    }

    fn map_transport_error(&self, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout(self.timeout)
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Connection(err.to_string())
        }
    }
}

#[async_trait]
impl RecommendationClient for HttpRecommendationClient {
    async fn call(&self, endpoint: Endpoint, body: Option<Value>) -> ClientResult<ServiceReply> {
        let url = self.endpoint_url(endpoint)?;
        let span = tracing::debug_span!(
            "recommendation_call",
            endpoint = endpoint.label(),
            http.url = %url,
            http.status_code = tracing::field::Empty,
        );
        self.send(endpoint, url, body).instrument(span).await
    }

    async fn health_check(&self) -> ClientResult<bool> {
        let url = self.endpoint_url(Endpoint::Health)?;
        tracing::debug!(url = %url, "checking recommendation service health");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        Ok(response.status() == reqwest::StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls_join_base() {
        let client = HttpRecommendationClient::new("http://algo:5000", Duration::from_secs(1))
            .unwrap();
        assert_eq!(
            client.endpoint_url(Endpoint::SimilarItems).unwrap().as_str(),
            "http://algo:5000/api/recommend/similar-items"
        );
        assert_eq!(
            client.endpoint_url(Endpoint::Health).unwrap().as_str(),
            "http://algo:5000/health"
        );
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(HttpRecommendationClient::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            HttpRecommendationClient::new(&format!("http://{addr}"), Duration::from_millis(500))
                .unwrap();
        let err = client.call(Endpoint::UserBased, None).await.unwrap_err();
        assert!(err.is_transport(), "{err:?}");
        assert!(client.health_check().await.is_err());
    }
}
