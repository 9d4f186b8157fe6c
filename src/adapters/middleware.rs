//! Reusable Axum middleware used by the HTTP surface.
//!
//! Bearer authentication, request timing, request ids and security headers. Everything here is
//! stateless apart from the shared [`AuthGate`].
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    http::{HeaderValue, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};

use crate::{
    core::auth::{AuthGate, AuthState, Identity},
    metrics,
};

/// Attach an [`Identity`] to the request when it carries a valid bearer token.
///
/// Missing or invalid tokens are not errors here; the request simply continues without an
/// identity. An identity already present on the request is left untouched.
pub async fn authenticate(State(gate): State<AuthGate>, mut req: Request, next: Next) -> Response {
    if req.extensions().get::<Identity>().is_none() {
        let state = gate.resolve(
            req.headers()
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok()),
        );
        if let AuthState::Validated(identity) = state {
            tracing::debug!(user_id = identity.user_id, "request authenticated");
            req.extensions_mut().insert(identity);
        }
    }

    next.run(req).await
}

/// Log start/end of a request including latency, and feed the request metrics.
pub async fn request_timing_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let _timer = metrics::RequestTimer::new(&route, method.as_str());

    tracing::debug!("Started processing {} {}", method, uri);

    let response = next.run(req).await;

    metrics::increment_request_total(&route, method.as_str(), response.status().as_u16());
    tracing::info!(
        "Completed {} {} - {} in {:?}",
        method,
        uri,
        response.status(),
        start.elapsed()
    );

    response
}

/// Add common security hardening headers.
pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}

/// Generate a per-request UUID and expose it via tracing plus `X-Request-ID`.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    use tracing::Instrument;

    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        http.method = %req.method(),
        http.path = %req.uri().path(),
    );

    let mut response = next.run(req).instrument(span).await;

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-ID", header_value);
    }

    response
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::{
        Extension, Router,
        body::{Body, to_bytes},
        http::StatusCode,
        middleware,
        routing::get,
    };
    use tower::ServiceExt; // for oneshot

    use super::*;
    use crate::core::token::TokenCodec;

    fn gate() -> AuthGate {
        AuthGate::new(Arc::new(TokenCodec::new(
            b"0123456789abcdef0123456789abcdef",
            Duration::from_secs(3600),
        )))
    }

    async fn whoami(identity: Option<Extension<Identity>>) -> String {
        identity
            .map(|Extension(identity)| identity.username)
            .unwrap_or_else(|| "anonymous".to_string())
    }

    fn app(gate: AuthGate) -> Router {
        Router::new()
            .route("/", get(whoami))
            .layer(middleware::from_fn_with_state(gate, authenticate))
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_authenticate_attaches_identity() {
        let gate = gate();
        let token = gate.codec().issue(3, "ada").unwrap();

        let response = app(gate)
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ada");
    }

    #[tokio::test]
    async fn test_invalid_token_proceeds_anonymously() {
        let response = app(gate())
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(AUTHORIZATION, "Bearer garbage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "anonymous");
    }

    #[tokio::test]
    async fn test_existing_identity_is_not_overwritten() {
        let gate = gate();
        let token = gate.codec().issue(3, "ada").unwrap();
        let mut request = Request::builder()
            .uri("/")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(Identity {
            username: "preset".to_string(),
            user_id: 1,
        });

        let response = app(gate).oneshot(request).await.unwrap();
        assert_eq!(body_text(response).await, "preset");
    }

    #[tokio::test]
    async fn test_security_headers_middleware() {
        let app = Router::new()
            .route("/", get(|| async { StatusCode::OK }))
            .layer(middleware::from_fn(security_headers_middleware));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let headers = response.headers();

        assert!(headers.contains_key("X-Content-Type-Options"));
        assert!(headers.contains_key("X-Frame-Options"));
        assert!(headers.contains_key("Referrer-Policy"));
    }

    #[tokio::test]
    async fn test_request_id_middleware() {
        let app = Router::new()
            .route("/", get(|| async { StatusCode::OK }))
            .layer(middleware::from_fn(request_id_middleware))
            .layer(middleware::from_fn(request_timing_middleware));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let request_id = response
            .headers()
            .get("X-Request-ID")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(uuid::Uuid::parse_str(request_id).is_ok());
    }
}
