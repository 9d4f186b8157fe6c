//! HTTP surface of the catalog front.
//!
//! Every response, success or failure, uses the `{code, message, data}` envelope. Parameters
//! travel as query strings.
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        FromRequestParts, Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
    http::{StatusCode, request::Parts},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::{
    adapters::middleware::{
        authenticate, request_id_middleware, request_timing_middleware,
        security_headers_middleware,
    },
    core::{
        AccountService, AuthGate, DomainError, Identity, LoginSuccess, RatingMutationCoordinator,
        RecommendationGateway, RecommendationOutcome, RecommendationRequest, Registration,
        model::{
            Book, BookId, Page, Rating, RatingSubmission, RatingValue, RatingWrite, UserAccount,
            UserId,
        },
        recommendation::{DEFAULT_MIN_RATING, DEFAULT_SIMILAR_ITEMS_LIMIT, DEFAULT_TOP_K, DEFAULT_TOP_N},
    },
    ports::catalog_store::CatalogStore,
};

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_LIST_LIMIT: usize = 10;
const MAX_LIST_LIMIT: usize = 100;

/// Shared handles for every route.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CatalogStore>,
    pub gateway: Arc<RecommendationGateway>,
    pub ratings: Arc<RatingMutationCoordinator>,
    pub accounts: AccountService,
    pub auth: AuthGate,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            code: StatusCode::OK.as_u16(),
            message: "success".to_string(),
            data: Some(data),
        })
    }
}

/// Error half of the envelope; `data` is always null.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        let status = match &err {
            DomainError::InvalidToken | DomainError::Unauthenticated => StatusCode::UNAUTHORIZED,
            DomainError::Validation(_) => StatusCode::BAD_REQUEST,
            DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            DomainError::Conflict(_) => StatusCode::CONFLICT,
            DomainError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        Self::new(status, err.to_string())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            code: self.status.as_u16(),
            message: self.message,
            data: None,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Identity attached by the authentication middleware; rejects with 401 when absent.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Identity);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| ApiError::from(DomainError::Unauthenticated))
    }
}

fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query.map(|Query(params)| params).map_err(ApiError::from)
}

fn path_param<T>(path: Result<Path<T>, PathRejection>) -> Result<T, ApiError> {
    path.map(|Path(value)| value).map_err(ApiError::from)
}

fn bounded_limit(limit: Option<usize>, default: usize) -> usize {
    limit.unwrap_or(default).clamp(1, MAX_LIST_LIMIT)
}

fn outcome_response(outcome: RecommendationOutcome) -> ApiResult<Value> {
    match outcome {
        RecommendationOutcome::Success(data) => Ok(ApiResponse::ok(data)),
        RecommendationOutcome::Unavailable(message) => {
            Err(ApiError::from(DomainError::ServiceUnavailable(message)))
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/users/{user_id}", get(get_user).put(update_user))
        .route("/ratings/rate", post(rate_book))
        .route("/ratings/user/{user_id}/book/{book_id}", get(user_book_rating))
        .route("/ratings/user/{user_id}", get(user_ratings))
        .route("/ratings/book/{book_id}", get(book_ratings))
        .route("/books", get(list_books))
        .route("/books/popular", get(popular_books))
        .route("/books/latest", get(latest_books))
        .route("/books/{book_id}", get(book_detail))
        .route("/books/{book_id}/similar", get(similar_books))
        .route("/recommendations/user-based", post(user_based))
        .route("/recommendations/item-based", post(item_based))
        .route("/recommendations/similar-users", post(similar_users))
        .route("/recommendations/algorithm/info", get(algorithm_info))
        .route("/recommendations/health", get(recommendation_health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(middleware::from_fn(request_id_middleware))
                .layer(middleware::from_fn(request_timing_middleware))
                .layer(middleware::from_fn(security_headers_middleware))
                .layer(middleware::from_fn_with_state(
                    state.auth.clone(),
                    authenticate,
                )),
        )
        .with_state(state)
}

async fn health() -> Json<ApiResponse<Value>> {
    ApiResponse::ok(serde_json::json!({
        "status": "UP",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// users

#[derive(Debug, Deserialize)]
struct RegisterParams {
    username: String,
    password: String,
    email: Option<String>,
    nickname: Option<String>,
}

async fn register(
    State(state): State<AppState>,
    params: Result<Query<RegisterParams>, QueryRejection>,
) -> ApiResult<UserAccount> {
    let params = query(params)?;
    let account = state
        .accounts
        .register(Registration {
            username: params.username,
            password: params.password,
            email: params.email,
            nickname: params.nickname,
        })
        .await?;
    Ok(ApiResponse::ok(account))
}

#[derive(Debug, Deserialize)]
struct LoginParams {
    username: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    params: Result<Query<LoginParams>, QueryRejection>,
) -> ApiResult<LoginSuccess> {
    let params = query(params)?;
    let success = state
        .accounts
        .login(&params.username, &params.password)
        .await
        .map_err(|e| match e {
            DomainError::Unauthenticated => {
                ApiError::new(StatusCode::UNAUTHORIZED, "invalid username or password")
            }
            other => other.into(),
        })?;
    Ok(ApiResponse::ok(success))
}

async fn get_user(
    State(state): State<AppState>,
    path: Result<Path<UserId>, PathRejection>,
) -> ApiResult<UserAccount> {
    let user_id = path_param(path)?;
    Ok(ApiResponse::ok(state.accounts.profile(user_id).await?))
}

#[derive(Debug, Deserialize)]
struct ProfileParams {
    nickname: Option<String>,
    email: Option<String>,
}

async fn update_user(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    path: Result<Path<UserId>, PathRejection>,
    params: Result<Query<ProfileParams>, QueryRejection>,
) -> ApiResult<UserAccount> {
    let user_id = path_param(path)?;
    let params = query(params)?;
    if identity.user_id != user_id {
        return Err(ApiError::forbidden("cannot modify another user's profile"));
    }
    let account = state
        .accounts
        .update_profile(user_id, params.nickname, params.email)
        .await?;
    Ok(ApiResponse::ok(account))
}

// ratings

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateParams {
    book_id: BookId,
    rating: f64,
    user_id: Option<UserId>,
}

async fn rate_book(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    params: Result<Query<RateParams>, QueryRejection>,
) -> ApiResult<RatingWrite> {
    let params = query(params)?;
    if params.user_id.is_some_and(|user_id| user_id != identity.user_id) {
        tracing::debug!(
            user_id = identity.user_id,
            requested_user_id = params.user_id,
            "rating on behalf of another user refused"
        );
        return Err(ApiError::forbidden("cannot rate on behalf of another user"));
    }

    let value = RatingValue::try_from(params.rating)?;
    let receipt = state
        .ratings
        .submit(RatingSubmission {
            user_id: identity.user_id,
            book_id: params.book_id,
            value,
        })
        .await?;
    // notifications keep running detached
    Ok(ApiResponse::ok(receipt.write))
}

async fn user_book_rating(
    State(state): State<AppState>,
    path: Result<Path<(UserId, BookId)>, PathRejection>,
) -> ApiResult<Option<Rating>> {
    let (user_id, book_id) = path_param(path)?;
    let rating = state
        .store
        .find_rating(user_id, &book_id)
        .await
        .map_err(DomainError::from)?;
    Ok(ApiResponse::ok(rating))
}

async fn user_ratings(
    State(state): State<AppState>,
    path: Result<Path<UserId>, PathRejection>,
) -> ApiResult<Vec<Rating>> {
    let user_id = path_param(path)?;
    let ratings = state
        .store
        .ratings_for_user(user_id)
        .await
        .map_err(DomainError::from)?;
    Ok(ApiResponse::ok(ratings))
}

async fn book_ratings(
    State(state): State<AppState>,
    path: Result<Path<BookId>, PathRejection>,
) -> ApiResult<Vec<Rating>> {
    let book_id = path_param(path)?;
    let ratings = state
        .store
        .ratings_for_book(&book_id)
        .await
        .map_err(DomainError::from)?;
    Ok(ApiResponse::ok(ratings))
}

// books

#[derive(Debug, Deserialize)]
struct BookListParams {
    page: Option<u32>,
    size: Option<u32>,
    keyword: Option<String>,
}

async fn list_books(
    State(state): State<AppState>,
    params: Result<Query<BookListParams>, QueryRejection>,
) -> ApiResult<Page<Book>> {
    let params = query(params)?;
    let page = params.page.unwrap_or(1).max(1);
    let size = params.size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let keyword = params
        .keyword
        .as_deref()
        .map(str::trim)
        .filter(|keyword| !keyword.is_empty());

    let books = state
        .store
        .list_books(page, size, keyword)
        .await
        .map_err(DomainError::from)?;
    Ok(ApiResponse::ok(books))
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

async fn popular_books(
    State(state): State<AppState>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> ApiResult<Vec<Book>> {
    let limit = bounded_limit(query(params)?.limit, DEFAULT_LIST_LIMIT);
    Ok(ApiResponse::ok(state.gateway.popular_books(limit).await))
}

async fn latest_books(
    State(state): State<AppState>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> ApiResult<Vec<Book>> {
    let limit = bounded_limit(query(params)?.limit, DEFAULT_LIST_LIMIT);
    let books = state
        .store
        .latest_books(limit)
        .await
        .map_err(DomainError::from)?;
    Ok(ApiResponse::ok(books))
}

async fn book_detail(
    State(state): State<AppState>,
    path: Result<Path<BookId>, PathRejection>,
) -> ApiResult<Book> {
    let book_id = path_param(path)?;
    let book = state
        .store
        .find_book(&book_id)
        .await
        .map_err(DomainError::from)?
        .ok_or_else(|| DomainError::NotFound(format!("book {book_id}")))?;
    Ok(ApiResponse::ok(book))
}

async fn similar_books(
    State(state): State<AppState>,
    path: Result<Path<BookId>, PathRejection>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> ApiResult<Value> {
    let book_id = path_param(path)?;
    let top_k = bounded_limit(query(params)?.limit, DEFAULT_SIMILAR_ITEMS_LIMIT);
    let outcome = state
        .gateway
        .recommend(&RecommendationRequest::SimilarItems { book_id, top_k })
        .await;
    outcome_response(outcome)
}

// recommendations

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendParams {
    user_id: UserId,
    top_n: Option<usize>,
    min_rating: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimilarUsersParams {
    user_id: UserId,
    top_k: Option<usize>,
}

async fn user_based(
    State(state): State<AppState>,
    params: Result<Query<RecommendParams>, QueryRejection>,
) -> ApiResult<Value> {
    let params = query(params)?;
    let request = RecommendationRequest::UserBased {
        user_id: params.user_id,
        top_n: bounded_limit(params.top_n, DEFAULT_TOP_N),
        min_rating: params.min_rating.unwrap_or(DEFAULT_MIN_RATING),
    };
    outcome_response(state.gateway.recommend(&request).await)
}

async fn item_based(
    State(state): State<AppState>,
    params: Result<Query<RecommendParams>, QueryRejection>,
) -> ApiResult<Value> {
    let params = query(params)?;
    let request = RecommendationRequest::ItemBased {
        user_id: params.user_id,
        top_n: bounded_limit(params.top_n, DEFAULT_TOP_N),
        min_rating: params.min_rating.unwrap_or(DEFAULT_MIN_RATING),
    };
    outcome_response(state.gateway.recommend(&request).await)
}

async fn similar_users(
    State(state): State<AppState>,
    params: Result<Query<SimilarUsersParams>, QueryRejection>,
) -> ApiResult<Value> {
    let params = query(params)?;
    let request = RecommendationRequest::SimilarUsers {
        user_id: params.user_id,
        top_k: bounded_limit(params.top_k, DEFAULT_TOP_K),
    };
    outcome_response(state.gateway.recommend(&request).await)
}

async fn algorithm_info(State(state): State<AppState>) -> ApiResult<Value> {
    outcome_response(
        state
            .gateway
            .recommend(&RecommendationRequest::AlgorithmInfo)
            .await,
    )
}

async fn recommendation_health(State(state): State<AppState>) -> ApiResult<bool> {
    Ok(ApiResponse::ok(state.gateway.service_healthy().await))
}
