//! Lectern - the front of a book catalog backed by an external recommendation service.
//!
//! Lectern issues and checks stateless bearer tokens, serves the catalog (books, users,
//! ratings) and forwards recommendation queries to a separate algorithm service. When that
//! service is slow or down, similar-book queries degrade to local answers (same author, then
//! globally popular books) while the other recommendation variants report a uniform
//! "temporarily unavailable" outcome.
//!
//! # Features
//! - HS256 bearer tokens with a configurable lifetime and no server-side session state
//! - Rating upserts that recompute the book's average and count atomically per book
//! - Best-effort cache invalidation and precompute signals after every rating write
//! - Per-variant fallback policy for recommendation calls, each bounded by a timeout
//! - In-memory (`scc`) or SQLite (`rusqlite`) catalog storage with optional JSON seeding
//! - Structured `tracing` logs and `metrics` counters for every external call
//!
//! # Quick Example
//! ```no_run
//! use lectern::{adapters::build_router, app, config::ServerConfig};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg: ServerConfig = lectern::config::loader::load_config("config.toml").await?;
//! let router = build_router(app::build_state(&cfg).await?);
//! let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
//! axum::serve(listener, router).await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! **Ports** (`CatalogStore`, `RecommendationClient`) are traits; **adapters** implement them
//! and expose the HTTP surface; `core` holds the token codec, the recommendation gateway and
//! the rating coordinator, and never depends on an adapter.
//!
//! # Error Handling
//! Each boundary has its own `thiserror` enum. Startup code uses `eyre::Result` with
//! `WrapErr` context.
pub mod app;
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{AppState, HttpRecommendationClient, MemoryCatalogStore, SqliteCatalogStore},
    core::{RatingMutationCoordinator, RecommendationGateway, TokenCodec},
    ports::{catalog_store::CatalogStore, recommendation_client::RecommendationClient},
    utils::GracefulShutdown,
};
