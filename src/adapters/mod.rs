pub mod http_client;
pub mod http_handler;
pub mod memory_store;
pub mod middleware;
pub mod seed;
pub mod sqlite_store;

/// Re-export commonly used types from adapters
pub use http_client::HttpRecommendationClient;
pub use http_handler::{ApiError, ApiResponse, AppState, build_router};
pub use memory_store::MemoryCatalogStore;
pub use sqlite_store::SqliteCatalogStore;
