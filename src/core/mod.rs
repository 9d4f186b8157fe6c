pub mod accounts;
pub mod auth;
pub mod error;
pub mod model;
pub mod rating;
pub mod recommendation;
pub mod token;

pub use accounts::{AccountService, LoginSuccess, Registration};
pub use auth::{AuthGate, AuthState, Identity};
pub use error::{DomainError, DomainResult};
pub use rating::{CacheNotifier, RatingMutationCoordinator, RatingReceipt};
pub use recommendation::{
    GatewayOptions, RecommendationGateway, RecommendationOutcome, RecommendationRequest,
};
pub use token::{Claims, TokenCodec, TokenError};
