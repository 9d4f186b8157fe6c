use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::model::{
    Book, NewUser, Page, Rating, RatingSubmission, RatingWrite, UserAccount, UserId,
};

/// Custom error type for catalog storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    #[error("book not found: {0}")]
    BookNotFound(String),

    #[error("user not found: {0}")]
    UserNotFound(UserId),

    #[error("username already taken: {0}")]
    DuplicateUsername(String),

    /// Failure inside the storage engine itself
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result type alias for catalog storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// CatalogStore defines the port for books, users and ratings.
///
/// Listing operations return books ranked by average rating (desc), rating count (desc) and
/// book id (asc).
#[async_trait]
pub trait CatalogStore: Send + Sync + 'static {
    async fn find_book(&self, book_id: &str) -> StoreResult<Option<Book>>;

    /// Insert or replace a book's descriptive fields. The stored aggregate is kept when the
    /// book already exists.
    async fn upsert_book(&self, book: Book) -> StoreResult<()>;

    /// Other books by `author`, excluding `exclude_book_id`, at most `limit`.
    async fn books_by_author(
        &self,
        author: &str,
        exclude_book_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Book>>;

    /// Books with strictly more than `min_rating_count` ratings, at most `limit`.
    async fn popular_books(&self, min_rating_count: u32, limit: usize) -> StoreResult<Vec<Book>>;

    /// Books that have a publication year, newest first.
    async fn latest_books(&self, limit: usize) -> StoreResult<Vec<Book>>;

    /// One page (1-based) of the ranked catalog, optionally filtered by keyword.
    async fn list_books(
        &self,
        page: u32,
        size: u32,
        keyword: Option<&str>,
    ) -> StoreResult<Page<Book>>;

    async fn find_user(&self, user_id: UserId) -> StoreResult<Option<UserAccount>>;

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<UserAccount>>;

    async fn create_user(&self, user: NewUser, now: DateTime<Utc>) -> StoreResult<UserAccount>;

    async fn record_login(&self, user_id: UserId, at: DateTime<Utc>) -> StoreResult<()>;

    /// Overwrite only the fields that are `Some`.
    async fn update_profile(
        &self,
        user_id: UserId,
        nickname: Option<String>,
        email: Option<String>,
    ) -> StoreResult<UserAccount>;

    /// Upsert the `(user, book)` rating and recompute the book aggregate from the full
    /// post-write rating set, atomically with respect to other writers on the same book.
    ///
    /// Fails with [`StoreError::BookNotFound`] before writing anything when the book is
    /// unknown.
    async fn apply_rating(
        &self,
        submission: &RatingSubmission,
        now: DateTime<Utc>,
    ) -> StoreResult<RatingWrite>;

    async fn find_rating(&self, user_id: UserId, book_id: &str) -> StoreResult<Option<Rating>>;

    /// Ratings by a user, most recent first.
    async fn ratings_for_user(&self, user_id: UserId) -> StoreResult<Vec<Rating>>;

    /// Ratings of a book, most recent first.
    async fn ratings_for_book(&self, book_id: &str) -> StoreResult<Vec<Rating>>;
}
