//! Catalog entities shared by the stores, the core services and the HTTP layer.
use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::DomainError;

pub type UserId = i64;
pub type BookId = String;

/// A rating in `[0, 5]` on a half-point grid, stored as a count of half points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct RatingValue(u8);

impl RatingValue {
    pub const MAX_HALF_POINTS: u8 = 10;

    pub fn from_half_points(half_points: u8) -> Option<Self> {
        (half_points <= Self::MAX_HALF_POINTS).then_some(Self(half_points))
    }

    pub fn half_points(self) -> u8 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 2.0
    }
}

impl TryFrom<f64> for RatingValue {
    type Error = DomainError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() || !(0.0..=5.0).contains(&value) {
            return Err(DomainError::Validation(format!(
                "rating must be between 0 and 5, got {value}"
            )));
        }
        let doubled = value * 2.0;
        if doubled.fract() != 0.0 {
            return Err(DomainError::Validation(format!(
                "rating must be a multiple of 0.5, got {value}"
            )));
        }
        // range checked above, so the cast is exact
        Ok(Self(doubled as u8))
    }
}

impl From<RatingValue> for f64 {
    fn from(value: RatingValue) -> Self {
        value.as_f64()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub user_id: UserId,
    pub book_id: BookId,
    pub rating: RatingValue,
    pub rating_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A validated rating write request.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingSubmission {
    pub user_id: UserId,
    pub book_id: BookId,
    pub value: RatingValue,
}

/// Derived `(average, count)` for one book.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookAggregate {
    pub avg_rating: f64,
    pub rating_count: u32,
}

impl BookAggregate {
    /// Recompute from the complete rating set of a book. Average is rounded to two decimals.
    pub fn from_ratings<I>(values: I) -> Self
    where
        I: IntoIterator<Item = RatingValue>,
    {
        let (sum, count) = values
            .into_iter()
            .fold((0u64, 0u32), |(sum, count), value| {
                (sum + u64::from(value.half_points()), count + 1)
            });

        if count == 0 {
            return Self::default();
        }

        let avg = sum as f64 / 2.0 / f64::from(count);
        Self {
            avg_rating: (avg * 100.0).round() / 100.0,
            rating_count: count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub book_id: BookId,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub image_url_s: Option<String>,
    #[serde(default)]
    pub image_url_m: Option<String>,
    #[serde(default)]
    pub image_url_l: Option<String>,
    #[serde(default)]
    pub avg_rating: f64,
    #[serde(default)]
    pub rating_count: u32,
}

impl Book {
    pub fn new(book_id: impl Into<BookId>, title: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
            title: title.into(),
            author: None,
            publisher: None,
            year: None,
            image_url_s: None,
            image_url_m: None,
            image_url_l: None,
            avg_rating: 0.0,
            rating_count: 0,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_aggregate(mut self, aggregate: BookAggregate) -> Self {
        self.apply_aggregate(aggregate);
        self
    }

    pub fn apply_aggregate(&mut self, aggregate: BookAggregate) {
        self.avg_rating = aggregate.avg_rating;
        self.rating_count = aggregate.rating_count;
    }

    pub fn aggregate(&self) -> BookAggregate {
        BookAggregate {
            avg_rating: self.avg_rating,
            rating_count: self.rating_count,
        }
    }

    /// Author with surrounding whitespace removed, `None` when blank.
    pub fn known_author(&self) -> Option<&str> {
        self.author
            .as_deref()
            .map(str::trim)
            .filter(|author| !author.is_empty())
    }

    /// Case-insensitive match against title, author and publisher.
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        let needle = keyword.to_lowercase();
        [Some(self.title.as_str()), self.author.as_deref(), self.publisher.as_deref()]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&needle))
    }
}

/// Ranking used everywhere books are listed: average desc, count desc, id asc.
pub fn compare_by_rank(a: &Book, b: &Book) -> Ordering {
    b.avg_rating
        .total_cmp(&a.avg_rating)
        .then_with(|| b.rating_count.cmp(&a.rating_count))
        .then_with(|| a.book_id.cmp(&b.book_id))
}

pub fn rank_books(books: &mut [Book]) {
    books.sort_by(compare_by_rank);
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub user_id: UserId,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Registration input after the password has been hashed.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub nickname: Option<String>,
}

/// Result of an upsert plus aggregate recompute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingWrite {
    pub rating: Rating,
    pub aggregate: BookAggregate,
    /// `true` for a first submission, `false` when an existing row was updated
    pub inserted: bool,
}
