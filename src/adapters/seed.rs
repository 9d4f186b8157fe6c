//! Startup catalog seeding from a JSON file of `{ "books": [...], "users": [...] }`.
use std::path::Path;

use chrono::Utc;
use eyre::{Context, Result};
use serde::Deserialize;

use crate::{
    core::model::{Book, NewUser},
    ports::catalog_store::{CatalogStore, StoreError, StoreResult},
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub books: Vec<Book>,
    #[serde(default)]
    pub users: Vec<SeedUser>,
}

/// A user with an already hashed password (PHC string).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedUser {
    pub username: String,
    pub password_hash: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeedSummary {
    pub books: usize,
    pub users: usize,
    pub skipped_users: usize,
}

pub async fn load_seed_file(path: impl AsRef<Path>) -> Result<CatalogSeed> {
    let path = path.as_ref();
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("Failed to parse seed file {}", path.display()))
}

/// Insert seed data. Existing usernames are skipped so re-seeding a persistent store is safe.
pub async fn apply_seed(store: &dyn CatalogStore, seed: CatalogSeed) -> StoreResult<SeedSummary> {
    let mut summary = SeedSummary::default();

    for book in seed.books {
        store.upsert_book(book).await?;
        summary.books += 1;
    }

    for user in seed.users {
        let new_user = NewUser {
            username: user.username,
            password_hash: user.password_hash,
            email: user.email,
            nickname: user.nickname,
        };
        match store.create_user(new_user, Utc::now()).await {
            Ok(_) => summary.users += 1,
            Err(StoreError::DuplicateUsername(username)) => {
                tracing::debug!(username, "seed user already present");
                summary.skipped_users += 1;
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        books = summary.books,
        users = summary.users,
        skipped_users = summary.skipped_users,
        "catalog seed applied"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::adapters::memory_store::MemoryCatalogStore;

    #[tokio::test]
    async fn test_seed_file_round() {
        let json = r#"{
            "books": [
                {"bookId": "0439023483", "title": "The Hunger Games", "author": "Suzanne Collins",
                 "year": 2008, "avgRating": 4.3, "ratingCount": 120}
            ],
            "users": [
                {"username": "ada", "passwordHash": "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA"}
            ]
        }"#;
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        write!(file, "{json}").unwrap();

        let seed = load_seed_file(file.path()).await.unwrap();
        let store = MemoryCatalogStore::new();
        let summary = apply_seed(&store, seed.clone()).await.unwrap();
        assert_eq!(summary.books, 1);
        assert_eq!(summary.users, 1);

        let again = apply_seed(&store, seed).await.unwrap();
        assert_eq!(again.skipped_users, 1);

        let book = store.find_book("0439023483").await.unwrap().unwrap();
        assert_eq!(book.rating_count, 120);
        assert_eq!(book.known_author(), Some("Suzanne Collins"));
    }

    #[tokio::test]
    async fn test_missing_seed_file() {
        assert!(load_seed_file("/nonexistent/seed.json").await.is_err());
    }
}
