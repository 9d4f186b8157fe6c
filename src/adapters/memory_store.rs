//! In-process catalog store backed by `scc::HashMap`.
//!
//! Each book and its ratings live in a single map entry, so a rating upsert and the aggregate
//! recompute happen while that entry is held. Writers on the same book are serialized; writers
//! on different books proceed in parallel.
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicI64, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scc::{HashMap, hash_map::Entry};

use crate::{
    core::model::{
        Book, BookAggregate, BookId, NewUser, Page, Rating, RatingSubmission, RatingWrite,
        UserAccount, UserId, rank_books,
    },
    ports::catalog_store::{CatalogStore, StoreError, StoreResult},
};

struct BookRecord {
    book: Book,
    ratings: BTreeMap<UserId, Rating>,
}

pub struct MemoryCatalogStore {
    books: HashMap<BookId, BookRecord>,
    users: HashMap<UserId, UserAccount>,
    usernames: HashMap<String, UserId>,
    next_user_id: AtomicI64,
}

impl Default for MemoryCatalogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self {
            books: HashMap::new(),
            users: HashMap::new(),
            usernames: HashMap::new(),
            next_user_id: AtomicI64::new(1),
        }
    }

    /// Snapshot of every book, unordered.
    async fn all_books(&self) -> Vec<Book> {
        let mut books = Vec::new();
        let books_ref = &mut books;
        self.books
            .retain_async(|_, record| {
                books_ref.push(record.book.clone());
                true
            })
            .await;
        books
    }

    async fn all_ratings(&self) -> Vec<Rating> {
        let mut ratings = Vec::new();
        let ratings_ref = &mut ratings;
        self.books
            .retain_async(|_, record| {
                ratings_ref.extend(record.ratings.values().cloned());
                true
            })
            .await;
        ratings
    }
}

fn newest_first(ratings: &mut [Rating]) {
    ratings.sort_by(|a, b| {
        b.rating_date
            .cmp(&a.rating_date)
            .then_with(|| a.book_id.cmp(&b.book_id))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn find_book(&self, book_id: &str) -> StoreResult<Option<Book>> {
        Ok(self
            .books
            .get_async(book_id)
            .await
            .map(|entry| entry.get().book.clone()))
    }

    async fn upsert_book(&self, book: Book) -> StoreResult<()> {
        if let Some(mut entry) = self.books.get_async(book.book_id.as_str()).await {
            let record = entry.get_mut();
            let aggregate = record.book.aggregate();
            record.book = book.with_aggregate(aggregate);
            return Ok(());
        }

        let book_id = book.book_id.clone();
        let record = BookRecord {
            book,
            ratings: BTreeMap::new(),
        };
        if let Err((_, record)) = self.books.insert_async(book_id, record).await {
            // lost a race with a concurrent insert; keep the winner's aggregate
            return self.upsert_book(record.book).await;
        }
        Ok(())
    }

    async fn books_by_author(
        &self,
        author: &str,
        exclude_book_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Book>> {
        let mut books: Vec<Book> = self
            .all_books()
            .await
            .into_iter()
            .filter(|book| book.book_id != exclude_book_id && book.known_author() == Some(author))
            .collect();
        rank_books(&mut books);
        books.truncate(limit);
        Ok(books)
    }

    async fn popular_books(&self, min_rating_count: u32, limit: usize) -> StoreResult<Vec<Book>> {
        let mut books: Vec<Book> = self
            .all_books()
            .await
            .into_iter()
            .filter(|book| book.rating_count > min_rating_count)
            .collect();
        rank_books(&mut books);
        books.truncate(limit);
        Ok(books)
    }

    async fn latest_books(&self, limit: usize) -> StoreResult<Vec<Book>> {
        let mut books: Vec<Book> = self
            .all_books()
            .await
            .into_iter()
            .filter(|book| book.year.is_some())
            .collect();
        books.sort_by(|a, b| b.year.cmp(&a.year).then_with(|| a.book_id.cmp(&b.book_id)));
        books.truncate(limit);
        Ok(books)
    }

    async fn list_books(
        &self,
        page: u32,
        size: u32,
        keyword: Option<&str>,
    ) -> StoreResult<Page<Book>> {
        let mut books: Vec<Book> = self
            .all_books()
            .await
            .into_iter()
            .filter(|book| keyword.is_none_or(|keyword| book.matches_keyword(keyword)))
            .collect();
        rank_books(&mut books);

        let total = books.len() as u64;
        let offset = (page.saturating_sub(1) as usize).saturating_mul(size as usize);
        let records = books.into_iter().skip(offset).take(size as usize).collect();
        Ok(Page {
            records,
            total,
            page,
            size,
        })
    }

    async fn find_user(&self, user_id: UserId) -> StoreResult<Option<UserAccount>> {
        Ok(self
            .users
            .get_async(&user_id)
            .await
            .map(|entry| entry.get().clone()))
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<UserAccount>> {
        let Some(user_id) = self
            .usernames
            .get_async(username)
            .await
            .map(|entry| *entry.get())
        else {
            return Ok(None);
        };
        self.find_user(user_id).await
    }

    async fn create_user(&self, user: NewUser, now: DateTime<Utc>) -> StoreResult<UserAccount> {
        // The vacant entry stays locked until the account is in `users`, so a looked-up
        // username always resolves to an existing account.
        let claim = match self.usernames.entry_async(user.username.clone()).await {
            Entry::Occupied(_) => return Err(StoreError::DuplicateUsername(user.username)),
            Entry::Vacant(claim) => claim,
        };
        let user_id = self.next_user_id.fetch_add(1, Ordering::Relaxed);

        let account = UserAccount {
            user_id,
            username: user.username,
            password_hash: user.password_hash,
            email: user.email,
            nickname: user.nickname,
            created_at: now,
            last_login_at: None,
        };
        self.users
            .insert_async(user_id, account.clone())
            .await
            .map_err(|_| StoreError::Backend(format!("user id {user_id} allocated twice")))?;
        claim.insert_entry(user_id);
        Ok(account)
    }

    async fn record_login(&self, user_id: UserId, at: DateTime<Utc>) -> StoreResult<()> {
        match self.users.get_async(&user_id).await {
            Some(mut entry) => {
                entry.get_mut().last_login_at = Some(at);
                Ok(())
            }
            None => Err(StoreError::UserNotFound(user_id)),
        }
    }

    async fn update_profile(
        &self,
        user_id: UserId,
        nickname: Option<String>,
        email: Option<String>,
    ) -> StoreResult<UserAccount> {
        let Some(mut entry) = self.users.get_async(&user_id).await else {
            return Err(StoreError::UserNotFound(user_id));
        };
        let user = entry.get_mut();
        if nickname.is_some() {
            user.nickname = nickname;
        }
        if email.is_some() {
            user.email = email;
        }
        Ok(user.clone())
    }

    async fn apply_rating(
        &self,
        submission: &RatingSubmission,
        now: DateTime<Utc>,
    ) -> StoreResult<RatingWrite> {
        let Some(mut entry) = self.books.get_async(submission.book_id.as_str()).await else {
            return Err(StoreError::BookNotFound(submission.book_id.clone()));
        };
        let record = entry.get_mut();

        let (rating, inserted) = match record.ratings.get_mut(&submission.user_id) {
            Some(existing) => {
                existing.rating = submission.value;
                existing.rating_date = now;
                (existing.clone(), false)
            }
            None => {
                let rating = Rating {
                    user_id: submission.user_id,
                    book_id: submission.book_id.clone(),
                    rating: submission.value,
                    rating_date: now,
                    created_at: now,
                };
                record.ratings.insert(submission.user_id, rating.clone());
                (rating, true)
            }
        };

        let aggregate = BookAggregate::from_ratings(record.ratings.values().map(|r| r.rating));
        record.book.apply_aggregate(aggregate);

        Ok(RatingWrite {
            rating,
            aggregate,
            inserted,
        })
    }

    async fn find_rating(&self, user_id: UserId, book_id: &str) -> StoreResult<Option<Rating>> {
        Ok(self
            .books
            .get_async(book_id)
            .await
            .and_then(|entry| entry.get().ratings.get(&user_id).cloned()))
    }

    async fn ratings_for_user(&self, user_id: UserId) -> StoreResult<Vec<Rating>> {
        let mut ratings: Vec<Rating> = self
            .all_ratings()
            .await
            .into_iter()
            .filter(|rating| rating.user_id == user_id)
            .collect();
        newest_first(&mut ratings);
        Ok(ratings)
    }

    async fn ratings_for_book(&self, book_id: &str) -> StoreResult<Vec<Rating>> {
        let mut ratings: Vec<Rating> = self
            .books
            .get_async(book_id)
            .await
            .map(|entry| entry.get().ratings.values().cloned().collect())
            .unwrap_or_default();
        newest_first(&mut ratings);
        Ok(ratings)
    }
}
