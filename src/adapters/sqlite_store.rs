//! SQLite catalog store.
//!
//! The connection sits behind a mutex and every operation runs on the blocking pool. Rating
//! writes use an `IMMEDIATE` transaction so the upsert and the aggregate recompute see one
//! snapshot and concurrent writers on the same book cannot interleave.
use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{
    Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior,
    functions::FunctionFlags, params,
};

use crate::{
    core::model::{
        Book, BookAggregate, NewUser, Page, Rating, RatingSubmission, RatingValue, RatingWrite,
        UserAccount, UserId,
    },
    ports::catalog_store::{CatalogStore, StoreError, StoreResult},
};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS books (
    book_id      TEXT PRIMARY KEY,
    title        TEXT NOT NULL,
    author       TEXT,
    publisher    TEXT,
    year         INTEGER,
    image_url_s  TEXT,
    image_url_m  TEXT,
    image_url_l  TEXT,
    avg_rating   REAL NOT NULL DEFAULT 0,
    rating_count INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_books_author ON books(author);
CREATE INDEX IF NOT EXISTS idx_books_rank ON books(avg_rating DESC, rating_count DESC);

CREATE TABLE IF NOT EXISTS users (
    user_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    email         TEXT,
    nickname      TEXT,
    created_at    TEXT NOT NULL,
    last_login_at TEXT
);

CREATE TABLE IF NOT EXISTS ratings (
    user_id     INTEGER NOT NULL,
    book_id     TEXT NOT NULL REFERENCES books(book_id),
    half_points INTEGER NOT NULL CHECK (half_points BETWEEN 0 AND 10),
    rating_date TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (user_id, book_id)
);
CREATE INDEX IF NOT EXISTS idx_ratings_book ON ratings(book_id);
";

const BOOK_COLUMNS: &str = "book_id, title, author, publisher, year, image_url_s, image_url_m, \
                            image_url_l, avg_rating, rating_count";
const USER_COLUMNS: &str =
    "user_id, username, password_hash, email, nickname, created_at, last_login_at";
const RATING_COLUMNS: &str = "user_id, book_id, half_points, rating_date, created_at";
const RANK_ORDER: &str = "ORDER BY avg_rating DESC, rating_count DESC, book_id ASC";

#[derive(Debug, thiserror::Error)]
enum SqliteError {
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SqliteError> for StoreError {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::Store(e) => e,
            SqliteError::Sql(e) => StoreError::Backend(e.to_string()),
        }
    }
}

type SqlResult<T> = Result<T, SqliteError>;

pub struct SqliteCatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalogStore {
    /// Open (creating if needed) the database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            StoreError::Backend(format!(
                "failed to open sqlite database at {}: {e}",
                path.display()
            ))
        })?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| StoreError::Backend(format!("failed to configure sqlite pragmas: {e}")))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Backend(format!("failed to open sqlite database: {e}")))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| StoreError::Backend(format!("failed to configure sqlite pragmas: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        register_unicode_lower(&conn)
            .map_err(|e| StoreError::Backend(format!("failed to register sql functions: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| StoreError::Backend(format!("failed to apply schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> SqlResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("sqlite connection mutex poisoned".to_string()))?;
            op(&mut guard).map_err(StoreError::from)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("sqlite task failed: {e}")))?
    }
}

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        book_id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        publisher: row.get(3)?,
        year: row.get(4)?,
        image_url_s: row.get(5)?,
        image_url_m: row.get(6)?,
        image_url_l: row.get(7)?,
        avg_rating: row.get(8)?,
        rating_count: row.get(9)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserAccount> {
    Ok(UserAccount {
        user_id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        email: row.get(3)?,
        nickname: row.get(4)?,
        created_at: row.get(5)?,
        last_login_at: row.get(6)?,
    })
}

fn rating_value(half_points: u8, column: usize) -> rusqlite::Result<RatingValue> {
    RatingValue::from_half_points(half_points).ok_or(rusqlite::Error::IntegralValueOutOfRange(
        column,
        i64::from(half_points),
    ))
}

fn rating_from_row(row: &Row<'_>) -> rusqlite::Result<Rating> {
    Ok(Rating {
        user_id: row.get(0)?,
        book_id: row.get(1)?,
        rating: rating_value(row.get(2)?, 2)?,
        rating_date: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn query_books(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<Book>> {
    let mut stmt = conn.prepare(sql)?;
    let books = stmt.query_map(params, book_from_row)?;
    books.collect()
}

fn query_ratings(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<Rating>> {
    let mut stmt = conn.prepare(sql)?;
    let ratings = stmt.query_map(params, rating_from_row)?;
    ratings.collect()
}

/// `unicode_lower(text)`: full Unicode lowercasing, unlike the ASCII-only built-in `lower()`.
/// Keyword search folds both sides with it so results match the in-memory store.
fn register_unicode_lower(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "unicode_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|text| text.to_lowercase())),
    )
}

fn to_sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn find_book(&self, book_id: &str) -> StoreResult<Option<Book>> {
        let book_id = book_id.to_string();
        self.run(move |conn| {
            let sql = format!("SELECT {BOOK_COLUMNS} FROM books WHERE book_id = ?1");
            Ok(conn
                .query_row(&sql, params![book_id], book_from_row)
                .optional()?)
        })
        .await
    }

    async fn upsert_book(&self, book: Book) -> StoreResult<()> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO books (book_id, title, author, publisher, year, image_url_s, \
                 image_url_m, image_url_l, avg_rating, rating_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(book_id) DO UPDATE SET
                    title = excluded.title,
                    author = excluded.author,
                    publisher = excluded.publisher,
                    year = excluded.year,
                    image_url_s = excluded.image_url_s,
                    image_url_m = excluded.image_url_m,
                    image_url_l = excluded.image_url_l",
                params![
                    book.book_id,
                    book.title,
                    book.author,
                    book.publisher,
                    book.year,
                    book.image_url_s,
                    book.image_url_m,
                    book.image_url_l,
                    book.avg_rating,
                    book.rating_count,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn books_by_author(
        &self,
        author: &str,
        exclude_book_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Book>> {
        let author = author.to_string();
        let exclude_book_id = exclude_book_id.to_string();
        self.run(move |conn| {
            let sql = format!(
                "SELECT {BOOK_COLUMNS} FROM books
                 WHERE TRIM(author) = ?1 AND book_id <> ?2 {RANK_ORDER} LIMIT ?3"
            );
            Ok(query_books(
                conn,
                &sql,
                params![author, exclude_book_id, to_sql_limit(limit)],
            )?)
        })
        .await
    }

    async fn popular_books(&self, min_rating_count: u32, limit: usize) -> StoreResult<Vec<Book>> {
        self.run(move |conn| {
            let sql = format!(
                "SELECT {BOOK_COLUMNS} FROM books WHERE rating_count > ?1 {RANK_ORDER} LIMIT ?2"
            );
            Ok(query_books(
                conn,
                &sql,
                params![min_rating_count, to_sql_limit(limit)],
            )?)
        })
        .await
    }

    async fn latest_books(&self, limit: usize) -> StoreResult<Vec<Book>> {
        self.run(move |conn| {
            let sql = format!(
                "SELECT {BOOK_COLUMNS} FROM books WHERE year IS NOT NULL
                 ORDER BY year DESC, book_id ASC LIMIT ?1"
            );
            Ok(query_books(conn, &sql, params![to_sql_limit(limit)])?)
        })
        .await
    }

    async fn list_books(
        &self,
        page: u32,
        size: u32,
        keyword: Option<&str>,
    ) -> StoreResult<Page<Book>> {
        let pattern = keyword.map(str::to_lowercase);
        self.run(move |conn| {
            let filter = "(?1 IS NULL
                           OR instr(unicode_lower(title), ?1) > 0
                           OR instr(unicode_lower(author), ?1) > 0
                           OR instr(unicode_lower(publisher), ?1) > 0)";
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM books WHERE {filter}"),
                params![pattern],
                |row| row.get(0),
            )?;

            let offset = i64::from(page.saturating_sub(1)) * i64::from(size);
            let sql = format!(
                "SELECT {BOOK_COLUMNS} FROM books WHERE {filter} {RANK_ORDER} LIMIT ?2 OFFSET ?3"
            );
            let records = query_books(conn, &sql, params![pattern, i64::from(size), offset])?;

            Ok(Page {
                records,
                total: u64::try_from(total).unwrap_or_default(),
                page,
                size,
            })
        })
        .await
    }

    async fn find_user(&self, user_id: UserId) -> StoreResult<Option<UserAccount>> {
        self.run(move |conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1");
            Ok(conn
                .query_row(&sql, params![user_id], user_from_row)
                .optional()?)
        })
        .await
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<UserAccount>> {
        let username = username.to_string();
        self.run(move |conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1");
            Ok(conn
                .query_row(&sql, params![username], user_from_row)
                .optional()?)
        })
        .await
    }

    async fn create_user(&self, user: NewUser, now: DateTime<Utc>) -> StoreResult<UserAccount> {
        self.run(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO users (username, password_hash, email, nickname, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.username,
                    user.password_hash,
                    user.email,
                    user.nickname,
                    now
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    return Err(StoreError::DuplicateUsername(user.username).into());
                }
                Err(e) => return Err(e.into()),
            }

            Ok(UserAccount {
                user_id: conn.last_insert_rowid(),
                username: user.username,
                password_hash: user.password_hash,
                email: user.email,
                nickname: user.nickname,
                created_at: now,
                last_login_at: None,
            })
        })
        .await
    }

    async fn record_login(&self, user_id: UserId, at: DateTime<Utc>) -> StoreResult<()> {
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE users SET last_login_at = ?1 WHERE user_id = ?2",
                params![at, user_id],
            )?;
            if changed == 0 {
                return Err(StoreError::UserNotFound(user_id).into());
            }
            Ok(())
        })
        .await
    }

    async fn update_profile(
        &self,
        user_id: UserId,
        nickname: Option<String>,
        email: Option<String>,
    ) -> StoreResult<UserAccount> {
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE users SET nickname = COALESCE(?1, nickname), email = COALESCE(?2, email)
                 WHERE user_id = ?3",
                params![nickname, email, user_id],
            )?;
            if changed == 0 {
                return Err(StoreError::UserNotFound(user_id).into());
            }
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1");
            Ok(conn.query_row(&sql, params![user_id], user_from_row)?)
        })
        .await
    }

    async fn apply_rating(
        &self,
        submission: &RatingSubmission,
        now: DateTime<Utc>,
    ) -> StoreResult<RatingWrite> {
        let submission = submission.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let book_exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM books WHERE book_id = ?1)",
                params![submission.book_id],
                |row| row.get(0),
            )?;
            if !book_exists {
                return Err(StoreError::BookNotFound(submission.book_id).into());
            }

            let created_at: Option<DateTime<Utc>> = tx
                .query_row(
                    "SELECT created_at FROM ratings WHERE user_id = ?1 AND book_id = ?2",
                    params![submission.user_id, submission.book_id],
                    |row| row.get(0),
                )
                .optional()?;

            tx.execute(
                "INSERT INTO ratings (user_id, book_id, half_points, rating_date, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(user_id, book_id) DO UPDATE SET
                    half_points = excluded.half_points,
                    rating_date = excluded.rating_date",
                params![
                    submission.user_id,
                    submission.book_id,
                    submission.value.half_points(),
                    now
                ],
            )?;

            let values = {
                let mut stmt = tx.prepare("SELECT half_points FROM ratings WHERE book_id = ?1")?;
                let rows = stmt.query_map(params![submission.book_id], |row| {
                    rating_value(row.get(0)?, 0)
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            let aggregate = BookAggregate::from_ratings(values);

            tx.execute(
                "UPDATE books SET avg_rating = ?1, rating_count = ?2 WHERE book_id = ?3",
                params![
                    aggregate.avg_rating,
                    aggregate.rating_count,
                    submission.book_id
                ],
            )?;
            tx.commit()?;

            let inserted = created_at.is_none();
            Ok(RatingWrite {
                rating: Rating {
                    user_id: submission.user_id,
                    book_id: submission.book_id,
                    rating: submission.value,
                    rating_date: now,
                    created_at: created_at.unwrap_or(now),
                },
                aggregate,
                inserted,
            })
        })
        .await
    }

    async fn find_rating(&self, user_id: UserId, book_id: &str) -> StoreResult<Option<Rating>> {
        let book_id = book_id.to_string();
        self.run(move |conn| {
            let sql =
                format!("SELECT {RATING_COLUMNS} FROM ratings WHERE user_id = ?1 AND book_id = ?2");
            Ok(conn
                .query_row(&sql, params![user_id, book_id], rating_from_row)
                .optional()?)
        })
        .await
    }

    async fn ratings_for_user(&self, user_id: UserId) -> StoreResult<Vec<Rating>> {
        self.run(move |conn| {
            let sql = format!(
                "SELECT {RATING_COLUMNS} FROM ratings WHERE user_id = ?1
                 ORDER BY rating_date DESC, book_id ASC"
            );
            Ok(query_ratings(conn, &sql, params![user_id])?)
        })
        .await
    }

    async fn ratings_for_book(&self, book_id: &str) -> StoreResult<Vec<Rating>> {
        let book_id = book_id.to_string();
        self.run(move |conn| {
            let sql = format!(
                "SELECT {RATING_COLUMNS} FROM ratings WHERE book_id = ?1
                 ORDER BY rating_date DESC, user_id ASC"
            );
            Ok(query_ratings(conn, &sql, params![book_id])?)
        })
        .await
    }
}
