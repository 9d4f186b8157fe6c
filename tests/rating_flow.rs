// Rating writes, aggregate recompute and cache notifications.
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{Json, Router, extract::State, routing::post};
use lectern::{
    CatalogStore, HttpRecommendationClient, MemoryCatalogStore, RatingMutationCoordinator,
    SqliteCatalogStore,
    core::{CacheNotifier, DomainError, model::Book, rating::NotificationReport},
};
use serde_json::{Value, json};
use tempfile::TempDir;

type Calls = Arc<Mutex<Vec<(&'static str, Value)>>>;

async fn spawn_cache_stub(calls: Calls) -> String {
    async fn clear(State(calls): State<Calls>, Json(body): Json<Value>) -> Json<Value> {
        calls.lock().unwrap().push(("clear", body));
        Json(json!({"success": true, "message": "cache cleared"}))
    }
    async fn precompute(State(calls): State<Calls>, Json(body): Json<Value>) -> Json<Value> {
        calls.lock().unwrap().push(("precompute", body));
        Json(json!({"success": true}))
    }

    let router = Router::new()
        .route("/api/cache/clear", post(clear))
        .route("/api/cache/precompute", post(precompute))
        .with_state(calls);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

async fn coordinator(store: Arc<dyn CatalogStore>, base_url: &str) -> RatingMutationCoordinator {
    store
        .upsert_book(Book::new("b1", "Dune").with_author("Frank Herbert"))
        .await
        .unwrap();
    let client = HttpRecommendationClient::new(base_url, Duration::from_secs(2)).unwrap();
    RatingMutationCoordinator::new(
        store,
        CacheNotifier::new(Arc::new(client), Duration::from_secs(2)),
    )
}

#[tokio::test]
async fn test_upsert_recomputes_aggregate_and_notifies() {
    let calls: Calls = Arc::default();
    let base_url = spawn_cache_stub(calls.clone()).await;
    let store: Arc<dyn CatalogStore> = Arc::new(MemoryCatalogStore::new());
    let ratings = coordinator(store.clone(), &base_url).await;

    for (user_id, value) in [(1, 4.0), (2, 4.5), (3, 4.0)] {
        let receipt = ratings.rate(user_id, "b1", value).await.unwrap();
        assert!(receipt.write.inserted);
        receipt.notifications.await.unwrap();
    }
    let book = store.find_book("b1").await.unwrap().unwrap();
    assert_eq!(book.avg_rating, 4.17);
    assert_eq!(book.rating_count, 3);

    let receipt = ratings.rate(1, "b1", 5.0).await.unwrap();
    assert!(!receipt.write.inserted);
    assert_eq!(receipt.write.aggregate.avg_rating, 4.5);
    assert_eq!(receipt.write.aggregate.rating_count, 3);
    assert_eq!(
        receipt.notifications.await.unwrap(),
        NotificationReport {
            cache_cleared: true,
            precompute_requested: true,
        }
    );

    let stored = store.find_rating(1, "b1").await.unwrap().unwrap();
    assert_eq!(stored.rating.as_f64(), 5.0);
    assert_eq!(store.ratings_for_book("b1").await.unwrap().len(), 3);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 8);
    let (kind, body) = &calls[calls.len() - 2];
    assert_eq!(*kind, "clear");
    assert_eq!(body, &json!({"user_id": 1}));
    assert_eq!(calls[calls.len() - 1].0, "precompute");
}

#[tokio::test]
async fn test_notification_failures_do_not_affect_the_write() {
    let store: Arc<dyn CatalogStore> = Arc::new(MemoryCatalogStore::new());
    let ratings = coordinator(store.clone(), &unreachable_url()).await;

    let receipt = ratings.rate(9, "b1", 3.5).await.unwrap();
    assert_eq!(receipt.write.aggregate.avg_rating, 3.5);
    assert_eq!(
        receipt.notifications.await.unwrap(),
        NotificationReport::default()
    );
    assert_eq!(
        store.find_book("b1").await.unwrap().unwrap().rating_count,
        1
    );
}

#[tokio::test]
async fn test_rejected_values_and_unknown_books_write_nothing() {
    let calls: Calls = Arc::default();
    let base_url = spawn_cache_stub(calls.clone()).await;
    let store: Arc<dyn CatalogStore> = Arc::new(MemoryCatalogStore::new());
    let ratings = coordinator(store.clone(), &base_url).await;

    for value in [4.3, -0.5, 5.5, f64::NAN] {
        assert!(matches!(
            ratings.rate(1, "b1", value).await,
            Err(DomainError::Validation(_))
        ));
    }
    assert!(matches!(
        ratings.rate(1, "missing", 4.0).await,
        Err(DomainError::NotFound(_))
    ));

    assert!(store.ratings_for_user(1).await.unwrap().is_empty());
    assert_eq!(store.find_book("b1").await.unwrap().unwrap().rating_count, 0);
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_boundary_values_are_accepted() {
    let store: Arc<dyn CatalogStore> = Arc::new(MemoryCatalogStore::new());
    let ratings = coordinator(store.clone(), &unreachable_url()).await;

    ratings.rate(1, "b1", 0.0).await.unwrap();
    let receipt = ratings.rate(2, "b1", 5.0).await.unwrap();
    assert_eq!(receipt.write.aggregate.avg_rating, 2.5);
    assert_eq!(receipt.write.aggregate.rating_count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_keep_count_consistent() {
    let dir = TempDir::new().unwrap();
    let stores: Vec<Arc<dyn CatalogStore>> = vec![
        Arc::new(MemoryCatalogStore::new()),
        Arc::new(SqliteCatalogStore::open(dir.path().join("ratings.db")).unwrap()),
    ];

    for store in stores {
        let ratings = Arc::new(coordinator(store.clone(), &unreachable_url()).await);
        let mut tasks = Vec::new();
        for user_id in 1..=20 {
            let ratings = ratings.clone();
            tasks.push(tokio::spawn(async move {
                ratings.rate(user_id, "b1", 4.0).await.map(|r| r.write)
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let book = store.find_book("b1").await.unwrap().unwrap();
        assert_eq!(book.rating_count, 20);
        assert_eq!(book.avg_rating, 4.0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ratings_from_one_user_keep_a_single_row() {
    let dir = TempDir::new().unwrap();
    let stores: Vec<Arc<dyn CatalogStore>> = vec![
        Arc::new(MemoryCatalogStore::new()),
        Arc::new(SqliteCatalogStore::open(dir.path().join("same-user.db")).unwrap()),
    ];

    for store in stores {
        let ratings = Arc::new(coordinator(store.clone(), &unreachable_url()).await);
        let mut tasks = Vec::new();
        for attempt in 0..20 {
            let ratings = ratings.clone();
            let value = if attempt % 2 == 0 { 1.0 } else { 5.0 };
            tasks.push(tokio::spawn(async move {
                ratings.rate(7, "b1", value).await.map(|r| r.write)
            }));
        }
        let inserted = count_inserted(tasks).await;
        assert_eq!(inserted, 1);

        let rows = store.ratings_for_book("b1").await.unwrap();
        assert_eq!(rows.len(), 1);
        let book = store.find_book("b1").await.unwrap().unwrap();
        assert_eq!(book.rating_count, 1);
        assert_eq!(book.avg_rating, rows[0].rating.as_f64());
    }
}

async fn count_inserted(
    tasks: Vec<tokio::task::JoinHandle<Result<lectern::core::model::RatingWrite, DomainError>>>,
) -> usize {
    let mut inserted = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().inserted {
            inserted += 1;
        }
    }
    inserted
}
