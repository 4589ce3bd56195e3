//! Read-side contract the rate limiter and notifier need from the content store.
//!
//! [`Database`] is the production implementation; tests substitute in-memory
//! fakes to exercise failure paths.

use async_trait::async_trait;
use thiserror::Error;

use crate::storage::{Category, Database, Subscriber};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not answer; callers should treat this as transient
    #[error("Content store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    fn from_anyhow(err: anyhow::Error) -> Self {
        StoreError::Unavailable(format!("{:#}", err))
    }
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Posts by `author_id` with `created_at >= since` (unix seconds)
    async fn count_posts_by_author_since(&self, author_id: i64, since: i64)
        -> Result<i64, StoreError>;

    /// Categories attached to a post, ordered by name
    async fn categories_for_post(&self, post_id: i64) -> Result<Vec<Category>, StoreError>;

    async fn subscribers_for_category(&self, category_id: i64)
        -> Result<Vec<Subscriber>, StoreError>;
}

#[async_trait]
impl ContentStore for Database {
    async fn count_posts_by_author_since(
        &self,
        author_id: i64,
        since: i64,
    ) -> Result<i64, StoreError> {
        Database::count_posts_by_author_since(self, author_id, since)
            .await
            .map_err(StoreError::from_anyhow)
    }

    async fn categories_for_post(&self, post_id: i64) -> Result<Vec<Category>, StoreError> {
        Database::categories_for_post(self, post_id)
            .await
            .map_err(StoreError::from_anyhow)
    }

    async fn subscribers_for_category(
        &self,
        category_id: i64,
    ) -> Result<Vec<Subscriber>, StoreError> {
        Database::subscribers_for_category(self, category_id)
            .await
            .map_err(StoreError::from_anyhow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_store_failures_are_unavailable() {
        let db = Database::open(":memory:").await.unwrap();
        db.pool.close().await;

        let err = ContentStore::count_posts_by_author_since(&db, 1, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(err.to_string().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_database_store_reads() {
        let db = Database::open(":memory:").await.unwrap();
        let cat = db.create_category("Music").await.unwrap();
        let alice = db.create_author("Alice", "alice@x.com").await.unwrap();
        db.subscribe(cat, alice).await.unwrap();

        let store: &dyn ContentStore = &db;
        let subscribers = store.subscribers_for_category(cat).await.unwrap();
        assert_eq!(subscribers.len(), 1);
        assert_eq!(store.count_posts_by_author_since(alice, 0).await.unwrap(), 0);
        assert!(store.categories_for_post(1).await.unwrap().is_empty());
    }
}
