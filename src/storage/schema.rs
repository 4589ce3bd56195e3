use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{is_lock_message, DatabaseError};

// ============================================================================
// Database
// ============================================================================

/// Handle to the portal's SQLite content store. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `":memory:"` opens a private in-memory database (used by tests).
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Locked` if another process holds the database
    /// (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() && db_path.parent().is_some_and(|p| p.exists()) {
                // Create with 0600 up front so there is no window with umask permissions.
                // If this fails SQLite reports the real error at connect time.
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok();
            }
        }

        // busy_timeout=5000: wait up to 5 seconds for a competing writer before SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000")
            .foreign_keys(true);

        // Every pooled connection to ":memory:" would get its own empty database
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            if is_lock_message(&e.to_string()) {
                DatabaseError::Locked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        tracing::debug!(path = %path, "Database opened");
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS authors (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                rating INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Composite primary key keeps each subscriber at most once per category
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS category_subscribers (
                category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                author_id INTEGER NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
                PRIMARY KEY (category_id, author_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY,
                author_id INTEGER NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
                kind TEXT NOT NULL CHECK (kind IN ('AR', 'NW')),
                created_at INTEGER NOT NULL,
                title TEXT NOT NULL,
                text TEXT NOT NULL,
                rating INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS post_categories (
                post_id INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                PRIMARY KEY (post_id, category_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY,
                post_id INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                author_id INTEGER NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
                text TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                rating INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Rate limiter window query: WHERE author_id = ? AND created_at >= ?
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_posts_author_created ON posts(author_id, created_at)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_post_categories_category \
             ON post_categories(category_id)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_category_subscribers_author \
             ON category_subscribers(author_id)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_comments_author ON comments(author_id)")
            .execute(&mut *tx)
            .await?;

        // Full-text index over title and body, kept in sync by triggers
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS posts_fts
            USING fts5(title, text, content=posts, content_rowid=id)
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS posts_fts_insert AFTER INSERT ON posts BEGIN
                INSERT INTO posts_fts(rowid, title, text)
                VALUES (new.id, new.title, new.text);
            END
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS posts_fts_delete AFTER DELETE ON posts BEGIN
                INSERT INTO posts_fts(posts_fts, rowid, title, text)
                VALUES ('delete', old.id, old.title, old.text);
            END
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Only title/text edits touch the index; rating changes do not
        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS posts_fts_update AFTER UPDATE OF title, text ON posts BEGIN
                INSERT INTO posts_fts(posts_fts, rowid, title, text)
                VALUES ('delete', old.id, old.title, old.text);
                INSERT INTO posts_fts(rowid, title, text)
                VALUES (new.id, new.title, new.text);
            END
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_creates_schema() {
        let db = Database::open(":memory:").await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'posts_fts%' ORDER BY name",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();

        assert_eq!(
            names,
            vec![
                "authors",
                "categories",
                "category_subscribers",
                "comments",
                "post_categories",
                "posts",
            ]
        );
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::open(":memory:").await.unwrap();
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let db = Database::open(":memory:").await.unwrap();
        let result = sqlx::query(
            "INSERT INTO posts (author_id, kind, created_at, title, text) \
             VALUES (999, 'NW', 0, 't', 'x')",
        )
        .execute(&db.pool)
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = std::env::temp_dir().join("newsportal_schema_test_file");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("portal.db");
        let _ = std::fs::remove_file(&path);

        {
            let db = Database::open(path.to_str().unwrap()).await.unwrap();
            db.pool.close().await;
        }
        // Reopen runs migrations again against existing tables
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        db.pool.close().await;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        std::fs::remove_dir_all(&dir).ok();
    }
}
