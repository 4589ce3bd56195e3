use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;

use super::schema::Database;
use super::search::escape_like;
use super::types::{NewPost, Post, PostDbRow, PostFilter};
use crate::util::strip_control_chars;

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Posts per listing page
pub const PAGE_SIZE: i64 = 10;

const POST_COLUMNS: &str = "p.id, p.author_id, p.kind, p.created_at, p.title, p.text, p.rating";

impl Database {
    // ========================================================================
    // Post Creation
    // ========================================================================

    /// Persist a post stamped with the current time.
    pub async fn create_post(&self, author_id: i64, post: &NewPost) -> Result<Post> {
        self.create_post_at(author_id, post, Utc::now()).await
    }

    /// Persist a post stamped with `now`, together with its category associations.
    ///
    /// The creation timestamp is never earlier than the author's latest post,
    /// so per-author timestamps are non-decreasing even if the clock steps back.
    /// Runs in one transaction: an unknown category ID rolls back the whole post.
    pub async fn create_post_at(
        &self,
        author_id: i64,
        post: &NewPost,
        now: DateTime<Utc>,
    ) -> Result<Post> {
        post.validate()?;
        let title = strip_control_chars(post.title.trim()).into_owned();

        let mut tx = self.pool.begin().await?;

        let latest: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(created_at) FROM posts WHERE author_id = ?")
                .bind(author_id)
                .fetch_one(&mut *tx)
                .await?;
        let created_at = latest.0.map_or(now.timestamp(), |t| t.max(now.timestamp()));

        let row = sqlx::query_as::<_, PostDbRow>(
            r#"
            INSERT INTO posts (author_id, kind, created_at, title, text)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, author_id, kind, created_at, title, text, rating
        "#,
        )
        .bind(author_id)
        .bind(post.kind.code())
        .bind(created_at)
        .bind(&title)
        .bind(&post.text)
        .fetch_one(&mut *tx)
        .await?;

        if !post.category_ids.is_empty() {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("INSERT OR IGNORE INTO post_categories (post_id, category_id) ");
            builder.push_values(&post.category_ids, |mut b, category_id| {
                b.push_bind(row.id).push_bind(*category_id);
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        tracing::debug!(
            post_id = row.id,
            author_id = author_id,
            categories = post.category_ids.len(),
            "Post persisted"
        );
        Ok(row.into_post())
    }

    // ========================================================================
    // Post Queries
    // ========================================================================

    pub async fn get_post(&self, post_id: i64) -> Result<Option<Post>> {
        let row = sqlx::query_as::<_, PostDbRow>(&format!(
            "SELECT {} FROM posts p WHERE p.id = ?",
            POST_COLUMNS
        ))
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PostDbRow::into_post))
    }

    /// Number of posts by `author_id` created at or after `since` (unix seconds).
    pub async fn count_posts_by_author_since(&self, author_id: i64, since: i64) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM posts WHERE author_id = ? AND created_at >= ?")
                .bind(author_id)
                .bind(since)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    /// Filtered listing ordered by title, `PAGE_SIZE` posts per 1-based page.
    pub async fn list_posts(&self, filter: &PostFilter, page: u32) -> Result<Vec<Post>> {
        let offset = i64::from(page.max(1) - 1) * PAGE_SIZE;

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM posts p WHERE 1 = 1", POST_COLUMNS));

        if let Some(title) = filter.title_contains.as_deref().map(str::trim) {
            if !title.is_empty() {
                // SQLite's LIKE folds ASCII case only
                builder.push(" AND p.title LIKE '%' || ");
                builder.push_bind(escape_like(title));
                builder.push(" || '%' ESCAPE '\\'");
            }
        }
        if let Some(above) = filter.rating_above {
            builder.push(" AND p.rating > ");
            builder.push_bind(above);
        }
        if let Some(below) = filter.rating_below {
            builder.push(" AND p.rating < ");
            builder.push_bind(below);
        }
        if let Some(since) = filter.created_since {
            builder.push(" AND p.created_at >= ");
            builder.push_bind(since);
        }
        if let Some(category_id) = filter.category_id {
            builder.push(
                " AND EXISTS (SELECT 1 FROM post_categories pc \
                 WHERE pc.post_id = p.id AND pc.category_id = ",
            );
            builder.push_bind(category_id);
            builder.push(")");
        }

        builder.push(" ORDER BY p.title, p.id LIMIT ");
        builder.push_bind(PAGE_SIZE);
        builder.push(" OFFSET ");
        builder.push_bind(offset);

        let rows = builder
            .build_query_as::<PostDbRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(PostDbRow::into_post).collect())
    }

    // ========================================================================
    // Post Mutations
    // ========================================================================

    /// Replace a post's title and text. The creation timestamp is untouched.
    pub async fn update_post(&self, post_id: i64, title: &str, text: &str) -> Result<()> {
        let title = strip_control_chars(title.trim()).into_owned();
        if title.is_empty() || text.trim().is_empty() {
            bail!("Post title and text cannot be empty");
        }

        let result = sqlx::query("UPDATE posts SET title = ?, text = ? WHERE id = ?")
            .bind(&title)
            .bind(text)
            .bind(post_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("Post {} not found", post_id);
        }
        Ok(())
    }

    /// Delete a post, returning it if it existed. Comments and category
    /// links are removed by ON DELETE CASCADE.
    pub async fn delete_post(&self, post_id: i64) -> Result<Option<Post>> {
        let row = sqlx::query_as::<_, PostDbRow>(
            "DELETE FROM posts WHERE id = ? \
             RETURNING id, author_id, kind, created_at, title, text, rating",
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(PostDbRow::into_post))
    }

    pub async fn like_post(&self, post_id: i64) -> Result<i64> {
        self.adjust_post_rating(post_id, 1).await
    }

    pub async fn dislike_post(&self, post_id: i64) -> Result<i64> {
        self.adjust_post_rating(post_id, -1).await
    }

    /// Returns the new rating
    async fn adjust_post_rating(&self, post_id: i64, delta: i64) -> Result<i64> {
        let row: Option<(i64,)> =
            sqlx::query_as("UPDATE posts SET rating = rating + ? WHERE id = ? RETURNING rating")
                .bind(delta)
                .bind(post_id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((rating,)) => Ok(rating),
            None => bail!("Post {} not found", post_id),
        }
    }
}
