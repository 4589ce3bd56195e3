use anyhow::{bail, Result};

use super::schema::Database;
use super::types::Comment;

impl Database {
    // ========================================================================
    // Comment Operations
    // ========================================================================

    /// Add a comment to a post, returning its ID.
    pub async fn add_comment(&self, post_id: i64, author_id: i64, text: &str) -> Result<i64> {
        let text = text.trim();
        if text.is_empty() {
            bail!("Comment text cannot be empty");
        }

        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO comments (post_id, author_id, text, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(post_id)
        .bind(author_id)
        .bind(text)
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Comments on a post, oldest first.
    pub async fn comments_for_post(&self, post_id: i64) -> Result<Vec<Comment>> {
        let rows = sqlx::query_as::<_, Comment>(
            r#"
            SELECT id, post_id, author_id, text, created_at, rating
            FROM comments
            WHERE post_id = ?
            ORDER BY created_at, id
        "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn like_comment(&self, comment_id: i64) -> Result<i64> {
        self.adjust_comment_rating(comment_id, 1).await
    }

    pub async fn dislike_comment(&self, comment_id: i64) -> Result<i64> {
        self.adjust_comment_rating(comment_id, -1).await
    }

    async fn adjust_comment_rating(&self, comment_id: i64, delta: i64) -> Result<i64> {
        let row: Option<(i64,)> =
            sqlx::query_as("UPDATE comments SET rating = rating + ? WHERE id = ? RETURNING rating")
                .bind(delta)
                .bind(comment_id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((rating,)) => Ok(rating),
            None => bail!("Comment {} not found", comment_id),
        }
    }
}
