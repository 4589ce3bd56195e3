use anyhow::{bail, Result};

use super::schema::Database;
use super::types::Author;
use crate::util::strip_control_chars;

impl Database {
    // ========================================================================
    // Author Operations
    // ========================================================================

    /// Register an author, returning its ID.
    ///
    /// The display name is sanitized like category names. Emails are unique
    /// regardless of case; registering an existing email fails.
    pub async fn create_author(&self, name: &str, email: &str) -> Result<i64> {
        let name = strip_control_chars(name);
        let name = name.trim();
        if name.is_empty() {
            bail!("Author name cannot be empty or whitespace-only");
        }
        let email = email.trim();
        // Same parser the SMTP backend uses, so a stored address is always deliverable
        if let Err(e) = email.parse::<lettre::Address>() {
            bail!("Invalid email address '{}': {}", email, e);
        }

        let row: (i64,) =
            sqlx::query_as("INSERT INTO authors (name, email) VALUES (?, ?) RETURNING id")
                .bind(name)
                .bind(email)
                .fetch_one(&self.pool)
                .await?;

        tracing::debug!(author_id = row.0, "Author created");
        Ok(row.0)
    }

    pub async fn get_author(&self, author_id: i64) -> Result<Option<Author>> {
        let author = sqlx::query_as::<_, Author>(
            "SELECT id, name, email, rating FROM authors WHERE id = ?",
        )
        .bind(author_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(author)
    }

    /// Recompute and store an author's rating.
    ///
    /// rating = 3 * (sum of the author's post ratings)
    ///        + (sum of ratings of comments the author wrote)
    ///        + (sum of ratings of all comments on the author's posts)
    ///
    /// Missing sums count as zero. Returns the new rating.
    pub async fn update_author_rating(&self, author_id: i64) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            UPDATE authors SET rating =
                3 * (SELECT COALESCE(SUM(rating), 0) FROM posts WHERE author_id = ?1)
                + (SELECT COALESCE(SUM(rating), 0) FROM comments WHERE author_id = ?1)
                + (SELECT COALESCE(SUM(c.rating), 0)
                   FROM comments c
                   JOIN posts p ON p.id = c.post_id
                   WHERE p.author_id = ?1)
            WHERE id = ?1
            RETURNING rating
        "#,
        )
        .bind(author_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Author {} not found", author_id))?;

        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, NewPost, PostKind};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_author() {
        let db = test_db().await;

        let id = db.create_author("  Dave  ", "dave@x.com").await.unwrap();
        let author = db.get_author(id).await.unwrap().unwrap();
        assert_eq!(author.name, "Dave");
        assert_eq!(author.email, "dave@x.com");
        assert_eq!(author.rating, 0);

        assert!(db.get_author(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected_case_insensitively() {
        let db = test_db().await;

        db.create_author("Dave", "dave@x.com").await.unwrap();
        assert!(db.create_author("David", "DAVE@X.COM").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_author_input_rejected() {
        let db = test_db().await;

        assert!(db.create_author("", "a@x.com").await.is_err());
        assert!(db.create_author("A", "not-an-email").await.is_err());
        assert!(db.create_author("A", "a b@x.com").await.is_err());
        assert!(db.create_author("A", "a@@x.com").await.is_err());
    }

    #[tokio::test]
    async fn test_author_email_must_be_mailable() {
        let db = test_db().await;

        // Passes a naive '@' + dotted-domain check but is not a valid mailbox
        let err = db.create_author("Eve", "e\"ve@x.com").await.unwrap_err();
        assert!(err.to_string().contains("Invalid email address"));

        let id = db.create_author("Eve", "eve+news@x.com").await.unwrap();
        let stored = db.get_author(id).await.unwrap().unwrap().email;
        assert!(stored.parse::<lettre::Address>().is_ok());
    }

    #[tokio::test]
    async fn test_update_author_rating_formula() {
        let db = test_db().await;

        let author = db.create_author("Writer", "writer@x.com").await.unwrap();
        let reader = db.create_author("Reader", "reader@x.com").await.unwrap();
        let other = db.create_author("Other", "other@x.com").await.unwrap();

        let post = db
            .create_post(
                author,
                &NewPost {
                    kind: PostKind::Article,
                    title: "Rated".into(),
                    text: "Body".into(),
                    category_ids: vec![],
                },
            )
            .await
            .unwrap();
        // Post rating 2 -> contributes 6
        db.like_post(post.id).await.unwrap();
        db.like_post(post.id).await.unwrap();

        // Comment by the author on own post, rating 1 -> counted twice (own comment + on own post)
        let own = db.add_comment(post.id, author, "thanks").await.unwrap();
        db.like_comment(own).await.unwrap();

        // Reader's comment on the author's post, rating -1
        let c = db.add_comment(post.id, reader, "meh").await.unwrap();
        db.dislike_comment(c).await.unwrap();

        // Author's comment on someone else's post, rating 4
        let other_post = db
            .create_post(
                other,
                &NewPost {
                    kind: PostKind::News,
                    title: "Elsewhere".into(),
                    text: "Body".into(),
                    category_ids: vec![],
                },
            )
            .await
            .unwrap();
        let away = db.add_comment(other_post.id, author, "nice").await.unwrap();
        for _ in 0..4 {
            db.like_comment(away).await.unwrap();
        }

        // 3*2 + (1 + 4) + (1 - 1) = 11
        let rating = db.update_author_rating(author).await.unwrap();
        assert_eq!(rating, 11);
        assert_eq!(db.get_author(author).await.unwrap().unwrap().rating, 11);
    }

    #[tokio::test]
    async fn test_update_rating_without_activity_is_zero() {
        let db = test_db().await;
        let id = db.create_author("Quiet", "quiet@x.com").await.unwrap();
        assert_eq!(db.update_author_rating(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_rating_unknown_author() {
        let db = test_db().await;
        assert!(db.update_author_rating(42).await.is_err());
    }
}
