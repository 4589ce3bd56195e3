use anyhow::{bail, Result};

use super::schema::Database;
use super::types::{Post, PostDbRow};
use crate::util::MAX_SEARCH_QUERY_LENGTH;

// ============================================================================
// FTS5 Query Validation
// ============================================================================

const MAX_WILDCARDS: usize = 3;
const MAX_OR_OPERATORS: usize = 5;
const MAX_PARENTHESES: usize = 5;

/// Maximum number of posts returned by a single search
const MAX_RESULTS: i64 = 500;

/// Escape `\`, `%` and `_` so user text matches literally in `LIKE ... ESCAPE '\'`.
pub(super) fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Reject FTS5 queries whose wildcard or boolean expansion would be expensive.
fn validate_search_query(query: &str) -> Result<()> {
    if query.chars().count() > MAX_SEARCH_QUERY_LENGTH {
        bail!(
            "Search query exceeds maximum length of {} characters",
            MAX_SEARCH_QUERY_LENGTH
        );
    }
    if query.matches('*').count() > MAX_WILDCARDS {
        bail!("Search query contains too many wildcards (max {})", MAX_WILDCARDS);
    }
    if query.to_uppercase().matches(" OR ").count() > MAX_OR_OPERATORS {
        bail!(
            "Search query contains too many OR operators (max {})",
            MAX_OR_OPERATORS
        );
    }

    let open = query.chars().filter(|&c| c == '(').count();
    let close = query.chars().filter(|&c| c == ')').count();
    if open > MAX_PARENTHESES {
        bail!(
            "Search query contains too many parentheses (max {})",
            MAX_PARENTHESES
        );
    }
    if open != close {
        bail!("Search query has unbalanced parentheses");
    }
    Ok(())
}

impl Database {
    // ========================================================================
    // Search Operations
    // ========================================================================

    /// Search posts by title or text, optionally restricted to one category.
    ///
    /// Uses FTS5 ranking first and falls back to a substring match when the
    /// query is not valid FTS5 syntax. Each post appears at most once.
    pub async fn search_posts(&self, query: &str, category_id: Option<i64>) -> Result<Vec<Post>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        validate_search_query(query)?;

        let fts_result = sqlx::query_as::<_, PostDbRow>(
            r#"
            SELECT p.id, p.author_id, p.kind, p.created_at, p.title, p.text, p.rating
            FROM posts p
            INNER JOIN posts_fts ON p.id = posts_fts.rowid
            WHERE posts_fts MATCH ?1
              AND (?2 IS NULL OR EXISTS (
                  SELECT 1 FROM post_categories pc
                  WHERE pc.post_id = p.id AND pc.category_id = ?2))
            ORDER BY posts_fts.rank, p.created_at DESC
            LIMIT ?3
        "#,
        )
        .bind(query)
        .bind(category_id)
        .bind(MAX_RESULTS)
        .fetch_all(&self.pool)
        .await;

        let rows = match fts_result {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    query = %query,
                    "FTS5 search failed, falling back to LIKE"
                );
                let pattern = format!("%{}%", escape_like(query));
                sqlx::query_as::<_, PostDbRow>(
                    r#"
                    SELECT p.id, p.author_id, p.kind, p.created_at, p.title, p.text, p.rating
                    FROM posts p
                    WHERE (p.title LIKE ?1 ESCAPE '\' OR p.text LIKE ?1 ESCAPE '\')
                      AND (?2 IS NULL OR EXISTS (
                          SELECT 1 FROM post_categories pc
                          WHERE pc.post_id = p.id AND pc.category_id = ?2))
                    ORDER BY p.created_at DESC
                    LIMIT ?3
                "#,
                )
                .bind(&pattern)
                .bind(category_id)
                .bind(MAX_RESULTS)
                .fetch_all(&self.pool)
                .await?
            }
        };

        tracing::debug!(query = %query, results = rows.len(), "search_posts");
        Ok(rows.into_iter().map(PostDbRow::into_post).collect())
    }

    /// Rebuild the FTS5 index from the posts table, returning the number of posts indexed.
    pub async fn rebuild_search_index(&self) -> Result<usize> {
        sqlx::query("INSERT INTO posts_fts(posts_fts) VALUES('rebuild')")
            .execute(&self.pool)
            .await?;

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::{escape_like, validate_search_query};
    use crate::storage::{Database, NewPost, PostKind};
    use crate::util::MAX_SEARCH_QUERY_LENGTH;

    async fn seeded() -> (Database, i64, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let author = db.create_author("Dave", "dave@x.com").await.unwrap();
        let music = db.create_category("Music").await.unwrap();
        let tech = db.create_category("Tech").await.unwrap();

        let posts = [
            ("Rust 2.0 released", "Compiler news for systems programmers", vec![tech]),
            (
                "Festival lineup",
                "Rust the band headlines the festival",
                vec![music, tech],
            ),
            ("Python tutorial", "Learning list comprehensions", vec![tech]),
        ];
        for (title, text, categories) in posts {
            db.create_post(
                author,
                &NewPost {
                    kind: PostKind::News,
                    title: title.into(),
                    text: text.into(),
                    category_ids: categories,
                },
            )
            .await
            .unwrap();
        }
        (db, music, tech)
    }

    #[tokio::test]
    async fn test_search_title_and_text() {
        let (db, _, _) = seeded().await;

        let results = db.search_posts("rust", None).await.unwrap();
        let mut titles: Vec<String> = results.iter().map(|p| p.title.to_string()).collect();
        titles.sort();
        assert_eq!(titles, vec!["Festival lineup", "Rust 2.0 released"]);
    }

    #[tokio::test]
    async fn test_search_restricted_to_category() {
        let (db, music, tech) = seeded().await;

        let results = db.search_posts("rust", Some(music)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(&*results[0].title, "Festival lineup");

        // Post in two categories is returned once
        let results = db.search_posts("festival", Some(tech)).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_search_empty_query() {
        let (db, _, _) = seeded().await;
        assert!(db.search_posts("   ", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_rejects_overlong_query() {
        let (db, _, _) = seeded().await;

        let at_limit = "é".repeat(MAX_SEARCH_QUERY_LENGTH);
        assert!(db.search_posts(&at_limit, None).await.unwrap().is_empty());

        let err = db
            .search_posts(&format!("{}x", at_limit), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("maximum length"));
    }

    #[tokio::test]
    async fn test_search_invalid_fts_syntax_falls_back() {
        let (db, _, _) = seeded().await;
        // A bare quote is an FTS5 syntax error; the LIKE fallback answers instead
        let results = db.search_posts("\"2.0", None).await;
        assert!(results.is_ok());
    }

    #[tokio::test]
    async fn test_search_sees_edits_and_deletes() {
        let (db, _, _) = seeded().await;

        let post = db.search_posts("python", None).await.unwrap().remove(0);
        db.update_post(post.id, "Go tutorial", "Goroutines explained")
            .await
            .unwrap();
        assert!(db.search_posts("python", None).await.unwrap().is_empty());
        assert_eq!(db.search_posts("goroutines", None).await.unwrap().len(), 1);

        db.delete_post(post.id).await.unwrap();
        assert!(db.search_posts("goroutines", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_search_index() {
        let (db, _, _) = seeded().await;
        assert_eq!(db.rebuild_search_index().await.unwrap(), 3);
        assert_eq!(db.search_posts("rust", None).await.unwrap().len(), 2);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[tokio::test]
    async fn test_like_fallback_matches_wildcards_literally() {
        let db = Database::open(":memory:").await.unwrap();
        let author = db.create_author("Dave", "dave@x.com").await.unwrap();
        for title in ["Quote \"50% off", "Quote \"500 units"] {
            db.create_post(
                author,
                &NewPost {
                    kind: PostKind::News,
                    title: title.into(),
                    text: "Prices".into(),
                    category_ids: vec![],
                },
            )
            .await
            .unwrap();
        }

        // An unterminated FTS5 string forces the LIKE path
        let results = db.search_posts("\"50%", None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(&*results[0].title, "Quote \"50% off");

        assert!(db.search_posts("\"5_0", None).await.unwrap().is_empty());
    }

    #[test]
    fn test_validate_search_query_limits() {
        assert!(validate_search_query("rust AND news").is_ok());
        assert!(validate_search_query(&"a".repeat(257)).is_err());
        assert!(validate_search_query("a* b* c* d*").is_err());
        assert!(validate_search_query("a OR b OR c OR d OR e OR f OR g").is_err());
        assert!(validate_search_query("(rust").is_err());
        assert!(validate_search_query("((((((a))))))").is_err());
    }
}
