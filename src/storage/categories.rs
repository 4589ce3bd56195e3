use anyhow::{bail, Result};

use super::schema::Database;
use super::types::{Category, Subscriber};
use crate::util::strip_control_chars;

/// Maximum category name length, in characters
const MAX_CATEGORY_NAME_LEN: usize = 40;

/// Split a legacy flat category field ("Music, Tech") into normalized names.
///
/// Older data stored a post's categories as one comma-separated string.
/// Names are trimmed, empty entries dropped and duplicates removed while
/// keeping first-seen order.
pub fn parse_flat_categories(field: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for part in field.split(',') {
        let name = strip_control_chars(part);
        let name = name.trim();
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_owned());
        }
    }
    names
}

impl Database {
    // ========================================================================
    // Category Operations
    // ========================================================================

    /// Sanitize and validate a category name.
    ///
    /// Strips control characters, trims whitespace, rejects empty names and
    /// names longer than 40 characters.
    fn sanitize_category_name(name: &str) -> Result<String> {
        let sanitized = strip_control_chars(name);
        let trimmed = sanitized.trim();
        if trimmed.is_empty() {
            bail!("Category name cannot be empty or whitespace-only");
        }
        if trimmed.chars().count() > MAX_CATEGORY_NAME_LEN {
            bail!(
                "Category name exceeds {} characters",
                MAX_CATEGORY_NAME_LEN
            );
        }
        Ok(trimmed.to_owned())
    }

    /// Create a new category, returning its ID. Names are unique.
    pub async fn create_category(&self, name: &str) -> Result<i64> {
        let clean_name = Self::sanitize_category_name(name)?;

        let row: (i64,) = sqlx::query_as("INSERT INTO categories (name) VALUES (?) RETURNING id")
            .bind(&clean_name)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0)
    }

    pub async fn rename_category(&self, id: i64, new_name: &str) -> Result<()> {
        let clean_name = Self::sanitize_category_name(new_name)?;

        let result = sqlx::query("UPDATE categories SET name = ? WHERE id = ?")
            .bind(&clean_name)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("Category {} not found", id);
        }
        Ok(())
    }

    /// Delete a category. Post associations and subscriptions go with it
    /// (ON DELETE CASCADE); the posts themselves remain.
    pub async fn delete_category(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All categories ordered by name.
    pub async fn list_categories(&self) -> Result<Vec<Category>> {
        let rows = sqlx::query_as::<_, Category>("SELECT id, name FROM categories ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn get_category_by_name(&self, name: &str) -> Result<Option<Category>> {
        let clean_name = strip_control_chars(name);
        let row = sqlx::query_as::<_, Category>("SELECT id, name FROM categories WHERE name = ?")
            .bind(clean_name.trim())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Resolve category names to IDs, failing on the first unknown name.
    pub async fn resolve_category_names(&self, names: &[String]) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            match self.get_category_by_name(name).await? {
                Some(category) => ids.push(category.id),
                None => bail!("Unknown category '{}'", name),
            }
        }
        Ok(ids)
    }

    // ========================================================================
    // Subscription Operations
    // ========================================================================

    /// Subscribe an author to a category. Idempotent: returns `false` if the
    /// author was already subscribed.
    pub async fn subscribe(&self, category_id: i64, author_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO category_subscribers (category_id, author_id) VALUES (?, ?)",
        )
        .bind(category_id)
        .bind(author_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a subscription. Returns `false` if there was none.
    pub async fn unsubscribe(&self, category_id: i64, author_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM category_subscribers WHERE category_id = ? AND author_id = ?",
        )
        .bind(category_id)
        .bind(author_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Subscribers of a category with their email addresses, ordered by author ID.
    pub async fn subscribers_for_category(&self, category_id: i64) -> Result<Vec<Subscriber>> {
        let rows = sqlx::query_as::<_, Subscriber>(
            r#"
            SELECT a.id, a.email
            FROM category_subscribers cs
            JOIN authors a ON a.id = cs.author_id
            WHERE cs.category_id = ?
            ORDER BY a.id
        "#,
        )
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Categories an author follows, ordered by name.
    pub async fn subscribed_categories(&self, author_id: i64) -> Result<Vec<Category>> {
        let rows = sqlx::query_as::<_, Category>(
            r#"
            SELECT c.id, c.name
            FROM category_subscribers cs
            JOIN categories c ON c.id = cs.category_id
            WHERE cs.author_id = ?
            ORDER BY c.name
        "#,
        )
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Categories attached to a post, ordered by name.
    pub async fn categories_for_post(&self, post_id: i64) -> Result<Vec<Category>> {
        let rows = sqlx::query_as::<_, Category>(
            r#"
            SELECT c.id, c.name
            FROM post_categories pc
            JOIN categories c ON c.id = pc.category_id
            WHERE pc.post_id = ?
            ORDER BY c.name
        "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::parse_flat_categories;
    use crate::storage::{Database, NewPost, PostKind};
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_create_category() {
        let db = test_db().await;

        let id = db.create_category("Tech").await.unwrap();
        assert!(id > 0);

        let categories = db.list_categories().await.unwrap();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].name, "Tech");
    }

    #[tokio::test]
    async fn test_duplicate_category_name_rejected() {
        let db = test_db().await;

        db.create_category("Music").await.unwrap();
        assert!(db.create_category("  Music ").await.is_err());
    }

    #[tokio::test]
    async fn test_category_name_validation() {
        let db = test_db().await;

        let err = db.create_category("   ").await.unwrap_err();
        assert!(err.to_string().contains("empty"));

        let err = db.create_category("\x1b[31m\x1b[0m").await.unwrap_err();
        assert!(err.to_string().contains("empty"));

        let err = db.create_category(&"x".repeat(41)).await.unwrap_err();
        assert!(err.to_string().contains("exceeds"));

        let id = db.create_category("\x1b[1mSport\x1b[0m").await.unwrap();
        let category = db.get_category_by_name("Sport").await.unwrap().unwrap();
        assert_eq!(category.id, id);
    }

    #[tokio::test]
    async fn test_rename_category() {
        let db = test_db().await;

        let id = db.create_category("Old Name").await.unwrap();
        db.rename_category(id, "  New Name  ").await.unwrap();

        let categories = db.list_categories().await.unwrap();
        assert_eq!(categories[0].name, "New Name");

        assert!(db.rename_category(id + 1, "Ghost").await.is_err());
        assert!(db.rename_category(id, "").await.is_err());
    }

    #[tokio::test]
    async fn test_list_categories_ordering() {
        let db = test_db().await;

        db.create_category("Zebra").await.unwrap();
        db.create_category("Alpha").await.unwrap();
        db.create_category("Middle").await.unwrap();

        let names: Vec<String> = db
            .list_categories()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Alpha", "Middle", "Zebra"]);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let db = test_db().await;

        let cat = db.create_category("Music").await.unwrap();
        let alice = db.create_author("Alice", "alice@x.com").await.unwrap();

        assert!(db.subscribe(cat, alice).await.unwrap());
        assert!(!db.subscribe(cat, alice).await.unwrap());

        let subscribers = db.subscribers_for_category(cat).await.unwrap();
        assert_eq!(subscribers.len(), 1);
        assert_eq!(subscribers[0].email, "alice@x.com");
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let db = test_db().await;

        let cat = db.create_category("Music").await.unwrap();
        let alice = db.create_author("Alice", "alice@x.com").await.unwrap();
        db.subscribe(cat, alice).await.unwrap();

        assert!(db.unsubscribe(cat, alice).await.unwrap());
        assert!(!db.unsubscribe(cat, alice).await.unwrap());
        assert!(db.subscribers_for_category(cat).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribed_categories() {
        let db = test_db().await;

        let music = db.create_category("Music").await.unwrap();
        let tech = db.create_category("Tech").await.unwrap();
        db.create_category("Sport").await.unwrap();
        let bob = db.create_author("Bob", "bob@x.com").await.unwrap();

        db.subscribe(tech, bob).await.unwrap();
        db.subscribe(music, bob).await.unwrap();

        let names: Vec<String> = db
            .subscribed_categories(bob)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Music", "Tech"]);
    }

    #[tokio::test]
    async fn test_delete_category_keeps_posts() {
        let db = test_db().await;

        let cat = db.create_category("Disposable").await.unwrap();
        let author = db.create_author("Dave", "dave@x.com").await.unwrap();
        db.subscribe(cat, author).await.unwrap();
        let post = db
            .create_post(
                author,
                &NewPost {
                    kind: PostKind::News,
                    title: "Stays".into(),
                    text: "Body".into(),
                    category_ids: vec![cat],
                },
            )
            .await
            .unwrap();

        db.delete_category(cat).await.unwrap();

        assert!(db.get_post(post.id).await.unwrap().is_some());
        assert!(db.categories_for_post(post.id).await.unwrap().is_empty());
        assert!(db.subscribed_categories(author).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_category_names() {
        let db = test_db().await;

        let music = db.create_category("Music").await.unwrap();
        let tech = db.create_category("Tech").await.unwrap();

        let ids = db
            .resolve_category_names(&["Tech".to_string(), "Music".to_string()])
            .await
            .unwrap();
        assert_eq!(ids, vec![tech, music]);

        let err = db
            .resolve_category_names(&["Nope".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown category"));
    }

    #[test]
    fn test_parse_flat_categories() {
        assert_eq!(
            parse_flat_categories(" Music, Tech ,,Music,  "),
            vec!["Music".to_string(), "Tech".to_string()]
        );
        assert!(parse_flat_categories("").is_empty());
        assert!(parse_flat_categories(" , ,").is_empty());
    }
}
