use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds a lock on the database file
    #[error("The portal database is locked by another process. Please try again.")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, mapping SQLite lock conditions to [`DatabaseError::Locked`]
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::Locked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) surface as these messages
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Post Kind
// ============================================================================

/// Kind of content item. Stored as the two-letter codes `AR` / `NW`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostKind {
    Article,
    News,
}

impl PostKind {
    pub fn code(self) -> &'static str {
        match self {
            PostKind::Article => "AR",
            PostKind::News => "NW",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "AR" => Some(PostKind::Article),
            "NW" => Some(PostKind::News),
            _ => None,
        }
    }
}

impl fmt::Display for PostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostKind::Article => f.write_str("article"),
            PostKind::News => f.write_str("news"),
        }
    }
}

impl FromStr for PostKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "article" | "ar" => Ok(PostKind::Article),
            "news" | "nw" => Ok(PostKind::News),
            other => Err(format!("unknown post kind '{}' (expected news or article)", other)),
        }
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// A post submission that has passed validation but is not yet persisted.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub kind: PostKind,
    pub title: String,
    pub text: String,
    /// Category IDs to associate; duplicates are ignored
    pub category_ids: Vec<i64>,
}

/// Filters for the post listing. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    /// Case-insensitive substring of the title
    pub title_contains: Option<String>,
    /// Strictly greater than
    pub rating_above: Option<i64>,
    /// Strictly less than
    pub rating_below: Option<i64>,
    /// Unix seconds; posts created at or after this moment
    pub created_since: Option<i64>,
    pub category_id: Option<i64>,
}

/// Internal row type for Post queries (used by sqlx FromRow)
/// Converts to Post via into_post() with Arc wrapping
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PostDbRow {
    pub id: i64,
    pub author_id: i64,
    pub kind: String,
    pub created_at: i64,
    pub title: String,
    pub text: String,
    pub rating: i64,
}

impl PostDbRow {
    pub(crate) fn into_post(self) -> Post {
        let kind = PostKind::from_code(&self.kind).unwrap_or_else(|| {
            tracing::warn!(
                post_id = self.id,
                kind = %self.kind,
                "Unknown post kind code, treating as news"
            );
            PostKind::News
        });
        Post {
            id: self.id,
            author_id: self.author_id,
            kind,
            created_at: self.created_at,
            title: Arc::from(self.title),
            text: Arc::from(self.text),
            rating: self.rating,
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A registered author. Authors are also the subscribers of categories.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Author {
    pub id: i64,
    /// Display handle shown to readers
    pub name: String,
    pub email: String,
    pub rating: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

/// A category subscriber as needed for mail delivery.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Subscriber {
    pub id: i64,
    pub email: String,
}

/// Post data from database
///
/// `title` and `text` use `Arc<str>` so the post can be handed to the notifier
/// and the caller without copying the body.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: i64,
    pub author_id: i64,
    pub kind: PostKind,
    /// Unix seconds, assigned once at persistence
    pub created_at: i64,
    pub title: Arc<str>,
    pub text: Arc<str>,
    pub rating: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub text: String,
    pub created_at: i64,
    pub rating: i64,
}

// ============================================================================
// Validation
// ============================================================================

/// Maximum post title length, in characters
pub const MAX_TITLE_LEN: usize = 255;

/// Reasons a post submission is rejected before it reaches the database
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Post title cannot be empty")]
    EmptyTitle,
    #[error("Post title exceeds {} characters", MAX_TITLE_LEN)]
    TitleTooLong,
    #[error("Post text cannot be empty")]
    EmptyText,
}

impl NewPost {
    /// Check a submission's fields. Whitespace-only title or text counts as empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(ValidationError::TitleTooLong);
        }
        if self.text.trim().is_empty() {
            return Err(ValidationError::EmptyText);
        }
        Ok(())
    }
}
