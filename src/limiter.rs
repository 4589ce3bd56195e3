//! Per-author post creation throttle.
//!
//! An author may create at most `max_posts` posts in any trailing window
//! (3 per 24 hours by default). The check is a plain count query: two
//! submissions racing through it can both pass, since nothing locks the
//! author between the count and the insert. That race is accepted.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::config::RateLimitConfig;
use crate::storage::Author;
use crate::store::{ContentStore, StoreError};

/// Outcome of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Creation refused; the reason is suitable for showing to the author
    Denied(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

#[derive(Debug, Error)]
pub enum LimiterError {
    /// The window count could not be read; creation must be refused
    #[error("Rate limit check failed: {0}")]
    StoreUnavailable(#[from] StoreError),
}

pub struct RateLimiter {
    store: Arc<dyn ContentStore>,
    max_posts: i64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn ContentStore>, config: &RateLimitConfig) -> Self {
        Self {
            store,
            max_posts: i64::from(config.max_posts),
            window: Duration::hours(i64::from(config.window_hours)),
        }
    }

    /// Decide whether `author` may create another post at `now`.
    ///
    /// Posts created at exactly `now - window` are inside the window.
    pub async fn check_creation_allowed(
        &self,
        author: &Author,
        now: DateTime<Utc>,
    ) -> Result<Decision, LimiterError> {
        let since = (now - self.window).timestamp();
        let count = self
            .store
            .count_posts_by_author_since(author.id, since)
            .await?;

        if count >= self.max_posts {
            tracing::info!(
                author_id = author.id,
                count = count,
                limit = self.max_posts,
                "Post creation denied by rate limit"
            );
            return Ok(Decision::Denied(format!(
                "{} has reached the limit of {} posts per {} hours",
                author.name,
                self.max_posts,
                self.window.num_hours()
            )));
        }

        tracing::debug!(author_id = author.id, count = count, "Post creation allowed");
        Ok(Decision::Allowed)
    }
}
