//! Post creation endpoint.
//!
//! [`PostService::publish`] runs the creation pipeline in a fixed order:
//! validate, rate-limit, persist, notify. Each step only runs if the one
//! before it succeeded, and a post that reached the database is returned even
//! when its notification fails.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::limiter::{Decision, LimiterError, RateLimiter};
use crate::notify::{NotificationOutcome, Notifier};
use crate::storage::{Author, Database, NewPost, Post, ValidationError};

#[derive(Debug, Error)]
pub enum PublishError {
    /// The author hit the per-window post limit
    #[error("{0}")]
    RateLimited(String),

    /// The limit could not be checked; retry later
    #[error("Cannot create post right now: {0}")]
    StoreUnavailable(#[from] LimiterError),

    #[error("Invalid post: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Post creation cancelled")]
    Cancelled,

    #[error("Failed to save post: {0:#}")]
    Persist(anyhow::Error),
}

/// A persisted post plus what happened to its subscriber notification.
#[derive(Debug)]
pub struct Published {
    pub post: Post,
    pub notification: NotificationOutcome,
}

pub struct PostService {
    db: Database,
    limiter: RateLimiter,
    notifier: Arc<Notifier>,
}

impl PostService {
    pub fn new(db: Database, limiter: RateLimiter, notifier: Arc<Notifier>) -> Self {
        Self {
            db,
            limiter,
            notifier,
        }
    }

    pub async fn publish(
        &self,
        author: &Author,
        new_post: NewPost,
        cancel: &CancellationToken,
    ) -> Result<Published, PublishError> {
        self.publish_at(author, new_post, cancel, Utc::now()).await
    }

    /// Create a post as of `now`.
    ///
    /// Cancellation before persistence leaves nothing behind; afterwards it
    /// only affects the notification.
    pub async fn publish_at(
        &self,
        author: &Author,
        new_post: NewPost,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
    ) -> Result<Published, PublishError> {
        new_post.validate()?;

        if cancel.is_cancelled() {
            return Err(PublishError::Cancelled);
        }

        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PublishError::Cancelled),
            decision = self.limiter.check_creation_allowed(author, now) => decision,
        };
        match decision {
            Ok(Decision::Allowed) => {}
            Ok(Decision::Denied(reason)) => return Err(PublishError::RateLimited(reason)),
            Err(e) => {
                tracing::error!(
                    author_id = author.id,
                    error = %e,
                    "Rate limit check failed, refusing post"
                );
                return Err(PublishError::StoreUnavailable(e));
            }
        }

        if cancel.is_cancelled() {
            return Err(PublishError::Cancelled);
        }

        let post = self
            .db
            .create_post_at(author.id, &new_post, now)
            .await
            .map_err(PublishError::Persist)?;
        tracing::info!(
            post_id = post.id,
            author_id = author.id,
            kind = %post.kind,
            "Post published"
        );

        let notification = self.notifier.notify_new_post(&post, cancel).await;
        Ok(Published { post, notification })
    }

    /// Replace a post's title and text and send the managers' change notice.
    ///
    /// Fails when no post has that ID or the new content is empty.
    pub async fn edit_post(
        &self,
        post_id: i64,
        title: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> anyhow::Result<(Post, NotificationOutcome)> {
        self.db.update_post(post_id, title, text).await?;
        let post = self
            .db
            .get_post(post_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Post {} not found", post_id))?;
        tracing::info!(post_id = post.id, "Post edited");

        let outcome = self.notifier.notify_managers_post_edited(&post, cancel).await;
        Ok((post, outcome))
    }

    /// Delete a post and send the managers' audit notice.
    ///
    /// Returns `None` when no post has that ID.
    pub async fn delete_post(
        &self,
        post_id: i64,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Option<(Post, NotificationOutcome)>> {
        let Some(post) = self.db.delete_post(post_id).await? else {
            return Ok(None);
        };
        tracing::info!(post_id = post.id, "Post deleted");

        let outcome = self.notifier.notify_managers_post_deleted(&post, cancel).await;
        Ok(Some((post, outcome)))
    }
}
