//! Subscriber notifications for newly published posts.
//!
//! [`Notifier::notify_new_post`] resolves the post's categories, gathers their
//! subscribers, removes duplicates and the post's own author, and sends one
//! digest message to everyone left. Failures are reported through
//! [`NotificationOutcome`], never raised: a post that was persisted stays
//! persisted whatever happens to its mail.

pub mod mailer;
mod message;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::Config;
use crate::storage::{Post, Subscriber};
use crate::store::{ContentStore, StoreError};
use crate::util::{parse_site_url, LinkError};
use mailer::{MailDispatcher, MailError, OutgoingMail};

pub use message::{compose_new_post, compose_post_deleted, compose_post_edited, Composed};

// ============================================================================
// Outcome Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The post has no categories, so nobody is subscribed to it
    NoCategories,
    /// Every candidate was filtered out (or there were none)
    NoRecipients,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to compose message: {0}")]
    Compose(#[from] LinkError),

    #[error("Mail dispatch failed: {0}")]
    Dispatch(#[from] MailError),

    #[error("Mail dispatch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Mail dispatch cancelled")]
    Cancelled,
}

#[derive(Debug)]
pub enum NotificationOutcome {
    /// One message went out to this many recipients
    Sent(usize),
    Skipped(SkipReason),
    Failed(NotifyError),
}

impl NotificationOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, NotificationOutcome::Sent(_))
    }
}

// ============================================================================
// Recipient selection
// ============================================================================

/// Collapse subscribers into a recipient list.
///
/// Addresses compare case-insensitively and the first spelling seen wins.
/// Every address belonging to `author_id` is dropped. The result is sorted by
/// lowercased address so the same input always yields the same list.
pub fn collect_recipients<I>(subscribers: I, author_id: i64) -> Vec<String>
where
    I: IntoIterator<Item = Subscriber>,
{
    let mut by_key: BTreeMap<String, String> = BTreeMap::new();
    let mut author_keys = Vec::new();

    for subscriber in subscribers {
        let email = subscriber.email.trim();
        if email.is_empty() {
            continue;
        }
        let key = email.to_lowercase();
        if subscriber.id == author_id {
            author_keys.push(key.clone());
        }
        by_key.entry(key).or_insert_with(|| email.to_string());
    }

    for key in &author_keys {
        by_key.remove(key);
    }
    by_key.into_values().collect()
}

// ============================================================================
// Notifier
// ============================================================================

pub struct Notifier {
    store: Arc<dyn ContentStore>,
    mailer: Arc<dyn MailDispatcher>,
    from: String,
    site_url: Url,
    preview_chars: usize,
    dispatch_timeout: Duration,
    managers: Vec<String>,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn ContentStore>,
        mailer: Arc<dyn MailDispatcher>,
        config: &Config,
    ) -> Result<Self, LinkError> {
        Ok(Self {
            store,
            mailer,
            from: config.mail.from_address.clone(),
            site_url: parse_site_url(&config.site_url)?,
            preview_chars: config.notifications.preview_chars,
            dispatch_timeout: Duration::from_secs(config.notifications.dispatch_timeout_secs),
            managers: config.notifications.managers.clone(),
        })
    }

    /// Override the dispatch timeout (sub-second values are useful in tests).
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Notify category subscribers about a newly persisted post.
    ///
    /// Sends at most one message. Store failures abort before anything is
    /// composed; there are no retries.
    pub async fn notify_new_post(
        &self,
        post: &Post,
        cancel: &CancellationToken,
    ) -> NotificationOutcome {
        let outcome = match self.prepare_new_post(post).await {
            Ok(Ok(mail)) => self.dispatch(mail, cancel).await,
            Ok(Err(reason)) => NotificationOutcome::Skipped(reason),
            Err(e) => NotificationOutcome::Failed(e),
        };

        match &outcome {
            NotificationOutcome::Sent(count) => {
                tracing::info!(post_id = post.id, recipients = count, "Subscribers notified")
            }
            NotificationOutcome::Skipped(reason) => {
                tracing::debug!(post_id = post.id, reason = ?reason, "Notification skipped")
            }
            NotificationOutcome::Failed(e) => {
                tracing::warn!(post_id = post.id, error = %e, "Subscriber notification failed")
            }
        }
        outcome
    }

    async fn prepare_new_post(
        &self,
        post: &Post,
    ) -> Result<Result<OutgoingMail, SkipReason>, NotifyError> {
        let categories = self.store.categories_for_post(post.id).await?;
        if categories.is_empty() {
            return Ok(Err(SkipReason::NoCategories));
        }

        let mut subscribers = Vec::new();
        for category in &categories {
            subscribers.extend(self.store.subscribers_for_category(category.id).await?);
        }

        let recipients = collect_recipients(subscribers, post.author_id);
        if recipients.is_empty() {
            return Ok(Err(SkipReason::NoRecipients));
        }

        let Composed { subject, body } =
            compose_new_post(post, &categories, &self.site_url, self.preview_chars)?;
        Ok(Ok(OutgoingMail {
            subject,
            body,
            from: self.from.clone(),
            recipients,
        }))
    }

    /// Tell the configured managers that a post was deleted.
    pub async fn notify_managers_post_deleted(
        &self,
        post: &Post,
        cancel: &CancellationToken,
    ) -> NotificationOutcome {
        self.notify_managers(post, compose_post_deleted(post), cancel).await
    }

    /// Tell the configured managers that a post's title or text changed.
    pub async fn notify_managers_post_edited(
        &self,
        post: &Post,
        cancel: &CancellationToken,
    ) -> NotificationOutcome {
        self.notify_managers(post, compose_post_edited(post), cancel).await
    }

    async fn notify_managers(
        &self,
        post: &Post,
        message: Composed,
        cancel: &CancellationToken,
    ) -> NotificationOutcome {
        let managers = collect_recipients(
            self.managers.iter().map(|email| Subscriber {
                id: 0,
                email: email.clone(),
            }),
            -1,
        );
        if managers.is_empty() {
            return NotificationOutcome::Skipped(SkipReason::NoRecipients);
        }

        let Composed { subject, body } = message;
        let outcome = self
            .dispatch(
                OutgoingMail {
                    subject,
                    body,
                    from: self.from.clone(),
                    recipients: managers,
                },
                cancel,
            )
            .await;
        if let NotificationOutcome::Failed(e) = &outcome {
            tracing::warn!(post_id = post.id, error = %e, "Manager notification failed");
        }
        outcome
    }

    /// Single dispatch attempt, bounded by the timeout and the cancellation token.
    async fn dispatch(
        &self,
        mail: OutgoingMail,
        cancel: &CancellationToken,
    ) -> NotificationOutcome {
        let count = mail.recipients.len();
        let send = tokio::time::timeout(self.dispatch_timeout, self.mailer.send(&mail));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => NotificationOutcome::Failed(NotifyError::Cancelled),
            result = send => match result {
                Ok(Ok(())) => NotificationOutcome::Sent(count),
                Ok(Err(e)) => NotificationOutcome::Failed(NotifyError::Dispatch(e)),
                Err(_) => NotificationOutcome::Failed(NotifyError::Timeout(self.dispatch_timeout)),
            },
        }
    }
}
