//! newsportal: categorized posts, per-author rate limiting, and subscriber
//! email digests on top of SQLite.
//!
//! The creation pipeline lives in [`publish::PostService`], which checks the
//! [`limiter::RateLimiter`], persists through [`storage::Database`] and hands
//! the new post to [`notify::Notifier`].

pub mod config;
pub mod limiter;
pub mod notify;
pub mod publish;
pub mod storage;
pub mod store;
pub mod util;
