//! Utility functions shared by the notifier, storage and CLI.
//!
//! - **Text**: character-based preview truncation and control-character stripping
//! - **Links**: absolute URLs for post detail pages
//!
//! # Examples
//!
//! ```
//! use newsportal::storage::PostKind;
//! use newsportal::util::{parse_site_url, post_url, truncate};
//!
//! let preview = truncate("A rather long post body", 8);
//! assert_eq!(preview, "A rather...");
//!
//! let base = parse_site_url("https://news.example.com").unwrap();
//! let link = post_url(&base, PostKind::Article, 3).unwrap();
//! assert_eq!(link.as_str(), "https://news.example.com/article/3/");
//! ```

mod links;
mod text;

pub use links::{parse_site_url, post_url, LinkError};
pub use text::{strip_control_chars, truncate, ELLIPSIS};

/// Maximum search query length in characters, enforced by `Database::search_posts`
pub const MAX_SEARCH_QUERY_LENGTH: usize = 256;
