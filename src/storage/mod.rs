mod authors;
mod categories;
mod comments;
mod posts;
mod schema;
mod search;
mod types;

pub use categories::parse_flat_categories;
pub use posts::PAGE_SIZE;
pub use schema::Database;
pub use types::{
    Author, Category, Comment, DatabaseError, NewPost, Post, PostFilter, PostKind, Subscriber,
    ValidationError, MAX_TITLE_LEN,
};
