use url::Url;

use crate::storage::{Category, Post};
use crate::util::{post_url, strip_control_chars, truncate, LinkError};

/// Subject and body of a new-post digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composed {
    pub subject: String,
    pub body: String,
}

/// Compose the new-post message: `"{title} [{Cat, Cat}]"` plus a text preview
/// and an absolute link to the post.
pub fn compose_new_post(
    post: &Post,
    categories: &[Category],
    site_url: &Url,
    preview_chars: usize,
) -> Result<Composed, LinkError> {
    let title = strip_control_chars(&post.title);
    let names: Vec<&str> = categories.iter().map(|c| c.name.as_str()).collect();
    let subject = format!("{} [{}]", title.replace(['\r', '\n'], " "), names.join(", "));

    let link = post_url(site_url, post.kind, post.id)?;
    let body = format!(
        "New {kind} in {categories}: {title}\n\n{preview}\n\nRead more: {link}\n",
        kind = post.kind,
        categories = names.join(", "),
        title = title,
        preview = truncate(&post.text, preview_chars),
        link = link,
    );

    Ok(Composed { subject, body })
}

/// Audit message sent to managers when a post is removed.
pub fn compose_post_deleted(post: &Post) -> Composed {
    let title = strip_control_chars(&post.title);
    Composed {
        subject: format!("Post \"{}\" was deleted", title.replace(['\r', '\n'], " ")),
        body: post.text.to_string(),
    }
}

/// Audit message sent to managers when a post's title or text is changed.
pub fn compose_post_edited(post: &Post) -> Composed {
    let title = strip_control_chars(&post.title);
    Composed {
        subject: format!("Post \"{}\" was changed", title.replace(['\r', '\n'], " ")),
        body: post.text.to_string(),
    }
}
