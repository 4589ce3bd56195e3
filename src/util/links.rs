use thiserror::Error;
use url::Url;

use crate::storage::PostKind;

/// Errors building absolute links to site pages.
#[derive(Error, Debug)]
pub enum LinkError {
    /// The configured site URL could not be parsed.
    #[error("Invalid site URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The site URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The site URL has no host component.
    #[error("Site URL has no host")]
    MissingHost,
}

/// Parse and validate the public base URL of the site.
///
/// The base must be an absolute http(s) URL with a host. A trailing slash is
/// added to the path when missing so that [`Url::join`] appends rather than
/// replaces the last segment (`https://x.com/portal` keeps `/portal/`).
///
/// # Examples
///
/// ```
/// use newsportal::util::parse_site_url;
///
/// let base = parse_site_url("https://news.example.com/portal").unwrap();
/// assert_eq!(base.as_str(), "https://news.example.com/portal/");
/// assert!(parse_site_url("ftp://example.com").is_err());
/// ```
pub fn parse_site_url(raw: &str) -> Result<Url, LinkError> {
    let mut url = Url::parse(raw.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(LinkError::UnsupportedScheme(scheme.to_owned())),
    }
    if url.host_str().is_none() {
        return Err(LinkError::MissingHost);
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Absolute link to a post's detail page.
///
/// News items live under `news/<id>/`, articles under `article/<id>/`.
pub fn post_url(base: &Url, kind: PostKind, post_id: i64) -> Result<Url, LinkError> {
    let segment = match kind {
        PostKind::News => "news",
        PostKind::Article => "article",
    };
    Ok(base.join(&format!("{}/{}/", segment, post_id))?)
}
