//! Link resolution helpers.

use url::Url;

/// Resolve `href` against `base`, dropping any fragment.
///
/// Returns `None` for hrefs that cannot form an absolute URL or that point
/// at non-HTTP schemes (`javascript:`, `mailto:`).
pub fn resolve_href(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let resolved = match Url::parse(href) {
        Ok(url) => url,
        Err(_) => Url::parse(base).ok()?.join(href).ok()?,
    };
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    Some(strip_fragment(resolved.as_str()))
}

/// Remove the `#fragment` part of a URL string.
pub fn strip_fragment(url: &str) -> String {
    match url.split_once('#') {
        Some((head, _)) => head.to_string(),
        None => url.to_string(),
    }
}

/// Final non-empty path segment of a URL, e.g. the document id of
/// `https://host/readingroom/document/cia-rdp96-00788r001`.
pub fn last_path_segment(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative() {
        assert_eq!(
            resolve_href("https://vault.fbi.gov/search?x=1", "/doc/part-1#top").as_deref(),
            Some("https://vault.fbi.gov/doc/part-1")
        );
        assert_eq!(
            resolve_href("https://vault.fbi.gov/a/b", "c").as_deref(),
            Some("https://vault.fbi.gov/a/c")
        );
    }

    #[test]
    fn test_resolve_rejects_non_http() {
        assert!(resolve_href("https://x.org", "javascript:void(0)").is_none());
        assert!(resolve_href("https://x.org", "mailto:a@b.c").is_none());
        assert!(resolve_href("https://x.org", "#anchor").is_none());
        assert!(resolve_href("https://x.org", "").is_none());
    }

    #[test]
    fn test_last_path_segment() {
        assert_eq!(
            last_path_segment("https://www.cia.gov/readingroom/document/cia-rdp96-00788r001").as_deref(),
            Some("cia-rdp96-00788r001")
        );
        assert_eq!(
            last_path_segment("https://host/a/b/?q=1").as_deref(),
            Some("b")
        );
        assert_eq!(last_path_segment("https://host/"), None);
    }
}
