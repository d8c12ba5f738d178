use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;

/// Matches an HLS manifest URL, including an optional (usually signed) query string
pub static MANIFEST_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://[^\s"']+\.m3u8(\?[^\s"']*)?"#).expect("manifest regex is valid")
});

/// Returns whether the whole of `url` is an HLS manifest URL
#[must_use]
pub fn is_manifest_url(url: &str) -> bool {
    MANIFEST_URL_REGEX
        .find(url)
        .is_some_and(|m| m.start() == 0 && m.end() == url.len())
}

/// Every manifest URL found in `text`, in order of appearance
#[must_use]
pub fn find_manifest_urls(text: &str) -> Vec<&str> {
    MANIFEST_URL_REGEX
        .find_iter(text)
        .map(|m| m.as_str())
        .collect()
}

/// First manifest URL found in `text`
#[must_use]
pub fn first_manifest_url(text: &str) -> Option<&str> {
    MANIFEST_URL_REGEX.find(text).map(|m| m.as_str())
}

/// Lowercased host of `url`, if it parses
#[must_use]
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
}

/// Picks one manifest URL out of the candidates observed for a page.
///
/// Embed pages often reference placeholder manifests on their own host, so when
/// `prefer_external` is set the first candidate served from a different host than
/// `source_url` wins. Otherwise, or when every candidate is same-host, the first
/// candidate in request order is returned.
#[must_use]
pub fn select_candidate<'a>(
    candidates: &[&'a str],
    source_url: &str,
    prefer_external: bool,
) -> Option<&'a str> {
    if prefer_external
        && let Some(source_host) = host_of(source_url)
        && let Some(external) = candidates
            .iter()
            .find(|c| host_of(c).is_some_and(|h| h != source_host))
    {
        return Some(external);
    }

    candidates.first().copied()
}
