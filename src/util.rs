use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shortens a string to at most `max_length` bytes, ending it with `...` when cut.
///
/// The cut point moves back until it lands on a UTF-8 character boundary.
#[must_use]
pub fn truncate_string(string: &str, max_length: usize) -> String {
    if string.len() <= max_length {
        return string.to_string();
    }

    let mut cut = max_length.saturating_sub(3);
    while !string.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &string[..cut])
}

/// HTTP client for the GitHub API and manifest probing
///
/// # Errors
/// Errors when the TLS backend cannot be initialised
pub fn init_http_client() -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!(
            "{}/{} (+{})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_REPOSITORY")
        ))
        .context("Building user agent header")?,
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .context("Building HTTP client")
}

/// Spawn a task that watches for CTRL + C signal and cancels a [`CancellationToken`] when caught
pub fn spawn_ct_watcher(ct: CancellationToken) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Caught CTRL+C signal! Finishing up with what was found so far");
        ct.cancel();
    });
}
