use std::{collections::HashSet, path::Path};

use anyhow::{Context, Result, bail};
use reqwest::Url;

/// Embed pages scraped when no channels are given on the command line
pub const DEFAULT_CHANNEL_URLS: &[&str] = &[
    "https://embedtv-4.icu/sportv",
    "https://embedtv-4.icu/premiere",
    "https://embedtv-4.icu/premiere2",
    "https://embedtv-4.icu/tnt",
    "https://embedtv-4.icu/primevideo",
    "https://embedtv-4.icu/sbt",
    "https://embedtv-4.icu/record",
    "https://embedtv-4.icu/megapix",
    "https://embedtv-4.icu/max1",
    "https://embedtv-4.icu/hbo",
    "https://embedtv-4.icu/hbo2",
    "https://embedtv-4.icu/globorj",
    "https://embedtv-4.icu/globonews",
    "https://embedtv-4.icu/fx",
    "https://embedtv-4.icu/espn",
    "https://embedtv-4.icu/espn4",
    "https://embedtv-4.icu/disneyplus1",
    "https://embedtv-4.icu/band",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    pub name: String,
    pub source_url: String,
}

impl Channel {
    /// Builds a channel whose name is derived from the last path segment of `source_url`
    ///
    /// # Errors
    /// Errors when `source_url` is not an absolute http(s) URL
    pub fn from_url(source_url: &str) -> Result<Self> {
        let url = parse_source_url(source_url)?;
        let slug = url
            .path_segments()
            .and_then(|mut s| s.rfind(|seg| !seg.is_empty()))
            .or_else(|| url.host_str())
            .unwrap_or_default()
            .replace(['-', '_'], " ");

        Ok(Self {
            name: normalize_name(&slug),
            source_url: url.to_string(),
        })
    }

    /// # Errors
    /// Errors when `source_url` is not an absolute http(s) URL or `name` is blank
    pub fn named(name: &str, source_url: &str) -> Result<Self> {
        let name = normalize_name(name);
        if name.is_empty() {
            bail!("Channel name for {source_url} is empty");
        }

        Ok(Self {
            name,
            source_url: parse_source_url(source_url)?.to_string(),
        })
    }
}

fn parse_source_url(source_url: &str) -> Result<Url> {
    let url = Url::parse(source_url.trim())
        .with_context(|| format!("Parsing channel URL `{source_url}`"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("Channel URL `{source_url}` is not http(s)");
    }
    Ok(url)
}

/// Trims, collapses internal whitespace and title-cases every word
///
/// `"  sportv   premiere "` becomes `"Sportv Premiere"`
#[must_use]
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Ordered, deduplicated set of channels to scrape during a run
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: Vec<Channel>,
}

impl ChannelRegistry {
    /// Deduplicates by source URL, keeping the first occurrence
    #[must_use]
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Self {
        let mut seen = HashSet::new();
        let channels = channels
            .into_iter()
            .filter(|c| seen.insert(c.source_url.clone()))
            .collect();
        Self { channels }
    }

    /// # Errors
    /// Errors on the first URL that does not parse
    pub fn from_urls<S: AsRef<str>>(urls: impl IntoIterator<Item = S>) -> Result<Self> {
        let channels = urls
            .into_iter()
            .map(|u| Channel::from_url(u.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(channels))
    }

    /// Parses a channel list, one entry per line: either a bare URL or `Name = URL`.
    /// Blank lines and `#` comments are skipped.
    ///
    /// # Errors
    /// Errors with the offending line number on malformed entries
    pub fn parse(list: &str) -> Result<Self> {
        let mut channels = Vec::new();
        for (idx, line) in list.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let channel = match line.split_once('=') {
                Some((name, url)) if !name.contains("://") => Channel::named(name, url),
                _ => Channel::from_url(line),
            }
            .with_context(|| format!("Channel list line {}", idx + 1))?;
            channels.push(channel);
        }

        if channels.is_empty() {
            bail!("Channel list contains no channels");
        }
        Ok(Self::new(channels))
    }

    /// # Errors
    /// Errors when the file cannot be read or contains malformed entries
    pub async fn load(path: &Path) -> Result<Self> {
        let list = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Reading channel list {}", path.display()))?;
        Self::parse(&list)
    }

    /// The built-in embed page list
    ///
    /// # Panics
    /// Never, the built-in URLs are valid
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_urls(DEFAULT_CHANNEL_URLS).expect("built-in channel URLs are valid")
    }

    #[must_use]
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
