use std::fmt;

use tracing::warn;

use crate::{
    locator::Outcome,
    manifest::is_manifest_url,
    pool::ExtractionAttempt,
    registry::{Channel, normalize_name},
};

pub const M3U_HEADER: &str = "#EXTM3U";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub display_name: String,
    pub group_title: String,
    pub manifest_url: String,
}

/// Extended M3U document built fresh from one run's successful attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    entries: Vec<PlaylistEntry>,
}

impl Playlist {
    /// Builds the playlist from every successful attempt, ordered as in `channels`.
    ///
    /// Returns `None` when nothing was extracted, in which case nothing should be published.
    #[must_use]
    pub fn assemble(
        attempts: &[ExtractionAttempt],
        channels: &[Channel],
        group_title: &str,
    ) -> Option<Self> {
        let mut successes = attempts
            .iter()
            .filter_map(|a| match &a.outcome {
                Outcome::Success(url) => Some((&a.channel, url)),
                Outcome::Failure(_) => None,
            })
            .filter(|(channel, url)| {
                let valid = is_manifest_url(url);
                if !valid {
                    warn!("Dropping {}: `{url}` is not a manifest URL", channel.name);
                }
                valid
            })
            .collect::<Vec<_>>();

        if successes.is_empty() {
            return None;
        }

        successes.sort_by_key(|(channel, _)| {
            channels
                .iter()
                .position(|c| c.source_url == channel.source_url)
                .unwrap_or(usize::MAX)
        });

        let group_title = group_title.trim().to_string();
        let entries = successes
            .into_iter()
            .map(|(channel, url)| PlaylistEntry {
                display_name: normalize_name(&channel.name),
                group_title: group_title.clone(),
                manifest_url: url.clone(),
            })
            .collect();

        Some(Self { entries })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Attribute values cannot carry a double quote
fn attribute(value: &str) -> String {
    value.replace('"', "'")
}

impl fmt::Display for Playlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(M3U_HEADER)?;
        for entry in &self.entries {
            write!(
                f,
                "\n#EXTINF:-1 tvg-name=\"{}\" group-title=\"{}\",{}\n{}",
                attribute(&entry.display_name),
                attribute(&entry.group_title),
                entry.display_name,
                entry.manifest_url
            )?;
        }
        Ok(())
    }
}
