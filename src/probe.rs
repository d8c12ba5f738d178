use std::fmt;

use anyhow::{Context, Result, bail, ensure};
use m3u8_rs::Playlist as HlsPlaylist;
use reqwest::header::REFERER;
use tracing::{info, instrument, warn};

use crate::{pool::ExtractionAttempt, util::truncate_string};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Master { variants: usize },
    Media { segments: usize, live: bool },
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master { variants } => write!(f, "master playlist, {variants} variant(s)"),
            Self::Media { segments, live } => write!(
                f,
                "{} media playlist, {segments} segment(s)",
                if *live { "live" } else { "finished" }
            ),
        }
    }
}

/// Classifies an HLS playlist body
///
/// # Errors
/// Errors when the body is not a parseable HLS playlist
pub fn inspect_manifest(body: &[u8]) -> Result<ManifestKind> {
    let Ok(playlist) = m3u8_rs::parse_playlist_res(body) else {
        bail!("Response is not a valid HLS playlist");
    };

    Ok(match playlist {
        HlsPlaylist::MasterPlaylist(master) => ManifestKind::Master {
            variants: master.variants.len(),
        },
        HlsPlaylist::MediaPlaylist(media) => ManifestKind::Media {
            segments: media.segments.len(),
            live: !media.end_list,
        },
    })
}

/// Fetches a manifest the way the embedding page would, with the page as referer
///
/// # Errors
/// Errors on network failure, a non-success status, or an unparseable body
#[instrument(skip(client))]
pub async fn probe_manifest(
    client: &reqwest::Client,
    manifest_url: &str,
    referer: &str,
) -> Result<ManifestKind> {
    let res = client
        .get(manifest_url)
        .header(REFERER, referer)
        .send()
        .await
        .context("Fetching manifest")?;
    ensure!(
        res.status().is_success(),
        "Manifest responded with {}",
        res.status()
    );

    let body = res.bytes().await.context("Reading manifest body")?;
    inspect_manifest(&body)
}

/// Probes every extracted manifest once and logs what came back
pub async fn probe_all(client: &reqwest::Client, attempts: &[ExtractionAttempt]) {
    for attempt in attempts {
        let Some(url) = attempt.outcome.manifest_url() else {
            continue;
        };

        match probe_manifest(client, url, &attempt.channel.source_url).await {
            Ok(kind) => info!("{}: {kind}", attempt.channel.name),
            Err(e) => warn!(
                "{}: {} did not verify: {e:#}",
                attempt.channel.name,
                truncate_string(url, 96)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn recognizes_master_playlist() {
        let body = indoc! {"
            #EXTM3U
            #EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=1280x720
            https://cdn.example/720/index.m3u8
            #EXT-X-STREAM-INF:BANDWIDTH=640000,RESOLUTION=640x360
            https://cdn.example/360/index.m3u8
        "};
        assert_eq!(
            inspect_manifest(body.as_bytes()).unwrap(),
            ManifestKind::Master { variants: 2 }
        );
    }

    #[test]
    fn recognizes_live_media_playlist() {
        let body = indoc! {"
            #EXTM3U
            #EXT-X-VERSION:3
            #EXT-X-TARGETDURATION:6
            #EXT-X-MEDIA-SEQUENCE:1042
            #EXTINF:6.0,
            seg1042.ts
            #EXTINF:6.0,
            seg1043.ts
        "};
        let kind = inspect_manifest(body.as_bytes()).unwrap();
        assert_eq!(
            kind,
            ManifestKind::Media {
                segments: 2,
                live: true
            }
        );
        assert_eq!(kind.to_string(), "live media playlist, 2 segment(s)");
    }

    #[test]
    fn rejects_html_error_pages() {
        assert!(inspect_manifest(b"<html><body>403 Forbidden</body></html>").is_err());
    }
}
