use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tracing::{info, instrument};

use crate::{config::PublishConfig, error::PublishError, playlist::Playlist};

pub mod github;

/// A versioned store holding the published playlist
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Human-readable location, for logs
    fn describe(&self, path: &str) -> String;

    /// Current revision token of `path`, or `None` if it does not exist yet
    async fn revision(&self, path: &str) -> Result<Option<String>, PublishError>;

    /// Writes `content` to `path`. `revision` must be the current token when the file exists.
    async fn put(
        &self,
        path: &str,
        content: &str,
        message: &str,
        revision: Option<&str>,
    ) -> Result<(), PublishError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishAction {
    Created,
    Updated,
}

#[must_use]
pub fn commit_message(action: PublishAction, at: DateTime<Local>) -> String {
    let verb = match action {
        PublishAction::Created => "creation",
        PublishAction::Updated => "update",
    };
    format!(
        "Automatic channel list {verb} - {}",
        at.format("%Y-%m-%d %H:%M:%S")
    )
}

/// Writes the document to `path`, creating parent directories as needed
///
/// # Errors
/// Errors when the directory or file cannot be written
pub async fn write_local(path: &Path, document: &str) -> Result<(), PublishError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, document).await?;
    Ok(())
}

/// Creates or replaces `path` in the remote store
///
/// # Errors
/// Errors when the revision lookup or the write fails
#[instrument(skip(store, document))]
pub async fn publish_remote(
    store: &dyn RemoteStore,
    path: &str,
    document: &str,
    at: DateTime<Local>,
) -> Result<PublishAction, PublishError> {
    let revision = store.revision(path).await?;
    let action = if revision.is_some() {
        PublishAction::Updated
    } else {
        PublishAction::Created
    };

    store
        .put(
            path,
            document,
            &commit_message(action, at),
            revision.as_deref(),
        )
        .await?;
    Ok(action)
}

#[derive(Debug)]
pub struct PublishReport {
    pub local: PathBuf,
    /// `None` when no remote is configured
    pub remote: Option<Result<PublishAction, PublishError>>,
}

/// Persists a finished playlist locally, then optionally to the remote store
pub struct Publisher {
    config: PublishConfig,
    remote: Option<Box<dyn RemoteStore>>,
}

impl Publisher {
    #[must_use]
    pub fn new(config: PublishConfig, remote: Option<Box<dyn RemoteStore>>) -> Self {
        Self { config, remote }
    }

    /// Local persistence failure is returned as an error; a remote failure is only reported,
    /// the local file stays written either way.
    ///
    /// # Errors
    /// Errors when the local file cannot be written
    pub async fn publish(&self, playlist: &Playlist) -> Result<PublishReport, PublishError> {
        let document = playlist.to_string();

        write_local(&self.config.output, &document).await?;
        info!(
            "Saved {} channel(s) to {}",
            playlist.len(),
            self.config.output.display()
        );

        let remote = match (&self.remote, &self.config.remote) {
            (Some(store), Some(target)) => {
                info!("Publishing to {}", store.describe(&target.path));
                Some(publish_remote(store.as_ref(), &target.path, &document, Local::now()).await)
            }
            _ => None,
        };

        Ok(PublishReport {
            local: self.config.output.clone(),
            remote,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use chrono::TimeZone;

    use super::*;
    use crate::{
        config::RemoteConfig, locator::Outcome, pool::ExtractionAttempt, registry::Channel,
    };

    /// Behaves like the GitHub contents API: updates need the current revision
    #[derive(Default)]
    struct MemoryStore {
        files: Mutex<HashMap<String, (String, String)>>,
        writes: AtomicUsize,
        messages: Mutex<Vec<String>>,
    }

    impl MemoryStore {
        fn content(&self, path: &str) -> Option<String> {
            self.files.lock().unwrap().get(path).map(|(c, _)| c.clone())
        }
    }

    #[async_trait]
    impl RemoteStore for MemoryStore {
        fn describe(&self, path: &str) -> String {
            format!("memory:{path}")
        }

        async fn revision(&self, path: &str) -> Result<Option<String>, PublishError> {
            Ok(self.files.lock().unwrap().get(path).map(|(_, r)| r.clone()))
        }

        async fn put(
            &self,
            path: &str,
            content: &str,
            message: &str,
            revision: Option<&str>,
        ) -> Result<(), PublishError> {
            let mut files = self.files.lock().unwrap();
            let current = files.get(path).map(|(_, r)| r.as_str());
            if current != revision {
                return Err(PublishError::Conflict(path.to_string()));
            }
            let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
            files.insert(path.to_string(), (content.to_string(), format!("rev{n}")));
            self.messages.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl RemoteStore for BrokenStore {
        fn describe(&self, path: &str) -> String {
            format!("broken:{path}")
        }

        async fn revision(&self, _path: &str) -> Result<Option<String>, PublishError> {
            Err(PublishError::Unauthorized)
        }

        async fn put(
            &self,
            _path: &str,
            _content: &str,
            _message: &str,
            _revision: Option<&str>,
        ) -> Result<(), PublishError> {
            Err(PublishError::Unauthorized)
        }
    }

    fn at(hour: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 1, 2, hour, 4, 5).unwrap()
    }

    fn playlist() -> Playlist {
        let attempts = [ExtractionAttempt {
            channel: Channel {
                name: "Sportv".into(),
                source_url: "https://embedtv-4.icu/sportv".into(),
            },
            outcome: Outcome::Success("http://example.com/stream.m3u8".into()),
        }];
        Playlist::assemble(&attempts, &[], "CANAIS TV").unwrap()
    }

    #[test]
    fn commit_messages_differ_per_action_and_time() {
        assert_eq!(
            commit_message(PublishAction::Updated, at(3)),
            "Automatic channel list update - 2025-01-02 03:04:05"
        );
        assert_ne!(
            commit_message(PublishAction::Created, at(3)),
            commit_message(PublishAction::Created, at(4))
        );
    }

    #[tokio::test]
    async fn republishing_identical_content_updates_in_place() {
        let store = MemoryStore::default();
        let document = playlist().to_string();

        let first = publish_remote(&store, "minha_lista_canais.m3u", &document, at(1))
            .await
            .unwrap();
        let second = publish_remote(&store, "minha_lista_canais.m3u", &document, at(2))
            .await
            .unwrap();

        assert_eq!(first, PublishAction::Created);
        assert_eq!(second, PublishAction::Updated);
        assert_eq!(store.files.lock().unwrap().len(), 1);
        assert_eq!(store.content("minha_lista_canais.m3u"), Some(document));
        assert_eq!(
            *store.messages.lock().unwrap(),
            [
                "Automatic channel list creation - 2025-01-02 01:04:05",
                "Automatic channel list update - 2025-01-02 02:04:05",
            ]
        );
    }

    #[tokio::test]
    async fn writes_local_file_without_remote() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("lists").join("tv.m3u");
        let publisher = Publisher::new(
            PublishConfig {
                output: output.clone(),
                ..PublishConfig::default()
            },
            None,
        );

        let report = publisher.publish(&playlist()).await.unwrap();
        assert!(report.remote.is_none());
        assert_eq!(
            tokio::fs::read_to_string(&output).await.unwrap(),
            playlist().to_string()
        );
    }

    #[tokio::test]
    async fn remote_failure_keeps_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("tv.m3u");
        let publisher = Publisher::new(
            PublishConfig {
                output: output.clone(),
                remote: Some(RemoteConfig {
                    repository: "ting560/tv".into(),
                    path: "tv.m3u".into(),
                    branch: "main".into(),
                }),
                ..PublishConfig::default()
            },
            Some(Box::new(BrokenStore)),
        );

        let report = publisher.publish(&playlist()).await.unwrap();
        assert!(matches!(report.remote, Some(Err(PublishError::Unauthorized))));
        assert!(output.exists());
    }

    #[tokio::test]
    async fn unwritable_local_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let publisher = Publisher::new(
            PublishConfig {
                output: blocker.join("tv.m3u"),
                ..PublishConfig::default()
            },
            None,
        );
        assert!(matches!(
            publisher.publish(&playlist()).await,
            Err(PublishError::Io(_))
        ));
    }
}
