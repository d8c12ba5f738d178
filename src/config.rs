use std::{path::PathBuf, time::Duration};

use anyhow::{Result, ensure};
use tracing::warn;

/// Realistic desktop Chrome user agent presented by every browser session
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36";
pub const DEFAULT_GROUP_TITLE: &str = "CANAIS TV";
pub const DEFAULT_OUTPUT_FILE: &str = "minha_lista_canais.m3u";

/// Above this many concurrent browsers, Chrome tends to fail to start (`DevToolsActivePort`)
pub const SAFE_CONCURRENCY: usize = 4;

/// Launch profile for each headless browser session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub user_agent: String,
    /// Browser executable; auto-detected when `None`
    pub executable: Option<PathBuf>,
    pub launch_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            executable: None,
            launch_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocatorConfig {
    pub navigation_timeout: Duration,
    pub body_timeout: Duration,
    pub settle_delay: Duration,
    /// Click the page body after settling, for players that wait for a user gesture
    pub interact: bool,
    /// Prefer manifests served from a different host than the embed page
    pub prefer_external: bool,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(20),
            body_timeout: Duration::from_secs(20),
            settle_delay: Duration::from_secs(5),
            interact: true,
            prefer_external: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub concurrency: usize,
    /// Hard bound on a whole attempt, including settling and observation
    pub attempt_timeout: Duration,
    /// How long a session gets to shut down before it is abandoned
    pub release_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            attempt_timeout: Duration::from_secs(60),
            release_timeout: Duration::from_secs(15),
        }
    }
}

/// Where the remote copy of the playlist goes
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// `owner/name`
    pub repository: String,
    pub path: String,
    pub branch: String,
}

#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub output: PathBuf,
    pub group_title: String,
    pub remote: Option<RemoteConfig>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from(DEFAULT_OUTPUT_FILE),
            group_title: DEFAULT_GROUP_TITLE.to_string(),
            remote: None,
        }
    }
}

/// Everything a run needs, built once from the command line
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub session: SessionConfig,
    pub locator: LocatorConfig,
    pub pool: PoolConfig,
    pub publish: PublishConfig,
    /// Fetch and parse every extracted manifest once
    pub verify_manifests: bool,
}

impl Config {
    /// # Errors
    /// Errors when a bound is zero or the remote repository is not `owner/name`
    pub fn validate(&self) -> Result<()> {
        ensure!(self.pool.concurrency > 0, "Parallelism must be at least 1");
        ensure!(
            !self.pool.attempt_timeout.is_zero(),
            "Attempt timeout must be positive"
        );
        ensure!(
            !self.pool.release_timeout.is_zero(),
            "Release timeout must be positive"
        );
        ensure!(
            !self.locator.navigation_timeout.is_zero(),
            "Navigation timeout must be positive"
        );
        ensure!(
            !self.publish.group_title.trim().is_empty(),
            "Group title must not be empty"
        );

        if let Some(remote) = &self.publish.remote {
            let valid_repo = remote
                .repository
                .split_once('/')
                .is_some_and(|(owner, name)| {
                    !owner.is_empty() && !name.is_empty() && !name.contains('/')
                });
            ensure!(
                valid_repo,
                "Repository `{}` must be in `owner/name` form",
                remote.repository
            );
            ensure!(!remote.path.is_empty(), "Remote path must not be empty");
        }

        if self.pool.concurrency > SAFE_CONCURRENCY {
            warn!(
                "Running {} browsers at once; more than {SAFE_CONCURRENCY} commonly makes Chrome fail to start",
                self.pool.concurrency
            );
        }

        Ok(())
    }
}
