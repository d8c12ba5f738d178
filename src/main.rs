#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use browser::ChromeSessionFactory;
use clap::Parser;
use config::{
    Config, DEFAULT_GROUP_TITLE, DEFAULT_OUTPUT_FILE, DEFAULT_USER_AGENT, LocatorConfig,
    PoolConfig, PublishConfig, RemoteConfig, SessionConfig,
};
use error::PublishError;
use locator::Locator;
use playlist::Playlist;
use pool::{RunSummary, WorkerPool, all_failed_to_start};
use publish::{PublishAction, Publisher, RemoteStore, github::GitHubStore};
use registry::ChannelRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use util::{init_http_client, spawn_ct_watcher};

pub mod browser;
pub mod config;
pub mod error;
pub mod locator;
pub mod manifest;
pub mod playlist;
pub mod pool;
pub mod probe;
pub mod publish;
pub mod registry;
pub mod util;

/// Sniffs the HLS stream behind live-TV embed pages and publishes an M3U playlist
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Embed page URLs to scrape [default: built-in channel list]
    urls: Vec<String>,

    /// File with one channel per line, either `URL` or `Name = URL`
    #[arg(long, conflicts_with = "urls")]
    channel_file: Option<PathBuf>,

    /// The amount of browsers running at once. Chrome gets unstable above 4
    #[arg(short, long, default_value_t = 2)]
    parallelism: usize,

    /// Where to write the playlist
    #[arg(short, long, default_value = DEFAULT_OUTPUT_FILE)]
    output: PathBuf,

    /// `group-title` given to every playlist entry
    #[arg(long, default_value = DEFAULT_GROUP_TITLE)]
    group_title: String,

    /// Seconds to wait for a page to load
    #[arg(long, default_value_t = 20)]
    nav_timeout: u64,

    /// Seconds to let page scripts run before looking for the stream
    #[arg(long, default_value_t = 5)]
    settle: u64,

    /// Hard limit in seconds for a whole channel attempt
    #[arg(long, default_value_t = 60)]
    attempt_timeout: u64,

    /// Don't click the page to wake up lazy players
    #[arg(long)]
    no_click: bool,

    /// Take the first manifest seen even if it's served by the embed page's own host
    #[arg(long)]
    no_prefer_external: bool,

    /// Chrome / Chromium executable (auto-detected by default)
    #[arg(long)]
    chrome: Option<PathBuf>,

    /// User agent presented by the browser
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    user_agent: String,

    /// Fetch every extracted manifest once and report what it contains
    #[arg(long)]
    verify: bool,

    /// GitHub repository (`owner/name`) to commit the playlist to
    #[arg(long)]
    repo: Option<String>,

    /// Path of the playlist inside the repository [default: output file name]
    #[arg(long, requires = "repo")]
    remote_path: Option<String>,

    /// Branch to commit to
    #[arg(long, default_value = "main")]
    branch: String,
}

impl Args {
    fn config(&self) -> Config {
        let remote = self.repo.as_ref().map(|repository| RemoteConfig {
            repository: repository.clone(),
            path: self.remote_path.clone().unwrap_or_else(|| {
                self.output
                    .file_name()
                    .map_or_else(|| DEFAULT_OUTPUT_FILE.to_string(), |n| n.to_string_lossy().into_owned())
            }),
            branch: self.branch.clone(),
        });

        Config {
            session: SessionConfig {
                user_agent: self.user_agent.clone(),
                executable: self.chrome.clone(),
                ..SessionConfig::default()
            },
            locator: LocatorConfig {
                navigation_timeout: Duration::from_secs(self.nav_timeout),
                body_timeout: Duration::from_secs(self.nav_timeout),
                settle_delay: Duration::from_secs(self.settle),
                interact: !self.no_click,
                prefer_external: !self.no_prefer_external,
            },
            pool: PoolConfig {
                concurrency: self.parallelism,
                attempt_timeout: Duration::from_secs(self.attempt_timeout),
                ..PoolConfig::default()
            },
            publish: PublishConfig {
                output: self.output.clone(),
                group_title: self.group_title.clone(),
                remote,
            },
            verify_manifests: self.verify,
        }
    }

    async fn registry(&self) -> Result<ChannelRegistry> {
        if let Some(path) = &self.channel_file {
            return ChannelRegistry::load(path).await;
        }
        if self.urls.is_empty() {
            return Ok(ChannelRegistry::builtin());
        }
        ChannelRegistry::from_urls(&self.urls)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = args.config();
    config.validate()?;
    let registry = args.registry().await?;

    let ct = CancellationToken::new();
    spawn_ct_watcher(ct.clone());

    let locator = Arc::new(Locator::new(config.locator.clone()));
    info!(
        "Scanning {} channel(s) with {} parallel browser(s), tiers: {}",
        registry.len(),
        config.pool.concurrency,
        locator.tier_names().collect::<Vec<_>>().join(" -> ")
    );

    let pool = WorkerPool::new(
        Arc::new(ChromeSessionFactory::new(config.session.clone())),
        locator,
        config.pool.clone(),
        ct,
    );
    let attempts = pool.run(registry.channels()).await;

    if all_failed_to_start(&attempts) {
        bail!("Unable to start any browser session. Is Chrome / Chromium installed? (try --chrome)");
    }
    info!("Scan finished: {}", RunSummary::of(&attempts));

    let client = init_http_client()?;
    if config.verify_manifests {
        probe::probe_all(&client, &attempts).await;
    }

    let Some(playlist) =
        Playlist::assemble(&attempts, registry.channels(), &config.publish.group_title)
    else {
        warn!("No manifest URL was extracted. Nothing will be published");
        return Ok(());
    };

    let remote = match &config.publish.remote {
        Some(target) => match publish::github::token_from_env() {
            Some(token) => {
                Some(Box::new(GitHubStore::new(client, target, token)) as Box<dyn RemoteStore>)
            }
            None => {
                error!("{}", PublishError::MissingToken);
                None
            }
        },
        None => None,
    };

    let report = Publisher::new(config.publish.clone(), remote)
        .publish(&playlist)
        .await
        .context("Writing playlist file")?;

    match report.remote {
        Some(Ok(PublishAction::Created)) => info!("Playlist created in the remote repository"),
        Some(Ok(PublishAction::Updated)) => info!("Playlist updated in the remote repository"),
        Some(Err(e)) => error!(
            "Remote publish failed, local copy at {} is intact: {e}",
            report.local.display()
        ),
        None => {}
    }

    info!("All done!");

    Ok(())
}
