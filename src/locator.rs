use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    browser::Session,
    config::LocatorConfig,
    error::{FailureReason, SessionFault},
    manifest::{find_manifest_urls, first_manifest_url, select_candidate},
    registry::Channel,
};

/// Longest extra wait after the synthetic click
const MAX_INTERACTION_SETTLE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(String),
    Failure(FailureReason),
}

impl Outcome {
    #[must_use]
    pub fn manifest_url(&self) -> Option<&str> {
        match self {
            Self::Success(url) => Some(url),
            Self::Failure(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptState {
    Init,
    Navigating,
    Settling,
    Observing,
    Succeeded,
    Failed,
}

struct Attempt<'a> {
    channel: &'a Channel,
    state: AttemptState,
}

impl<'a> Attempt<'a> {
    const fn new(channel: &'a Channel) -> Self {
        Self {
            channel,
            state: AttemptState::Init,
        }
    }

    fn advance(&mut self, next: AttemptState) {
        debug!(channel = %self.channel.name, "{:?} -> {next:?}", self.state);
        self.state = next;
    }

    fn succeed(mut self, url: String) -> Outcome {
        self.advance(AttemptState::Succeeded);
        Outcome::Success(url)
    }

    fn fail(mut self, reason: FailureReason) -> Outcome {
        self.advance(AttemptState::Failed);
        Outcome::Failure(reason)
    }
}

/// One way of spotting the manifest URL in a settled page
#[async_trait]
pub trait ObservationTier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn observe(
        &self,
        session: &mut dyn Session,
        source_url: &str,
    ) -> Result<Option<String>, SessionFault>;
}

/// Scans the requests the page issued while loading
#[derive(Debug, Clone, Copy)]
pub struct NetworkTier {
    pub prefer_external: bool,
}

#[async_trait]
impl ObservationTier for NetworkTier {
    fn name(&self) -> &'static str {
        "network"
    }

    async fn observe(
        &self,
        session: &mut dyn Session,
        source_url: &str,
    ) -> Result<Option<String>, SessionFault> {
        let requests = session.observed_requests();
        debug!("Inspecting {} captured requests", requests.len());

        let candidates = requests
            .iter()
            .flat_map(|r| find_manifest_urls(r))
            .collect::<Vec<&str>>();

        Ok(select_candidate(&candidates, source_url, self.prefer_external).map(str::to_string))
    }
}

/// Regex search over the rendered markup
#[derive(Debug, Clone, Copy)]
pub struct MarkupTier;

#[async_trait]
impl ObservationTier for MarkupTier {
    fn name(&self) -> &'static str {
        "markup"
    }

    async fn observe(
        &self,
        session: &mut dyn Session,
        _source_url: &str,
    ) -> Result<Option<String>, SessionFault> {
        let html = session.content().await?;
        Ok(first_manifest_url(&html).map(str::to_string))
    }
}

/// Drives a session through navigate, settle and the observation tiers in order
pub struct Locator {
    config: LocatorConfig,
    tiers: Vec<Box<dyn ObservationTier>>,
}

impl Locator {
    /// Network capture first, markup as the fallback
    #[must_use]
    pub fn new(config: LocatorConfig) -> Self {
        let tiers: Vec<Box<dyn ObservationTier>> = vec![
            Box::new(NetworkTier {
                prefer_external: config.prefer_external,
            }),
            Box::new(MarkupTier),
        ];
        Self::with_tiers(config, tiers)
    }

    #[must_use]
    pub fn with_tiers(config: LocatorConfig, tiers: Vec<Box<dyn ObservationTier>>) -> Self {
        Self { config, tiers }
    }

    pub fn tier_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tiers.iter().map(|t| t.name())
    }

    pub async fn locate(&self, session: &mut dyn Session, channel: &Channel) -> Outcome {
        let mut attempt = Attempt::new(channel);

        attempt.advance(AttemptState::Navigating);
        let navigation = tokio::time::timeout(
            self.config.navigation_timeout,
            session.navigate(&channel.source_url),
        )
        .await;
        match navigation {
            Ok(Ok(())) => {}
            Err(_) => return attempt.fail(FailureReason::Timeout),
            Ok(Err(fault)) => return attempt.fail(fault.into()),
        }

        attempt.advance(AttemptState::Settling);
        match session.wait_for_body(self.config.body_timeout).await {
            Ok(true) => {}
            Ok(false) => return attempt.fail(FailureReason::Timeout),
            Err(fault) => return attempt.fail(fault.into()),
        }
        tokio::time::sleep(self.config.settle_delay).await;

        if self.config.interact {
            match session.click_body().await {
                Ok(()) => {
                    tokio::time::sleep(self.config.settle_delay.min(MAX_INTERACTION_SETTLE)).await;
                }
                Err(e) => warn!(channel = %channel.name, "Unable to click page body: {e}"),
            }
        }

        attempt.advance(AttemptState::Observing);
        for tier in &self.tiers {
            match tier.observe(session, &channel.source_url).await {
                Ok(Some(url)) => {
                    debug!(channel = %channel.name, tier = tier.name(), "Found manifest {url}");
                    return attempt.succeed(url);
                }
                Ok(None) => debug!(channel = %channel.name, tier = tier.name(), "Nothing found"),
                Err(fault) => return attempt.fail(fault.into()),
            }
        }

        attempt.fail(FailureReason::NotFound)
    }
}
