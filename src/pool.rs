use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    panic::AssertUnwindSafe,
    sync::Arc,
};

use futures_util::FutureExt as _;
use tokio::{select, sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::{
    browser::SessionFactory,
    config::PoolConfig,
    error::FailureReason,
    locator::{Locator, Outcome},
    registry::Channel,
    util::truncate_string,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionAttempt {
    pub channel: Channel,
    pub outcome: Outcome,
}

/// Bounded fan-out of extraction attempts, one browser session per attempt
pub struct WorkerPool {
    factory: Arc<dyn SessionFactory>,
    locator: Arc<Locator>,
    config: PoolConfig,
    ct: CancellationToken,
}

impl WorkerPool {
    #[must_use]
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        locator: Arc<Locator>,
        config: PoolConfig,
        ct: CancellationToken,
    ) -> Self {
        Self {
            factory,
            locator,
            config,
            ct,
        }
    }

    /// Runs one attempt per channel and returns exactly one result per channel, in completion order
    #[instrument(skip_all, fields(channels = channels.len(), concurrency = self.config.concurrency))]
    pub async fn run(&self, channels: &[Channel]) -> Vec<ExtractionAttempt> {
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::new();

        for channel in channels {
            let ct = self.ct.clone();
            let permits = permits.clone();
            let factory = self.factory.clone();
            let locator = self.locator.clone();
            let config = self.config.clone();
            let task_channel = channel.clone();

            let handle = tasks.spawn(async move {
                let outcome = select! {
                    biased;
                    () = ct.cancelled() => Outcome::Failure(FailureReason::Cancelled),
                    permit = permits.acquire_owned() => match permit {
                        Ok(_permit) => {
                            run_attempt(&*factory, &locator, &task_channel, &config, &ct).await
                        }
                        Err(_) => Outcome::Failure(FailureReason::Cancelled),
                    },
                };
                ExtractionAttempt {
                    channel: task_channel,
                    outcome,
                }
            });
            in_flight.insert(handle.id(), channel.clone());
        }

        let pb = indicatif::ProgressBar::new(channels.len() as u64);
        pb.set_style(
            indicatif::ProgressStyle::with_template("[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar()),
        );

        let mut attempts = Vec::with_capacity(channels.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            let attempt = match joined {
                Ok((id, attempt)) => {
                    in_flight.remove(&id);
                    attempt
                }
                Err(e) => {
                    let Some(channel) = in_flight.remove(&e.id()) else {
                        continue;
                    };
                    ExtractionAttempt {
                        channel,
                        outcome: Outcome::Failure(FailureReason::SessionError(format!(
                            "worker crashed: {e}"
                        ))),
                    }
                }
            };

            log_attempt(&attempt);
            pb.set_message(attempt.channel.name.clone());
            pb.inc(1);
            attempts.push(attempt);
        }
        pb.finish_and_clear();

        attempts
    }
}

/// Acquires a fresh session, locates, and always releases the session.
/// A teardown that outlives `release_timeout` is abandoned so the worker can move on.
async fn run_attempt(
    factory: &dyn SessionFactory,
    locator: &Locator,
    channel: &Channel,
    config: &PoolConfig,
    ct: &CancellationToken,
) -> Outcome {
    let mut session = match factory.acquire().await {
        Ok(session) => session,
        Err(reason) => return Outcome::Failure(reason),
    };

    let outcome = {
        let located = AssertUnwindSafe(locator.locate(session.as_mut(), channel)).catch_unwind();
        select! {
            biased;
            () = ct.cancelled() => Outcome::Failure(FailureReason::Cancelled),
            result = tokio::time::timeout(config.attempt_timeout, located) => match result {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(panic)) => Outcome::Failure(FailureReason::SessionError(panic_message(&*panic))),
                Err(_) => Outcome::Failure(FailureReason::Timeout),
            },
        }
    };

    if tokio::time::timeout(config.release_timeout, session.release())
        .await
        .is_err()
    {
        warn!(
            channel = %channel.name,
            "Session teardown took longer than {:?}, abandoning it",
            config.release_timeout
        );
    }
    outcome
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("worker panicked: {detail}")
}

fn log_attempt(attempt: &ExtractionAttempt) {
    match &attempt.outcome {
        Outcome::Success(url) => info!(
            "{}: found {}",
            attempt.channel.name,
            truncate_string(url, 96)
        ),
        Outcome::Failure(reason) => warn!(
            "{} ({}): {reason}",
            attempt.channel.name, attempt.channel.source_url
        ),
    }
}

/// Whether no browser could be started for any channel at all
#[must_use]
pub fn all_failed_to_start(attempts: &[ExtractionAttempt]) -> bool {
    !attempts.is_empty()
        && attempts.iter().all(|a| {
            matches!(
                a.outcome,
                Outcome::Failure(FailureReason::SessionStartError(_))
            )
        })
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: BTreeMap<&'static str, usize>,
}

impl RunSummary {
    #[must_use]
    pub fn of(attempts: &[ExtractionAttempt]) -> Self {
        let mut summary = Self::default();
        for attempt in attempts {
            match &attempt.outcome {
                Outcome::Success(_) => summary.succeeded += 1,
                Outcome::Failure(reason) => *summary.failed.entry(reason.label()).or_default() += 1,
            }
        }
        summary
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} succeeded", self.succeeded)?;
        for (label, count) in &self.failed {
            write!(f, ", {count} {label}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::atomic::Ordering, time::Duration};

    use super::*;
    use crate::{
        browser::fake::{Behavior, FakeFactory, FakePage},
        config::LocatorConfig,
    };

    fn locator() -> Arc<Locator> {
        Arc::new(Locator::new(LocatorConfig {
            settle_delay: Duration::ZERO,
            interact: false,
            ..LocatorConfig::default()
        }))
    }

    fn channels(n: usize) -> Vec<Channel> {
        (0..n)
            .map(|i| Channel {
                name: format!("Ch{i}"),
                source_url: format!("https://embed.example/ch{i}"),
            })
            .collect()
    }

    fn page_for(i: usize, load_time: Duration) -> FakePage {
        FakePage {
            load_time,
            ..FakePage::with_requests(&[format!("https://cdn.example/ch{i}/index.m3u8").as_str()])
        }
    }

    fn pool(factory: Arc<FakeFactory>, concurrency: usize, attempt_timeout: Duration) -> WorkerPool {
        WorkerPool::new(
            factory,
            locator(),
            PoolConfig {
                concurrency,
                attempt_timeout,
                ..PoolConfig::default()
            },
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn every_channel_gets_exactly_one_attempt() {
        let channels = channels(7);
        let pages = channels.iter().enumerate().map(|(i, c)| {
            let page = match i {
                1 => FakePage::behaving(Behavior::Crash("boom".into())),
                3 => FakePage::default(),
                _ => page_for(i, Duration::ZERO),
            };
            (c.source_url.clone(), page)
        });
        let factory = Arc::new(FakeFactory::new(pages));

        for concurrency in [1, 2, 3, 7, 16] {
            let attempts = pool(factory.clone(), concurrency, Duration::from_secs(5))
                .run(&channels)
                .await;

            assert_eq!(attempts.len(), channels.len());
            let seen: HashSet<_> = attempts.iter().map(|a| a.channel.source_url.clone()).collect();
            assert_eq!(seen.len(), channels.len());
            assert_eq!(RunSummary::of(&attempts).succeeded, 5);
        }

        assert_eq!(
            factory.acquired.load(Ordering::SeqCst),
            factory.released.load(Ordering::SeqCst)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_does_not_hold_back_siblings() {
        let channels = channels(6);
        let pages = channels.iter().enumerate().map(|(i, c)| {
            let page = if i == 0 {
                FakePage::behaving(Behavior::Hang)
            } else {
                page_for(i, Duration::from_secs(1))
            };
            (c.source_url.clone(), page)
        });
        let factory = Arc::new(FakeFactory::new(pages));
        let attempt_timeout = Duration::from_millis(1500);

        let started = tokio::time::Instant::now();
        let attempts = pool(factory.clone(), 3, attempt_timeout).run(&channels).await;
        let elapsed = started.elapsed();

        // ceil(6 / 3) rounds, each bounded by the attempt timeout
        assert!(elapsed <= attempt_timeout * 2, "took {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");

        let summary = RunSummary::of(&attempts);
        assert_eq!(summary.succeeded, 5);
        assert_eq!(summary.failed.get("timeout"), Some(&1));
        assert_eq!(factory.released.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_teardown_does_not_wedge_the_run() {
        let channels = channels(3);
        let pages = channels.iter().enumerate().map(|(i, c)| {
            let page = if i == 0 {
                FakePage {
                    behavior: Behavior::StuckTeardown,
                    ..page_for(i, Duration::ZERO)
                }
            } else {
                page_for(i, Duration::from_secs(1))
            };
            (c.source_url.clone(), page)
        });
        let factory = Arc::new(FakeFactory::new(pages));

        let attempts = tokio::time::timeout(
            Duration::from_secs(3600),
            pool(factory.clone(), 1, Duration::from_secs(5)).run(&channels),
        )
        .await
        .expect("run returned despite a session that never shuts down");

        assert_eq!(attempts.len(), 3);
        assert_eq!(RunSummary::of(&attempts).succeeded, 3);
        assert_eq!(factory.acquired.load(Ordering::SeqCst), 3);
        assert_eq!(factory.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_worker_is_isolated() {
        let channels = channels(4);
        let pages = channels.iter().enumerate().map(|(i, c)| {
            let page = if i == 2 {
                FakePage::behaving(Behavior::Panic)
            } else {
                page_for(i, Duration::ZERO)
            };
            (c.source_url.clone(), page)
        });
        let factory = Arc::new(FakeFactory::new(pages));

        let attempts = pool(factory.clone(), 1, Duration::from_secs(5))
            .run(&channels)
            .await;

        assert_eq!(attempts.len(), 4);
        let crashed = attempts
            .iter()
            .find(|a| a.channel.name == "Ch2")
            .unwrap();
        assert!(matches!(
            &crashed.outcome,
            Outcome::Failure(FailureReason::SessionError(detail)) if detail.contains("renderer crashed")
        ));
        assert_eq!(RunSummary::of(&attempts).succeeded, 3);
        assert_eq!(factory.acquired.load(Ordering::SeqCst), 4);
        assert_eq!(factory.released.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn session_start_failures_are_recorded_per_channel() {
        let channels = channels(3);
        let attempts = pool(Arc::new(FakeFactory::failing()), 2, Duration::from_secs(5))
            .run(&channels)
            .await;

        assert_eq!(attempts.len(), 3);
        assert!(all_failed_to_start(&attempts));
        assert_eq!(RunSummary::of(&attempts).to_string(), "0 succeeded, 3 session-start");
    }

    #[tokio::test]
    async fn cancelled_run_still_reports_every_channel() {
        let channels = channels(5);
        let pages = channels
            .iter()
            .enumerate()
            .map(|(i, c)| (c.source_url.clone(), page_for(i, Duration::ZERO)));
        let ct = CancellationToken::new();
        ct.cancel();
        let pool = WorkerPool::new(
            Arc::new(FakeFactory::new(pages)),
            locator(),
            PoolConfig::default(),
            ct,
        );

        let attempts = pool.run(&channels).await;
        assert_eq!(attempts.len(), 5);
        assert!(
            attempts
                .iter()
                .all(|a| a.outcome == Outcome::Failure(FailureReason::Cancelled))
        );
        assert!(!all_failed_to_start(&attempts));
    }

    #[test]
    fn empty_run_is_not_a_start_failure() {
        assert!(!all_failed_to_start(&[]));
    }
}
