//! Directory refresher.
//!
//! Holds the latest target snapshot produced by the active strategy. The
//! snapshot is an immutable map behind an [`ArcSwap`]: a refresh swaps in a
//! whole new map, readers never block and never see a partial update.
//!
//! A failed refresh keeps the last-known-good snapshot. A failed initial
//! fetch leaves the directory empty until the next successful tick.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::discovery::{DirectoryStrategy, TargetEndpoints};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryState {
    /// The strategy was constructed and is being queried.
    Ready,
    /// The strategy is unusable; the directory stays empty.
    Degraded,
}

pub struct TargetDirectory {
    strategy: Arc<dyn DirectoryStrategy>,
    snapshot: Arc<ArcSwap<TargetEndpoints>>,
    state: DirectoryState,
    refresh_task: Option<JoinHandle<()>>,
}

impl TargetDirectory {
    /// Performs the initial fetch and, when the strategy asks for it,
    /// schedules periodic refreshes on the current runtime.
    pub async fn start(strategy: Arc<dyn DirectoryStrategy>) -> Self {
        let snapshot = Arc::new(ArcSwap::from_pointee(TargetEndpoints::new()));

        if !strategy.is_ready() {
            warn!(
                "The {} directory is not initialized! No target endpoints will be known.",
                strategy.name()
            );
            return Self {
                strategy,
                snapshot,
                state: DirectoryState::Degraded,
                refresh_task: None,
            };
        }

        refresh_once(strategy.as_ref(), &snapshot).await;

        let interval_ms = strategy.refresh_interval_millis();
        let refresh_task = if strategy.supports_periodic_refresh() && interval_ms > 0 {
            let period = Duration::from_millis(interval_ms);
            info!(
                "Refreshing the {} directory every {:?}",
                strategy.name(),
                period
            );
            Some(tokio::spawn(refresh_loop(
                Arc::clone(&strategy),
                Arc::clone(&snapshot),
                period,
            )))
        } else {
            None
        };

        Self {
            strategy,
            snapshot,
            state: DirectoryState::Ready,
            refresh_task,
        }
    }

    /// Current targets. The returned map never changes.
    pub fn snapshot(&self) -> Arc<TargetEndpoints> {
        self.snapshot.load_full()
    }

    pub fn state(&self) -> DirectoryState {
        self.state
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Re-queries the strategy now. Returns whether the snapshot was replaced.
    pub async fn refresh(&self) -> bool {
        if self.state == DirectoryState::Degraded {
            warn!("The {} directory is not initialized!", self.strategy.name());
            return false;
        }
        refresh_once(self.strategy.as_ref(), &self.snapshot).await
    }
}

impl Drop for TargetDirectory {
    fn drop(&mut self) {
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
    }
}

async fn refresh_loop(
    strategy: Arc<dyn DirectoryStrategy>,
    snapshot: Arc<ArcSwap<TargetEndpoints>>,
    period: Duration,
) {
    // Ticks run inline, so a slow query delays the next one instead of
    // overlapping it.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        refresh_once(strategy.as_ref(), &snapshot).await;
    }
}

async fn refresh_once(
    strategy: &dyn DirectoryStrategy,
    snapshot: &ArcSwap<TargetEndpoints>,
) -> bool {
    match strategy.query().await {
        Ok(targets) => {
            debug!(
                "TARGET_ENDPOINTS: {:?}, PeriodicUpdate: {}, PeriodicUpdateDelay: {}",
                targets,
                strategy.supports_periodic_refresh(),
                strategy.refresh_interval_millis()
            );
            snapshot.store(Arc::new(targets));
            true
        }
        Err(e) => {
            warn!(
                "Failed to refresh the {} directory, keeping {} known targets: {}",
                strategy.name(),
                snapshot.load().len(),
                e
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{StaticDirectory, UnavailableDirectory};
    use crate::error::DirectoryError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays queued results, failing once they run out.
    struct ScriptedDirectory {
        results: Mutex<VecDeque<Result<TargetEndpoints, DirectoryError>>>,
        interval_ms: u64,
    }

    impl ScriptedDirectory {
        fn new(
            interval_ms: u64,
            results: Vec<Result<TargetEndpoints, DirectoryError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                interval_ms,
            })
        }
    }

    #[async_trait]
    impl DirectoryStrategy for ScriptedDirectory {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn is_ready(&self) -> bool {
            true
        }

        fn supports_periodic_refresh(&self) -> bool {
            self.interval_ms > 0
        }

        fn refresh_interval_millis(&self) -> u64 {
            self.interval_ms
        }

        async fn query(&self) -> Result<TargetEndpoints, DirectoryError> {
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(DirectoryError::Backend("script exhausted".into())))
        }
    }

    fn targets(entries: &[(&str, u16)]) -> TargetEndpoints {
        entries.iter().map(|(h, p)| (h.to_string(), *p)).collect()
    }

    #[tokio::test]
    async fn static_directory_is_fetched_once() {
        let strategy = StaticDirectory::new(r#"{"10.0.0.5":"8080","10.0.0.6":"8080"}"#).unwrap();
        let directory = TargetDirectory::start(Arc::new(strategy)).await;
        assert_eq!(directory.state(), DirectoryState::Ready);
        assert_eq!(directory.snapshot().len(), 2);
        assert!(!directory.is_refreshing());
    }

    #[tokio::test]
    async fn unavailable_strategy_degrades() {
        let directory = TargetDirectory::start(Arc::new(UnavailableDirectory::new("boom"))).await;
        assert_eq!(directory.state(), DirectoryState::Degraded);
        assert!(directory.snapshot().is_empty());
        assert!(!directory.is_refreshing());
        assert!(!directory.refresh().await);
    }

    #[tokio::test]
    async fn failed_initial_fetch_leaves_directory_empty() {
        let strategy = ScriptedDirectory::new(
            0,
            vec![Err(DirectoryError::Backend("unreachable".into()))],
        );
        let directory = TargetDirectory::start(strategy).await;
        assert_eq!(directory.state(), DirectoryState::Ready);
        assert!(directory.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_refresh_keeps_last_known_good() {
        let strategy = ScriptedDirectory::new(
            1_000,
            vec![
                Ok(targets(&[("10.0.0.5", 8080)])),
                Err(DirectoryError::Backend("unreachable".into())),
                Ok(targets(&[("10.0.0.5", 8080), ("10.0.0.6", 8080)])),
            ],
        );
        let directory = TargetDirectory::start(strategy).await;
        assert!(directory.is_refreshing());
        assert_eq!(directory.snapshot().len(), 1);

        // First tick fails.
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(directory.snapshot().len(), 1);

        // Second tick succeeds.
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(directory.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn readers_keep_the_snapshot_they_loaded() {
        let strategy = ScriptedDirectory::new(
            0,
            vec![
                Ok(targets(&[("10.0.0.5", 8080), ("10.0.0.6", 8080)])),
                Ok(targets(&[("10.0.0.7", 8080)])),
            ],
        );
        let directory = TargetDirectory::start(strategy).await;
        let before = directory.snapshot();

        assert!(directory.refresh().await);
        let after = directory.snapshot();

        assert_eq!(before.len(), 2);
        assert!(before.contains_key("10.0.0.5") && before.contains_key("10.0.0.6"));
        assert_eq!(after.len(), 1);
        assert!(after.contains_key("10.0.0.7"));
    }
}
