//! Periodic garbage collection in the background.

use super::LruGarbageCollector;
use crate::error::{CoreError, CoreResult};
use crate::persistence::Persistence;
use crate::types::TargetId;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Delay before the first pass.
pub const INITIAL_GC_DELAY: Duration = Duration::from_secs(60);

/// Delay between passes.
pub const REGULAR_GC_DELAY: Duration = Duration::from_secs(5 * 60);

/// Reports targets that must survive collection.
pub trait ActiveTargetsProvider: Send + Sync {
    /// Ids of targets currently being listened to.
    fn active_target_ids(&self) -> BTreeSet<TargetId>;
}

struct Running {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Runs [`LruGarbageCollector::collect`] on a tokio task.
pub struct LruScheduler {
    gc: Arc<LruGarbageCollector>,
    initial_delay: Duration,
    regular_delay: Duration,
    running: Mutex<Option<Running>>,
}

impl LruScheduler {
    /// Creates a stopped scheduler with the default delays.
    #[must_use]
    pub fn new(gc: Arc<LruGarbageCollector>) -> Self {
        Self::with_delays(gc, INITIAL_GC_DELAY, REGULAR_GC_DELAY)
    }

    /// Creates a stopped scheduler with custom delays.
    #[must_use]
    pub fn with_delays(gc: Arc<LruGarbageCollector>, initial_delay: Duration, regular_delay: Duration) -> Self {
        Self {
            gc,
            initial_delay,
            regular_delay,
            running: Mutex::new(None),
        }
    }

    /// Starts the collection loop. Must be called inside a tokio runtime.
    ///
    /// Active targets are fetched from `provider` right before each pass.
    /// A failed pass is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns a contract violation if already started.
    pub fn start(
        &self,
        persistence: Arc<Persistence>,
        provider: Arc<dyn ActiveTargetsProvider>,
    ) -> CoreResult<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(CoreError::contract_violation("lru scheduler already started"));
        }
        if !self.gc.params().is_enabled() {
            debug!("garbage collection disabled, scheduler not started");
            return Ok(());
        }

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let gc = Arc::clone(&self.gc);
        let initial_delay = self.initial_delay;
        let regular_delay = self.regular_delay;

        let handle = tokio::spawn(async move {
            let mut delay = initial_delay;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        let active = provider.active_target_ids();
                        match gc.collect(&persistence, &active).await {
                            Ok(results) => debug!(?results, "garbage collection pass"),
                            Err(e) if e.is_primary_lease_lost() => {
                                debug!("not primary, skipping garbage collection");
                            }
                            Err(e) => warn!(error = %e, "garbage collection pass failed"),
                        }
                        delay = regular_delay;
                    }

                    _ = shutdown_rx.recv() => {
                        info!("lru scheduler shutting down");
                        break;
                    }
                }
            }
        });

        *running = Some(Running { shutdown_tx, handle });
        Ok(())
    }

    /// True while the loop is running.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Stops the loop and waits for an in-flight pass to finish.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(Running { shutdown_tx, handle }) = running {
            shutdown_tx.send(()).ok();
            if let Err(e) = handle.await {
                warn!(error = %e, "lru scheduler task ended abnormally");
            }
        }
    }
}

impl Drop for LruScheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.handle.abort();
        }
    }
}

impl std::fmt::Debug for LruScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruScheduler")
            .field("initial_delay", &self.initial_delay)
            .field("regular_delay", &self.regular_delay)
            .field("started", &self.is_started())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::lru::LruParams;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    impl ActiveTargetsProvider for CountingProvider {
        fn active_target_ids(&self) -> BTreeSet<TargetId> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            BTreeSet::new()
        }
    }

    fn scheduler(params: LruParams) -> LruScheduler {
        LruScheduler::with_delays(
            Arc::new(LruGarbageCollector::new(params)),
            Duration::from_millis(10),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn runs_passes_until_stopped() {
        let persistence = Arc::new(Persistence::in_memory(StoreConfig::default()));
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let scheduler = scheduler(LruParams::DEFAULT);
        scheduler.start(persistence, provider.clone()).unwrap();
        assert!(scheduler.is_started());

        tokio::time::sleep(Duration::from_millis(80)).await;
        scheduler.stop().await;
        assert!(!scheduler.is_started());

        let calls = provider.calls.load(Ordering::SeqCst);
        assert!(calls >= 2, "expected several passes, got {calls}");
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn failed_passes_are_skipped() {
        let persistence = Arc::new(Persistence::in_memory(StoreConfig::default()));
        persistence.set_primary(false);
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let scheduler = scheduler(LruParams::DEFAULT);
        scheduler.start(persistence, provider.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(scheduler.is_started());
        assert!(provider.calls.load(Ordering::SeqCst) >= 2);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let persistence = Arc::new(Persistence::in_memory(StoreConfig::default()));
        let provider: Arc<dyn ActiveTargetsProvider> = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let scheduler = scheduler(LruParams::DEFAULT);
        scheduler.start(persistence.clone(), provider.clone()).unwrap();
        assert!(scheduler.start(persistence, provider).is_err());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn disabled_collection_never_starts() {
        let persistence = Arc::new(Persistence::in_memory(StoreConfig::default()));
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let scheduler = scheduler(LruParams::DISABLED);
        scheduler.start(persistence, provider).unwrap();
        assert!(!scheduler.is_started());
    }
}
