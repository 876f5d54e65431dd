//! Background Expiry Sweeper
//!
//! Lazy expiry only reclaims keys that somebody reads again. This task
//! reclaims the rest ("active expiry").
//!
//! ## Algorithm
//!
//! Every `interval` the sweeper runs one cycle:
//!
//! 1. List the keys that carry an expiry (once per cycle).
//! 2. Draw up to `sample_size` random keys from that list that were not
//!    drawn yet.
//! 3. Delete the ones whose expiry has elapsed.
//! 4. If more than `threshold` of the sample was expired, go back to 2.
//!
//! A sample that finds many dead keys suggests there are more, so the cycle
//! keeps going. A sample that finds few ends the cycle until the next tick.
//! A cycle also ends once it has run for `time_budget`; whatever is left is
//! picked up by the next tick. Each round takes the store lock only for the
//! keys it samples, and the cycle runs on Tokio's blocking pool.

use crate::storage::Store;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Pause between cycles (default: 1s)
    pub interval: Duration,

    /// Keys examined per round (default: 2)
    pub sample_size: usize,

    /// Keep sampling while the expired fraction of a round exceeds this (default: 0.25)
    pub threshold: f64,

    /// Longest a single cycle may run (default: 25ms)
    pub time_budget: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            sample_size: 2,
            threshold: 0.25,
            time_budget: Duration::from_millis(25),
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub rounds: usize,
    pub sampled: usize,
    pub expired: usize,
}

/// Runs one active-expiry cycle against `store`.
pub fn run_cycle(store: &Store, config: &ExpiryConfig) -> CycleReport {
    let mut report = CycleReport::default();
    if config.sample_size == 0 {
        return report;
    }

    let started = Instant::now();
    let mut rng = rand::thread_rng();
    let mut pool = store.keys_with_expiry();

    while !pool.is_empty() {
        let amount = config.sample_size.min(pool.len());
        let mut picked = rand::seq::index::sample(&mut rng, pool.len(), amount).into_vec();
        // Highest index first, so each swap_remove leaves the others in place
        picked.sort_unstable_by(|a, b| b.cmp(a));

        let now = SystemTime::now();
        let expired = picked
            .into_iter()
            .map(|index| pool.swap_remove(index))
            .filter(|key| store.remove_if_expired(key, now))
            .count();

        report.rounds += 1;
        report.sampled += amount;
        report.expired += expired;

        let fraction = expired as f64 / amount as f64;
        if fraction <= config.threshold || started.elapsed() >= config.time_budget {
            break;
        }
    }

    report
}

/// A handle to the running sweeper task.
///
/// Dropping the handle signals the task to stop.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    /// Spawns the sweeper on the current Tokio runtime.
    pub fn start(store: Arc<Store>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(sweeper_loop(store, config, shutdown_rx));

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Signals the task to stop without waiting for it.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops the task and waits until it has exited.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("Background expiry sweeper stopped");
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    store: Arc<Store>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(
        interval_ms = config.interval.as_millis() as u64,
        sample_size = config.sample_size,
        "Background expiry sweeper started"
    );

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let cycle_store = Arc::clone(&store);
        let cycle_config = config.clone();
        let report = match tokio::task::spawn_blocking(move || {
            run_cycle(&cycle_store, &cycle_config)
        })
        .await
        {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Expiry cycle failed");
                continue;
            }
        };

        if report.expired > 0 {
            debug!(
                rounds = report.rounds,
                sampled = report.sampled,
                expired = report.expired,
                keys_remaining = store.len(),
                "Expired keys cleaned up"
            );
        }
    }
}

/// Starts the sweeper with the default configuration.
pub fn start_expiry_sweeper(store: Arc<Store>) -> ExpirySweeper {
    ExpirySweeper::start(store, ExpiryConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Value;

    fn value() -> Value {
        Value::Str("value".to_string())
    }

    fn expired_at() -> Option<SystemTime> {
        Some(SystemTime::now() - Duration::from_secs(1))
    }

    fn live_until() -> Option<SystemTime> {
        Some(SystemTime::now() + Duration::from_secs(3600))
    }

    #[test]
    fn test_cycle_on_empty_store() {
        let store = Store::new();
        store.set("persistent", value(), None);

        let report = run_cycle(&store, &ExpiryConfig::default());
        assert_eq!(report, CycleReport::default());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_cycle_stops_after_one_clean_round() {
        let store = Store::new();
        for i in 0..10 {
            store.set(format!("live{}", i), value(), live_until());
        }

        let report = run_cycle(&store, &ExpiryConfig::default());
        assert_eq!(report.rounds, 1);
        assert_eq!(report.sampled, 2);
        assert_eq!(report.expired, 0);
        assert_eq!(store.len(), 10);
    }

    #[test]
    fn test_cycle_drains_fully_expired_keyspace() {
        let store = Store::new();
        for i in 0..100 {
            store.set(format!("dead{}", i), value(), expired_at());
        }

        let config = ExpiryConfig {
            time_budget: Duration::from_secs(60),
            ..Default::default()
        };
        let report = run_cycle(&store, &config);

        // Every round removes a full sample until nothing is left.
        assert_eq!(report.expired, 100);
        assert_eq!(report.rounds, 50);
        assert!(store.is_empty());
        assert_eq!(store.expired_count(), 100);
    }

    #[test]
    fn test_cycle_never_removes_live_keys() {
        let store = Store::new();
        for i in 0..200 {
            store.set(format!("dead{}", i), value(), expired_at());
        }
        for i in 0..5 {
            store.set(format!("live{}", i), value(), live_until());
        }
        store.set("persistent", value(), None);

        let config = ExpiryConfig::default();
        for _ in 0..1000 {
            run_cycle(&store, &config);
            if store.len() == 6 {
                break;
            }
        }

        assert_eq!(store.len(), 6);
        for i in 0..5 {
            assert!(store.exists(&format!("live{}", i)));
        }
        assert!(store.exists("persistent"));
    }

    #[test]
    fn test_cycle_samples_each_key_at_most_once() {
        let store = Store::new();
        for i in 0..20 {
            store.set(format!("dead{}", i), value(), expired_at());
        }

        let config = ExpiryConfig {
            sample_size: 5,
            time_budget: Duration::from_secs(60),
            ..Default::default()
        };
        let report = run_cycle(&store, &config);
        assert_eq!(report.rounds, 4);
        assert_eq!(report.sampled, 20);
        assert!(store.is_empty());
    }

    #[test]
    fn test_cycle_stops_when_time_budget_is_spent() {
        let store = Store::new();
        for i in 0..100 {
            store.set(format!("dead{}", i), value(), expired_at());
        }

        let config = ExpiryConfig {
            time_budget: Duration::ZERO,
            ..Default::default()
        };
        let report = run_cycle(&store, &config);
        assert_eq!(report.rounds, 1);
        assert_eq!(report.expired, 2);
        assert_eq!(store.len(), 98);
    }

    #[test]
    fn test_expiry_storm_cycle_is_bounded() {
        let store = Store::new();
        for i in 0..40_000 {
            store.set(format!("dead{}", i), value(), expired_at());
        }

        let started = Instant::now();
        let report = run_cycle(&store, &ExpiryConfig::default());
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "cycle took {:?}",
            started.elapsed()
        );
        assert!(report.expired > 0);
        assert_eq!(store.len(), 40_000 - report.expired);

        // Later ticks finish the job.
        let mut cycles = 1;
        while !store.is_empty() && cycles < 10_000 {
            run_cycle(&store, &ExpiryConfig::default());
            cycles += 1;
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_cleans_expired_keys() {
        let store = Arc::new(Store::new());

        for i in 0..10 {
            store.set(
                format!("key{}", i),
                value(),
                Some(SystemTime::now() + Duration::from_millis(50)),
            );
        }
        store.set("persistent", value(), None);
        assert_eq!(store.len(), 11);

        let config = ExpiryConfig {
            interval: Duration::from_millis(10),
            ..Default::default()
        };
        let _sweeper = ExpirySweeper::start(Arc::clone(&store), config);

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(store.len(), 1);
        assert!(store.exists("persistent"));
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let store = Arc::new(Store::new());

        let config = ExpiryConfig {
            interval: Duration::from_millis(10),
            ..Default::default()
        };
        let sweeper = ExpirySweeper::start(Arc::clone(&store), config);
        sweeper.shutdown().await;

        store.set("key", value(), expired_at());
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Nobody swept it; only a read removes it now.
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_string("key"), Ok(None));
        assert!(store.is_empty());
    }
}
