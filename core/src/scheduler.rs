//! Job-scheduler primitives. Two loop shapes are used throughout the
//! service processes: a "queued loop" that works through a backlog and
//! sleeps a fixed idle interval once the backlog is empty, and a "cron
//! loop" that fires on a fixed period regardless of how long the previous
//! tick took. Both stop promptly when told to shut down.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::metrics::SCHEDULER_LOOP_ERRORS;

/// Cooperative shutdown signal shared by every loop in a process. Cloning
/// gives each loop its own receiver; `trigger()` notifies all of them.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    let _ = rx.changed().await;
}

fn is_shutting_down(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

/// Runs `tick` repeatedly. Each invocation reports whether it did work
/// (`true`) or found an empty backlog (`false`); on an empty backlog the
/// loop sleeps `idle_interval` before asking again. Returns as soon as
/// shutdown is signalled, even mid-sleep.
pub async fn run_queued_loop<F, Fut>(
    name: impl Into<String>,
    idle_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    let name = name.into();
    info!(loop_name = %name, "starting queued loop");
    loop {
        if is_shutting_down(&shutdown) {
            break;
        }
        match tick().await {
            Ok(true) => continue,
            Ok(false) => {
                tokio::select! {
                    _ = tokio::time::sleep(idle_interval) => {}
                    _ = wait_for_shutdown(&mut shutdown) => break,
                }
            }
            Err(err) => {
                warn!(loop_name = %name, error = %err, "queued loop iteration failed");
                SCHEDULER_LOOP_ERRORS.with_label_values(&[&name]).inc();
                tokio::select! {
                    _ = tokio::time::sleep(idle_interval) => {}
                    _ = wait_for_shutdown(&mut shutdown) => break,
                }
            }
        }
    }
    info!(loop_name = %name, "queued loop stopped");
}

/// Runs `tick` on a fixed period, independent of how long each tick takes
/// (no drift accumulation across iterations: `tokio::time::interval`
/// schedules the next fire from the original start time).
pub async fn run_cron_loop<F, Fut>(name: impl Into<String>, period: Duration, mut shutdown: watch::Receiver<bool>, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let name = name.into();
    info!(loop_name = %name, period_secs = period.as_secs(), "starting cron loop");
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = tick().await {
                    warn!(loop_name = %name, error = %err, "cron loop iteration failed");
                    SCHEDULER_LOOP_ERRORS.with_label_values(&[&name]).inc();
                }
            }
            _ = wait_for_shutdown(&mut shutdown) => break,
        }
    }
    info!(loop_name = %name, "cron loop stopped");
}

/// Exponential backoff for plugin-facing RPCs. The scheduler loops
/// themselves never back off on error; only retried calls out to backend
/// services do.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_interval_secs: u64,
    max_interval_secs: u64,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(base_interval_secs: u64, max_interval_secs: u64) -> Self {
        ExponentialBackoff {
            base_interval_secs,
            max_interval_secs,
            current_attempt: 0,
        }
    }

    pub fn on_failure(&mut self) -> Duration {
        self.current_attempt += 1;
        let next = self
            .base_interval_secs
            .saturating_mul(2_u64.saturating_pow(self.current_attempt.saturating_sub(1)));
        Duration::from_secs(next.min(self.max_interval_secs))
    }

    pub fn on_success(&mut self) {
        self.current_attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn queued_loop_stops_on_shutdown() {
        let (signal, rx) = ShutdownSignal::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let handle = tokio::spawn(run_queued_loop("test", Duration::from_millis(5), rx, move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            }
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.trigger();
        handle.await.unwrap();
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn cron_loop_fires_on_schedule() {
        let (signal, rx) = ShutdownSignal::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let handle = tokio::spawn(run_cron_loop("test", Duration::from_millis(5), rx, move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));
        tokio::time::sleep(Duration::from_millis(35)).await;
        signal.trigger();
        handle.await.unwrap();
        assert!(calls.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn backoff_caps_at_max() {
        let mut backoff = ExponentialBackoff::new(1, 10);
        for _ in 0..10 {
            backoff.on_failure();
        }
        assert_eq!(backoff.attempts(), 10);
        assert!(backoff.on_failure() <= Duration::from_secs(10));
    }
}
