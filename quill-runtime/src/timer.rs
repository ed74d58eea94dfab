//! Progress and heartbeat timers.
//!
//! Each quorum owns two timer tasks that post timeout events into its
//! serial queue. The progress (election) timer is reset on every valid
//! leader contact; when it fires, the quorum starts a candidacy. Its
//! duration is rank-biased so that on simultaneous silence the
//! highest-ranked peer times out first and becomes the preferred new
//! leader. The heartbeat timer fires periodically while started.

use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;
use tracing::debug;

/// Commands accepted by a timer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerCommand {
    /// Rearm the timer with a fresh duration.
    Reset,
    /// Arm a stopped timer.
    Start,
    /// Disarm the timer.
    Stop,
}

/// Handle to one timer task.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    tx: mpsc::UnboundedSender<TimerCommand>,
}

impl TimerHandle {
    /// Rearms the timer.
    pub fn reset(&self) {
        let _ = self.tx.send(TimerCommand::Reset);
    }

    /// Arms a stopped timer.
    pub fn start(&self) {
        let _ = self.tx.send(TimerCommand::Start);
    }

    /// Disarms the timer.
    pub fn stop(&self) {
        let _ = self.tx.send(TimerCommand::Stop);
    }
}

/// Timing configuration for one quorum member.
#[derive(Debug, Clone, Copy)]
pub struct TimerConfig {
    /// Base progress (election) timeout.
    pub progress_timeout: Duration,
    /// Heartbeat dispatch interval. Must be well below the progress
    /// timeout or followers will start elections under a live leader.
    pub heartbeat_interval: Duration,
    /// Seed for the jitter stream (deterministic in tests).
    pub jitter_seed: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            progress_timeout: Duration::from_millis(500),
            heartbeat_interval: Duration::from_millis(100),
            jitter_seed: 0,
        }
    }
}

impl TimerConfig {
    /// Produces the rank-biased duration generator for the progress timer.
    ///
    /// Duration = base × (1 + max_rank − rank) + jitter(0..base/2). A
    /// higher rank yields a shorter timeout, so concurrent timeouts
    /// resolve deterministically toward the highest-ranked peer.
    #[must_use]
    pub fn progress_durations(
        &self,
        rank: u64,
        max_rank: u64,
    ) -> impl FnMut() -> Duration + Send + 'static {
        let base = self.progress_timeout;
        let steps = max_rank.saturating_sub(rank) + 1;
        let mut rng = ChaCha8Rng::seed_from_u64(self.jitter_seed ^ rank);
        move || {
            let jitter_ms = rng.gen_range(0..=base.as_millis() as u64 / 2);
            base * u32::try_from(steps).unwrap_or(u32::MAX) + Duration::from_millis(jitter_ms)
        }
    }
}

/// Spawns a timer task that is armed immediately (progress timer).
///
/// On expiry `on_fire` is invoked and the timer rearms itself; `reset`
/// restarts the countdown, `stop` disarms until `start`.
pub fn spawn_timer<D, F>(name: &'static str, armed: bool, mut durations: D, on_fire: F) -> TimerHandle
where
    D: FnMut() -> Duration + Send + 'static,
    F: Fn() + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut armed = armed;
        loop {
            if armed {
                let duration = durations();
                tokio::select! {
                    command = rx.recv() => match command {
                        None => break,
                        Some(TimerCommand::Stop) => {
                            debug!(name, "timer stopped");
                            armed = false;
                        }
                        Some(TimerCommand::Reset | TimerCommand::Start) => {}
                    },
                    () = tokio::time::sleep(duration) => on_fire(),
                }
            } else {
                match rx.recv().await {
                    None => break,
                    Some(TimerCommand::Start | TimerCommand::Reset) => {
                        debug!(name, "timer started");
                        armed = true;
                    }
                    Some(TimerCommand::Stop) => {}
                }
            }
        }
    });
    TimerHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_rank_bias_orders_durations() {
        let config = TimerConfig {
            progress_timeout: Duration::from_millis(100),
            heartbeat_interval: Duration::from_millis(20),
            jitter_seed: 42,
        };

        // Highest rank must always time out before the lowest rank can.
        let mut high = config.progress_durations(3, 3);
        let mut low = config.progress_durations(1, 3);
        for _ in 0..32 {
            assert!(high() < low());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_and_resets() {
        let fired = Arc::new(AtomicU64::new(0));
        let observer = Arc::clone(&fired);

        let handle = spawn_timer(
            "test",
            true,
            || Duration::from_millis(100),
            move || {
                observer.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Stopped timers do not fire.
        handle.stop();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Restarted timers fire again.
        handle.start();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
