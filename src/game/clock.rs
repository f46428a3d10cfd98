//! Fixed-rate simulation clock
//!
//! Ticks only while the match is active. Each tick advances game time by the measured
//! wall time since the previous tick, applies time-based effects inside the store and
//! publishes the resulting snapshot.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::ws::protocol::GameState;

use super::store::MatchStore;

/// Receives one snapshot per tick
pub trait SnapshotSink: Send + Sync {
    fn publish(&self, snapshot: &GameState);
}

pub struct SimulationClock {
    store: Arc<MatchStore>,
    sink: Arc<dyn SnapshotSink>,
    tick_interval: Duration,
}

impl SimulationClock {
    pub fn new(store: Arc<MatchStore>, sink: Arc<dyn SnapshotSink>, tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            store,
            sink,
            tick_interval: Duration::from_micros(1_000_000 / tick_rate as u64),
        }
    }

    /// Run until `shutdown` flips to true (or its sender is dropped)
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut active_rx = self.store.subscribe_active();
        info!(tick_ms = self.tick_interval.as_millis() as u64, "Simulation clock running");

        loop {
            // Park until the match becomes active
            while !*active_rx.borrow_and_update() {
                tokio::select! {
                    changed = active_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = wait_for_stop(&mut shutdown) => {
                        info!("Simulation clock stopped");
                        return;
                    }
                }
            }

            debug!(match_id = %self.store.match_id(), "Clock resumed");
            let mut ticker = interval(self.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick of a tokio interval fires immediately
            ticker.tick().await;
            let mut last = Instant::now();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = active_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        if !*active_rx.borrow_and_update() {
                            debug!("Clock halted, match inactive");
                            break;
                        }
                        // Restarted while running; measure from the restart
                        last = Instant::now();
                        continue;
                    }
                    _ = wait_for_stop(&mut shutdown) => {
                        info!("Simulation clock stopped");
                        return;
                    }
                }

                let now = Instant::now();
                let elapsed = now - last;
                last = now;

                match self.store.advance(elapsed) {
                    Some(snapshot) => self.sink.publish(&snapshot),
                    None => break,
                }
            }
        }
    }
}

/// Resolves once the stop flag is set or its sender is gone
pub(crate) async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::ArenaBounds;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        snapshots: Mutex<Vec<GameState>>,
    }

    impl SnapshotSink for RecordingSink {
        fn publish(&self, snapshot: &GameState) {
            self.snapshots.lock().push(snapshot.clone());
        }
    }

    impl RecordingSink {
        fn count(&self) -> usize {
            self.snapshots.lock().len()
        }
    }

    fn setup() -> (Arc<MatchStore>, Arc<RecordingSink>, SimulationClock) {
        let store = Arc::new(MatchStore::new(4, ArenaBounds::default(), 1));
        let sink = Arc::new(RecordingSink::default());
        let clock = SimulationClock::new(store.clone(), sink.clone(), 20);
        (store, sink, clock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_idle_until_started() {
        let (store, sink, clock) = setup();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(clock.run(stop_rx));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sink.count(), 0);
        assert_eq!(store.game_time(), 0.0);

        store.start();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(sink.count() >= 5);

        stop_tx.send_replace(true);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_game_time_monotonic_and_halts_on_end() {
        let (store, sink, clock) = setup();
        let (stop_tx, stop_rx) = watch::channel(false);
        store.start();
        let task = tokio::spawn(clock.run(stop_rx));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        {
            let snapshots = sink.snapshots.lock();
            assert!(snapshots.windows(2).all(|w| w[1].game_time >= w[0].game_time));
            assert!(snapshots.iter().all(|s| s.is_game_active));
        }

        store.end();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let frozen_time = store.game_time();
        let frozen_count = sink.count();
        assert!(frozen_time > 0.5);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(store.game_time(), frozen_time);
        assert_eq!(sink.count(), frozen_count);

        // Restart resets the clock and resumes ticking
        store.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.game_time() < frozen_time);
        assert!(sink.count() > frozen_count);

        stop_tx.send_replace(true);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_prompt_and_repeatable() {
        let (store, _sink, clock) = setup();
        store.start();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(clock.run(stop_rx));

        stop_tx.send_replace(true);
        stop_tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("clock did not stop")
            .unwrap();
    }
}
