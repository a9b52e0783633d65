//! Per-entity heartbeat bookkeeping.
//!
//! The device's 1 s tick drives every manager; when a beat falls due the
//! device updates the owning DeviceDiagnosis server feature's heartbeat
//! data, which in turn notifies subscribers.

use std::time::Duration;

use tokio::time::Instant;

/// Default heartbeat period.
pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(4);

pub struct HeartbeatManager {
    period: Duration,
    next_due: Option<Instant>,
    counter: u64,
    /// Feature id of the DeviceDiagnosis server within the owning entity.
    feature_id: Option<u32>,
}

impl HeartbeatManager {
    pub fn new(period: Duration) -> Self {
        HeartbeatManager {
            period,
            next_due: None,
            counter: 0,
            feature_id: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn feature_id(&self) -> Option<u32> {
        self.feature_id
    }

    /// Bind the manager to the heartbeat-carrying feature and start
    /// beating.
    pub fn enable(&mut self, feature_id: u32) {
        self.feature_id = Some(feature_id);
        if self.next_due.is_none() {
            self.next_due = Some(Instant::now() + self.period);
        }
    }

    pub fn is_running(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    /// Advance the manager; returns the new counter value when a beat
    /// fell due.
    pub fn tick(&mut self, now: Instant) -> Option<u64> {
        let due = self.next_due?;
        if now < due {
            return None;
        }
        self.next_due = Some(now + self.period);
        self.counter += 1;
        Some(self.counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn counter_is_strictly_monotonic() {
        let mut manager = HeartbeatManager::new(Duration::from_secs(4));
        manager.enable(1);

        let mut last = 0;
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(4)).await;
            let counter = manager.tick(Instant::now()).expect("beat due");
            assert!(counter > last);
            last = counter;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_manager_never_beats() {
        let mut manager = HeartbeatManager::new(Duration::from_secs(4));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(manager.tick(Instant::now()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_suppresses_further_beats() {
        let mut manager = HeartbeatManager::new(Duration::from_secs(4));
        manager.enable(1);
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(manager.tick(Instant::now()).is_some());

        manager.stop();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(manager.tick(Instant::now()), None);
    }
}
