use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::SupervisorHandle;

/// Owned periodic task issuing schedule ticks; stops when dropped
#[derive(Debug)]
pub struct ScheduleTicker {
    task: JoinHandle<()>,
}

impl ScheduleTicker {
    /// First tick fires immediately, then once per `period`
    pub fn start(handle: SupervisorHandle, period: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                // Fire and forget; the outcome lands in the published state
                drop(handle.schedule_tick());
            }
        });
        Self { task }
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for ScheduleTicker {
    fn drop(&mut self) {
        self.task.abort();
    }
}
