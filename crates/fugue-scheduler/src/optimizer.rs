//! Periodic schedule optimizer

use crate::task_scheduler::TaskScheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Pacing of the optimizer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OptimizerConfig {
    /// Time between rounds
    pub period: Duration,
    /// Time before the first round
    pub initial_delay: Duration,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(5000),
            initial_delay: Duration::from_millis(500),
        }
    }
}

/// Background task running [`TaskScheduler::optimize_once`] every period
pub struct ScheduleOptimizer {
    stop: watch::Sender<bool>,
    done: oneshot::Receiver<u64>,
    handle: JoinHandle<()>,
}

impl ScheduleOptimizer {
    /// Spawn the optimizer on the current tokio runtime
    pub fn start(scheduler: Arc<TaskScheduler>, config: OptimizerConfig) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let (done_tx, done) = oneshot::channel();
        let handle = tokio::spawn(run(scheduler, config, stop_rx, done_tx));
        Self { stop, done, handle }
    }

    /// Whether the loop is still running
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the loop and wait for it to acknowledge. Returns the rounds run.
    pub async fn shutdown(self) -> u64 {
        let _ = self.stop.send(true);
        let rounds = self.done.await.unwrap_or(0);
        if let Err(e) = self.handle.await {
            tracing::error!("Optimizer task ended abnormally: {}", e);
        }
        rounds
    }
}

async fn run(
    scheduler: Arc<TaskScheduler>,
    config: OptimizerConfig,
    mut stop: watch::Receiver<bool>,
    done: oneshot::Sender<u64>,
) {
    let mut rounds = 0u64;
    tracing::info!(
        "Schedule optimizer starting (period {:?}, delay {:?})",
        config.period,
        config.initial_delay
    );

    let started = tokio::select! {
        _ = tokio::time::sleep(config.initial_delay) => true,
        _ = stop.changed() => false,
    };

    if started {
        let mut ticker = tokio::time::interval(config.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let s = Arc::clone(&scheduler);
                    match tokio::task::spawn_blocking(move || s.optimize_once()).await {
                        Ok(report) => {
                            rounds += 1;
                            if !report.donations.is_empty() {
                                tracing::info!("Optimization round {}: {} donations", rounds, report.donations.len());
                            }
                        }
                        Err(e) => tracing::error!("Optimization round failed: {}", e),
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
    }

    tracing::info!("Schedule optimizer stopping after {} rounds", rounds);
    let _ = done.send(rounds);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_scheduler::{ActionOrchestrator, Launch, SchedulerConfig};

    struct Nothing;

    impl ActionOrchestrator for Nothing {
        fn launch(&self, _launch: Launch) {}
    }

    #[tokio::test]
    async fn test_shutdown_before_first_round() {
        let scheduler = Arc::new(TaskScheduler::new(SchedulerConfig::default(), Arc::new(Nothing)));
        let optimizer = ScheduleOptimizer::start(scheduler, OptimizerConfig::default());
        assert_eq!(optimizer.shutdown().await, 0);
    }

    #[tokio::test]
    async fn test_runs_periodically() {
        let scheduler = Arc::new(TaskScheduler::new(SchedulerConfig::default(), Arc::new(Nothing)));
        let config = OptimizerConfig {
            period: Duration::from_millis(10),
            initial_delay: Duration::from_millis(1),
        };
        let optimizer = ScheduleOptimizer::start(scheduler, config);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(optimizer.is_running());
        assert!(optimizer.shutdown().await >= 2);
    }
}
