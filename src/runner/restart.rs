use std::time::Duration;

use tokio::sync::mpsc;

use crate::{
    config::{RestartConfig, WorkerId},
    state::WorkerHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RestartJob {
    pub(crate) worker: WorkerId,
    pub(crate) attempt: u32,
    pub(crate) delay: Duration,
}

/// What the supervisor does after a worker process goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitPlan {
    /// The exit was requested; leave the worker stopped.
    RemainStopped,
    /// Automatic restarts are exhausted until someone starts the worker by hand.
    CeilingExceeded { attempts: u32 },
    Restart { attempt: u32, delay: Duration },
}

#[derive(Debug)]
pub(crate) struct RestartCoordinator {
    config: RestartConfig,
    tx: mpsc::Sender<RestartJob>,
}

impl RestartCoordinator {
    pub(crate) fn new(config: RestartConfig, tx: mpsc::Sender<RestartJob>) -> Self {
        Self { config, tx }
    }

    pub(crate) fn config(&self) -> &RestartConfig {
        &self.config
    }

    /// Advances the handle's restart counter and decides the next step.
    /// Must be called with the live handle, never a copy taken before a wait.
    pub(crate) fn plan(&self, handle: &mut WorkerHandle, uptime: Option<Duration>) -> ExitPlan {
        plan_after_exit(handle, &self.config, uptime)
    }

    /// Returns `false` when the restart loop is gone and the job was dropped.
    pub(crate) async fn enqueue(&self, job: RestartJob) -> bool {
        tracing::warn!(
            worker = job.worker,
            attempt = job.attempt,
            delay_ms = job.delay.as_millis() as u64,
            "scheduling worker restart with backoff"
        );
        if let Err(error) = self.tx.send(job).await {
            tracing::error!(%error, worker = job.worker, "failed to enqueue restart job");
            return false;
        }
        true
    }
}

pub(crate) fn plan_after_exit(
    handle: &mut WorkerHandle,
    config: &RestartConfig,
    uptime: Option<Duration>,
) -> ExitPlan {
    if !handle.desired {
        return ExitPlan::RemainStopped;
    }

    if uptime.is_some_and(|uptime| uptime >= config.stable_after) {
        handle.restart_attempts = 0;
    }

    handle.restart_attempts = handle.restart_attempts.saturating_add(1);
    let attempt = handle.restart_attempts;
    if attempt > config.max_attempts {
        return ExitPlan::CeilingExceeded { attempts: attempt };
    }

    ExitPlan::Restart {
        attempt,
        delay: compute_backoff_delay(config, attempt),
    }
}

/// Linear backoff: `step * attempt`, capped at `backoff_max`.
pub(crate) fn compute_backoff_delay(config: &RestartConfig, attempt: u32) -> Duration {
    config
        .backoff_step
        .saturating_mul(attempt.max(1))
        .min(config.backoff_max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desired_handle() -> WorkerHandle {
        let mut handle = WorkerHandle::new(1, 6001);
        handle.desired = true;
        handle
    }

    #[test]
    fn backoff_grows_linearly_and_caps() {
        let config = RestartConfig::default();
        let delays = (1..=9)
            .map(|attempt| compute_backoff_delay(&config, attempt).as_millis())
            .collect::<Vec<_>>();
        assert_eq!(
            delays,
            vec![
                2000, 4000, 6000, 8000, 10000, 12000, 14000, 15000, 15000
            ]
        );
        assert_eq!(
            compute_backoff_delay(&config, 0),
            Duration::from_millis(2000)
        );
    }

    #[test]
    fn first_unexpected_exit_schedules_two_second_restart() {
        let config = RestartConfig::default();
        let mut handle = desired_handle();

        let plan = plan_after_exit(&mut handle, &config, Some(Duration::from_secs(1)));

        assert_eq!(
            plan,
            ExitPlan::Restart {
                attempt: 1,
                delay: Duration::from_millis(2000)
            }
        );
        assert_eq!(handle.restart_attempts, 1);
    }

    #[test]
    fn requested_exit_leaves_counter_untouched() {
        let config = RestartConfig::default();
        let mut handle = desired_handle();
        handle.desired = false;
        handle.restart_attempts = 4;

        assert_eq!(
            plan_after_exit(&mut handle, &config, None),
            ExitPlan::RemainStopped
        );
        assert_eq!(handle.restart_attempts, 4);
    }

    #[test]
    fn eleventh_attempt_exceeds_ceiling() {
        let config = RestartConfig::default();
        let mut handle = desired_handle();
        handle.restart_attempts = 10;

        assert_eq!(
            plan_after_exit(&mut handle, &config, Some(Duration::from_millis(50))),
            ExitPlan::CeilingExceeded { attempts: 11 }
        );
        assert!(handle.needs_manual_start(config.max_attempts));
    }

    #[test]
    fn crash_loop_reaches_ceiling() {
        let config = RestartConfig::default();
        let mut handle = desired_handle();

        let mut restarts = 0;
        loop {
            match plan_after_exit(&mut handle, &config, Some(Duration::from_millis(10))) {
                ExitPlan::Restart { .. } => restarts += 1,
                ExitPlan::CeilingExceeded { attempts } => {
                    assert_eq!(attempts, 11);
                    break;
                }
                ExitPlan::RemainStopped => panic!("worker is desired"),
            }
        }
        assert_eq!(restarts, 10);
    }

    #[test]
    fn stable_run_resets_counter_before_counting() {
        let config = RestartConfig::default();
        let mut handle = desired_handle();
        handle.restart_attempts = 7;

        let plan = plan_after_exit(&mut handle, &config, Some(config.stable_after));

        assert_eq!(
            plan,
            ExitPlan::Restart {
                attempt: 1,
                delay: Duration::from_millis(2000)
            }
        );
    }

    #[test]
    fn spawn_failure_without_uptime_keeps_counting() {
        let config = RestartConfig::default();
        let mut handle = desired_handle();
        handle.restart_attempts = 2;

        let plan = plan_after_exit(&mut handle, &config, None);

        assert_eq!(
            plan,
            ExitPlan::Restart {
                attempt: 3,
                delay: Duration::from_millis(6000)
            }
        );
    }

    #[tokio::test]
    async fn enqueue_delivers_job() {
        let (tx, mut rx) = mpsc::channel(4);
        let coordinator = RestartCoordinator::new(RestartConfig::default(), tx);
        let job = RestartJob {
            worker: 2,
            attempt: 1,
            delay: Duration::from_millis(2000),
        };

        assert!(coordinator.enqueue(job).await);
        assert_eq!(rx.recv().await, Some(job));
    }

    #[tokio::test]
    async fn enqueue_reports_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let coordinator = RestartCoordinator::new(RestartConfig::default(), tx);
        let job = RestartJob {
            worker: 1,
            attempt: 1,
            delay: Duration::ZERO,
        };
        assert!(!coordinator.enqueue(job).await);
    }
}
