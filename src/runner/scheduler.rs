//! Background loop driving the recurring task classes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::runner::{BatchRunner, TaskKind};

/// How often each task class re-runs.
#[derive(Debug, Clone, Copy)]
pub struct TaskCadences {
    pub weather: Duration,
    pub fire: Duration,
    pub health: Duration,
}

impl Default for TaskCadences {
    fn default() -> Self {
        Self {
            weather: Duration::from_secs(24 * 3600),
            fire: Duration::from_secs(24 * 3600),
            health: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl TaskCadences {
    fn for_task(&self, task: TaskKind) -> Duration {
        match task {
            TaskKind::WeatherRefresh => self.weather,
            TaskKind::FireCheck => self.fire,
            TaskKind::HealthRefresh => self.health,
        }
    }
}

pub struct Scheduler {
    runner: Arc<BatchRunner>,
    tick: Duration,
    cadences: TaskCadences,
}

impl Scheduler {
    pub fn new(runner: Arc<BatchRunner>, tick: Duration, cadences: TaskCadences) -> Self {
        Self {
            runner,
            tick,
            cadences,
        }
    }

    /// Runs until the token is cancelled. Each tick checks which task
    /// classes are due from their last-run timestamps, loads the active
    /// roster and runs the batch inline, so ticks never overlap.
    pub async fn run(self, cancel: CancellationToken) {
        info!(tick_secs = self.tick.as_secs_f64(), "scheduler started");
        let mut last_run: HashMap<TaskKind, Instant> = HashMap::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scheduler stopping");
                    break;
                }
                _ = tokio::time::sleep(self.tick) => {
                    self.tick_once(&mut last_run).await;
                }
            }
        }
    }

    async fn tick_once(&self, last_run: &mut HashMap<TaskKind, Instant>) {
        let now = Instant::now();
        for task in TaskKind::ALL {
            let due = last_run
                .get(&task)
                .is_none_or(|at| now.duration_since(*at) >= self.cadences.for_task(task));
            if !due {
                continue;
            }

            let fields = match self.runner.pipeline().storage().active_fields().await {
                Ok(fields) => fields,
                Err(err) => {
                    error!(task = %task, error = %err, "failed to load field roster");
                    continue;
                }
            };
            info!(task = %task, field_count = fields.len(), "running scheduled batch");
            self.runner.run_batch(fields, task, false).await;
            last_run.insert(task, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::runner::RetryPolicy;
    use crate::runner::tests::runner_for_scheduler;

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let runner = runner_for_scheduler(RetryPolicy::default()).await;
        let scheduler = Scheduler::new(
            runner,
            Duration::from_millis(1),
            TaskCadences::default(),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn due_task_runs_once_per_cadence() {
        let runner = runner_for_scheduler(RetryPolicy::default()).await;
        let scheduler = Scheduler::new(
            runner,
            Duration::from_millis(1),
            TaskCadences {
                weather: Duration::from_secs(3600),
                fire: Duration::from_secs(3600),
                health: Duration::from_secs(3600),
            },
        );

        let mut last_run = HashMap::new();
        scheduler.tick_once(&mut last_run).await;
        assert_eq!(last_run.len(), 3);

        // Within the cadence nothing is due again.
        let snapshot = last_run.clone();
        scheduler.tick_once(&mut last_run).await;
        assert_eq!(last_run, snapshot);
    }
}
