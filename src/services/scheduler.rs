use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use super::reconciler::Reconciler;
use super::transaction_processor::TransactionProcessor;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression '{expression}' for job {job}: {reason}")]
    InvalidSchedule {
        job: String,
        expression: String,
        reason: String,
    },
}

/// A background task run on a cron schedule.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStatus {
    pub schedule: String,
    pub runs: u64,
    pub failures: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub next_run: Option<DateTime<Utc>>,
}

/// Shared view of every registered job, read by the admin API while the
/// scheduler loops write to it.
#[derive(Clone, Default)]
pub struct JobBoard(Arc<RwLock<HashMap<String, JobStatus>>>);

impl JobBoard {
    pub async fn snapshot(&self) -> HashMap<String, JobStatus> {
        self.0.read().await.clone()
    }
}

struct ScheduledJob {
    job: Arc<dyn Job>,
    schedule: Schedule,
}

#[derive(Default)]
pub struct JobScheduler {
    jobs: Vec<ScheduledJob>,
    board: JobBoard,
}

impl JobScheduler {
    /// Reports into `board` instead of a private one.
    pub fn with_board(board: JobBoard) -> Self {
        Self {
            jobs: Vec::new(),
            board,
        }
    }

    /// Six-field cron expression, seconds first.
    pub async fn add_job(&mut self, job: Arc<dyn Job>, expression: &str) -> Result<(), SchedulerError> {
        let schedule = Schedule::from_str(expression).map_err(|e| SchedulerError::InvalidSchedule {
            job: job.name().to_string(),
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;
        self.board.0.write().await.insert(
            job.name().to_string(),
            JobStatus {
                schedule: expression.to_string(),
                next_run: schedule.upcoming(Utc).next(),
                ..Default::default()
            },
        );
        self.jobs.push(ScheduledJob { job, schedule });
        Ok(())
    }

    /// Spawns one loop per job. Loops exit once `shutdown` flips to true; a run
    /// in progress is finished first.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let JobScheduler { jobs, board } = self;
        jobs.into_iter()
            .map(|scheduled| {
                let board = board.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(run_job(scheduled, board, shutdown))
            })
            .collect()
    }
}

async fn run_job(
    scheduled: ScheduledJob,
    board: JobBoard,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = scheduled.job.name().to_string();
    tracing::info!(job = %name, "Scheduled job started");

    loop {
        let Some(next) = scheduled.schedule.upcoming(Utc).next() else {
            tracing::warn!(job = %name, "Schedule has no upcoming run");
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                let result = scheduled.job.run().await;
                let mut statuses = board.0.write().await;
                let status = statuses.entry(name.clone()).or_default();
                status.runs += 1;
                status.last_run = Some(Utc::now());
                status.next_run = scheduled.schedule.upcoming(Utc).next();
                match result {
                    Ok(()) => status.last_error = None,
                    Err(e) => {
                        tracing::error!(job = %name, error = %e, "Scheduled job failed");
                        status.failures += 1;
                        status.last_error = Some(e.to_string());
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!(job = %name, "Scheduled job received shutdown signal");
                    break;
                }
            }
        }
    }
}

pub struct ReconcileJob {
    reconciler: Arc<Reconciler>,
}

impl ReconcileJob {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl Job for ReconcileJob {
    fn name(&self) -> &str {
        "reconcile"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let report = self.reconciler.tick(Utc::now()).await;
        if report.errors > 0 {
            anyhow::bail!("tick finished with {} failed stage(s) or item(s)", report.errors);
        }
        Ok(())
    }
}

pub struct LockSweepJob {
    processor: Arc<TransactionProcessor>,
}

impl LockSweepJob {
    pub fn new(processor: Arc<TransactionProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl Job for LockSweepJob {
    fn name(&self) -> &str {
        "lock_sweep"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let removed = self.processor.locks().clear_expired().await?;
        if removed > 0 {
            tracing::info!(removed, "Expired processing locks removed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    struct CountingJob {
        runs: AtomicU64,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_rejects_bad_cron_expression() {
        let mut scheduler = JobScheduler::default();
        let job = Arc::new(CountingJob {
            runs: AtomicU64::new(0),
        });
        let err = scheduler.add_job(job, "every minute").await.unwrap_err();
        assert!(err.to_string().contains("counting"));
    }

    #[tokio::test]
    async fn test_runs_and_stops_on_shutdown() {
        let job = Arc::new(CountingJob {
            runs: AtomicU64::new(0),
        });
        let board = JobBoard::default();
        let mut scheduler = JobScheduler::with_board(board.clone());
        scheduler.add_job(job.clone(), "* * * * * *").await.unwrap();
        assert!(board.snapshot().await["counting"].next_run.is_some());

        let (tx, rx) = watch::channel(false);
        let handles = scheduler.start(rx);
        tokio::time::sleep(Duration::from_millis(2200)).await;
        tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .unwrap()
                .unwrap();
        }
        assert!(job.runs.load(Ordering::SeqCst) >= 1);
        let statuses = board.snapshot().await;
        assert!(statuses["counting"].runs >= 1);
        assert_eq!(statuses["counting"].failures, 0);
    }
}
