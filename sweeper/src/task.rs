use crate::job::{Job, report};
use crate::stats::PeriodicTaskStats;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task '{0}' is not running")]
    Stopped(String),
    #[error("Job '{0}' failed: {1}")]
    Failed(String, String),
    #[error("Job '{0}' timed out after {1:?}")]
    TimedOut(String, Duration),
}

/// Configuration for a periodic task
#[derive(Debug, Clone)]
pub struct PeriodicTaskOptions {
    /// Time between two scheduled runs
    pub interval: Duration,
    /// Delay before the first scheduled run
    pub initial_delay: Duration,
    /// Upper bound for a single run
    pub run_timeout: Duration,
}

impl Default for PeriodicTaskOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            initial_delay: Duration::ZERO,
            run_timeout: Duration::from_secs(30),
        }
    }
}

/// Shortest interval between two scheduled runs
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

type RunNowReply = oneshot::Sender<Result<usize, TaskError>>;

/// Handle to a running periodic job. Dropping it stops the job.
#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    stats: Arc<PeriodicTaskStats>,
    shutdown_token: CancellationToken,
    run_now_sender: mpsc::Sender<RunNowReply>,
}

impl PeriodicTask {
    pub fn start<J: Job>(job: J) -> Self {
        Self::start_with_opt(job, PeriodicTaskOptions::default())
    }

    /// A zero `interval` is raised to [`MIN_INTERVAL`]
    pub fn start_with_opt<J: Job>(job: J, mut opt: PeriodicTaskOptions) -> Self {
        if opt.interval < MIN_INTERVAL {
            warn!(
                "Periodic task '{}' interval {:?} is below {:?}, using the minimum",
                job.name(),
                opt.interval,
                MIN_INTERVAL
            );
            opt.interval = MIN_INTERVAL;
        }
        let (run_now_sender, run_now_receiver) = mpsc::channel(8);
        let task = Self {
            name: job.name().to_string(),
            stats: Arc::new(PeriodicTaskStats::default()),
            shutdown_token: CancellationToken::new(),
            run_now_sender,
        };
        task.spawn(job, opt, run_now_receiver);
        task
    }

    fn spawn<J: Job>(
        &self,
        job: J,
        opt: PeriodicTaskOptions,
        mut run_now_receiver: mpsc::Receiver<RunNowReply>,
    ) {
        let stats = Arc::clone(&self.stats);
        let shutdown_token = self.shutdown_token.clone();

        tokio::spawn(async move {
            let initial_delay = tokio::time::sleep(opt.initial_delay);
            tokio::pin!(initial_delay);
            // requested runs are served while waiting for the first scheduled one
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_token.cancelled() => {
                        debug!("Periodic task '{}' cancelled before first run", job.name());
                        return;
                    }
                    Some(reply) = run_now_receiver.recv() => {
                        let outcome = run_once(&job, opt.run_timeout, &stats).await;
                        let _ = reply.send(outcome);
                    }
                    _ = &mut initial_delay => break,
                }
            }
            info!(
                "Starting periodic task '{}' every {:?}",
                job.name(),
                opt.interval
            );

            let mut ticker = interval(opt.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let reply = tokio::select! {
                    biased;
                    _ = shutdown_token.cancelled() => {
                        info!("Periodic task '{}' shutting down", job.name());
                        break;
                    }
                    _ = ticker.tick() => None,
                    Some(reply) = run_now_receiver.recv() => Some(reply),
                };

                let outcome = run_once(&job, opt.run_timeout, &stats).await;
                if let Some(reply) = reply {
                    // the requester may have given up waiting
                    let _ = reply.send(outcome);
                }
            }
        });
    }

    /// Runs the job now, in order with the scheduled runs, and waits for the result
    pub async fn run_now(&self) -> Result<usize, TaskError> {
        let (reply, outcome) = oneshot::channel();
        self.run_now_sender
            .send(reply)
            .await
            .map_err(|_| TaskError::Stopped(self.name.clone()))?;
        outcome
            .await
            .map_err(|_| TaskError::Stopped(self.name.clone()))?
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of completed runs
    pub fn runs(&self) -> usize {
        self.stats.runs()
    }

    /// Number of runs that failed or timed out
    pub fn failures(&self) -> usize {
        self.stats.failures()
    }

    /// Total items processed by successful runs
    pub fn processed(&self) -> usize {
        self.stats.processed()
    }

    /// Stops the task; later `run_now` calls fail with [`TaskError::Stopped`]
    pub fn stop(&self) {
        self.shutdown_token.cancel();
    }
}

async fn run_once<J: Job>(
    job: &J,
    run_timeout: Duration,
    stats: &PeriodicTaskStats,
) -> Result<usize, TaskError> {
    match timeout(run_timeout, job.run()).await {
        Ok(Ok(items)) => {
            stats.record_success(items);
            if items > 0 {
                debug!("Periodic task '{}' processed {} items", job.name(), items);
            }
            Ok(items)
        }
        Ok(Err(e)) => {
            stats.record_failure();
            let message = report(e.as_ref());
            error!("Periodic task '{}' failed: {}", job.name(), message);
            Err(TaskError::Failed(job.name().to_string(), message))
        }
        Err(_) => {
            stats.record_failure();
            warn!(
                "Periodic task '{}' timed out after {:?}",
                job.name(),
                run_timeout
            );
            Err(TaskError::TimedOut(job.name().to_string(), run_timeout))
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        debug!("Periodic task '{}' dropping, stopping job", self.name);
        self.shutdown_token.cancel();
    }
}
