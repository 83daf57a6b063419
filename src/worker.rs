//! The drain loop run on every scheduler tick.
//!
//! A tick has no memory of earlier ticks: everything lives in the store.
//! A tick that dies halfway leaves its in-flight jobs in `processing`; they
//! are not reclaimed by later ticks.

use std::time::{Duration, Instant};

use serde::Serialize;
use strum::AsRefStr;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::{
    error::Error,
    handlers::Handlers,
    job::Job,
    queue::{Dequeued, Queue},
};

pub const MIN_SCHEDULER_INTERVAL: Duration = Duration::from_millis(100);

/// Why a tick stopped pulling jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum StopReason {
    /// The limiter denied the next dequeue
    RateLimited,
    /// The pending list was empty
    Empty,
    /// The tick dequeued `max_requests` jobs
    BatchLimit,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSummary {
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub duration_seconds: f64,
    pub stopped_by: StopReason,
}

#[derive(Clone)]
pub struct Worker {
    queue: Queue,
    handlers: Handlers,
    max_retries: u32,
}

impl Worker {
    pub fn new(queue: Queue, handlers: Handlers, max_retries: u32) -> Self {
        Self {
            queue,
            handlers,
            max_retries,
        }
    }

    /// Runs one drain loop.
    ///
    /// Pulls at most `max_requests` jobs and stops at the first dequeue that
    /// yields nothing, whether the limiter said no or the queue ran dry. A
    /// failing handler only fails its own job; store errors abort the tick.
    #[tracing::instrument(skip(self))]
    pub async fn tick(&self) -> Result<TickSummary, Error> {
        let start = Instant::now();

        let evicted = self.queue.jobs().evict_expired().await?;
        if evicted > 0 {
            tracing::debug!(evicted, "evicted expired records");
        }

        let max_requests = self.queue.limiter().max_requests();

        let mut processed = 0;
        let mut succeeded = 0;
        let mut stopped_by = StopReason::BatchLimit;

        for _ in 0..max_requests {
            let job = match self.queue.dequeue_next().await? {
                Dequeued::Job(job) => job,
                Dequeued::RateLimited { reset_at } => {
                    tracing::debug!(%reset_at, "rate limited, stopping drain");
                    stopped_by = StopReason::RateLimited;
                    break;
                }
                Dequeued::Empty => {
                    stopped_by = StopReason::Empty;
                    break;
                }
            };

            processed += 1;
            if self.process(job).await? {
                succeeded += 1;
            }
        }

        let summary = TickSummary {
            processed,
            succeeded,
            failed: processed - succeeded,
            duration_seconds: start.elapsed().as_secs_f64(),
            stopped_by,
        };

        tracing::info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            duration_seconds = summary.duration_seconds,
            stopped_by = summary.stopped_by.as_ref(),
            "tick finished"
        );

        Ok(summary)
    }

    /// Runs the handler for `job` and reports the outcome to the queue.
    /// Returns whether the handler succeeded.
    async fn process(&self, job: Job) -> Result<bool, Error> {
        match self.handlers.dispatch(&job.kind).await {
            Ok(output) => {
                self.queue.complete(&job.id, &output).await?;
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id,
                    kind = job.kind.name(),
                    attempt = job.attempts,
                    "handler failed: {e}"
                );
                self.queue
                    .fail(&job.id, &e.to_string(), self.max_retries)
                    .await?;
                Ok(false)
            }
        }
    }

    /// Calls [`Worker::tick`] every `interval` until the returned handle is
    /// aborted. Failed ticks are logged and retried on the next interval.
    ///
    /// The first tick runs immediately. Intervals shorter than
    /// [`MIN_SCHEDULER_INTERVAL`] are raised to it.
    pub fn spawn_scheduler(self, interval: Duration) -> JoinHandle<()> {
        let interval = interval.max(MIN_SCHEDULER_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                if let Err(e) = self.tick().await {
                    tracing::error!("scheduled tick failed: {e}");
                }
            }
        })
    }
}
