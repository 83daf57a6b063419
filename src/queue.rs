//! The queue engine: enqueue, dequeue, complete and fail.
//!
//! The rate limiter gates dequeue, not enqueue. Submissions are never
//! rejected for load; they wait in the pending list instead.
//!
//! # Consistency
//!
//! Single store commands are atomic, but the load-modify-persist sequences
//! in [`Queue::complete`] and [`Queue::fail`] are not. Two overlapping calls on
//! the same job id can lose an update. Popping is destructive and atomic, so
//! one job is never handed to two workers through [`Queue::dequeue_next`].

use chrono::{DateTime, Utc};

use crate::{
    error::Error,
    job::{Job, JobId, JobKind, JobOutput},
    jobs::JobStore,
    ratelimit::{RateLimiter, MUSIC_API},
};

/// Outcome of [`Queue::dequeue_next`].
///
/// Only `Job` carries work. `RateLimited` and `Empty` both mean "stop for
/// now"; they are kept apart for logging only.
#[derive(Debug)]
pub enum Dequeued {
    Job(Job),
    RateLimited { reset_at: DateTime<Utc> },
    Empty,
}

impl Dequeued {
    pub fn into_job(self) -> Option<Job> {
        match self {
            Self::Job(job) => Some(job),
            Self::RateLimited { .. } | Self::Empty => None,
        }
    }
}

#[derive(Clone)]
pub struct Queue {
    jobs: JobStore,
    limiter: RateLimiter,
}

impl Queue {
    pub fn new(jobs: JobStore, limiter: RateLimiter) -> Self {
        Self { jobs, limiter }
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Creates a pending job and adds it to the queue. Returns without
    /// waiting for it to be processed.
    #[tracing::instrument(skip(self, kind, user_id), fields(kind = kind.name()))]
    pub async fn enqueue(&self, kind: JobKind, user_id: impl Into<String>) -> Result<JobId, Error> {
        let job = Job::new(kind, user_id, Utc::now());

        self.jobs.push(&job).await?;

        tracing::info!(job_id = %job.id, "job enqueued");

        Ok(job.id)
    }

    /// Takes the next job if the rate limiter admits one more call.
    ///
    /// The limiter slot is taken before popping, so an empty queue still
    /// consumes it.
    #[tracing::instrument(skip(self))]
    pub async fn dequeue_next(&self) -> Result<Dequeued, Error> {
        let admission = self.limiter.try_acquire(MUSIC_API).await?;
        if !admission.allowed {
            return Ok(Dequeued::RateLimited {
                reset_at: admission.reset_at,
            });
        }

        let Some(mut job) = self.jobs.pop().await? else {
            return Ok(Dequeued::Empty);
        };

        job.start_attempt();
        self.jobs.put(&job).await?;

        tracing::debug!(job_id = %job.id, attempt = job.attempts, "job dequeued");

        Ok(Dequeued::Job(job))
    }

    /// Marks a job completed and stores its output. Completing an expired
    /// job is a no-op.
    #[tracing::instrument(skip(self, result))]
    pub async fn complete(&self, id: &JobId, result: &JobOutput) -> Result<(), Error> {
        let Some(mut job) = self.jobs.get(id).await? else {
            tracing::warn!(job_id = %id, "job not found on complete, it may have expired");
            return Ok(());
        };

        job.mark_completed();
        self.jobs.put(&job).await?;
        self.jobs.put_result(id, result).await?;

        tracing::info!(job_id = %id, attempts = job.attempts, "job completed");

        Ok(())
    }

    /// Records a failed attempt. The job goes back to the push end of the
    /// pending list while `attempts < max_retries`, and becomes `Failed`
    /// otherwise. Failing an expired job is a no-op.
    #[tracing::instrument(skip(self, error))]
    pub async fn fail(&self, id: &JobId, error: &str, max_retries: u32) -> Result<(), Error> {
        let Some(mut job) = self.jobs.get(id).await? else {
            tracing::warn!(job_id = %id, "job not found on fail, it may have expired");
            return Ok(());
        };

        if job.record_failure(error.to_owned(), max_retries) {
            self.jobs.push(&job).await?;

            tracing::warn!(
                job_id = %id,
                attempts = job.attempts,
                max_retries,
                error,
                "job failed, requeued"
            );
        } else {
            self.jobs.put(&job).await?;
            self.jobs.put_error(id, error).await?;

            tracing::error!(
                job_id = %id,
                attempts = job.attempts,
                error,
                "job failed permanently"
            );
        }

        Ok(())
    }
}
