//! Client-facing job status.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::Error,
    job::{Job, JobId, JobOutput, JobStatus},
    jobs::JobStore,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub status: JobStatus,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_wait_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
}

#[derive(Clone)]
pub struct StatusReporter {
    jobs: JobStore,
    max_requests: u32,
    cron_interval: Duration,
}

/// Whole scheduler ticks until a job at `position` is reached, times the
/// tick length.
pub fn estimate_wait(position: u64, max_requests: u32, cron_interval: Duration) -> u64 {
    let per_tick = u64::from(max_requests.max(1));
    position.div_ceil(per_tick) * cron_interval.as_secs()
}

impl StatusReporter {
    pub fn new(jobs: JobStore, max_requests: u32, cron_interval: Duration) -> Self {
        Self {
            jobs,
            max_requests,
            cron_interval,
        }
    }

    /// Builds the status view of a job, or `None` if it expired or never
    /// existed.
    #[tracing::instrument(skip(self))]
    pub async fn get_status(&self, id: &JobId) -> Result<Option<StatusView>, Error> {
        let Some(job) = self.jobs.get(id).await? else {
            return Ok(None);
        };

        let mut view = StatusView {
            status: job.status,
            kind: job.kind.name(),
            created_at: job.created_at,
            attempts: job.attempts,
            queue_position: None,
            estimated_wait_seconds: None,
            result: None,
            error: None,
            message: String::new(),
        };

        match job.status {
            JobStatus::Pending => {
                view.queue_position = self.position(&job).await?;
                view.estimated_wait_seconds = view
                    .queue_position
                    .map(|position| estimate_wait(position, self.max_requests, self.cron_interval));
                view.message = match (view.queue_position, view.estimated_wait_seconds) {
                    (Some(position), Some(wait)) => {
                        format!(
                            "Your job is #{position} in the queue. Estimated wait: ~{wait} seconds."
                        )
                    }
                    _ => "Your job is waiting in the queue.".to_owned(),
                };
            }
            JobStatus::Processing => {
                view.message = if job.attempts > 1 {
                    format!("Your job is being processed (attempt {}).", job.attempts)
                } else {
                    "Your job is being processed.".to_owned()
                };
            }
            JobStatus::Completed => {
                view.result = self.jobs.get_result(id).await?;
                view.message = "Your job is complete.".to_owned();
            }
            JobStatus::Failed => {
                view.error = match job.error {
                    Some(error) => Some(error),
                    None => self.jobs.get_error(id).await?,
                };
                view.message = format!(
                    "Your job failed after {} attempts. Please submit it again.",
                    job.attempts
                );
            }
        }

        Ok(Some(view))
    }

    /// 1-based position in processing order; `None` when the job is no
    /// longer in the pending list.
    async fn position(&self, job: &Job) -> Result<Option<u64>, Error> {
        let pending = self.jobs.range().await?;

        Ok(pending
            .iter()
            .position(|pending| pending.id == job.id)
            .map(|index| index as u64 + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{
        tests::{lyrics, queue},
        Queue,
    };

    fn reporter(queue: &Queue) -> StatusReporter {
        StatusReporter::new(
            queue.jobs().clone(),
            queue.limiter().max_requests(),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_estimate_wait() {
        let interval = Duration::from_secs(60);
        assert_eq!(estimate_wait(1, 20, interval), 60);
        assert_eq!(estimate_wait(20, 20, interval), 60);
        assert_eq!(estimate_wait(21, 20, interval), 120);
        assert_eq!(estimate_wait(5, 0, interval), 300);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let queue = queue(20);
        let status = reporter(&queue)
            .get_status(&JobId::from("0-nothing"))
            .await
            .unwrap();
        assert!(status.is_none());
    }

    #[tokio::test]
    async fn test_pending_positions() {
        let queue = queue(2);
        let reporter = reporter(&queue);

        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(queue.enqueue(lyrics(&i.to_string()), "u").await.unwrap());
        }

        for (index, id) in ids.iter().enumerate() {
            let view = reporter.get_status(id).await.unwrap().unwrap();
            let position = index as u64 + 1;
            assert_eq!(view.status, JobStatus::Pending);
            assert_eq!(view.kind, "lyrics");
            assert_eq!(view.queue_position, Some(position));
            assert_eq!(
                view.estimated_wait_seconds,
                Some(estimate_wait(position, 2, Duration::from_secs(60)))
            );
        }

        let last = reporter.get_status(&ids[2]).await.unwrap().unwrap();
        assert_eq!(last.estimated_wait_seconds, Some(120));
        assert_eq!(
            last.message,
            "Your job is #3 in the queue. Estimated wait: ~120 seconds."
        );
    }

    #[tokio::test]
    async fn test_processing_mentions_retries() {
        let queue = queue(20);
        let reporter = reporter(&queue);
        let id = queue.enqueue(lyrics("a"), "u").await.unwrap();

        queue.dequeue_next().await.unwrap();
        let view = reporter.get_status(&id).await.unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Processing);
        assert_eq!(view.queue_position, None);
        assert_eq!(view.message, "Your job is being processed.");

        queue.fail(&id, "boom", 3).await.unwrap();
        queue.dequeue_next().await.unwrap();
        let view = reporter.get_status(&id).await.unwrap().unwrap();
        assert_eq!(view.attempts, 2);
        assert_eq!(view.message, "Your job is being processed (attempt 2).");
    }

    #[tokio::test]
    async fn test_completed_has_result() {
        let queue = queue(20);
        let reporter = reporter(&queue);
        let id = queue.enqueue(lyrics("a"), "u").await.unwrap();

        queue.dequeue_next().await.unwrap();
        let output = JobOutput::Lyrics {
            lyrics: "chorus".to_owned(),
        };
        queue.complete(&id, &output).await.unwrap();

        let view = reporter.get_status(&id).await.unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.result, Some(output));
        assert_eq!(view.queue_position, None);
        assert_eq!(view.error, None);
    }

    #[tokio::test]
    async fn test_failed_has_error_and_message() {
        let queue = queue(20);
        let reporter = reporter(&queue);
        let id = queue.enqueue(lyrics("a"), "u").await.unwrap();

        for attempt in 1..=3 {
            queue.dequeue_next().await.unwrap();
            queue.fail(&id, &format!("boom {attempt}"), 3).await.unwrap();
        }

        let view = reporter.get_status(&id).await.unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.error.as_deref(), Some("boom 3"));
        assert_eq!(
            view.message,
            "Your job failed after 3 attempts. Please submit it again."
        );
    }

    #[test]
    fn test_wire_format_omits_absent_fields() {
        let view = StatusView {
            status: JobStatus::Processing,
            kind: "music",
            created_at: Utc::now(),
            attempts: 1,
            queue_position: None,
            estimated_wait_seconds: None,
            result: None,
            error: None,
            message: "Your job is being processed.".to_owned(),
        };

        let value = serde_json::to_value(view).unwrap();
        assert_eq!(value["type"], "music");
        assert_eq!(value["status"], "processing");
        assert!(value.get("queuePosition").is_none());
        assert!(value.get("result").is_none());
        assert!(value.get("createdAt").is_some());
    }
}
