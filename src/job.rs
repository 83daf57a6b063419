//! Job types and their lifecycle states.
//!
//! # Job Lifecycle
//!
//! 1. Jobs are created in `Pending` status by the queue
//! 2. A worker dequeues them, moving them to `Processing`
//! 3. A successful handler moves them to `Completed`
//! 4. A failed handler sends them back to `Pending` until the retry budget is
//!    spent, after which they become `Failed`
//!
//! `Completed` and `Failed` are terminal.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

/// Opaque, unique job identifier: enqueue time in milliseconds plus a random
/// suffix so concurrent enqueues in the same millisecond do not collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(9)
            .map(|c| char::from(c).to_ascii_lowercase())
            .collect();

        Self(format!("{}-{suffix}", now.timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the pending list
    Pending,
    /// Taken by a worker, handler running
    Processing,
    /// Handler succeeded; result stored separately
    Completed,
    /// Retry budget exhausted
    Failed,
}

/// Input for a lyrics job: the user's story and the moods to write in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricsPayload {
    pub story: String,
    #[serde(default)]
    pub moods: Vec<String>,
}

/// Input for a music job, forwarded untouched to the generation API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicPayload {
    pub endpoint: String,
    pub request_body: serde_json::Value,
}

/// What a job does. Serialized as `{"type": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum JobKind {
    Lyrics(LyricsPayload),
    Music(MusicPayload),
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lyrics(_) => "lyrics",
            Self::Music(_) => "music",
        }
    }
}

/// Output of a completed job, stored apart from the job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutput {
    Lyrics {
        lyrics: String,
    },
    Music {
        #[serde(rename = "taskId")]
        task_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub user_id: String,
    #[serde(flatten)]
    pub kind: JobKind,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    /// Processing attempts started so far. Never decreases.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    pub fn new(kind: JobKind, user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::generate(now),
            user_id: user_id.into(),
            kind,
            status: JobStatus::Pending,
            created_at: now,
            attempts: 0,
            error: None,
        }
    }

    pub fn start_attempt(&mut self) {
        self.status = JobStatus::Processing;
        self.attempts += 1;
    }

    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
    }

    /// Records a failed attempt. Returns `true` when the job goes back to
    /// `Pending` for another attempt.
    pub fn record_failure(&mut self, error: String, max_retries: u32) -> bool {
        self.error = Some(error);

        if self.attempts < max_retries {
            self.status = JobStatus::Pending;
            true
        } else {
            self.status = JobStatus::Failed;
            false
        }
    }
}
