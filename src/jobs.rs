//! Job records and the pending list, laid out over the shared store.
//!
//! The pending list holds full job snapshots so that popping a job does not
//! depend on its record still being alive. Every record written here carries
//! the configured time-to-live; callers must tolerate records vanishing.

use std::{sync::Arc, time::Duration};

use serde::{de::DeserializeOwned, Serialize};
use snafu::ResultExt;

use crate::{
    error::{CorruptSnafu, Error},
    job::{Job, JobId, JobOutput},
    store::{keys, Store},
};

#[derive(Clone)]
pub struct JobStore {
    store: Arc<dyn Store>,
    ttl: Duration,
}

fn encode(key: &str, value: &impl Serialize) -> Result<String, Error> {
    serde_json::to_string(value).context(CorruptSnafu { key })
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, Error> {
    serde_json::from_str(raw).context(CorruptSnafu { key })
}

impl JobStore {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Adds `job` at the push end of the pending list and writes its record.
    pub async fn push(&self, job: &Job) -> Result<(), Error> {
        let raw = encode(keys::PENDING, job)?;

        self.store.lpush(keys::PENDING, raw).await?;
        self.put(job).await
    }

    /// Removes the oldest job from the pending list.
    pub async fn pop(&self) -> Result<Option<Job>, Error> {
        self.store
            .rpop(keys::PENDING)
            .await?
            .map(|raw| decode(keys::PENDING, &raw))
            .transpose()
    }

    pub async fn get(&self, id: &JobId) -> Result<Option<Job>, Error> {
        let key = keys::job(id);

        self.store
            .get(&key)
            .await?
            .map(|raw| decode(&key, &raw))
            .transpose()
    }

    /// Overwrites the record for `job`, refreshing its time-to-live.
    pub async fn put(&self, job: &Job) -> Result<(), Error> {
        let key = keys::job(&job.id);
        let raw = encode(&key, job)?;

        self.store.set_ex(&key, raw, self.ttl).await
    }

    pub async fn length(&self) -> Result<u64, Error> {
        self.store.llen(keys::PENDING).await
    }

    /// Snapshot of the pending list, next-to-be-processed first.
    ///
    /// Reads the whole list; keep it off hot paths for long queues.
    pub async fn range(&self) -> Result<Vec<Job>, Error> {
        let raw = self.store.lrange(keys::PENDING).await?;

        raw.iter()
            .rev()
            .map(|raw| decode(keys::PENDING, raw))
            .collect()
    }

    pub async fn get_result(&self, id: &JobId) -> Result<Option<JobOutput>, Error> {
        let key = keys::result(id);

        self.store
            .get(&key)
            .await?
            .map(|raw| decode(&key, &raw))
            .transpose()
    }

    pub async fn put_result(&self, id: &JobId, result: &JobOutput) -> Result<(), Error> {
        let key = keys::result(id);
        let raw = encode(&key, result)?;

        self.store.set_ex(&key, raw, self.ttl).await
    }

    pub async fn get_error(&self, id: &JobId) -> Result<Option<String>, Error> {
        self.store.get(&keys::error(id)).await
    }

    /// Side channel holding the last failure text of a job.
    pub async fn put_error(&self, id: &JobId, message: &str) -> Result<(), Error> {
        self.store
            .set_ex(&keys::error(id), message.to_owned(), self.ttl)
            .await
    }

    /// Housekeeping for backends that do not expire keys on their own.
    pub async fn evict_expired(&self) -> Result<u64, Error> {
        self.store.evict_expired().await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{
        job::{JobKind, JobStatus, LyricsPayload},
        store::MemoryStore,
    };

    fn job(story: &str) -> Job {
        Job::new(
            JobKind::Lyrics(LyricsPayload {
                story: story.to_owned(),
                moods: vec![],
            }),
            "anonymous",
            Utc::now(),
        )
    }

    fn jobs() -> JobStore {
        JobStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_push_pop_is_fifo() {
        let jobs = jobs();
        let (a, b, c) = (job("a"), job("b"), job("c"));

        jobs.push(&a).await.unwrap();
        jobs.push(&b).await.unwrap();
        jobs.push(&c).await.unwrap();
        assert_eq!(jobs.length().await.unwrap(), 3);

        assert_eq!(jobs.pop().await.unwrap().unwrap().id, a.id);
        assert_eq!(jobs.pop().await.unwrap().unwrap().id, b.id);
        assert_eq!(jobs.pop().await.unwrap().unwrap().id, c.id);
        assert!(jobs.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_range_is_enqueue_order() {
        let jobs = jobs();
        let all: Vec<Job> = (0..5).map(|i| job(&i.to_string())).collect();

        for job in &all {
            jobs.push(job).await.unwrap();
        }

        let ids: Vec<JobId> = jobs
            .range()
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect();
        let expected: Vec<JobId> = all.iter().map(|job| job.id.clone()).collect();
        assert_eq!(ids, expected);

        // range does not consume
        assert_eq!(jobs.length().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_push_writes_record() {
        let jobs = jobs();
        let job = job("a");

        jobs.push(&job).await.unwrap();
        assert_eq!(jobs.get(&job.id).await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let jobs = jobs();
        let mut job = job("a");

        jobs.put(&job).await.unwrap();
        job.start_attempt();
        jobs.put(&job).await.unwrap();

        let stored = jobs.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_records_expire() {
        let jobs = JobStore::new(Arc::new(MemoryStore::new()), Duration::ZERO);
        let job = job("a");

        jobs.put(&job).await.unwrap();
        jobs.put_result(
            &job.id,
            &JobOutput::Lyrics {
                lyrics: "x".to_owned(),
            },
        )
        .await
        .unwrap();
        jobs.put_error(&job.id, "boom").await.unwrap();

        assert!(jobs.get(&job.id).await.unwrap().is_none());
        assert!(jobs.get_result(&job.id).await.unwrap().is_none());
        assert!(jobs.get_error(&job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_results_and_errors() {
        let jobs = jobs();
        let id = JobId::from("1-abc");
        let output = JobOutput::Music {
            task_id: "task-9".to_owned(),
        };

        assert!(jobs.get_result(&id).await.unwrap().is_none());
        jobs.put_result(&id, &output).await.unwrap();
        assert_eq!(jobs.get_result(&id).await.unwrap(), Some(output));

        jobs.put_error(&id, "upstream timed out").await.unwrap();
        assert_eq!(
            jobs.get_error(&id).await.unwrap().as_deref(),
            Some("upstream timed out")
        );
    }

    #[tokio::test]
    async fn test_corrupt_record_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let jobs = JobStore::new(store.clone(), Duration::from_secs(60));

        store
            .set_ex(&keys::job("bad"), "not json".to_owned(), Duration::from_secs(60))
            .await
            .unwrap();

        let err = jobs.get(&JobId::from("bad")).await.unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }));
    }
}
