use std::sync::Arc;

use serde::Serialize;

use crate::{
    config::Config,
    error::Error,
    handlers::Handlers,
    job::{JobId, JobKind},
    jobs::JobStore,
    queue::Queue,
    ratelimit::{Admission, Clock, RateLimiter, SystemClock, MUSIC_API_STATS},
    status::{StatusReporter, StatusView},
    store::{MemoryStore, SqliteStore, Store},
    worker::{TickSummary, Worker},
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStats {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub queue_length: u64,
    pub rate_limit: RateLimitStats,
    pub window_seconds: u64,
    pub cron_interval_seconds: u64,
}

pub struct Service {
    config: Config,
    queue: Queue,
    worker: Worker,
    status: StatusReporter,
}

#[bon::bon]
impl Service {
    pub async fn connect() -> eyre::Result<Self> {
        Self::connect_with().config(Config::default()).call().await
    }

    /// Wires every component over one shared store.
    ///
    /// Without an explicit `store`, uses the SQLite file at
    /// [`Config::db_path`] or an in-process store when no path is set.
    /// Without explicit `handlers`, builds the HTTP-backed ones from `config`.
    #[builder]
    pub async fn connect_with(
        config: Config,
        store: Option<Arc<dyn Store>>,
        handlers: Option<Handlers>,
        clock: Option<Arc<dyn Clock>>,
    ) -> eyre::Result<Self> {
        let store: Arc<dyn Store> = match (store, config.db_path()) {
            (Some(store), _) => store,
            (None, Some(path)) => {
                tracing::info!(path, "using sqlite store");
                Arc::new(SqliteStore::connect(path).await?)
            }
            (None, None) => {
                tracing::warn!("no database path configured, jobs are kept in memory");
                Arc::new(MemoryStore::new())
            }
        };

        let handlers = match handlers {
            Some(handlers) => handlers,
            None => Handlers::from_config(&config)?,
        };

        let clock: Arc<dyn Clock> = match clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        let jobs = JobStore::new(store.clone(), config.job_ttl());
        let limiter =
            RateLimiter::with_clock(store.clone(), clock, config.max_requests, config.window());
        let queue = Queue::new(jobs.clone(), limiter);
        let worker = Worker::new(queue.clone(), handlers, config.max_retries);
        let status = StatusReporter::new(jobs, config.max_requests, config.cron_interval());

        Ok(Self {
            config,
            queue,
            worker,
            status,
        })
    }
}

impl Service {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    pub async fn enqueue(&self, kind: JobKind, user_id: impl Into<String>) -> Result<JobId, Error> {
        self.queue.enqueue(kind, user_id).await
    }

    pub async fn status(&self, id: &JobId) -> Result<Option<StatusView>, Error> {
        self.status.get_status(id).await
    }

    pub async fn process_queue(&self) -> Result<TickSummary, Error> {
        self.worker.tick().await
    }

    /// Queue depth and limiter headroom. The headroom is measured on the
    /// statistics key, so each call spends a slot there and never on the
    /// worker's key.
    pub async fn stats(&self) -> Result<QueueStats, Error> {
        let queue_length = self.queue.jobs().length().await?;
        let Admission {
            remaining,
            reset_at,
            ..
        } = self.queue.limiter().try_acquire(MUSIC_API_STATS).await?;

        Ok(QueueStats {
            queue_length,
            rate_limit: RateLimitStats {
                limit: self.queue.limiter().max_requests(),
                remaining,
                reset_at,
            },
            window_seconds: self.config.window_seconds,
            cron_interval_seconds: self.config.cron_interval_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handlers::tests::handlers,
        job::JobStatus,
        queue::tests::lyrics,
        ratelimit::tests::TestClock,
    };

    async fn service(max_requests: u32) -> Service {
        let config = Config {
            max_requests,
            ..Config::default()
        };
        let clock = TestClock::aligned(config.window());

        Service::connect_with()
            .config(config)
            .store(Arc::new(MemoryStore::new()))
            .handlers(handlers())
            .clock(clock)
            .call()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_then_process() {
        let service = service(20).await;

        let id = service.enqueue(lyrics("a"), "anonymous").await.unwrap();
        assert_eq!(
            service.status(&id).await.unwrap().unwrap().status,
            JobStatus::Pending
        );

        let summary = service.process_queue().await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(
            service.status(&id).await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_stats_use_their_own_key() {
        let service = service(3).await;

        for i in 0..2 {
            service.enqueue(lyrics(&i.to_string()), "u").await.unwrap();
        }

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.queue_length, 2);
        assert_eq!(stats.rate_limit.limit, 3);
        assert_eq!(stats.rate_limit.remaining, 2);
        assert_eq!(stats.window_seconds, 10);
        assert_eq!(stats.cron_interval_seconds, 60);

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.rate_limit.remaining, 1);

        // The worker's budget is untouched by the stats calls.
        let summary = service.process_queue().await.unwrap();
        assert_eq!(summary.processed, 2);
    }

    #[tokio::test]
    async fn test_connect_defaults_to_memory() {
        let service = Service::connect_with()
            .config(Config::default())
            .handlers(handlers())
            .call()
            .await
            .unwrap();

        assert_eq!(service.queue().jobs().length().await.unwrap(), 0);
    }

    #[test]
    fn test_stats_wire_format() {
        let stats = QueueStats {
            queue_length: 4,
            rate_limit: RateLimitStats {
                limit: 20,
                remaining: 19,
                reset_at: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
            },
            window_seconds: 10,
            cron_interval_seconds: 60,
        };

        let value = serde_json::to_value(stats).unwrap();
        assert_eq!(value["queueLength"], 4);
        assert_eq!(value["rateLimit"]["limit"], 20);
        assert_eq!(value["rateLimit"]["remaining"], 19);
        assert!(value["rateLimit"]["resetAt"].is_string());
        assert_eq!(value["cronIntervalSeconds"], 60);
    }
}
