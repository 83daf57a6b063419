use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

fn default_max_requests() -> u32 {
    20
}

fn default_window_seconds() -> u64 {
    10
}

fn default_job_ttl_seconds() -> u64 {
    3600
}

fn default_max_retries() -> u32 {
    3
}

fn default_cron_interval_seconds() -> u64 {
    60
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    8080
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_owned()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_owned()
}

/// Process configuration, read from `SONGSMITH_*` environment variables.
#[derive(Deserialize)]
pub struct Config {
    /// SQLite file backing the shared store. Unset means an in-process store.
    pub db_path: Option<String>,

    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    #[serde(default = "default_job_ttl_seconds")]
    pub job_ttl_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Cadence of the external scheduler. Only used for wait estimates unless
    /// the embedded scheduler is enabled.
    #[serde(default = "default_cron_interval_seconds")]
    pub cron_interval_seconds: u64,
    pub cron_secret: Option<SecretString>,
    #[serde(default)]
    pub scheduler_enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,
    pub llm_api_key: Option<SecretString>,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    pub music_base_url: Option<String>,
    pub music_api_key: Option<SecretString>,
}

impl Config {
    pub fn load() -> eyre::Result<Self> {
        let config = envy::prefixed("SONGSMITH_").from_env::<Self>()?;
        config.validate()?;

        Ok(config)
    }

    /// Rejects settings the scheduler and limiter cannot run with.
    pub fn validate(&self) -> eyre::Result<()> {
        eyre::ensure!(
            !self.scheduler_enabled || self.cron_interval_seconds > 0,
            "SONGSMITH_CRON_INTERVAL_SECONDS must be positive when the scheduler is enabled"
        );
        eyre::ensure!(
            self.window_seconds > 0,
            "SONGSMITH_WINDOW_SECONDS must be positive"
        );

        Ok(())
    }

    pub fn db_path(&self) -> Option<&str> {
        self.db_path.as_deref()
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_seconds)
    }

    pub fn cron_interval(&self) -> Duration {
        Duration::from_secs(self.cron_interval_seconds)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            max_requests: default_max_requests(),
            window_seconds: default_window_seconds(),
            job_ttl_seconds: default_job_ttl_seconds(),
            max_retries: default_max_retries(),
            cron_interval_seconds: default_cron_interval_seconds(),
            cron_secret: None,
            scheduler_enabled: false,
            host: default_host(),
            port: default_port(),
            llm_base_url: default_llm_base_url(),
            llm_api_key: None,
            llm_model: default_llm_model(),
            music_base_url: None,
            music_api_key: None,
        }
    }
}
