//! Job handlers: the external API calls a job stands for.
//!
//! The worker only sees [`Handlers::dispatch`]; what happens behind each
//! generator is opaque to the queue.

use std::{future::Future, pin::Pin, sync::Arc};

use snafu::Snafu;

use crate::{
    config::Config,
    job::{JobKind, JobOutput, LyricsPayload, MusicPayload},
};

pub mod lyrics;
pub mod music;

pub use lyrics::OpenAiLyrics;
pub use music::HttpMusic;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HandlerError {
    #[snafu(display("Content rejected by moderation: {reason}"))]
    Rejected { reason: String },

    #[snafu(display("Upstream request failed: {source}"))]
    Upstream { source: reqwest::Error },

    #[snafu(display("Upstream returned status {status}: {body}"))]
    UpstreamStatus {
        status: reqwest::StatusCode,
        body: String,
    },

    #[snafu(display("Invalid upstream response: {message}"))]
    InvalidResponse { message: String },

    #[snafu(display("{service} is not configured"))]
    NotConfigured { service: String },
}

pub type HandlerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, HandlerError>> + Send + 'a>>;

/// Turns a story and moods into song lyrics.
pub trait LyricsGenerator: Send + Sync + 'static {
    fn generate<'a>(&'a self, payload: &'a LyricsPayload) -> HandlerFuture<'a>;
}

/// Starts a music generation task and returns its upstream task id.
pub trait MusicGenerator: Send + Sync + 'static {
    fn start<'a>(&'a self, payload: &'a MusicPayload) -> HandlerFuture<'a>;
}

#[derive(Clone)]
pub struct Handlers {
    lyrics: Arc<dyn LyricsGenerator>,
    music: Arc<dyn MusicGenerator>,
}

impl Handlers {
    pub fn new(lyrics: Arc<dyn LyricsGenerator>, music: Arc<dyn MusicGenerator>) -> Self {
        Self { lyrics, music }
    }

    pub fn from_config(config: &Config) -> Result<Self, HandlerError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("songsmith/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| HandlerError::Upstream { source })?;

        Ok(Self {
            lyrics: Arc::new(OpenAiLyrics::from_config(client.clone(), config)),
            music: Arc::new(HttpMusic::from_config(client, config)),
        })
    }

    pub async fn dispatch(&self, kind: &JobKind) -> Result<JobOutput, HandlerError> {
        match kind {
            JobKind::Lyrics(payload) => {
                let lyrics = self.lyrics.generate(payload).await?;
                Ok(JobOutput::Lyrics { lyrics })
            }
            JobKind::Music(payload) => {
                let task_id = self.music.start(payload).await?;
                Ok(JobOutput::Music { task_id })
            }
        }
    }
}
