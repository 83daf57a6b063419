//! Lyrics generation against an OpenAI-compatible API.
//!
//! Flow: moderate the story, draft lyrics, rewrite the draft, moderate the
//! final text. Any flagged moderation result fails the job.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};

use super::{
    HandlerError, HandlerFuture, InvalidResponseSnafu, LyricsGenerator, NotConfiguredSnafu,
    RejectedSnafu, UpstreamSnafu,
};
use crate::{config::Config, job::LyricsPayload};

const DRAFT_PROMPT: &str = "You write song lyrics from a listener's life story. \
    Write verses and a chorus that tell the story in the requested moods. \
    Reply with the lyrics only.";

const REWRITE_PROMPT: &str = "Polish these song lyrics: fix rhythm and rhyme, keep the \
    meaning and structure, remove anything offensive. Reply with the lyrics only.";

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Serialize)]
struct ModerationRequest<'a> {
    input: &'a str,
}

#[derive(Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[derive(Deserialize)]
struct ModerationResult {
    flagged: bool,
    #[serde(default)]
    categories: serde_json::Map<String, serde_json::Value>,
}

impl ModerationResult {
    fn flagged_categories(&self) -> String {
        let flagged: Vec<&str> = self
            .categories
            .iter()
            .filter(|(_, v)| v.as_bool().unwrap_or(false))
            .map(|(k, _)| k.as_str())
            .collect();

        if flagged.is_empty() {
            "flagged".to_owned()
        } else {
            flagged.join(", ")
        }
    }
}

pub struct OpenAiLyrics {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl OpenAiLyrics {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key,
            model: model.into(),
        }
    }

    pub fn from_config(client: reqwest::Client, config: &Config) -> Self {
        Self::new(
            client,
            &config.llm_base_url,
            config
                .llm_api_key
                .as_ref()
                .map(|key| SecretString::from(key.expose_secret().to_owned())),
            &config.llm_model,
        )
    }

    fn api_key(&self) -> Result<&str, HandlerError> {
        self.api_key
            .as_ref()
            .map(|key| key.expose_secret())
            .context(NotConfiguredSnafu {
                service: "lyrics generation",
            })
    }

    async fn post<Req: Serialize, Res: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Res, HandlerError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(self.api_key()?)
            .json(body)
            .send()
            .await
            .context(UpstreamSnafu)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HandlerError::UpstreamStatus { status, body });
        }

        response.json().await.context(UpstreamSnafu)
    }

    async fn moderate(&self, text: &str) -> Result<(), HandlerError> {
        let response: ModerationResponse = self
            .post("/moderations", &ModerationRequest { input: text })
            .await?;

        match response.results.first() {
            Some(result) if result.flagged => RejectedSnafu {
                reason: result.flagged_categories(),
            }
            .fail(),
            Some(_) => Ok(()),
            None => InvalidResponseSnafu {
                message: "moderation returned no results",
            }
            .fail(),
        }
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, HandlerError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let response: ChatResponse = self.post("/chat/completions", &request).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_owned())
            .filter(|content| !content.is_empty())
            .context(InvalidResponseSnafu {
                message: "completion returned no content",
            })
    }
}

pub(crate) fn draft_request(payload: &LyricsPayload) -> String {
    if payload.moods.is_empty() {
        format!("Story:\n{}", payload.story)
    } else {
        format!(
            "Moods: {}\n\nStory:\n{}",
            payload.moods.join(", "),
            payload.story
        )
    }
}

impl LyricsGenerator for OpenAiLyrics {
    fn generate<'a>(&'a self, payload: &'a LyricsPayload) -> HandlerFuture<'a> {
        Box::pin(async move {
            self.moderate(&payload.story).await?;

            let draft = self
                .complete(DRAFT_PROMPT, &draft_request(payload))
                .await?;
            let lyrics = self.complete(REWRITE_PROMPT, &draft).await?;

            self.moderate(&lyrics).await?;

            Ok(lyrics)
        })
    }
}
