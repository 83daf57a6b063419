//! Music generation: forwards the job's request body to the generation API
//! and returns as soon as the upstream task has been created. Polling the
//! task for completion is up to the client.

use secrecy::{ExposeSecret, SecretString};
use snafu::{OptionExt, ResultExt};

use super::{
    HandlerError, HandlerFuture, InvalidResponseSnafu, MusicGenerator, NotConfiguredSnafu,
    UpstreamSnafu,
};
use crate::{config::Config, job::MusicPayload};

pub struct HttpMusic {
    client: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<SecretString>,
}

impl HttpMusic {
    pub fn new(
        client: reqwest::Client,
        base_url: Option<String>,
        api_key: Option<SecretString>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.map(|url| url.trim_end_matches('/').to_owned()),
            api_key,
        }
    }

    pub fn from_config(client: reqwest::Client, config: &Config) -> Self {
        Self::new(
            client,
            config.music_base_url.clone(),
            config
                .music_api_key
                .as_ref()
                .map(|key| SecretString::from(key.expose_secret().to_owned())),
        )
    }

    fn url(&self, endpoint: &str) -> Result<String, HandlerError> {
        let base = self.base_url.as_ref().context(NotConfiguredSnafu {
            service: "music generation",
        })?;

        if endpoint.starts_with('/') {
            Ok(format!("{base}{endpoint}"))
        } else {
            Ok(format!("{base}/{endpoint}"))
        }
    }
}

/// Finds the upstream task id, either at the top level or under `data`.
pub(crate) fn task_id(body: &serde_json::Value) -> Option<String> {
    [&body["taskId"], &body["data"]["taskId"]]
        .into_iter()
        .find_map(|value| match value {
            serde_json::Value::String(id) if !id.is_empty() => Some(id.clone()),
            serde_json::Value::Number(id) => Some(id.to_string()),
            _ => None,
        })
}

impl MusicGenerator for HttpMusic {
    fn start<'a>(&'a self, payload: &'a MusicPayload) -> HandlerFuture<'a> {
        Box::pin(async move {
            let mut request = self
                .client
                .post(self.url(&payload.endpoint)?)
                .json(&payload.request_body);

            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key.expose_secret());
            }

            let response = request.send().await.context(UpstreamSnafu)?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(HandlerError::UpstreamStatus { status, body });
            }

            let body: serde_json::Value = response.json().await.context(UpstreamSnafu)?;

            let task_id = task_id(&body).context(InvalidResponseSnafu {
                message: "response has no taskId",
            })?;

            tracing::debug!(endpoint = %payload.endpoint, task_id, "music generation started");

            Ok(task_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{
        http::{header::AUTHORIZATION, StatusCode},
        web, App, HttpRequest, HttpResponse, HttpServer,
    };
    use serde_json::json;

    use super::*;

    /// Starts a music API on an ephemeral port. `/generate` requires the
    /// `music-key` bearer token.
    async fn upstream() -> String {
        let server = HttpServer::new(|| {
            App::new()
                .route(
                    "/generate",
                    web::post().to(|req: HttpRequest| async move {
                        let auth = req.headers().get(AUTHORIZATION);
                        if auth.and_then(|v| v.to_str().ok()) != Some("Bearer music-key") {
                            return HttpResponse::Unauthorized().body("bad key");
                        }
                        HttpResponse::Ok().json(json!({ "code": 200, "data": { "taskId": "t-1" } }))
                    }),
                )
                .route(
                    "/legacy",
                    web::post().to(|| async { HttpResponse::Ok().json(json!({ "taskId": 7 })) }),
                )
                .route(
                    "/broken",
                    web::post().to(|| async { HttpResponse::Ok().json(json!({ "code": 200 })) }),
                )
                .route(
                    "/down",
                    web::post().to(|| async {
                        HttpResponse::build(StatusCode::BAD_GATEWAY).body("bad gateway")
                    }),
                )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();

        let addr = server.addrs()[0];
        tokio::spawn(server.run());

        format!("http://{addr}")
    }

    fn request(endpoint: &str) -> MusicPayload {
        MusicPayload {
            endpoint: endpoint.to_owned(),
            request_body: json!({ "prompt": "lullaby" }),
        }
    }

    #[test]
    fn test_task_id_locations() {
        assert_eq!(
            task_id(&serde_json::json!({ "taskId": "abc" })).as_deref(),
            Some("abc")
        );
        assert_eq!(
            task_id(&serde_json::json!({ "code": 200, "data": { "taskId": "def" } })).as_deref(),
            Some("def")
        );
        assert_eq!(
            task_id(&serde_json::json!({ "taskId": 42 })).as_deref(),
            Some("42")
        );
        assert_eq!(task_id(&serde_json::json!({ "taskId": "" })), None);
        assert_eq!(task_id(&serde_json::json!({ "data": null })), None);
    }

    #[test]
    fn test_url_joining() {
        let music = HttpMusic::new(
            reqwest::Client::new(),
            Some("https://music.example/api/".to_owned()),
            None,
        );

        assert_eq!(
            music.url("/generate").unwrap(),
            "https://music.example/api/generate"
        );
        assert_eq!(
            music.url("cover").unwrap(),
            "https://music.example/api/cover"
        );
    }

    #[actix_web::test]
    async fn test_start_returns_task_id() {
        let base = upstream().await;
        let music = HttpMusic::new(
            reqwest::Client::new(),
            Some(base.clone()),
            Some(SecretString::from("music-key".to_owned())),
        );

        assert_eq!(music.start(&request("/generate")).await.unwrap(), "t-1");
        assert_eq!(music.start(&request("legacy")).await.unwrap(), "7");

        let anonymous = HttpMusic::new(reqwest::Client::new(), Some(base), None);
        let err = anonymous.start(&request("/generate")).await.unwrap_err();
        assert!(matches!(
            err,
            HandlerError::UpstreamStatus { status, .. } if status.as_u16() == 401
        ));
    }

    #[actix_web::test]
    async fn test_start_without_task_id() {
        let music = HttpMusic::new(reqwest::Client::new(), Some(upstream().await), None);

        let err = music.start(&request("/broken")).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid upstream response: response has no taskId"
        );
    }

    #[actix_web::test]
    async fn test_start_upstream_error_status() {
        let music = HttpMusic::new(reqwest::Client::new(), Some(upstream().await), None);

        let err = music.start(&request("/down")).await.unwrap_err();
        match err {
            HandlerError::UpstreamStatus { status, body } => {
                assert_eq!(status.as_u16(), 502);
                assert_eq!(body, "bad gateway");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unconfigured() {
        let music = HttpMusic::new(reqwest::Client::new(), None, None);
        assert!(matches!(
            music.url("/generate"),
            Err(HandlerError::NotConfigured { .. })
        ));
    }
}
