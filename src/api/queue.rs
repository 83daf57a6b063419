use actix_web::{get, post, web, Responder, Scope};
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    job::{JobId, JobKind},
    service::Service,
};

const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub payload: Option<serde_json::Value>,
}

impl EnqueueRequest {
    /// Checks that the type is known and the payload matches it.
    pub fn into_job_kind(self) -> Result<(JobKind, String), Error> {
        let kind = self
            .kind
            .ok_or_else(|| Error::missing_parameter("type"))?;
        let payload = self
            .payload
            .ok_or_else(|| Error::missing_parameter("payload"))?;

        let kind: JobKind = serde_json::from_value(serde_json::json!({
            "type": kind,
            "payload": payload,
        }))
        .map_err(|e| Error::invalid_parameter(e.to_string()))?;

        let user_id = self
            .user_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| ANONYMOUS.to_owned());

        Ok((kind, user_id))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub job_id: JobId,
}

#[post("/enqueue")]
async fn enqueue(
    service: web::Data<Service>,
    body: web::Json<EnqueueRequest>,
) -> actix_web::Result<impl Responder> {
    let (kind, user_id) = body.into_inner().into_job_kind()?;

    let job_id = service.enqueue(kind, user_id).await?;

    Ok(web::Json(EnqueueResponse { job_id }))
}

#[get("/status/{job_id}")]
async fn status(
    service: web::Data<Service>,
    path: web::Path<String>,
) -> actix_web::Result<impl Responder> {
    let id = JobId::from(path.into_inner());

    match service.status(&id).await? {
        Some(view) => Ok(web::Json(view)),
        None => Err(Error::job_not_found(id).into()),
    }
}

#[get("/stats")]
async fn stats(service: web::Data<Service>) -> actix_web::Result<impl Responder> {
    Ok(web::Json(service.stats().await?))
}

pub fn service() -> Scope {
    web::scope("/api/queue")
        .service(enqueue)
        .service(status)
        .service(stats)
}
