//! Trigger for the external scheduler. Mounted behind
//! [`CronAuth`](crate::auth::middleware::CronAuth).

use actix_web::{web, Responder, Scope};

use crate::service::Service;

async fn process_queue(service: web::Data<Service>) -> actix_web::Result<impl Responder> {
    let summary = service.process_queue().await?;

    Ok(web::Json(summary))
}

pub fn service() -> Scope {
    web::scope("/api/cron")
        .route("/process-queue", web::post().to(process_queue))
        .route("/process-queue", web::get().to(process_queue))
}
