use actix_web::{get, Responder};

pub mod cron;
pub mod queue;

#[get("/health")]
pub async fn health() -> impl Responder {
    "OK"
}
