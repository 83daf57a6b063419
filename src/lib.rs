use actix_cors::Cors;
use actix_web::{
    middleware::{NormalizePath, TrailingSlash},
    web::{self, Data, JsonConfig},
    App, HttpServer,
};
use auth::middleware::CronAuth;
use config::Config;
use error::Error;
use tracing::level_filters::LevelFilter;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod job;
pub mod jobs;
pub mod queue;
pub mod ratelimit;
pub mod service;
pub mod status;
pub mod store;
pub mod worker;

/// Registers every route. Expects `Data<Service>` in the app data.
pub fn routes(cfg: &mut web::ServiceConfig) {
    let json_cfg = JsonConfig::default()
        .content_type_required(false)
        .error_handler(|err, _req| Error::invalid_parameter(err.to_string()).into());

    cfg.app_data(json_cfg)
        .service(api::health)
        .service(api::queue::service())
        .service(api::cron::service().wrap(CronAuth));
}

/// Returns a builder for the main application.
#[bon::builder(finish_fn = start)]
pub async fn run(config: Option<Config>) -> eyre::Result<()> {
    #[cfg(debug_assertions)]
    FmtSubscriber::builder()
        .pretty()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("SONGSMITH_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    #[cfg(not(debug_assertions))]
    FmtSubscriber::builder()
        .json()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("SONGSMITH_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    let config = match config {
        Some(config) => {
            config.validate()?;
            config
        }
        None => Config::load()?,
    };

    if config.cron_secret.is_none() {
        tracing::warn!("SONGSMITH_CRON_SECRET is not set, the cron trigger will reject every call");
    }

    let bind = (config.host.clone(), config.port);
    let scheduler = config.scheduler_enabled.then_some(config.cron_interval());

    let service = service::Service::connect_with().config(config).call().await?;

    let scheduler = scheduler.map(|interval| {
        tracing::info!(interval_seconds = interval.as_secs(), "starting embedded scheduler");
        service.worker().clone().spawn_scheduler(interval)
    });

    let data = Data::new(service);

    tracing::info!(host = %bind.0, port = bind.1, "listening");

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_header()
            .allow_any_method();

        App::new()
            .wrap(TracingLogger::default())
            .wrap(NormalizePath::new(TrailingSlash::Trim))
            .wrap(cors)
            .app_data(data.clone())
            .configure(routes)
    })
    .bind(bind)?
    .run()
    .await;

    if let Some(scheduler) = scheduler {
        scheduler.abort();
    }

    server?;

    Ok(())
}
