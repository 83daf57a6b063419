//! Shared-secret guard for the scheduler trigger.
//!
//! Requests must carry `Authorization: Bearer <secret>` matching the
//! configured cron secret. With no secret configured every request is
//! refused.

use std::future::{Future, Ready};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use actix_web::dev::{Service, Transform};
use actix_web::http::header::AUTHORIZATION;
use actix_web::{dev::ServiceRequest, dev::ServiceResponse, web::Data, Error};
use secrecy::ExposeSecret;

use super::header::{auth_header, secrets_match};
use crate::error;

#[derive(Clone, Default)]
pub struct CronAuth;

impl<S: 'static, B> Transform<S, ServiceRequest> for CronAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = CronAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> <Self as Transform<S, ServiceRequest>>::Future {
        std::future::ready(Ok(CronAuthMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct CronAuthMiddleware<S> {
    service: Rc<S>,
}

/// Checks the request's bearer token against the configured secret.
fn authorize(req: &ServiceRequest) -> Result<(), error::Error> {
    let service = req
        .app_data::<Data<crate::service::Service>>()
        .ok_or_else(|| error::Error::internal(eyre::eyre!("service not registered")))?;

    let Some(secret) = &service.config().cron_secret else {
        tracing::warn!("cron trigger called but no cron secret is configured");
        return Err(error::Error::Unauthorized);
    };

    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(error::Error::Unauthorized)?;

    let header = auth_header()
        .parse(header.as_bytes())
        .map_err(|_| error::Error::Unauthorized)?;

    if secrets_match(header.token(), secret.expose_secret()) {
        Ok(())
    } else {
        Err(error::Error::Unauthorized)
    }
}

impl<S, B> Service<ServiceRequest> for CronAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(
        &self,
        cx: &mut Context,
    ) -> Poll<Result<(), <Self as Service<ServiceRequest>>::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> <Self as Service<ServiceRequest>>::Future {
        let svc = Rc::clone(&self.service);

        let authorized = authorize(&req);

        Box::pin(async move {
            authorized?;
            svc.call(req).await
        })
    }
}
