use actix_web::{dev::ServiceRequest, web, Error, HttpMessage, HttpRequest};
use actix_web_httpauth::extractors::bearer::{BearerAuth, Config};
use actix_web_httpauth::extractors::AuthenticationError;
use actix_web_httpauth::middleware::HttpAuthentication;
use std::future::{ready, Ready};

use crate::api::ApiState;
use crate::core::InvoiceResult;
use crate::models::Session;

type Validator = fn(ServiceRequest, BearerAuth) -> Ready<Result<ServiceRequest, (Error, ServiceRequest)>>;

pub fn create_auth_middleware() -> HttpAuthentication<BearerAuth, Validator> {
    HttpAuthentication::bearer(validator as Validator)
}

/// Resolves the bearer token against the configured token table and puts
/// the caller's [`Session`] into the request extensions.
fn validator(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Ready<Result<ServiceRequest, (Error, ServiceRequest)>> {
    let user_id = req
        .app_data::<web::Data<ApiState>>()
        .and_then(|state| state.tokens.get(credentials.token()).copied());

    match user_id {
        Some(user_id) => {
            req.extensions_mut().insert(Session::new(user_id));
            ready(Ok(req))
        }
        None => {
            tracing::debug!("Rejected unknown bearer token");
            let config = Config::default().realm("invoices");
            ready(Err((AuthenticationError::from(config).into(), req)))
        }
    }
}

// Helper function to extract the session set by the validator
pub fn session(req: &HttpRequest) -> InvoiceResult<Session> {
    Session::require(req.extensions().get::<Session>().copied())
}
