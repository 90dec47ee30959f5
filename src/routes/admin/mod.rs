use std::fmt::Debug;

use actix_web::http::header;
use actix_web::http::header::HeaderValue;
use actix_web::http::StatusCode;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use actix_web::ResponseError;
use actix_web::web;

use crate::authentication::basic_authentication;
use crate::authentication::validate_credentials;
use crate::configuration::AdminSettings;
use crate::utils::error_chain_fmt;

mod events;
mod failures;
mod retention;
mod retry;

pub use events::list_task_events;
pub use failures::list_failed_outbox;
pub use failures::list_failed_tasks;
pub use retention::run_retention;
pub use retry::retry_outbox;
pub use retry::retry_task;

#[derive(thiserror::Error)]
pub enum AdminError {
    #[error("Authentication failed")]
    AuthError(#[source] anyhow::Error),
    /// Retrying something that isn't failed (or doesn't exist) is a caller
    /// mistake, not a server fault
    #[error("{0}")]
    Conflict(String),
    #[error("Not found")]
    NotFound,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl Debug for AdminError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)?;
        Ok(())
    }
}

impl ResponseError for AdminError {
    fn error_response(&self) -> HttpResponse<actix_web::body::BoxBody> {
        match self {
            Self::AuthError(_) => {
                let mut resp = HttpResponse::new(StatusCode::UNAUTHORIZED); // 401
                let header_value = HeaderValue::from_str(r#"Basic realm="admin""#).unwrap();
                resp.headers_mut()
                    .insert(header::WWW_AUTHENTICATE, header_value);
                resp
            }
            Self::Conflict(_) => HttpResponse::new(StatusCode::CONFLICT), // 409
            Self::NotFound => HttpResponse::new(StatusCode::NOT_FOUND),   // 404
            _ => HttpResponse::new(StatusCode::INTERNAL_SERVER_ERROR),    // 500
        }
    }
}

/// Every admin handler starts here; there is no session layer, just basic
/// auth against the configured account.
pub fn authorize(
    request: &HttpRequest,
    admin: &web::Data<AdminSettings>,
) -> Result<(), AdminError> {
    let creds = basic_authentication(request.headers()).map_err(AdminError::AuthError)?;
    validate_credentials(&creds, admin.get_ref()).map_err(|e| AdminError::AuthError(e.into()))
}
