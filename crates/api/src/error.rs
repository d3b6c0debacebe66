use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sentinel_core::Error;
use tracing::{error, warn};

/// API error wrapper mapping domain errors onto HTTP responses.
///
/// The ingest handler never raises across the request boundary: unexpected
/// failures surface as a generic 5xx, with the full detail kept to the logs.
#[derive(Debug)]
pub struct ApiError {
    error: Error,
}

impl ApiError {
    pub fn new(error: Error) -> Self {
        Self { error }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self::new(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = %self.error.code, detail = %self.error, "Request failed");
        } else {
            warn!(code = %self.error.code, detail = %self.error, "Request rejected");
        }
        (status, Json(self.error.to_api_response())).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
