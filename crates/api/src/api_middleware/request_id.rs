//! # Request ID Middleware
//!
//! Attaches a request id to every request for log correlation: an incoming
//! `x-request-id` (or correlation/trace header) is reused when it looks
//! sane, otherwise a fresh UUID is generated. The id is echoed back on the
//! response.

use axum::{
    extract::Request,
    http::{header::HeaderValue, HeaderName},
    middleware::Next,
    response::Response,
};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct RequestId(pub String);

pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = extract_or_generate_request_id(&request);
    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(
            HeaderName::from_str(REQUEST_ID_HEADER).expect("static header name"),
            header_value,
        );
    }

    debug!(request_id = %request_id, status = %response.status(), "Request completed");
    response
}

fn extract_or_generate_request_id(request: &Request) -> String {
    let possible_headers = [REQUEST_ID_HEADER, "x-correlation-id", "x-trace-id"];
    for header_name in &possible_headers {
        if let Some(value) = request.headers().get(*header_name) {
            if let Ok(id_str) = value.to_str() {
                if is_valid_request_id(id_str) {
                    return id_str.to_string();
                }
            }
        }
    }
    Uuid::new_v4().to_string()
}

fn is_valid_request_id(id: &str) -> bool {
    if Uuid::from_str(id).is_ok() {
        return true;
    }
    (8..=128).contains(&id.len())
        && id.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_request_id() {
        assert!(is_valid_request_id("550e8400-e29b-41d4-a716-446655440000"));
        assert!(is_valid_request_id("agent-req-123"));
        assert!(!is_valid_request_id("abc"));
        assert!(!is_valid_request_id(&"a".repeat(129)));
        assert!(!is_valid_request_id("bad@id!"));
    }
}
