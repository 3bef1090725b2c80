//! Response builder and utilities

use crate::{Error, Result};
use bytes::Bytes;
use http::{header, HeaderName, HeaderValue, Response, StatusCode};
use http_body_util::Full;
use serde::Serialize;

/// Body type alias
pub type Body = Full<Bytes>;

/// Response builder for convenient response construction
#[derive(Debug)]
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl ResponseBuilder {
    /// Create a new response builder
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    /// Set a header
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }

    /// Build response with empty body
    pub fn build(self) -> Result<Response<Body>> {
        self.bytes(Bytes::new())
    }

    /// Build response with a raw body
    pub fn bytes(self, body: Bytes) -> Result<Response<Body>> {
        let mut response = Response::builder().status(self.status);

        for (name, value) in self.headers {
            response = response.header(name, value);
        }

        Ok(response.body(Full::new(body))?)
    }

    /// Build response with text body
    pub fn text(self, body: impl Into<String>) -> Result<Response<Body>> {
        self.header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )
        .bytes(Bytes::from(body.into()))
    }

    /// Build response with JSON body
    pub fn json_body<T: Serialize>(self, body: &T) -> Result<Response<Body>> {
        let json = serde_json::to_vec(body)?;

        self.header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        )
        .bytes(Bytes::from(json))
    }
}

/// JSON body returned for every gateway-generated failure
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Always `false`
    pub success: bool,
    /// Human-readable message
    pub message: String,
    /// Logical service the failure concerns (or the gateway name)
    pub service: String,
    /// Machine-readable error code
    pub error: String,
    /// Names known to the registry, attached to discovery failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_services: Option<Vec<String>>,
}

impl ErrorBody {
    /// Build the body for `err`; `gateway` names the failing component when
    /// the error is not tied to a service.
    pub fn from_error(err: &Error, gateway: &str) -> Self {
        let available_services = match err {
            Error::ServiceNotFound { known, .. } => Some(known.clone()),
            _ => None,
        };

        Self {
            success: false,
            message: err.to_string(),
            service: err.service().unwrap_or(gateway).to_string(),
            error: err.code().to_string(),
            available_services,
        }
    }

    /// Attach the list of known service names
    pub fn with_available_services(mut self, names: Vec<String>) -> Self {
        self.available_services = Some(names);
        self
    }

    /// Render as a response with the error's status code
    pub fn into_response(self, status: StatusCode) -> Result<Response<Body>> {
        ResponseBuilder::new(status).json_body(&self)
    }
}

/// Convenience functions for common responses
pub mod responses {
    use super::*;

    /// 200 OK with a JSON body
    pub fn ok_json<T: Serialize>(body: &T) -> Result<Response<Body>> {
        ResponseBuilder::new(StatusCode::OK).json_body(body)
    }

    /// Error response derived from [`Error::to_status_code`]
    pub fn error(err: &Error, gateway: &str) -> Result<Response<Body>> {
        ErrorBody::from_error(err, gateway).into_response(err.to_status_code())
    }
}
