//! Request handling for the webhook receiver

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use thiserror::Error;

use super::decode::{self, DecodeFailure};
use super::ReceiverState;
use crate::store::split_payload_records;

/// Everything a delivery can be refused for, mapped to a status code
#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("not found")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("unauthorized")]
    Unauthorized,

    #[error("request body too large")]
    PayloadTooLarge,

    #[error("decoded request body too large")]
    DecodedTooLarge,

    #[error("invalid request body: {0}")]
    BadRequest(String),

    #[error("failed to persist audit-log events: {0}")]
    Persist(String),
}

impl ReceiveError {
    pub fn status(&self) -> StatusCode {
        match self {
            ReceiveError::NotFound => StatusCode::NOT_FOUND,
            ReceiveError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ReceiveError::Unauthorized => StatusCode::UNAUTHORIZED,
            ReceiveError::PayloadTooLarge | ReceiveError::DecodedTooLarge => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ReceiveError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ReceiveError::Persist(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ReceiveError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ReceiveError::Persist(detail) => {
                tracing::error!(error = %detail, "audit-log delivery could not be persisted");
            }
            ReceiveError::NotFound | ReceiveError::MethodNotAllowed => {}
            other => tracing::debug!(status = status.as_u16(), reason = %other, "rejected audit-log delivery"),
        }

        let body = match &self {
            // Keep filesystem details out of the response
            ReceiveError::Persist(_) => "failed to persist audit-log events".to_string(),
            other => other.to_string(),
        };
        if matches!(self, ReceiveError::MethodNotAllowed) {
            return (status, [(header::ALLOW, "POST")], body).into_response();
        }
        (status, body).into_response()
    }
}

/// Single-route handler: path, method, auth, bounded body, decode, persist
pub async fn receive(
    State(state): State<ReceiverState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, ReceiveError> {
    let inner = &state.inner;

    if uri.path() != inner.path {
        return Err(ReceiveError::NotFound);
    }
    if method != Method::POST {
        return Err(ReceiveError::MethodNotAllowed);
    }

    let provided = headers.get(header::AUTHORIZATION).map(|v| v.as_bytes());
    if !decode::authorization_matches(&inner.expected_authorization, provided) {
        return Err(ReceiveError::Unauthorized);
    }

    let raw = read_bounded(body, inner.max_body_bytes).await?;

    let content_encoding = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok());
    let payload = if decode::has_gzip_content_encoding(content_encoding) {
        decode::gunzip_bounded(&raw, inner.max_body_bytes).map_err(|failure| match failure {
            DecodeFailure::TooLarge => ReceiveError::DecodedTooLarge,
            DecodeFailure::Invalid(detail) => {
                ReceiveError::BadRequest(format!("invalid gzip body: {}", detail))
            }
        })?
    } else {
        raw
    };

    let text = String::from_utf8(payload)
        .map_err(|_| ReceiveError::BadRequest("body is not valid UTF-8".to_string()))?;

    // File append + fsync and tail hand-off both block
    let store = state.inner.store.clone();
    let sink = state.inner.sink.clone();
    tokio::task::spawn_blocking(move || {
        let records = split_payload_records(&text);
        let written = store
            .append_records(&records)
            .map_err(|e| ReceiveError::Persist(e.to_string()))?;
        tracing::debug!(records = written, "accepted audit-log delivery");

        if let Some(sink) = sink.filter(|_| !records.is_empty()) {
            // The response is already decided; forwarding problems are only logged
            if let Err(e) = sink.emit_records(&records) {
                tracing::warn!(error = %e, "failed to forward audit-log records to tail output");
            }
        }
        Ok::<_, ReceiveError>(())
    })
    .await
    .map_err(|e| ReceiveError::Persist(e.to_string()))??;

    Ok(StatusCode::ACCEPTED)
}

/// Collect the body, failing as soon as it exceeds `max` bytes
async fn read_bounded(body: Body, max: u64) -> Result<Vec<u8>, ReceiveError> {
    let mut body = body;
    let mut buf = Vec::new();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| ReceiveError::BadRequest(format!("read request body: {}", e)))?;
        if let Ok(data) = frame.into_data() {
            buf.extend_from_slice(&data);
            if buf.len() as u64 > max {
                return Err(ReceiveError::PayloadTooLarge);
            }
        }
    }
    Ok(buf)
}
