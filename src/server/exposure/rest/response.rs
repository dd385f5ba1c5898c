//! Negotiated response bodies

use crate::core::error::RestResult;
use crate::core::negotiation::MediaType;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

/// Serialize a body in the negotiated media type
pub fn render(
    status: StatusCode,
    media: MediaType,
    body: &Value,
    callback: Option<&str>,
) -> RestResult<Response> {
    let rendered = media.render(body, callback)?;
    Ok((status, [(header::CONTENT_TYPE, media.content_type())], rendered).into_response())
}

/// Headers-only response, used for HEAD
pub fn render_empty(status: StatusCode, media: MediaType) -> Response {
    (status, [(header::CONTENT_TYPE, media.content_type())]).into_response()
}
