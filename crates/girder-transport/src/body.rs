//! HTTP body plumbing shared by the dispatchers.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::CONTENT_TYPE;
use hyper::{Response, StatusCode};

/// The one response-body type every handler produces: boxed, unsync, with
/// IO errors (streamed bodies can fail mid-flight).
pub type BoxBody = http_body_util::combinators::UnsyncBoxBody<Bytes, std::io::Error>;

/// A fixed-content body.
pub fn full_body(bytes: Bytes) -> BoxBody {
    Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
}

/// An empty body.
pub fn empty_body() -> BoxBody {
    full_body(Bytes::new())
}

/// A plain-text response with the given status.
pub fn text_response(status: StatusCode, message: &str) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full_body(Bytes::from(message.to_string())))
        .unwrap_or_else(|_| Response::new(empty_body()))
}

/// The canonical recover response.
pub fn internal_error_response() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(CONTENT_TYPE, "application/json")
        .body(full_body(Bytes::from_static(
            b"{\"message\":\"internal server error\"}",
        )))
        .unwrap_or_else(|_| Response::new(empty_body()))
}

/// Collect a request body, answering 400 on read failure and 413 past the
/// configured limit.
pub async fn collect_limited(body: BoxBody, limit: usize) -> Result<Bytes, Response<BoxBody>> {
    let collected = match body.collect().await {
        Ok(collected) => collected,
        Err(_) => {
            return Err(text_response(
                StatusCode::BAD_REQUEST,
                "failed to read request body",
            ));
        }
    };
    let bytes = collected.to_bytes();
    if bytes.len() > limit {
        return Err(text_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "request body too large",
        ));
    }
    Ok(bytes)
}
