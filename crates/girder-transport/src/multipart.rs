//! Multipart request parsing and response emission.
//!
//! Upload: `multipart/form-data` parts are matched against the method's
//! declared stream arguments by part name; parts with no stream binding are
//! structured arguments and decode by their own content type. Download:
//! parts are emitted in declared result order with their declared content
//! types, streamed chunk by chunk.

use std::io::Cursor;

use bytes::Bytes;
use futures::StreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::header::CONTENT_TYPE;
use hyper::{Response, StatusCode};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::io::ReaderStream;

use girder_codec::ContentKind;

use crate::BoxBody;
use crate::registry::{BodyStream, StreamBinding, StreamPart};

#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("invalid multipart boundary: {0}")]
    Boundary(String),

    #[error("malformed multipart body: {0}")]
    Malformed(String),

    #[error("part {part:?}: expected content type {expected:?}, got {actual:?}")]
    ContentType {
        part: String,
        expected: String,
        actual: String,
    },

    #[error("part {part:?}: {message}")]
    Decode { part: String, message: String },
}

/// Parse a multipart request body.
///
/// Returns the structured arguments decoded from non-stream parts and one
/// reader per declared stream argument, in declared order. A stream argument
/// fed by a single part reuses that part's bytes directly; multiple parts
/// with the same name are buffered and concatenated.
pub async fn read_parts(
    content_type: &str,
    body: BoxBody,
    stream_args: &[StreamBinding],
) -> Result<(Map<String, Value>, Vec<BodyStream>), MultipartError> {
    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| MultipartError::Boundary(e.to_string()))?;
    let stream = http_body_util::BodyDataStream::new(body);
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut args = Map::new();
    let mut buffers: Vec<Vec<Bytes>> = stream_args.iter().map(|_| Vec::new()).collect();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| MultipartError::Malformed(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let part_content = field.content_type().map(|m| m.to_string());

        if let Some(index) = stream_args.iter().position(|b| b.part == name) {
            if let (Some(expected), Some(actual)) =
                (&stream_args[index].content_type, &part_content)
            {
                if !mime_matches(expected, actual) {
                    return Err(MultipartError::ContentType {
                        part: name,
                        expected: expected.clone(),
                        actual: actual.clone(),
                    });
                }
            }
            let bytes = field
                .bytes()
                .await
                .map_err(|e| MultipartError::Malformed(e.to_string()))?;
            buffers[index].push(bytes);
            continue;
        }

        // Structured part: decode by its own content type; bare text parts
        // stay strings.
        let bytes = field
            .bytes()
            .await
            .map_err(|e| MultipartError::Malformed(e.to_string()))?;
        let value = match part_content.as_deref() {
            None => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
            Some(mime) if mime.starts_with("text/") => {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            }
            Some(mime) => ContentKind::from_mime(mime)
                .decode_value(&bytes)
                .map_err(|e| MultipartError::Decode {
                    part: name.clone(),
                    message: e.to_string(),
                })?,
        };
        args.insert(name, value);
    }

    let streams = buffers
        .into_iter()
        .map(|chunks| -> BodyStream {
            match chunks.len() {
                1 => {
                    let mut iter = chunks.into_iter();
                    // len checked above
                    Box::new(Cursor::new(iter.next().unwrap_or_default()))
                }
                _ => {
                    let mut joined = Vec::new();
                    for chunk in chunks {
                        joined.extend_from_slice(&chunk);
                    }
                    Box::new(Cursor::new(Bytes::from(joined)))
                }
            }
        })
        .collect();

    Ok((args, streams))
}

fn mime_matches(expected: &str, actual: &str) -> bool {
    let essence = |s: &str| s.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    essence(expected) == essence(actual)
}

/// Emit a multipart response: parts in the order given, each with its
/// declared content type, streamed without buffering whole payloads.
pub fn multipart_response(status: StatusCode, parts: Vec<StreamPart>) -> Response<BoxBody> {
    let boundary = format!("girder-{}", uuid::Uuid::new_v4().simple());
    let content_type = format!("multipart/form-data; boundary={boundary}");

    let body_stream = async_stream::stream! {
        for part in parts {
            let mut header = format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"\r\n",
                part.name
            );
            if let Some(mime) = &part.content_type {
                header.push_str(&format!("Content-Type: {mime}\r\n"));
            }
            header.push_str("\r\n");
            yield Ok::<_, std::io::Error>(Bytes::from(header));

            let mut chunks = ReaderStream::new(part.reader);
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(bytes) => yield Ok(bytes),
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
            yield Ok(Bytes::from("\r\n"));
        }
        yield Ok(Bytes::from(format!("--{boundary}--\r\n")));
    };

    let body = StreamBody::new(body_stream.map(|r| r.map(http_body::Frame::data)));
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .body(BodyExt::boxed_unsync(body))
        .unwrap_or_else(|_| Response::new(crate::empty_body()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::full_body;
    use serde_json::json;
    use tokio::io::AsyncReadExt;

    fn upload_body(boundary: &str) -> BoxBody {
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"meta\"\r\n\
             Content-Type: application/json\r\n\r\n\
             {{\"name\":\"x\"}}\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"blob\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             \u{00de}\u{00ad}\r\n\
             --{boundary}--\r\n"
        );
        full_body(Bytes::from(body))
    }

    #[tokio::test]
    async fn test_read_parts_splits_structured_and_stream() {
        let boundary = "test-bound";
        let stream_args = vec![StreamBinding::new("blob", "blob")];
        let (args, mut streams) = read_parts(
            &format!("multipart/form-data; boundary={boundary}"),
            upload_body(boundary),
            &stream_args,
        )
        .await
        .unwrap();

        assert_eq!(args.get("meta"), Some(&json!({"name": "x"})));
        assert_eq!(streams.len(), 1);
        let mut content = Vec::new();
        streams[0].read_to_end(&mut content).await.unwrap();
        assert!(!content.is_empty());
    }

    #[tokio::test]
    async fn test_declared_content_type_enforced() {
        let boundary = "test-bound";
        let stream_args =
            vec![StreamBinding::new("blob", "blob").content_type("image/png")];
        let err = read_parts(
            &format!("multipart/form-data; boundary={boundary}"),
            upload_body(boundary),
            &stream_args,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, MultipartError::ContentType { .. }));
    }

    #[tokio::test]
    async fn test_missing_boundary_rejected() {
        let err = read_parts("multipart/form-data", crate::empty_body(), &[])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MultipartError::Boundary(_)));
    }

    #[tokio::test]
    async fn test_response_parts_emitted_in_order() {
        let parts = vec![
            StreamPart {
                name: "first".to_string(),
                content_type: Some("text/plain".to_string()),
                reader: Box::new(Cursor::new(Bytes::from_static(b"alpha"))),
            },
            StreamPart {
                name: "second".to_string(),
                content_type: None,
                reader: Box::new(Cursor::new(Bytes::from_static(b"beta"))),
            },
        ];
        let response = multipart_response(StatusCode::OK, parts);
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("multipart/form-data; boundary="));

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8_lossy(&bytes);
        let first = text.find("name=\"first\"").unwrap();
        let second = text.find("name=\"second\"").unwrap();
        assert!(first < second);
        assert!(text.contains("Content-Type: text/plain"));
        assert!(text.contains("alpha"));
        assert!(text.ends_with("--\r\n"));
    }
}
