//! Download endpoint with RFC 7233 range support.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use filegrid_query::{DownloadContent, DownloadResponse};
use filegrid_storage::{bytes_stream, ByteStream};
use uuid::Uuid;

use crate::errors::ApiError;
use crate::AppState;

/// `GET /api/download/{file_id}`, honoring a `Range` header. Full bodies
/// answer 200; partial content answers 206 with `Content-Range`; multiple
/// ranges produce `multipart/byteranges`.
pub async fn download(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let range_header = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());

    let response = state.download.download(file_id, range_header).await?;
    Ok(render(response))
}

fn render(response: DownloadResponse) -> Response {
    let DownloadResponse {
        filename,
        content_type,
        total_length,
        etag,
        content,
        ..
    } = response;

    let common = move |status: StatusCode| {
        Response::builder()
            .status(status)
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::ETAG, etag.clone())
            .header(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            )
    };

    match content {
        DownloadContent::Full { stream } => common(StatusCode::OK)
            .header(header::CONTENT_TYPE, &content_type)
            .header(header::CONTENT_LENGTH, total_length)
            .body(Body::from_stream(stream))
            .expect("valid response"),
        DownloadContent::Single { range, stream } => {
            let (start, end) = range;
            common(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, &content_type)
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {start}-{end}/{total_length}"),
                )
                .header(header::CONTENT_LENGTH, end - start + 1)
                .body(Body::from_stream(stream))
                .expect("valid response")
        }
        DownloadContent::Multi { boundary, parts } => {
            let total = total_length;
            let mut segments: Vec<ByteStream> = Vec::with_capacity(parts.len() * 2 + 1);
            for part in parts {
                let (start, end) = part.range;
                let head = format!(
                    "\r\n--{boundary}\r\nContent-Type: {content_type}\r\nContent-Range: bytes {start}-{end}/{total}\r\n\r\n"
                );
                segments.push(bytes_stream(Bytes::from(head)));
                segments.push(part.stream);
            }
            segments.push(bytes_stream(Bytes::from(format!("\r\n--{boundary}--\r\n"))));
            let body = futures::stream::iter(segments).flatten();

            common(StatusCode::PARTIAL_CONTENT)
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/byteranges; boundary={boundary}"),
                )
                .body(Body::from_stream(body))
                .expect("valid response")
        }
    }
}
