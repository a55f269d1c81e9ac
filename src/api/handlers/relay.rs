use axum::body::Body;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::relay_error;
use crate::api::response::{ApiError, AppQuery, JSend};
use crate::relay::{RelayError, UploadAttempt};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
    pub results: Vec<UploadAttempt>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Relay a single file to the public hosts. Accepts the file under either
/// `file` or `fileToUpload`.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<JSend<UploadResponse>>, ApiError> {
    let mut file: Option<(String, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, "Invalid multipart data", state.config.max_upload_size))?
    {
        let field_name = field.name().unwrap_or("").to_string();
        if field_name != "file" && field_name != "fileToUpload" {
            continue;
        }

        let file_name = field
            .file_name()
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "upload".to_string());

        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, "Failed to read file", state.config.max_upload_size))?;

        if data.len() as u64 > state.config.max_upload_size {
            return Err(too_large(state.config.max_upload_size));
        }

        file = Some((file_name, data));
    }

    let Some((file_name, data)) = file else {
        return Err(ApiError::bad_request("No file uploaded"));
    };

    tracing::info!(filename = %file_name, bytes = data.len(), "Relaying upload");

    let report = match state.relay.upload(&file_name, data).await {
        Ok(report) => report,
        Err(RelayError::AllTargetsFailed(report)) => {
            tracing::error!(report = %report, "Upload failed on every target");
            return Err(ApiError::bad_gateway(format!("Failed to upload file: {report}")));
        }
        Err(e) => return Err(relay_error(e)),
    };

    let url = report
        .url()
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_gateway("Failed to upload file"))?;

    Ok(JSend::success(UploadResponse {
        url,
        results: report.attempts,
    }))
}

/// Stream a remote file back as an attachment under the requested name.
pub async fn download(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<DownloadParams>,
) -> Result<Response, ApiError> {
    let Some(raw_url) = params.url.filter(|u| !u.is_empty()) else {
        return Err(ApiError::bad_request("URL is required"));
    };
    let url = match url::Url::parse(&raw_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url,
        _ => return Err(ApiError::bad_request("URL must be an absolute http(s) URL")),
    };
    let filename = params
        .filename
        .filter(|f| !f.is_empty())
        .or_else(|| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "download".to_string());

    let upstream = state.http.get(url).send().await.map_err(|e| {
        tracing::error!(error = %e, "Download proxy request failed");
        ApiError::bad_gateway("Failed to fetch the file from the external server")
    })?;

    if !upstream.status().is_success() {
        let status =
            StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        tracing::warn!(status = %status, "Download proxy upstream refused");
        return Err(ApiError::Fail(
            status,
            "Failed to fetch the file from the external server".to_string(),
        ));
    }

    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| {
            mime_guess::from_path(&filename)
                .first_or_octet_stream()
                .to_string()
        });
    let content_length = upstream.content_length();

    let mut response = Body::from_stream(upstream.bytes_stream()).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        content_type
            .parse()
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    if let Some(length) = content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&filename)
            .parse()
            .unwrap_or(HeaderValue::from_static("attachment")),
    );

    Ok(response)
}

fn too_large(limit: u64) -> ApiError {
    ApiError::payload_too_large(format!("File exceeds maximum upload size of {limit} bytes"))
}

/// The body limit layer cuts the multipart stream short; surface that as 413.
fn multipart_error(e: MultipartError, context: &str, limit: u64) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large(limit)
    } else {
        ApiError::bad_request(format!("{context}: {e}"))
    }
}

/// `attachment` with the filename percent-encoded as UTF-8.
fn content_disposition(filename: &str) -> String {
    let encoded = url::form_urlencoded::byte_serialize(filename.as_bytes())
        .collect::<String>()
        .replace('+', "%20");
    format!("attachment; filename=\"{encoded}\"; filename*=UTF-8''{encoded}")
}
