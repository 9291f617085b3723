use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::{
    models::StorageType,
    routes::storage_error_response,
    services::{
        file_type,
        transcode::{cache_key, TranscodeStatus},
    },
    storage::{local::open_local_file, AdapterFile, StorageAdapter},
    AppState,
};

pub const TRANSCODE_STATUS_HEADER: &str = "x-transcode-status";

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/{*path}", get(serve_media))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MediaQuery {
    /// Target bitrate in kbps; only honoured for transcodable local files
    pub bitrate: Option<String>,
}

/// Single byte range as sent by the client, before it is checked against a size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=<start>-` or `bytes=<start>-<end>`
    From { start: u64, end: Option<u64> },
    /// `bytes=-<n>`, the last n bytes
    Suffix(u64),
}

impl ByteRange {
    /// Inclusive window within a file of `size` bytes, `None` when unsatisfiable
    pub fn resolve(self, size: u64) -> Option<(u64, u64)> {
        match self {
            ByteRange::From { start, end } => {
                if start >= size {
                    return None;
                }
                let last = size - 1;
                Some((start, end.map_or(last, |end| end.min(last))))
            }
            ByteRange::Suffix(length) => {
                if length == 0 || size == 0 {
                    return None;
                }
                Some((size.saturating_sub(length), size - 1))
            }
        }
    }
}

/// Parse a `Range` header. Syntactically invalid and multi-range values
/// yield `None` and the request is served in full.
pub fn parse_range_header(value: &str) -> Option<ByteRange> {
    let ranges = value.trim().strip_prefix("bytes=")?.trim();
    if ranges.contains(',') {
        return None;
    }

    let (start, end) = ranges.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        return end.parse().ok().map(ByteRange::Suffix);
    }

    let start: u64 = start.parse().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        let end: u64 = end.parse().ok()?;
        if end < start {
            return None;
        }
        Some(end)
    };

    Some(ByteRange::From { start, end })
}

/// Weak validator from metadata only; files are too large to hash per request
pub fn weak_etag(file: &AdapterFile) -> String {
    format!(
        "W/\"{:x}-{:x}\"",
        file.size,
        file.last_modified.timestamp_millis().max(0)
    )
}

fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate == etag)
}

fn http_date(file: &AdapterFile) -> String {
    file.last_modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(e) => warn!("Dropping invalid {} header value '{}': {}", name, value, e),
    }
}

fn transcode_status_response(status: StatusCode, message: &str) -> Response {
    let mut headers = HeaderMap::new();
    set_header(&mut headers, HeaderName::from_static(TRANSCODE_STATUS_HEADER), &urlencoding::encode(message));
    (status, headers).into_response()
}

fn parse_bitrate(raw: Option<&str>, min: u32, max: u32) -> Result<Option<u32>, Response> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };

    match raw.parse::<u32>() {
        Ok(bitrate) if (min..=max).contains(&bitrate) => Ok(Some(bitrate)),
        _ => Err(transcode_status_response(
            StatusCode::BAD_REQUEST,
            &format!("Invalid bitrate '{}': expected {}-{} kbps", raw, min, max),
        )),
    }
}

fn is_transcodable(state: &AppState, adapter: &dyn StorageAdapter, file: &AdapterFile) -> bool {
    if adapter.storage_type() != StorageType::Local {
        return false;
    }
    let Some(extension) = file.extension() else {
        return false;
    };
    state.config.is_transcodable_extension(&extension) && file_type::classify(&file.name).has_audio()
}

/// Stream a media file from whichever storage holds it
#[utoipa::path(
    get,
    path = "/media/{path}",
    tag = "media",
    params(
        ("path" = String, Path, description = "Media path relative to the storage roots"),
        MediaQuery
    ),
    responses(
        (status = 200, description = "Full file"),
        (status = 202, description = "Transcode started or still running, see X-Transcode-Status"),
        (status = 206, description = "Requested byte range"),
        (status = 304, description = "ETag matched"),
        (status = 400, description = "Invalid bitrate or path outside the storage root"),
        (status = 404, description = "No storage holds the path"),
        (status = 416, description = "Range start beyond end of file"),
        (status = 500, description = "Storage unavailable or transcode failed")
    )
)]
pub async fn serve_media(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<MediaQuery>,
    headers: HeaderMap,
) -> Response {
    let bitrate = match parse_bitrate(
        query.bitrate.as_deref(),
        state.config.min_bitrate,
        state.config.max_bitrate,
    ) {
        Ok(bitrate) => bitrate,
        Err(response) => return response,
    };

    let (adapter, file) = match state.storage.file(&path).await {
        Ok(found) => found,
        Err(e) => {
            debug!("Media lookup for '{}' failed: {}", path, e);
            return storage_error_response(&e);
        }
    };

    let file = match bitrate {
        Some(bitrate) if is_transcodable(&state, adapter.as_ref(), &file) => {
            match transcoded_file(&state, &file, bitrate).await {
                Ok(transcoded) => transcoded,
                Err(response) => return response,
            }
        }
        _ => file,
    };

    serve_file(&file, &headers, state.config.media_cache_max_age_seconds).await
}

async fn transcoded_file(state: &AppState, file: &AdapterFile, bitrate: u32) -> Result<AdapterFile, Response> {
    let source = FsPath::new(&file.absolute_path);

    match state.transcoder.request(source, file.last_modified, bitrate).await {
        TranscodeStatus::InProgress => Err(transcode_status_response(
            StatusCode::ACCEPTED,
            &format!("Transcoding to {}kbps in progress", bitrate),
        )),
        TranscodeStatus::Started => Err(transcode_status_response(
            StatusCode::ACCEPTED,
            &format!("Transcoding to {}kbps started", bitrate),
        )),
        TranscodeStatus::Failed(message) => {
            error!("Reporting failed transcode of {}: {}", file.absolute_path, message);
            let mut response = transcode_status_response(StatusCode::INTERNAL_SERVER_ERROR, &message);
            *response.body_mut() = Body::from(message);
            Err(response)
        }
        TranscodeStatus::Ready(cache_path) => {
            debug!(
                "Serving cached transcode {} for {}",
                cache_key(&file.absolute_path, file.last_modified, bitrate),
                file.absolute_path
            );
            let mut transcoded = open_local_file(&cache_path)
                .await
                .map_err(|e| storage_error_response(&e))?;
            let stem = FsPath::new(&file.name)
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_else(|| file.name.clone());
            transcoded.name = format!("{}.m4a", stem);
            transcoded.mime_type = "audio/mp4".to_string();
            // Cache hits touch the artifact, so validators follow the source revision
            transcoded.last_modified = file.last_modified;
            Ok(transcoded)
        }
    }
}

async fn serve_file(file: &AdapterFile, request_headers: &HeaderMap, max_age: u64) -> Response {
    let etag = weak_etag(file);

    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    set_header(&mut headers, header::ETAG, &etag);
    set_header(&mut headers, header::CACHE_CONTROL, &format!("public, max-age={}", max_age));
    set_header(&mut headers, header::LAST_MODIFIED, &http_date(file));

    // A validator hit wins over any Range header
    let not_modified = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| etag_matches(value, &etag));
    if not_modified {
        return (StatusCode::NOT_MODIFIED, headers).into_response();
    }

    set_header(&mut headers, header::CONTENT_TYPE, &file.mime_type);
    set_header(
        &mut headers,
        header::CONTENT_DISPOSITION,
        &format!("inline; filename*=UTF-8''{}", urlencoding::encode(&file.name)),
    );

    let range = request_headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_range_header);

    let Some(range) = range else {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.size));
        if file.size == 0 {
            return (StatusCode::OK, headers, Body::empty()).into_response();
        }
        return match file.stream(None, None).await {
            Ok(stream) => (StatusCode::OK, headers, Body::from_stream(stream)).into_response(),
            Err(e) => {
                error!("Failed to open {}: {}", file.absolute_path, e);
                storage_error_response(&e)
            }
        };
    };

    let Some((start, end)) = range.resolve(file.size) else {
        let mut headers = HeaderMap::new();
        set_header(&mut headers, header::CONTENT_RANGE, &format!("bytes */{}", file.size));
        return (StatusCode::RANGE_NOT_SATISFIABLE, headers).into_response();
    };

    info!("Serving {} bytes {}-{}/{}", file.name, start, end, file.size);
    set_header(
        &mut headers,
        header::CONTENT_RANGE,
        &format!("bytes {}-{}/{}", start, end, file.size),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(end - start + 1));

    match file.stream(Some(start), Some(end)).await {
        Ok(stream) => (StatusCode::PARTIAL_CONTENT, headers, Body::from_stream(stream)).into_response(),
        Err(e) => {
            error!("Failed to open {} at {}-{}: {}", file.absolute_path, start, end, e);
            storage_error_response(&e)
        }
    }
}
