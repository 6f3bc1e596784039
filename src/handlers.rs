use std::net::SocketAddr;
use std::path::Path;

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::{
        HeaderMap, HeaderName, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::warn;
use uuid::Uuid;

use crate::{
    AppState,
    catalog::{CatalogEntry, build_catalog},
    error::ApiError,
    formats::{AudioTier, NormalizedFormat, VideoTier, normalize, select_best_audio, select_video_tiers},
    ratelimit::WINDOW_SECONDS,
    util::{build_content_disposition, content_type_for_filename, non_empty, sanitize_title},
    ytdlp::{
        self, DOWNLOAD_TIMEOUT_SECONDS, DownloadMode, MediaInfo, QualityTier,
        video_format_expression,
    },
};

/// Downloads larger than this are rejected before streaming starts.
pub const MAX_DOWNLOAD_BYTES: u64 = 250 * 1024 * 1024;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub title: String,
    pub thumbnail: String,
    pub duration: Option<String>,
    pub video_formats: Vec<VideoTier>,
    pub audio_format: Option<AudioTier>,
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub title: String,
    pub thumbnail: String,
    pub duration: Option<String>,
    pub formats: Vec<CatalogEntry>,
}

/// `POST /extract` — tiered variant: up to three video tiers plus the
/// best pure-audio track.
pub async fn extract(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<ExtractRequest>,
) -> Result<Json<ExtractResponse>, ApiError> {
    let info = extract_media_info(&state, &headers, addr, &payload.url).await?;
    let formats = normalized_formats(&info);

    Ok(Json(ExtractResponse {
        title: display_title(info.title),
        thumbnail: info.thumbnail.unwrap_or_default(),
        duration: duration_seconds(info.duration),
        video_formats: select_video_tiers(&formats),
        audio_format: select_best_audio(&formats),
    }))
}

/// `POST /formats` — catalog variant: every directly addressable format,
/// deduplicated and ranked.
pub async fn formats(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<ExtractRequest>,
) -> Result<Json<CatalogResponse>, ApiError> {
    let info = extract_media_info(&state, &headers, addr, &payload.url).await?;
    let formats = normalized_formats(&info);

    Ok(Json(CatalogResponse {
        title: display_title(info.title),
        thumbnail: info.thumbnail.unwrap_or_default(),
        duration: duration_seconds(info.duration),
        formats: build_catalog(&formats),
    }))
}

async fn extract_media_info(
    state: &AppState,
    headers: &HeaderMap,
    addr: SocketAddr,
    url: &str,
) -> Result<MediaInfo, ApiError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ApiError::bad_request("URL is required"));
    }

    let client_ip = client_ip_for_request(state, headers, addr);
    if !state.rate_limiter.allow(&client_ip).await {
        warn!("rate limit hit for {client_ip}");
        return Err(ApiError::rate_limited(WINDOW_SECONDS as u64));
    }

    ytdlp::fetch_media_info(url).await
}

fn normalized_formats(info: &MediaInfo) -> Vec<NormalizedFormat> {
    info.formats.iter().filter_map(normalize).collect()
}

fn display_title(title: Option<String>) -> String {
    title
        .as_deref()
        .and_then(non_empty)
        .unwrap_or("Unknown")
        .to_string()
}

fn duration_seconds(duration: Option<f64>) -> Option<String> {
    duration
        .filter(|seconds| *seconds > 0.0)
        .map(|seconds| (seconds.trunc() as u64).to_string())
}

fn default_title() -> String {
    crate::util::DEFAULT_TITLE.to_string()
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub url: String,
    pub mode: DownloadMode,
    #[serde(default)]
    pub quality: QualityTier,
    #[serde(default = "default_title")]
    pub title: String,
}

/// `GET /download` — materializes the requested tier via yt-dlp into an
/// isolated job directory and streams it back as an attachment. The job
/// directory is removed on every exit path; on success it is unlinked as
/// soon as the file handle backing the response body is open.
pub async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let url = query.url.trim().to_string();
    if url.is_empty() {
        return Err(ApiError::bad_request("URL is required"));
    }

    let _permit = state
        .download_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::internal("Download capacity is unavailable"))?;

    let job_dir = state.transfer_dir.join(Uuid::new_v4().to_string());
    tokio::fs::create_dir_all(&job_dir)
        .await
        .map_err(|error| ApiError::internal(format!("Failed to prepare job directory: {error}")))?;

    match stream_download(&query, &url, &job_dir).await {
        Ok(response) => Ok(response),
        Err(error) => {
            ytdlp::cleanup_job_dir(&job_dir).await;
            Err(error)
        }
    }
}

async fn stream_download(
    query: &DownloadQuery,
    url: &str,
    job_dir: &Path,
) -> Result<Response, ApiError> {
    let output_template = format!("{}/media.%(ext)s", job_dir.to_string_lossy());

    let mut args = vec!["-f".to_string()];
    match query.mode {
        DownloadMode::Video => {
            args.push(video_format_expression(query.quality));
            args.push("--merge-output-format".to_string());
            args.push("mp4".to_string());
        }
        DownloadMode::Audio => {
            args.push("bestaudio/best".to_string());
            args.push("--extract-audio".to_string());
            args.push("--audio-format".to_string());
            args.push("mp3".to_string());
        }
    }
    args.extend([
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "-o".to_string(),
        output_template,
        url.to_string(),
    ]);

    let output = ytdlp::run_yt_dlp(args, DOWNLOAD_TIMEOUT_SECONDS, "Download timed out").await?;
    if !output.status.success() {
        warn!(
            "yt-dlp download failed for {url:?}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return Err(ApiError::internal("Download failed"));
    }

    let file_path = ytdlp::locate_output_file(job_dir).await?;
    let actual_ext = file_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or(match query.mode {
            DownloadMode::Video => "mp4",
            DownloadMode::Audio => "mp3",
        });
    let filename = format!("{}.{actual_ext}", sanitize_title(&query.title));

    let metadata = tokio::fs::metadata(&file_path)
        .await
        .map_err(|error| ApiError::internal(format!("Failed to read output metadata: {error}")))?;
    if metadata.len() > MAX_DOWNLOAD_BYTES {
        return Err(ApiError::bad_request(format!(
            "The file exceeds the {} MB limit",
            MAX_DOWNLOAD_BYTES / 1_048_576
        )));
    }

    let file = tokio::fs::File::open(&file_path)
        .await
        .map_err(|error| ApiError::internal(format!("Failed to open output file: {error}")))?;

    // The open handle keeps the bytes readable after the unlink, so the
    // job directory can go away before the body finishes streaming.
    ytdlp::cleanup_job_dir(job_dir).await;

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(&filename)),
    );
    headers.insert(
        CONTENT_LENGTH,
        HeaderValue::from_str(&metadata.len().to_string())
            .map_err(|_| ApiError::internal("Failed to build Content-Length"))?,
    );
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&filename))
            .map_err(|_| ApiError::internal("Failed to build Content-Disposition"))?,
    );
    headers.insert(
        HeaderName::from_static("x-download-filename"),
        HeaderValue::from_str(&crate::util::ascii_fallback_filename(&filename))
            .map_err(|_| ApiError::internal("Failed to build filename header"))?,
    );

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

fn extract_forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let check_header = |key: &str| {
        headers
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    };

    if let Some(forwarded) = check_header("x-forwarded-for")
        && let Some(first) = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    {
        return Some(first.to_string());
    }

    check_header("cf-connecting-ip").or_else(|| check_header("x-real-ip"))
}

pub fn client_ip_for_request(state: &AppState, headers: &HeaderMap, addr: SocketAddr) -> String {
    if state.trust_proxy_headers {
        extract_forwarded_ip(headers).unwrap_or_else(|| addr.ip().to_string())
    } else {
        addr.ip().to_string()
    }
}
