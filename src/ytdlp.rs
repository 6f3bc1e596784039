//! Subprocess boundary around the yt-dlp binary.
//!
//! Every invocation is an isolated process bounded by a timeout; nothing
//! here is retried. Extraction failures are classified from stderr so the
//! handler can answer with a useful status instead of a blanket 500.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Output;

use serde::Deserialize;
use tokio::process::Command;
use tokio::time::{Duration, timeout};
use tracing::warn;

use crate::error::ApiError;

pub const EXTRACT_TIMEOUT_SECONDS: u64 = 25;
pub const DOWNLOAD_TIMEOUT_SECONDS: u64 = 120;

/// Metadata document printed by `yt-dlp --dump-json`.
#[derive(Debug, Deserialize)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

/// One untyped format descriptor as yt-dlp reports it. Individual fields
/// are frequently missing; `formats::normalize` is the single place that
/// turns this into something selection logic can trust.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    #[serde(default)]
    pub format_id: String,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub height: Option<u32>,
    pub abr: Option<f32>,
    pub tbr: Option<f32>,
    pub filesize: Option<f64>,
    pub filesize_approx: Option<f64>,
    pub format_note: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    #[default]
    Highest,
    Mid,
    Lowest,
}

/// yt-dlp format expression for a video tier. The caps mirror the tier
/// labels the extraction endpoint hands out: mid tops out at 720p, lowest
/// at 360p, highest is uncapped.
pub fn video_format_expression(quality: QualityTier) -> String {
    let cap = match quality {
        QualityTier::Highest => "",
        QualityTier::Mid => "[height<=720]",
        QualityTier::Lowest => "[height<=360]",
    };
    format!("bestvideo{cap}+bestaudio/best{cap}")
}

pub async fn fetch_media_info(url: &str) -> Result<MediaInfo, ApiError> {
    let args = [
        "--dump-json",
        "--no-download",
        "--no-warnings",
        "--no-playlist",
        url,
    ];
    let output = run_yt_dlp(
        args.iter().map(ToString::to_string).collect(),
        EXTRACT_TIMEOUT_SECONDS,
        "Extraction timed out",
    )
    .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(classify_extract_failure(stderr.trim()));
    }

    serde_json::from_slice(&output.stdout).map_err(|error| {
        warn!("unparseable yt-dlp metadata for {url:?}: {error}");
        ApiError::internal_coded("Failed to parse extraction result", "MALFORMED_TOOL_OUTPUT")
    })
}

/// Maps yt-dlp diagnostic text onto the client-facing error taxonomy.
/// Anything unrecognized stays a generic 422: the URL was the problem,
/// not the server.
pub fn classify_extract_failure(stderr: &str) -> ApiError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("unsupported url") {
        ApiError::unprocessable("This URL is not supported", "UNSUPPORTED_SOURCE")
    } else if stderr.contains("Video unavailable") || lower.contains("not available") {
        ApiError::unprocessable("This media is unavailable or private", "MEDIA_UNAVAILABLE")
    } else {
        ApiError::unprocessable("Could not extract media from this URL", "EXTRACTION_FAILED")
    }
}

pub async fn run_yt_dlp(
    args: Vec<String>,
    timeout_seconds: u64,
    timeout_message: &str,
) -> Result<Output, ApiError> {
    let command_future = Command::new("yt-dlp").args(args).kill_on_drop(true).output();
    timeout(Duration::from_secs(timeout_seconds), command_future)
        .await
        .map_err(|_| ApiError::timeout(timeout_message))?
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                ApiError::tool_missing()
            } else {
                ApiError::internal(format!("Failed to run yt-dlp: {error}"))
            }
        })
}

/// Finds the downloaded file by scanning the job directory for the first
/// regular file. yt-dlp may change the extension relative to the output
/// template, so the template alone cannot name the result.
pub async fn locate_output_file(job_dir: &Path) -> Result<PathBuf, ApiError> {
    let mut entries = tokio::fs::read_dir(job_dir)
        .await
        .map_err(|error| ApiError::internal(format!("Failed to open job directory: {error}")))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|error| ApiError::internal(format!("Failed to scan job directory: {error}")))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|error| ApiError::internal(format!("Failed to inspect job file: {error}")))?;
        if file_type.is_file() {
            return Ok(entry.path());
        }
    }

    Err(ApiError::internal_coded(
        "Download produced no file",
        "NO_OUTPUT_FILE",
    ))
}

pub async fn cleanup_job_dir(job_dir: &Path) {
    if let Err(error) = tokio::fs::remove_dir_all(job_dir).await
        && error.kind() != ErrorKind::NotFound
    {
        warn!("failed to remove job directory {job_dir:?}: {error}");
    }
}

/// Sweeps leftover job directories from a previous process. Run once at
/// startup; per-request cleanup covers everything created after that.
pub async fn cleanup_stale_job_dirs(transfer_dir: &Path) {
    let mut entries = match tokio::fs::read_dir(transfer_dir).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("failed to open transfer directory for sweep: {error}");
            }
            return;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let removal = match entry.file_type().await {
            Ok(file_type) if file_type.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(_) => continue,
        };
        if let Err(error) = removal
            && error.kind() != ErrorKind::NotFound
        {
            warn!("failed to sweep stale job path {path:?}: {error}");
        }
    }
}
