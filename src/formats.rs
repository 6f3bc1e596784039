//! Normalization and quality tiering of yt-dlp format lists.
//!
//! `normalize` is the only place raw descriptors are interpreted; the
//! selectors below work exclusively on `NormalizedFormat` and reduce the
//! full ladder to at most three video choices plus one audio choice.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use serde::Serialize;

use crate::ytdlp::RawFormat;

const CODEC_NONE: &str = "none";

/// Typed view of a `RawFormat`. Built once per entry and never mutated.
#[derive(Debug, Clone)]
pub struct NormalizedFormat {
    pub has_video: bool,
    pub has_audio: bool,
    /// Present only for video-bearing entries.
    pub height: Option<u32>,
    pub average_bitrate: Option<f32>,
    pub total_bitrate: Option<f32>,
    pub filesize_bytes: Option<u64>,
    pub ext: String,
    pub quality_note: Option<String>,
    pub url: Option<String>,
    pub format_id: String,
}

/// Normalizes one raw descriptor, or drops it when it carries no usable
/// stream. A codec field counts as present unless it is missing or the
/// literal sentinel `"none"`; exact filesize wins over the approximation.
pub fn normalize(raw: &RawFormat) -> Option<NormalizedFormat> {
    let has_video = codec_present(raw.vcodec.as_deref());
    let has_audio = codec_present(raw.acodec.as_deref());
    if !has_video && !has_audio {
        return None;
    }

    Some(NormalizedFormat {
        has_video,
        has_audio,
        height: if has_video { raw.height } else { None },
        average_bitrate: raw.abr,
        total_bitrate: raw.tbr,
        filesize_bytes: raw.filesize.or(raw.filesize_approx).map(|bytes| bytes as u64),
        ext: raw.ext.clone().unwrap_or_default(),
        quality_note: raw.format_note.clone(),
        url: raw.url.clone(),
        format_id: raw.format_id.clone(),
    })
}

fn codec_present(codec: Option<&str>) -> bool {
    matches!(codec, Some(value) if value != CODEC_NONE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TierName {
    Highest,
    Mid,
    Lowest,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoTier {
    pub tier: TierName,
    pub label: String,
    pub height: u32,
    /// Always mp4: video downloads are re-muxed to mp4 regardless of the
    /// source container.
    pub ext: &'static str,
    pub filesize: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioTier {
    pub tier: TierName,
    pub label: String,
    /// Always mp3: audio downloads are re-encoded.
    pub ext: &'static str,
    pub filesize: Option<u64>,
}

/// Reduces the video ladder to at most three named tiers.
///
/// Heights are deduplicated first (best total bitrate wins, first
/// encountered on ties) and sorted descending. The highest height is
/// always offered; with three or more distinct heights the middle index
/// of that sorted list becomes `mid` and the smallest becomes `lowest`;
/// with exactly two the smaller is offered as `lowest` with no `mid`.
/// The mid pick is positional on purpose, not a 720p/bitrate target.
pub fn select_video_tiers(formats: &[NormalizedFormat]) -> Vec<VideoTier> {
    let mut by_height: HashMap<u32, &NormalizedFormat> = HashMap::new();
    for format in formats.iter().filter(|format| format.has_video) {
        let Some(height) = format.height else {
            continue;
        };
        match by_height.entry(height) {
            Entry::Occupied(mut kept) => {
                if format.total_bitrate.unwrap_or(0.0) > kept.get().total_bitrate.unwrap_or(0.0) {
                    kept.insert(format);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(format);
            }
        }
    }

    let mut heights: Vec<u32> = by_height.keys().copied().collect();
    heights.sort_unstable_by(|a, b| b.cmp(a));

    let Some(&top) = heights.first() else {
        return Vec::new();
    };

    let mut tiers = vec![video_tier(TierName::Highest, top, by_height[&top])];

    if heights.len() >= 3 {
        let mid = heights[heights.len() / 2];
        tiers.push(video_tier(TierName::Mid, mid, by_height[&mid]));
        let bottom = heights[heights.len() - 1];
        tiers.push(video_tier(TierName::Lowest, bottom, by_height[&bottom]));
    } else if heights.len() == 2 {
        tiers.push(video_tier(TierName::Lowest, heights[1], by_height[&heights[1]]));
    }

    tiers
}

fn video_tier(tier: TierName, height: u32, format: &NormalizedFormat) -> VideoTier {
    VideoTier {
        tier,
        label: format!("{height}p"),
        height,
        ext: "mp4",
        filesize: format.filesize_bytes,
    }
}

/// Picks the pure-audio track with the highest average bitrate. Combined
/// audio+video tracks are excluded: they cannot be served as plain audio
/// by the download path. The comparison is `>=`, so exact ties keep the
/// last entry encountered.
pub fn select_best_audio(formats: &[NormalizedFormat]) -> Option<AudioTier> {
    let mut best: Option<&NormalizedFormat> = None;
    let mut best_bitrate = 0.0_f32;

    for format in formats
        .iter()
        .filter(|format| format.has_audio && !format.has_video)
    {
        let bitrate = format.average_bitrate.unwrap_or(0.0);
        if bitrate >= best_bitrate {
            best_bitrate = bitrate;
            best = Some(format);
        }
    }

    let best = best?;
    let label = best
        .average_bitrate
        .filter(|bitrate| *bitrate > 0.0)
        .map(|bitrate| format!("{}kbps", bitrate.round() as u32))
        .unwrap_or_else(|| "Best".to_string());

    Some(AudioTier {
        tier: TierName::Highest,
        label,
        ext: "mp3",
        filesize: best.filesize_bytes,
    })
}
