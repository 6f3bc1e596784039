//! Flat, deduplicated catalog of directly addressable formats, the
//! alternative to the tiered selection in `formats`.

use std::collections::HashSet;

use serde::Serialize;

use crate::formats::NormalizedFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub format_id: String,
    pub ext: String,
    pub quality: String,
    pub filesize: Option<u64>,
    pub kind: MediaKind,
    pub url: String,
}

/// Builds the catalog: classify, deduplicate, rank.
///
/// Entries without a direct URL are unusable here and dropped up front.
/// Combined tracks become video entries, pure audio tracks audio entries;
/// video-only tracks are skipped in the primary pass since they are not
/// playable without muxing. Duplicates share a `(kind, label, ext)` key
/// and the first occurrence wins. Video entries sort before audio, each
/// group descending by its numeric rank (height or bitrate, carried as a
/// number from classification; labels are never re-parsed). When the
/// primary pass yields no video at all, video-only tracks are prepended
/// as an explicit fallback, in encounter order and undeduplicated, so the
/// caller always sees a video option when one exists in any form.
pub fn build_catalog(formats: &[NormalizedFormat]) -> Vec<CatalogEntry> {
    let mut seen: HashSet<(MediaKind, String, String)> = HashSet::new();
    let mut ranked: Vec<(MediaKind, u32, CatalogEntry)> = Vec::new();

    for format in formats {
        let Some(url) = format.url.as_deref() else {
            continue;
        };

        let (kind, quality, rank) = if format.has_video && format.has_audio {
            match format.height {
                Some(height) => (MediaKind::Video, format!("{height}p"), height),
                None => (MediaKind::Video, note_label(format), 0),
            }
        } else if format.has_audio {
            match format.average_bitrate.filter(|bitrate| *bitrate > 0.0) {
                Some(bitrate) => {
                    let rounded = bitrate.round() as u32;
                    (MediaKind::Audio, format!("{rounded}kbps"), rounded)
                }
                None => (MediaKind::Audio, note_label(format), 0),
            }
        } else {
            // video-only, handled by the fallback pass below
            continue;
        };

        if !seen.insert((kind, quality.clone(), format.ext.clone())) {
            continue;
        }

        ranked.push((kind, rank, entry(format, kind, quality, url)));
    }

    // Stable sort keeps first-wins order among equal ranks.
    ranked.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut entries: Vec<CatalogEntry> = ranked.into_iter().map(|(_, _, entry)| entry).collect();

    if !entries.iter().any(|entry| entry.kind == MediaKind::Video) {
        let mut fallback = Vec::new();
        for format in formats {
            if !format.has_video || format.has_audio {
                continue;
            }
            let Some(url) = format.url.as_deref() else {
                continue;
            };
            let quality = match format.height {
                Some(height) => format!("{height}p (video only)"),
                None => "video only".to_string(),
            };
            fallback.push(entry(format, MediaKind::Video, quality, url));
        }
        fallback.append(&mut entries);
        entries = fallback;
    }

    entries
}

fn note_label(format: &NormalizedFormat) -> String {
    format.quality_note.clone().unwrap_or_default()
}

fn entry(format: &NormalizedFormat, kind: MediaKind, quality: String, url: &str) -> CatalogEntry {
    CatalogEntry {
        format_id: format.format_id.clone(),
        ext: format.ext.clone(),
        quality,
        filesize: format.filesize_bytes,
        kind,
        url: url.to_string(),
    }
}
