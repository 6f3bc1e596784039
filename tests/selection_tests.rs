use mediagrab_backend::formats::{
    NormalizedFormat, TierName, normalize, select_best_audio, select_video_tiers,
};
use mediagrab_backend::ytdlp::RawFormat;

fn video(format_id: &str, height: u32, tbr: f32) -> RawFormat {
    RawFormat {
        format_id: format_id.to_string(),
        ext: Some("webm".to_string()),
        vcodec: Some("vp9".to_string()),
        acodec: Some("none".to_string()),
        height: Some(height),
        tbr: Some(tbr),
        ..RawFormat::default()
    }
}

fn audio(format_id: &str, abr: Option<f32>) -> RawFormat {
    RawFormat {
        format_id: format_id.to_string(),
        ext: Some("m4a".to_string()),
        vcodec: Some("none".to_string()),
        acodec: Some("mp4a.40.2".to_string()),
        abr,
        ..RawFormat::default()
    }
}

fn normalized(raws: &[RawFormat]) -> Vec<NormalizedFormat> {
    raws.iter().filter_map(normalize).collect()
}

#[test]
fn normalize_drops_entries_with_neither_stream() {
    let raw = RawFormat {
        format_id: "sb0".to_string(),
        vcodec: Some("none".to_string()),
        acodec: Some("none".to_string()),
        ..RawFormat::default()
    };
    assert!(normalize(&raw).is_none());

    let raw = RawFormat::default(); // both codec fields missing
    assert!(normalize(&raw).is_none());
}

#[test]
fn normalize_treats_unknown_codec_strings_as_present() {
    let raw = RawFormat {
        format_id: "x".to_string(),
        vcodec: Some("some-exotic-codec".to_string()),
        acodec: Some("none".to_string()),
        height: Some(480),
        ..RawFormat::default()
    };
    let format = normalize(&raw).unwrap();
    assert!(format.has_video);
    assert!(!format.has_audio);
    assert_eq!(format.height, Some(480));
}

#[test]
fn normalize_prefers_exact_filesize_over_approx() {
    let raw = RawFormat {
        filesize: Some(1000.0),
        filesize_approx: Some(2000.0),
        ..video("v", 720, 1.0)
    };
    assert_eq!(normalize(&raw).unwrap().filesize_bytes, Some(1000));

    let raw = RawFormat {
        filesize: None,
        filesize_approx: Some(2000.0),
        ..video("v", 720, 1.0)
    };
    assert_eq!(normalize(&raw).unwrap().filesize_bytes, Some(2000));
}

#[test]
fn normalize_ignores_height_on_audio_only_entries() {
    let raw = RawFormat {
        height: Some(720),
        ..audio("a", Some(128.0))
    };
    assert_eq!(normalize(&raw).unwrap().height, None);
}

#[test]
fn no_video_formats_yields_no_tiers() {
    let formats = normalized(&[audio("a", Some(128.0))]);
    assert!(select_video_tiers(&formats).is_empty());
}

#[test]
fn video_without_height_is_not_tiered() {
    let raw = RawFormat {
        height: None,
        ..video("v", 0, 100.0)
    };
    let formats = normalized(&[raw]);
    assert!(select_video_tiers(&formats).is_empty());
}

#[test]
fn single_height_emits_only_highest() {
    let formats = normalized(&[video("v1", 720, 1500.0)]);
    let tiers = select_video_tiers(&formats);
    assert_eq!(tiers.len(), 1);
    assert_eq!(tiers[0].tier, TierName::Highest);
    assert_eq!(tiers[0].label, "720p");
    assert_eq!(tiers[0].height, 720);
    assert_eq!(tiers[0].ext, "mp4");
}

#[test]
fn two_heights_emit_highest_and_lowest() {
    let formats = normalized(&[video("v1", 360, 700.0), video("v2", 1080, 4000.0)]);
    let tiers = select_video_tiers(&formats);
    assert_eq!(tiers.len(), 2);
    assert_eq!(tiers[0].tier, TierName::Highest);
    assert_eq!(tiers[0].height, 1080);
    assert_eq!(tiers[1].tier, TierName::Lowest);
    assert_eq!(tiers[1].height, 360);
}

#[test]
fn three_heights_emit_all_tiers_strictly_descending() {
    let formats = normalized(&[
        video("v1", 480, 900.0),
        video("v2", 1080, 4000.0),
        video("v3", 720, 2000.0),
    ]);
    let tiers = select_video_tiers(&formats);
    assert_eq!(tiers.len(), 3);
    assert_eq!(tiers[0].height, 1080);
    assert_eq!(tiers[1].tier, TierName::Mid);
    assert_eq!(tiers[1].height, 720);
    assert_eq!(tiers[2].height, 480);
    assert!(tiers[0].height > tiers[1].height && tiers[1].height > tiers[2].height);
}

#[test]
fn mid_tier_is_the_middle_index_of_the_sorted_height_list() {
    // Five heights sorted descending: 1080 720 480 360 240 -> index 2.
    let formats = normalized(&[
        video("v1", 240, 300.0),
        video("v2", 1080, 4000.0),
        video("v3", 480, 900.0),
        video("v4", 360, 600.0),
        video("v5", 720, 2000.0),
    ]);
    let tiers = select_video_tiers(&formats);
    assert_eq!(tiers.len(), 3);
    assert_eq!(tiers[0].label, "1080p");
    assert_eq!(tiers[1].label, "480p");
    assert_eq!(tiers[2].label, "240p");
}

#[test]
fn equal_heights_keep_the_larger_total_bitrate() {
    let low = RawFormat {
        filesize: Some(1.0),
        ..video("low", 720, 900.0)
    };
    let high = RawFormat {
        filesize: Some(2.0),
        ..video("high", 720, 2500.0)
    };
    let formats = normalized(&[low, high]);
    let tiers = select_video_tiers(&formats);
    assert_eq!(tiers.len(), 1);
    assert_eq!(tiers[0].filesize, Some(2));
}

#[test]
fn equal_heights_and_bitrates_keep_the_first_encountered() {
    let first = RawFormat {
        filesize: Some(1.0),
        ..video("first", 720, 1500.0)
    };
    let second = RawFormat {
        filesize: Some(2.0),
        ..video("second", 720, 1500.0)
    };
    let formats = normalized(&[first, second]);
    let tiers = select_video_tiers(&formats);
    assert_eq!(tiers[0].filesize, Some(1));
}

#[test]
fn missing_bitrate_counts_as_zero_in_height_groups() {
    let no_tbr = RawFormat {
        tbr: None,
        filesize: Some(1.0),
        ..video("a", 720, 0.0)
    };
    let with_tbr = RawFormat {
        filesize: Some(2.0),
        ..video("b", 720, 100.0)
    };
    let formats = normalized(&[no_tbr, with_tbr]);
    assert_eq!(select_video_tiers(&formats)[0].filesize, Some(2));
}

#[test]
fn audio_selection_picks_the_highest_average_bitrate() {
    let formats = normalized(&[
        audio("a1", Some(64.0)),
        audio("a2", Some(160.0)),
        audio("a3", Some(128.0)),
    ]);
    let tier = select_best_audio(&formats).unwrap();
    assert_eq!(tier.label, "160kbps");
    assert_eq!(tier.ext, "mp3");
    assert_eq!(tier.tier, TierName::Highest);
}

#[test]
fn audio_ties_keep_the_last_encountered() {
    let first = RawFormat {
        filesize: Some(1.0),
        ..audio("first", Some(128.0))
    };
    let second = RawFormat {
        filesize: Some(2.0),
        ..audio("second", Some(128.0))
    };
    let formats = normalized(&[first, second]);
    assert_eq!(select_best_audio(&formats).unwrap().filesize, Some(2));
}

#[test]
fn combined_tracks_are_excluded_from_audio_selection() {
    let combined = RawFormat {
        format_id: "combined".to_string(),
        vcodec: Some("avc1".to_string()),
        acodec: Some("mp4a".to_string()),
        height: Some(720),
        abr: Some(192.0),
        ..RawFormat::default()
    };
    let formats = normalized(&[combined]);
    assert!(select_best_audio(&formats).is_none());
}

#[test]
fn audio_with_unknown_bitrate_is_labelled_best() {
    let formats = normalized(&[audio("a", None)]);
    let tier = select_best_audio(&formats).unwrap();
    assert_eq!(tier.label, "Best");
}

#[test]
fn full_ladder_selection_scenario() {
    let formats = normalized(&[
        video("v1080", 1080, 4200.0),
        video("v720", 720, 2100.0),
        video("v480", 480, 1100.0),
        video("v360", 360, 700.0),
        video("v240", 240, 350.0),
        audio("a128", Some(128.0)),
    ]);

    let tiers = select_video_tiers(&formats);
    assert_eq!(tiers.len(), 3);
    assert_eq!(tiers[0].label, "1080p");
    assert_eq!(tiers[1].label, "480p");
    assert_eq!(tiers[2].label, "240p");

    let audio_tier = select_best_audio(&formats).unwrap();
    assert_eq!(audio_tier.label, "128kbps");
}
