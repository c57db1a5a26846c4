// src/playlist.rs
//
// HLS media playlist handling: fetch (HTTP or local file) and the minimal
// parse this tool needs. Only #EXTINF and #EXT-X-PROGRAM-DATE-TIME are
// semantically consumed; every other tag is passed over.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::debug;

/// Default timeout for the playlist fetch.
const HTTP_TIMEOUT_SECS: u64 = 20;

/// One media segment with its cumulative position in the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub uri: String,
    pub duration_sec: f64,
    /// Raw string following EXT-X-PROGRAM-DATE-TIME:, empty when absent
    pub program_date_time: String,
    pub start_offset_sec: f64,
    pub end_offset_sec: f64,
}

pub fn is_http_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Load the playlist body from an HTTP(S) URL or a local file path.
pub fn load(source: &str) -> Result<String> {
    if is_http_url(source) {
        fetch_http(source)
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("could not open playlist file: {}", source))
    }
}

fn fetch_http(url: &str) -> Result<String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .user_agent("ads-detector/1.0")
        .build()
        .context("could not build HTTP client")?;

    let response = client
        .get(url)
        .send()
        .with_context(|| format!("playlist request failed: {}", url))?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("playlist request returned HTTP {}", status.as_u16());
    }
    response.text().context("could not read playlist body")
}

/// Parse the playlist into ordered segments with cumulative offsets.
///
/// Some encoders emit EXT-X-PROGRAM-DATE-TIME after the segment URI it
/// describes; a PDT line seen while no EXTINF is pending is attached to the
/// previous segment if that one has none.
pub fn parse(content: &str) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut current_pdt = String::new();
    let mut current_dur = 0.0f64;
    let mut have_dur = false;

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXT-X-PROGRAM-DATE-TIME:") {
            current_pdt = rest.trim().to_string();
            if !have_dur {
                if let Some(last) = segments.last_mut() {
                    if last.program_date_time.is_empty() {
                        last.program_date_time = std::mem::take(&mut current_pdt);
                    }
                }
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            let dur_str = rest.split(',').next().unwrap_or("").trim();
            match dur_str.parse::<f64>() {
                Ok(d) => {
                    current_dur = d;
                    have_dur = true;
                }
                Err(_) => {
                    debug!("skipping EXTINF with unparsable duration: {}", dur_str);
                    have_dur = false;
                }
            }
            continue;
        }

        if !line.starts_with('#') {
            if !have_dur {
                continue;
            }
            segments.push(Segment {
                uri: line.to_string(),
                duration_sec: current_dur,
                program_date_time: std::mem::take(&mut current_pdt),
                start_offset_sec: 0.0,
                end_offset_sec: 0.0,
            });
            have_dur = false;
        }
    }

    let mut offset = 0.0;
    for seg in &mut segments {
        seg.start_offset_sec = offset;
        offset += seg.duration_sec;
        seg.end_offset_sec = offset;
    }
    segments
}

pub fn total_duration(segments: &[Segment]) -> f64 {
    segments.last().map(|s| s.end_offset_sec).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = "#EXTM3U\n\
        #EXT-X-TARGETDURATION:6\n\
        #EXTINF:6.0,\n\
        seg0.ts\n\
        #EXTINF:5.5,\n\
        seg1.ts\n\
        #EXTINF:4.5,\n\
        seg2.ts\n\
        #EXT-X-ENDLIST\n";

    #[test]
    fn test_parse_basic_offsets() {
        let segs = parse(BASIC);
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[0].uri, "seg0.ts");
        assert!((segs[0].start_offset_sec - 0.0).abs() < 1e-9);
        assert!((segs[1].start_offset_sec - 6.0).abs() < 1e-9);
        assert!((segs[2].end_offset_sec - 16.0).abs() < 1e-9);
        assert!((total_duration(&segs) - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_pdt_before_uri() {
        let body = "#EXTM3U\n\
            #EXT-X-PROGRAM-DATE-TIME:2024-05-01T10:00:00.000Z\n\
            #EXTINF:6,\n\
            a.ts\n\
            #EXTINF:6,\n\
            b.ts\n";
        let segs = parse(body);
        assert_eq!(segs[0].program_date_time, "2024-05-01T10:00:00.000Z");
        assert_eq!(segs[1].program_date_time, "");
    }

    #[test]
    fn test_parse_pdt_after_uri_attaches_to_previous() {
        let body = "#EXTM3U\n\
            #EXTINF:6,\n\
            a.ts\n\
            #EXT-X-PROGRAM-DATE-TIME:2024-05-01T10:00:00Z\n\
            #EXTINF:6,\n\
            b.ts\n";
        let segs = parse(body);
        assert_eq!(segs[0].program_date_time, "2024-05-01T10:00:00Z");
        assert_eq!(segs[1].program_date_time, "");
    }

    #[test]
    fn test_parse_skips_bad_extinf() {
        let body = "#EXTINF:abc,\nbad.ts\n#EXTINF:6,\ngood.ts\n";
        let segs = parse(body);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].uri, "good.ts");
    }

    #[test]
    fn test_parse_empty_playlist() {
        assert!(parse("#EXTM3U\n").is_empty());
        assert_eq!(total_duration(&[]), 0.0);
    }

    #[test]
    fn test_uri_without_extinf_is_ignored() {
        let body = "#EXTM3U\nstray.ts\n#EXTINF:3,\nreal.ts\n";
        let segs = parse(body);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].uri, "real.ts");
    }

    #[test]
    fn test_is_http_url() {
        assert!(is_http_url("https://example.com/x.m3u8"));
        assert!(is_http_url("http://example.com/x.m3u8"));
        assert!(!is_http_url("/tmp/x.m3u8"));
    }
}
