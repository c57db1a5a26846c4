// src/timecode.rs
//
// Wall-clock mapping (C8): EXT-X-PROGRAM-DATE-TIME strings to epoch
// milliseconds and back, plus the offset-in-stream -> wall-clock lookup.

use crate::playlist::Segment;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Parse an ISO-8601-like timestamp into epoch milliseconds.
///
/// Accepts `YYYY-MM-DDTHH:MM:SS(.fff)?(Z|+HH:MM|+HHMM)?`; a missing timezone
/// is treated as UTC. Fractional seconds beyond milliseconds are truncated.
pub fn parse_iso8601_ms(input: &str) -> Option<i64> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.timestamp_millis());
    }
    // chrono's %z needs a sign; handle the trailing-Z and no-timezone forms.
    if let Some(rest) = input.strip_suffix('Z').or_else(|| input.strip_suffix('z')) {
        if let Ok(naive) = NaiveDateTime::parse_from_str(rest, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(Utc.from_utc_datetime(&naive).timestamp_millis());
        }
        return None;
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive).timestamp_millis());
    }
    None
}

/// Format epoch milliseconds as `YYYY-MM-DDTHH:MM:SS.mmm+0000`.
pub fn epoch_ms_to_iso8601_utc(epoch_ms: i64) -> String {
    let dt = Utc
        .timestamp_millis_opt(epoch_ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap());
    dt.format("%Y-%m-%dT%H:%M:%S%.3f+0000").to_string()
}

/// Format a second offset as `HH:MM:SS` (hours may exceed 24).
pub fn format_hms(seconds: f64) -> String {
    let seconds = if seconds >= 0.0 { seconds } else { 0.0 };
    let total = seconds.round() as i64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}

/// Map a second offset from playlist start to a wall-clock timestamp, using
/// the anchor of the segment that contains the offset. Returns None when that
/// segment carries no anchor.
pub fn offset_to_program_date_time(
    segments: &[Segment],
    anchors_ms: &[Option<i64>],
    offset_sec: f64,
) -> Option<String> {
    if segments.is_empty() || offset_sec < 0.0 {
        return None;
    }
    let offset_sec = offset_sec.min(segments.last().map(|s| s.end_offset_sec)?);

    // Binary search for the first segment whose end offset exceeds the query.
    let mut lo = 0usize;
    let mut hi = segments.len() - 1;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if offset_sec < segments[mid].end_offset_sec {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }

    let anchor = (*anchors_ms.get(lo)?)?;
    let within = offset_sec - segments[lo].start_offset_sec;
    let ms = anchor + (within * 1000.0) as i64;
    Some(epoch_ms_to_iso8601_utc(ms))
}

/// Resolve each segment's EXT-X-PROGRAM-DATE-TIME string to epoch ms.
pub fn segment_anchors_ms(segments: &[Segment]) -> Vec<Option<i64>> {
    segments
        .iter()
        .map(|s| {
            if s.program_date_time.is_empty() {
                None
            } else {
                parse_iso8601_ms(&s.program_date_time)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(uri: &str, start: f64, end: f64, pdt: &str) -> Segment {
        Segment {
            uri: uri.to_string(),
            duration_sec: end - start,
            program_date_time: pdt.to_string(),
            start_offset_sec: start,
            end_offset_sec: end,
        }
    }

    #[test]
    fn test_parse_utc_z() {
        let ms = parse_iso8601_ms("2024-05-01T10:00:00.500Z").unwrap();
        assert_eq!(ms % 1000, 500);
        assert_eq!(parse_iso8601_ms("2024-05-01T10:00:00Z").unwrap(), ms - 500);
    }

    #[test]
    fn test_parse_numeric_offsets() {
        let base = parse_iso8601_ms("2024-05-01T10:00:00Z").unwrap();
        assert_eq!(parse_iso8601_ms("2024-05-01T12:00:00+02:00").unwrap(), base);
        assert_eq!(parse_iso8601_ms("2024-05-01T12:00:00+0200").unwrap(), base);
        assert_eq!(parse_iso8601_ms("2024-05-01T08:30:00-01:30").unwrap(), base);
    }

    #[test]
    fn test_parse_missing_timezone_is_utc() {
        let with_z = parse_iso8601_ms("2024-05-01T10:00:00Z").unwrap();
        let without = parse_iso8601_ms("2024-05-01T10:00:00").unwrap();
        assert_eq!(with_z, without);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_iso8601_ms("not a date").is_none());
        assert!(parse_iso8601_ms("").is_none());
    }

    #[test]
    fn test_format_epoch() {
        assert_eq!(epoch_ms_to_iso8601_utc(0), "1970-01-01T00:00:00.000+0000");
        assert_eq!(
            epoch_ms_to_iso8601_utc(1_714_557_600_123),
            "2024-05-01T10:00:00.123+0000"
        );
    }

    #[test]
    fn test_round_trip_across_range() {
        // epoch ms in [0, 2^40) round-trips through format + parse
        let probes: [i64; 7] = [
            0,
            1,
            999,
            86_400_000,
            1_714_557_600_123,
            (1i64 << 40) - 1,
            (1i64 << 39) + 777,
        ];
        for ms in probes {
            let formatted = epoch_ms_to_iso8601_utc(ms);
            assert_eq!(parse_iso8601_ms(&formatted), Some(ms), "{}", formatted);
        }
    }

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0.0), "00:00:00");
        assert_eq!(format_hms(3_725.0), "01:02:05");
        assert_eq!(format_hms(-5.0), "00:00:00");
        assert_eq!(format_hms(90_000.0), "25:00:00");
    }

    #[test]
    fn test_offset_mapper_uses_owning_segment() {
        let segments = vec![
            seg("a.ts", 0.0, 6.0, "2024-05-01T10:00:00.000Z"),
            seg("b.ts", 6.0, 12.0, ""),
            seg("c.ts", 12.0, 18.0, "2024-05-01T10:00:12.000Z"),
        ];
        let anchors = segment_anchors_ms(&segments);

        let at_start = offset_to_program_date_time(&segments, &anchors, 0.0).unwrap();
        assert_eq!(at_start, "2024-05-01T10:00:00.000+0000");

        let inside_first = offset_to_program_date_time(&segments, &anchors, 2.5).unwrap();
        assert_eq!(inside_first, "2024-05-01T10:00:02.500+0000");

        // owning segment has no anchor -> no wall clock
        assert!(offset_to_program_date_time(&segments, &anchors, 7.0).is_none());

        let third = offset_to_program_date_time(&segments, &anchors, 13.0).unwrap();
        assert_eq!(third, "2024-05-01T10:00:13.000+0000");
    }

    #[test]
    fn test_offset_mapper_segment_starts_match_anchors() {
        let segments = vec![
            seg("a.ts", 0.0, 6.0, "2024-05-01T10:00:00.000Z"),
            seg("b.ts", 6.0, 12.0, "2024-05-01T10:00:06.000Z"),
        ];
        let anchors = segment_anchors_ms(&segments);
        for (i, s) in segments.iter().enumerate() {
            let mapped =
                offset_to_program_date_time(&segments, &anchors, s.start_offset_sec).unwrap();
            let expect = epoch_ms_to_iso8601_utc(anchors[i].unwrap());
            assert_eq!(mapped, expect);
        }
    }

    #[test]
    fn test_offset_mapper_clamps_past_end() {
        let segments = vec![seg("a.ts", 0.0, 6.0, "2024-05-01T10:00:00.000Z")];
        let anchors = segment_anchors_ms(&segments);
        let mapped = offset_to_program_date_time(&segments, &anchors, 99.0).unwrap();
        assert_eq!(mapped, "2024-05-01T10:00:06.000+0000");
        assert!(offset_to_program_date_time(&segments, &anchors, -1.0).is_none());
    }
}
