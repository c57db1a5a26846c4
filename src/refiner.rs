// src/refiner.rs
//
// Second pass over the stream: the coarse sampling period bounds the
// boundary error, so each interval edge is re-probed at a finer step inside
// a trailing window. All probes across all intervals are flattened into one
// parallel evaluation so interval count does not multiply the session cost.

use crate::sampler::{self, ProbeClassifier};
use crate::types::AdInterval;
use anyhow::Result;
use tracing::{info, warn};

/// Probe window reaching back from each coarse boundary.
const REFINE_WINDOW_SEC: f64 = 30.0;
/// Probe step for the template strategy.
const REFINE_STEP_TOKAYO_SEC: f64 = 5.0;
/// Probe step for the histogram strategies.
const REFINE_STEP_SEC: f64 = 2.5;

#[derive(Debug, Clone)]
pub struct RefineRecord {
    pub interval_idx: usize,
    pub coarse_start: f64,
    pub coarse_end: f64,
    pub refined_start: f64,
    pub refined_end: f64,
}

pub fn refine_step_sec(tokayo: bool) -> f64 {
    if tokayo {
        REFINE_STEP_TOKAYO_SEC
    } else {
        REFINE_STEP_SEC
    }
}

/// Refine every interval's boundaries in place. Failures are non-fatal: the
/// coarse intervals are kept and None is returned (no debug records).
pub fn refine_intervals(
    source: &str,
    total_duration_sec: f64,
    threads: usize,
    step_sec: f64,
    intervals: &mut [AdInterval],
    classifier: &ProbeClassifier<'_>,
) -> Option<Vec<RefineRecord>> {
    if intervals.is_empty() {
        return Some(Vec::new());
    }
    info!(
        "refining {} interval(s) (window={}s, step={}s, parallel)",
        intervals.len(),
        REFINE_WINDOW_SEC,
        step_sec
    );

    match try_refine(source, total_duration_sec, threads, step_sec, intervals, classifier) {
        Ok(records) => Some(records),
        Err(e) => {
            warn!("refine failed; keeping coarse intervals: {}", e);
            None
        }
    }
}

fn try_refine(
    source: &str,
    total_duration_sec: f64,
    threads: usize,
    step_sec: f64,
    intervals: &mut [AdInterval],
    classifier: &ProbeClassifier<'_>,
) -> Result<Vec<RefineRecord>> {
    // Flatten per-interval windows into one probe list.
    let mut probe_times: Vec<f64> = Vec::new();
    let mut spans: Vec<(std::ops::Range<usize>, std::ops::Range<usize>)> = Vec::new();
    for interval in intervals.iter() {
        let start_window = window_times(interval.start_sec, total_duration_sec, step_sec);
        let end_window = window_times(interval.end_sec, total_duration_sec, step_sec);
        let s0 = probe_times.len();
        probe_times.extend(&start_window);
        let s1 = probe_times.len();
        probe_times.extend(&end_window);
        spans.push((s0..s1, s1..probe_times.len()));
    }

    info!(
        "refine: probes={}, threads<={}",
        probe_times.len(),
        sampler::thread_count(threads).min(probe_times.len().max(1))
    );
    let has_logo = sampler::evaluate_probes(
        source,
        total_duration_sec,
        &probe_times,
        threads,
        classifier,
    )?;

    let mut records = Vec::with_capacity(intervals.len());
    for (idx, interval) in intervals.iter_mut().enumerate() {
        let (start_span, end_span) = &spans[idx];
        let start_times = &probe_times[start_span.clone()];
        let start_has = &has_logo[start_span.clone()];
        let end_times = &probe_times[end_span.clone()];
        let end_has = &has_logo[end_span.clone()];

        let mut refined_start = refine_start(start_times, start_has, interval.start_sec);
        let mut refined_end = refine_end(end_times, end_has, interval.end_sec);
        if refined_end < refined_start {
            refined_start = interval.start_sec;
            refined_end = interval.end_sec;
        }

        if refined_start != interval.start_sec || refined_end != interval.end_sec {
            info!(
                "refine ad#{}: {:.3}s -> {:.3}s  =>  {:.3}s -> {:.3}s",
                idx, interval.start_sec, interval.end_sec, refined_start, refined_end
            );
        }
        records.push(RefineRecord {
            interval_idx: idx,
            coarse_start: interval.start_sec,
            coarse_end: interval.end_sec,
            refined_start,
            refined_end,
        });
        interval.start_sec = refined_start;
        interval.end_sec = refined_end;
    }
    Ok(records)
}

/// Probe timestamps for the window `[max(0, boundary-30), boundary]`,
/// clamped to the stream.
pub fn window_times(boundary_sec: f64, total_duration_sec: f64, step_sec: f64) -> Vec<f64> {
    let from = (boundary_sec - REFINE_WINDOW_SEC).max(0.0);
    let to = boundary_sec.min(total_duration_sec);
    let mut times = Vec::new();
    let mut t = from;
    while t <= to + 1e-9 {
        times.push(t);
        t += step_sec;
    }
    times
}

/// Refined start: the first probe where the logo disappears after being
/// present; a window already open in no-logo takes its first timestamp.
pub fn refine_start(times: &[f64], has_logo: &[bool], coarse_start: f64) -> f64 {
    if let Some(&first) = has_logo.first() {
        if !first {
            return times[0];
        }
    }
    for i in 1..has_logo.len() {
        if has_logo[i - 1] && !has_logo[i] {
            return times[i];
        }
    }
    coarse_start
}

/// Refined end: the first probe in the window where the logo is present.
pub fn refine_end(times: &[f64], has_logo: &[bool], coarse_end: f64) -> f64 {
    for (i, has) in has_logo.iter().enumerate() {
        if *has {
            return times[i];
        }
    }
    coarse_end
}

/// A refine window can reach back across the preceding interval; clamp
/// starts forward and drop intervals the clamp empties, so the reported
/// intervals stay disjoint and ordered.
pub fn enforce_disjoint(ads: Vec<AdInterval>) -> Vec<AdInterval> {
    let mut out: Vec<AdInterval> = Vec::with_capacity(ads.len());
    for mut ad in ads {
        if let Some(prev) = out.last() {
            if ad.start_sec < prev.end_sec {
                ad.start_sec = prev.end_sec;
            }
        }
        if ad.end_sec > ad.start_sec {
            out.push(ad);
        }
    }
    out
}
