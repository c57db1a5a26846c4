// src/sampler.rs
//
// Parallel seeked-frame sampling over the HLS stream. Fork-join with static
// partitioning: timestamps are bucketed by position in the stream so each
// worker's seeks stay monotonic (HLS session open + backwards seeks are
// expensive), and every worker owns its own capture handle.

use crate::features;
use crate::types::{Corner, Sample, TokayoModel};
use anyhow::{Context, Result};
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture},
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Minimum number of successfully sampled frames for a usable model.
pub const MIN_TRAINING_SAMPLES: usize = 5;

/// Thread-safe progress callback: (completed, total).
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize) + Sync);

/// Resolve the effective worker count. Zero means detected hardware
/// concurrency; an explicit value is honored verbatim (oversubscription is a
/// latency knob for stream reads, not a correctness concern).
pub fn thread_count(requested: usize) -> usize {
    if requested == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        requested
    }
    .max(1)
}

/// Bucket index for a timestamp: min(n-1, floor((t / total) * n)).
pub fn bucket_for(t_sec: f64, total_duration_sec: f64, buckets: usize) -> usize {
    if buckets == 0 {
        return 0;
    }
    let frac = if total_duration_sec > 0.0 {
        t_sec / total_duration_sec
    } else {
        0.0
    };
    (((frac * buckets as f64) as isize).max(0) as usize).min(buckets - 1)
}

/// Partition item indices into per-worker buckets by timestamp, each bucket
/// sorted ascending so a worker's seeks only move forward.
pub fn partition_by_time(
    times: &[f64],
    total_duration_sec: f64,
    workers: usize,
) -> Vec<Vec<usize>> {
    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); workers];
    for (i, t) in times.iter().enumerate() {
        buckets[bucket_for(*t, total_duration_sec, workers)].push(i);
    }
    for bucket in &mut buckets {
        bucket.sort_by(|a, b| {
            times[*a]
                .partial_cmp(&times[*b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    buckets
}

/// The sampling timestamp grid: 0, step, 2*step, ... strictly below the total.
pub fn sample_times(total_duration_sec: f64, step_sec: f64) -> Vec<f64> {
    let mut times = Vec::new();
    let mut t = 0.0;
    while t < total_duration_sec {
        times.push(t);
        t += step_sec;
    }
    times
}

fn open_capture(source: &str) -> Result<VideoCapture> {
    let mut cap = VideoCapture::from_file(source, videoio::CAP_ANY)
        .with_context(|| format!("could not open stream: {}", source))?;
    if !cap.is_opened()? {
        anyhow::bail!("could not open stream in worker: {}", source);
    }
    cap.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)?;
    Ok(cap)
}

fn read_frame_at(cap: &mut VideoCapture, t_sec: f64) -> Result<Option<Mat>> {
    cap.set(videoio::CAP_PROP_POS_MSEC, t_sec * 1000.0)?;
    let mut frame = Mat::default();
    if !cap.read(&mut frame)? || frame.empty() {
        return Ok(None);
    }
    Ok(Some(frame))
}

/// Record the first worker error; later errors from other workers are dropped.
fn record_first_error(slot: &Mutex<Option<anyhow::Error>>, err: anyhow::Error) {
    let mut guard = slot.lock().unwrap();
    if guard.is_none() {
        *guard = Some(err);
    }
}

// ============================================================================
// TRAINING SAMPLER (C3)
// ============================================================================

/// Sample the stream every `step_sec` seconds and compute per-sample features.
///
/// `capture_rois` additionally PNG-encodes each corner ROI (debug artifacts
/// and tokayo training need the raw pixels). Failed frame reads drop the
/// sample silently; fewer than MIN_TRAINING_SAMPLES successes is fatal.
#[allow(clippy::too_many_arguments)]
pub fn collect_samples(
    source: &str,
    total_duration_sec: f64,
    step_sec: f64,
    corner: Corner,
    roi_width_pct: f64,
    threads: usize,
    capture_rois: bool,
    on_sample: Option<ProgressFn<'_>>,
) -> Result<Vec<Sample>> {
    let times = sample_times(total_duration_sec, step_sec);
    if times.len() < MIN_TRAINING_SAMPLES {
        anyhow::bail!(
            "not enough samples (need >= {}); increase duration or reduce --every-sec",
            MIN_TRAINING_SAMPLES
        );
    }

    let workers = thread_count(threads);
    let buckets = partition_by_time(&times, total_duration_sec, workers);

    let samples: Mutex<Vec<Sample>> = Mutex::new(Vec::with_capacity(times.len()));
    let first_error: Mutex<Option<anyhow::Error>> = Mutex::new(None);
    let completed = AtomicUsize::new(0);
    let encode_lock = Mutex::new(());

    std::thread::scope(|scope| {
        let times = &times;
        let samples = &samples;
        let first_error = &first_error;
        let completed = &completed;
        let encode_lock = &encode_lock;
        for bucket in &buckets {
            scope.spawn(move || {
                let run = || -> Result<()> {
                    if bucket.is_empty() {
                        return Ok(());
                    }
                    let mut cap = open_capture(source)?;
                    for &idx in bucket {
                        let t = times[idx];
                        let Some(frame) = read_frame_at(&mut cap, t)? else {
                            continue;
                        };
                        let hist = features::corner_hist(&frame, corner, roi_width_pct)?;
                        let roi_png = if capture_rois {
                            let roi = features::corner_roi(&frame, corner, roi_width_pct)?;
                            let _codec = encode_lock.lock().unwrap();
                            Some(features::encode_roi_png(&roi)?)
                        } else {
                            None
                        };
                        samples.lock().unwrap().push(Sample {
                            index: idx,
                            t_sec: t,
                            hist,
                            roi_png,
                        });
                        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                        if let Some(cb) = on_sample {
                            cb(done, times.len());
                        }
                    }
                    Ok(())
                };
                if let Err(e) = run() {
                    record_first_error(first_error, e);
                }
            });
        }
    });

    if let Some(err) = first_error.lock().unwrap().take() {
        return Err(err);
    }

    let mut samples = samples.into_inner().unwrap();
    if samples.len() < MIN_TRAINING_SAMPLES {
        anyhow::bail!("could not read enough frames for training");
    }
    samples.sort_by_key(|s| s.index);
    // dropped reads leave holes in the grid; renumber so downstream indices
    // (seeds, debug artifacts) stay contiguous
    for (i, s) in samples.iter_mut().enumerate() {
        s.index = i;
    }
    Ok(samples)
}

// ============================================================================
// PROBE EVALUATION (shared with the boundary refiner, C7)
// ============================================================================

/// How a refine probe decides logo presence.
pub enum ProbeClassifier<'a> {
    /// Bhattacharyya distance to the mean histogram, logo when <= threshold
    Histogram {
        mean_hist: &'a [f32],
        threshold: f64,
        corner: Corner,
        roi_width_pct: f64,
    },
    /// NCC against the pixel-median template, logo when >= threshold
    Template(&'a TokayoModel),
}

impl ProbeClassifier<'_> {
    fn has_logo(&self, frame: &Mat) -> Result<bool> {
        match self {
            ProbeClassifier::Histogram {
                mean_hist,
                threshold,
                corner,
                roi_width_pct,
            } => {
                let hist = features::corner_hist(frame, *corner, *roi_width_pct)?;
                Ok(crate::stats::bhattacharyya(&hist, mean_hist) <= *threshold)
            }
            ProbeClassifier::Template(model) => {
                let roi = features::corner_roi(frame, model.corner, model.roi_width_pct)?;
                let gray = features::gray_blurred(&roi)?;
                crate::detection::tokayo::ncc_has_logo(&gray, model)
            }
        }
    }
}

/// Evaluate logo presence at each probe timestamp, in parallel.
///
/// Reuses the training sampler's partition scheme; the worker count is
/// additionally capped by the probe count so no capture is opened for an
/// empty bucket. A failed frame read marks that probe as no-logo.
pub fn evaluate_probes(
    source: &str,
    total_duration_sec: f64,
    probe_times: &[f64],
    threads: usize,
    classifier: &ProbeClassifier<'_>,
) -> Result<Vec<bool>> {
    if probe_times.is_empty() {
        return Ok(Vec::new());
    }

    let workers = thread_count(threads).min(probe_times.len()).max(1);
    let buckets = partition_by_time(probe_times, total_duration_sec, workers);

    let results: Mutex<Vec<bool>> = Mutex::new(vec![false; probe_times.len()]);
    let first_error: Mutex<Option<anyhow::Error>> = Mutex::new(None);

    std::thread::scope(|scope| {
        let results = &results;
        let first_error = &first_error;
        for bucket in &buckets {
            scope.spawn(move || {
                let run = || -> Result<()> {
                    if bucket.is_empty() {
                        return Ok(());
                    }
                    let mut cap = open_capture(source)?;
                    for &idx in bucket {
                        let t = probe_times[idx];
                        let has = match read_frame_at(&mut cap, t)? {
                            Some(frame) => classifier.has_logo(&frame)?,
                            None => false,
                        };
                        results.lock().unwrap()[idx] = has;
                    }
                    Ok(())
                };
                if let Err(e) = run() {
                    record_first_error(first_error, e);
                }
            });
        }
    });

    if let Some(err) = first_error.lock().unwrap().take() {
        return Err(err);
    }
    Ok(results.into_inner().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_count() {
        assert!(thread_count(0) >= 1);
        assert_eq!(thread_count(1), 1);
        // explicit oversubscription is honored verbatim
        assert_eq!(thread_count(100), 100);
    }

    #[test]
    fn test_sample_times_grid() {
        let times = sample_times(25.0, 5.0);
        assert_eq!(times, vec![0.0, 5.0, 10.0, 15.0, 20.0]);
        assert!(sample_times(0.0, 5.0).is_empty());
    }

    #[test]
    fn test_bucket_for_bounds() {
        assert_eq!(bucket_for(0.0, 100.0, 4), 0);
        assert_eq!(bucket_for(24.9, 100.0, 4), 0);
        assert_eq!(bucket_for(25.0, 100.0, 4), 1);
        assert_eq!(bucket_for(99.9, 100.0, 4), 3);
        // the final timestamp may equal the total; stays in the last bucket
        assert_eq!(bucket_for(100.0, 100.0, 4), 3);
    }

    #[test]
    fn test_partition_covers_all_indices_sorted() {
        let times: Vec<f64> = (0..20).map(|i| i as f64 * 5.0).collect();
        let buckets = partition_by_time(&times, 100.0, 3);
        assert_eq!(buckets.len(), 3);

        let mut seen: Vec<usize> = buckets.iter().flatten().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());

        for bucket in &buckets {
            for pair in bucket.windows(2) {
                assert!(times[pair[0]] <= times[pair[1]]);
            }
        }
    }

    #[test]
    fn test_partition_monotonic_buckets() {
        // every timestamp in bucket b is <= every timestamp in bucket b+1
        let times: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let buckets = partition_by_time(&times, 50.0, 4);
        for w in buckets.windows(2) {
            let max_prev = w[0].iter().map(|&i| times[i]).fold(f64::MIN, f64::max);
            let min_next = w[1].iter().map(|&i| times[i]).fold(f64::MAX, f64::min);
            if !w[0].is_empty() && !w[1].is_empty() {
                assert!(max_prev <= min_next);
            }
        }
    }
}
