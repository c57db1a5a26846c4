// src/segmenter.rs
//
// Converts the per-sample logo/no-logo sequence into ad intervals. Two
// states with streak counters: enterN consecutive confident no-logo samples
// open an interval at the first sample of the streak; exitN consecutive
// confident logo samples close it at the first sample of that streak.

use crate::detection::Classification;
use crate::types::AdInterval;
use tracing::info;

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub enter_consecutive: usize,
    pub exit_consecutive: usize,
    /// Intervals shorter than this are discarded; equal length is kept
    pub min_ad_sec: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmenterState {
    OutsideAd,
    InsideAd,
}

struct HysteresisSegmenter<'a> {
    config: &'a SegmenterConfig,
    times: &'a [f64],
    state: SegmenterState,
    no_logo_streak: usize,
    logo_streak: usize,
    start_candidate_idx: Option<usize>,
    ad_start: f64,
    intervals: Vec<AdInterval>,
}

impl<'a> HysteresisSegmenter<'a> {
    fn new(config: &'a SegmenterConfig, times: &'a [f64]) -> Self {
        Self {
            config,
            times,
            state: SegmenterState::OutsideAd,
            no_logo_streak: 0,
            logo_streak: 0,
            start_candidate_idx: None,
            ad_start: 0.0,
            intervals: Vec::new(),
        }
    }

    fn push(&mut self, i: usize, strong_no_logo: bool, strong_logo: bool) {
        match self.state {
            SegmenterState::OutsideAd => {
                if strong_no_logo {
                    if self.no_logo_streak == 0 {
                        self.start_candidate_idx = Some(i);
                    }
                    self.no_logo_streak += 1;
                } else {
                    self.no_logo_streak = 0;
                    self.start_candidate_idx = None;
                }

                if self.no_logo_streak >= self.config.enter_consecutive {
                    let idx = self.start_candidate_idx.unwrap_or(0);
                    self.state = SegmenterState::InsideAd;
                    self.ad_start = self.times[idx];
                    self.no_logo_streak = 0;
                    self.logo_streak = 0;
                    self.start_candidate_idx = None;
                }
            }
            SegmenterState::InsideAd => {
                if strong_logo {
                    self.logo_streak += 1;
                } else {
                    self.logo_streak = 0;
                }

                if self.logo_streak >= self.config.exit_consecutive {
                    let end_idx = (i + 1).saturating_sub(self.config.exit_consecutive);
                    self.state = SegmenterState::OutsideAd;
                    self.emit(self.times[end_idx]);
                    self.logo_streak = 0;
                }
            }
        }
    }

    /// Terminal flush: a stream that ends mid-ad closes at the total duration.
    fn finish(&mut self, total_duration_sec: f64) {
        if self.state == SegmenterState::InsideAd {
            self.emit(total_duration_sec);
        }
    }

    fn emit(&mut self, ad_end: f64) {
        if ad_end - self.ad_start >= self.config.min_ad_sec {
            info!(
                "ad detected: {:.3}s -> {:.3}s",
                self.ad_start, ad_end
            );
            self.intervals.push(AdInterval::new(self.ad_start, ad_end));
        }
    }
}

/// Run the state machine over the full classification.
pub fn detect_intervals(
    times: &[f64],
    classification: &Classification,
    config: &SegmenterConfig,
    total_duration_sec: f64,
) -> Vec<AdInterval> {
    debug_assert_eq!(times.len(), classification.len());
    let mut sm = HysteresisSegmenter::new(config, times);
    for i in 0..classification.len() {
        sm.push(
            i,
            classification.strong_no_logo(i),
            classification.strong_logo(i),
        );
    }
    sm.finish(total_duration_sec);
    sm.intervals
}

#[cfg(test)]
mod tests {
    use super::*;

    fn times(n: usize, step: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * step).collect()
    }

    fn continuous(dists: Vec<f64>, enter: f64, exit: f64) -> Classification {
        Classification::Continuous {
            scores: dists,
            enter_threshold: enter,
            exit_threshold: exit,
        }
    }

    fn config(enter_n: usize, exit_n: usize, min_ad: f64) -> SegmenterConfig {
        SegmenterConfig {
            enter_consecutive: enter_n,
            exit_consecutive: exit_n,
            min_ad_sec: min_ad,
        }
    }

    #[test]
    fn test_all_logo_stream_yields_no_intervals() {
        // base threshold 0.30, enterMult 1.25: distance 0.10 never enters
        let t = times(100, 5.0);
        let c = continuous(vec![0.10; 100], 0.30 * 1.25, 0.30);
        let ads = detect_intervals(&t, &c, &config(1, 1, 10.0), 500.0);
        assert!(ads.is_empty());
    }

    #[test]
    fn test_single_ad_interval() {
        // samples 20..=29 are far from the model; enterN=exitN=2
        let t = times(100, 5.0);
        let mut d = vec![0.1; 100];
        for v in d.iter_mut().take(30).skip(20) {
            *v = 0.8;
        }
        let c = continuous(d, 0.30 * 1.25, 0.30);
        let ads = detect_intervals(&t, &c, &config(2, 2, 10.0), 500.0);
        assert_eq!(ads.len(), 1);
        // start at the first no-logo sample (index 20)
        assert!((ads[0].start_sec - 100.0).abs() < 1e-9);
        // exit streak completes at i=31; end lands on t[i - exitN + 1] = t[30]
        assert!((ads[0].end_sec - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_ad_at_stream_end_flushes_to_total_duration() {
        let t = times(100, 5.0);
        let mut d = vec![0.1; 100];
        for v in d.iter_mut().skip(50) {
            *v = 0.8;
        }
        let c = continuous(d, 0.30 * 1.25, 0.30);
        let ads = detect_intervals(&t, &c, &config(2, 2, 10.0), 500.0);
        assert_eq!(ads.len(), 1);
        assert!((ads[0].start_sec - 250.0).abs() < 1e-9);
        assert!((ads[0].end_sec - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_enter_requires_exact_streak() {
        // exactly enterN consecutive no-logo samples enter; enterN-1 do not
        let t = times(20, 5.0);
        let mut d = vec![0.1; 20];
        d[5] = 0.8;
        d[6] = 0.8; // streak of 2 < enterN = 3
        let c = continuous(d.clone(), 0.35, 0.30);
        let ads = detect_intervals(&t, &c, &config(3, 1, 0.0), 100.0);
        assert!(ads.is_empty());

        d[7] = 0.8; // streak of exactly 3
        let c = continuous(d, 0.35, 0.30);
        let ads = detect_intervals(&t, &c, &config(3, 1, 0.0), 100.0);
        assert_eq!(ads.len(), 1);
        assert!((ads[0].start_sec - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_min_ad_sec_keeps_equal_length() {
        let t = times(20, 5.0);
        let mut d = vec![0.1; 20];
        for v in d.iter_mut().take(10).skip(6) {
            *v = 0.8;
        }
        let c = continuous(d, 0.35, 0.30);
        // interval is [30, 50]: length 20 survives min_ad_sec = 20 ...
        let ads = detect_intervals(&t, &c, &config(1, 1, 20.0), 100.0);
        assert_eq!(ads.len(), 1);
        assert!((ads[0].end_sec - ads[0].start_sec - 20.0).abs() < 1e-9);
        // ... and is discarded just above it
        let c2 = continuous(
            {
                let mut d = vec![0.1; 20];
                for v in d.iter_mut().take(10).skip(6) {
                    *v = 0.8;
                }
                d
            },
            0.35,
            0.30,
        );
        let ads = detect_intervals(&t, &c2, &config(1, 1, 20.1), 100.0);
        assert!(ads.is_empty());
    }

    #[test]
    fn test_hysteresis_dead_zone_keeps_state() {
        // inside an ad, mid-range distances (not strong logo) never exit
        let t = times(12, 5.0);
        let mut d = vec![0.1; 12];
        for v in d.iter_mut().skip(4) {
            *v = 0.45; // above exit (0.30), below enter (0.50)
        }
        d[4] = 0.8;
        d[5] = 0.8;
        let c = continuous(d, 0.50, 0.30);
        let ads = detect_intervals(&t, &c, &config(2, 2, 0.0), 60.0);
        // entered at t=20, never exits, flushes at total duration
        assert_eq!(ads.len(), 1);
        assert!((ads[0].start_sec - 20.0).abs() < 1e-9);
        assert!((ads[0].end_sec - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_binary_classification_multiple_ads() {
        let t = times(30, 5.0);
        let mut has = vec![true; 30];
        for v in has.iter_mut().take(10).skip(5) {
            *v = false;
        }
        for v in has.iter_mut().take(25).skip(20) {
            *v = false;
        }
        let c = Classification::Binary(has);
        let ads = detect_intervals(&t, &c, &config(1, 1, 0.0), 150.0);
        assert_eq!(ads.len(), 2);
        assert!(ads[0].end_sec <= ads[1].start_sec);
        for ad in &ads {
            assert!(ad.start_sec < ad.end_sec);
        }
    }

    #[test]
    fn test_idempotent_over_same_input() {
        let t = times(50, 5.0);
        let mut has = vec![true; 50];
        for v in has.iter_mut().take(30).skip(12) {
            *v = false;
        }
        let c = Classification::Binary(has);
        let cfg = config(2, 2, 10.0);
        let a = detect_intervals(&t, &c, &cfg, 250.0);
        let b = detect_intervals(&t, &c, &cfg, 250.0);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.start_sec, y.start_sec);
            assert_eq!(x.end_sec, y.end_sec);
        }
    }
}
