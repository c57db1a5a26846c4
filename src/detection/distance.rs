// src/detection/distance.rs
//
// Default strategy: Bhattacharyya distance of each sample histogram to the
// trained mean, smoothed over a symmetric window, with asymmetric enter/exit
// thresholds derived from the base threshold.

use crate::detection::ClassifierParams;
use crate::stats;
use crate::types::{AppearanceModel, Sample};

#[derive(Debug, Clone)]
pub struct DistanceDetail {
    pub raw: Vec<f64>,
    pub smoothed: Vec<f64>,
    pub base_threshold: f64,
    pub enter_threshold: f64,
    pub exit_threshold: f64,
    pub smooth_window: usize,
    pub enter_mult: f64,
    pub exit_mult: f64,
}

pub fn classify(
    samples: &[Sample],
    model: &AppearanceModel,
    params: &ClassifierParams,
) -> DistanceDetail {
    let raw: Vec<f64> = samples
        .iter()
        .map(|s| stats::bhattacharyya(&s.hist, &model.mean_hist))
        .collect();
    let smoothed = smooth(&raw, params.smooth_window);

    let enter_threshold = clamp01(model.threshold * params.enter_mult);
    let exit_threshold = clamp01(model.threshold * params.exit_mult);
    debug_assert!(exit_threshold <= enter_threshold);

    DistanceDetail {
        raw,
        smoothed,
        base_threshold: model.threshold,
        enter_threshold,
        exit_threshold,
        smooth_window: params.smooth_window,
        enter_mult: params.enter_mult,
        exit_mult: params.exit_mult,
    }
}

/// Moving average over a symmetric window of width `w` (w = 1 disables).
/// Edges shrink the window instead of padding, so a single noisy sample
/// cannot fake an ad boundary.
pub fn smooth(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let half = window / 2;
    let n = values.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let from = i.saturating_sub(half);
        let to = (i + half).min(n.saturating_sub(1));
        let sum: f64 = values[from..=to].iter().sum();
        out.push(sum / (to - from + 1) as f64);
    }
    out
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Corner;

    fn model(threshold: f64) -> AppearanceModel {
        let mut mean = vec![0.0f32; 512];
        mean[0] = 1.0;
        AppearanceModel {
            corner: Corner::TopRight,
            mean_hist: mean,
            threshold,
            logo_seeds: vec![0],
        }
    }

    fn params(smooth_window: usize, enter_mult: f64, exit_mult: f64) -> ClassifierParams {
        ClassifierParams {
            roi_width_pct: 0.15,
            smooth_window,
            enter_mult,
            exit_mult,
            dbscan_eps: 0.0,
            dbscan_min_pts: 5,
            lof_k: 10,
            lof_threshold: 1.6,
            knn_k: 10,
            knn_quantile: 0.95,
            tokayo_threshold: 0.0,
        }
    }

    #[test]
    fn test_smooth_window_one_is_identity() {
        let v = vec![0.1, 0.9, 0.1];
        assert_eq!(smooth(&v, 1), v);
    }

    #[test]
    fn test_smooth_window_three() {
        let v = vec![0.1, 0.1, 0.9, 0.1, 0.1];
        let s = smooth(&v, 3);
        assert!((s[0] - 0.1).abs() < 1e-12);
        assert!((s[1] - (0.1 + 0.1 + 0.9) / 3.0).abs() < 1e-12);
        assert!((s[2] - (0.1 + 0.9 + 0.1) / 3.0).abs() < 1e-12);
        assert!((s[4] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_smooth_suppresses_single_spike() {
        // one spiked sample among flat distances stays below enter threshold
        let mut v = vec![0.1; 100];
        v[50] = 0.9;
        let s = smooth(&v, 3);
        let enter = 0.3 * 1.25;
        assert!(s.iter().all(|d| *d < enter));
    }

    #[test]
    fn test_thresholds_scaled_and_clamped() {
        let samples = vec![Sample {
            index: 0,
            t_sec: 0.0,
            hist: vec![0.0; 512],
            roi_png: None,
        }];
        let detail = classify(&samples, &model(0.9), &params(1, 1.25, 1.0));
        assert!((detail.enter_threshold - 1.0).abs() < 1e-12); // 1.125 clamped
        assert!((detail.exit_threshold - 0.9).abs() < 1e-12);
        assert!(detail.exit_threshold <= detail.enter_threshold);
    }

    #[test]
    fn test_distance_against_mean() {
        let mut near = vec![0.0f32; 512];
        near[0] = 1.0;
        let mut far = vec![0.0f32; 512];
        far[1] = 1.0;
        let samples = vec![
            Sample {
                index: 0,
                t_sec: 0.0,
                hist: near,
                roi_png: None,
            },
            Sample {
                index: 1,
                t_sec: 5.0,
                hist: far,
                roi_png: None,
            },
        ];
        let detail = classify(&samples, &model(0.3), &params(1, 1.25, 1.0));
        assert!(detail.raw[0] < 1e-6);
        assert!((detail.raw[1] - 1.0).abs() < 1e-6);
    }
}
