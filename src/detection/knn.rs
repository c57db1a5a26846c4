// src/detection/knn.rs
//
// Seed-KNN in the 512-D histogram space: each sample is scored by its mean
// Bhattacharyya distance to its k closest logo seeds. The acceptance
// threshold comes from the seed scores themselves, raised just past the
// worst seed so no seed is ever rejected.

use crate::stats;
use crate::types::Sample;
use tracing::info;

/// Margin over the worst seed score when the quantile lands below it.
const SEED_MARGIN: f64 = 1.02;

#[derive(Debug, Clone)]
pub struct KnnDetail {
    pub scores: Vec<f64>,
    pub has_logo: Vec<bool>,
    pub k: usize,
    pub quantile: f64,
    pub threshold: f64,
    pub seed_count: usize,
}

pub fn classify(samples: &[Sample], logo_seeds: &[usize], k: usize, quantile: f64) -> KnnDetail {
    let k = k.clamp(1, logo_seeds.len().saturating_sub(1).max(1));

    let seed_scores: Vec<f64> = logo_seeds
        .iter()
        .map(|&s| seed_distance_score(samples, s, logo_seeds, k))
        .collect();

    let mut threshold = stats::quantile(&seed_scores, quantile);
    if let Some(max_seed) = seed_scores
        .iter()
        .cloned()
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    {
        if threshold < max_seed {
            threshold = max_seed * SEED_MARGIN;
        }
    }
    info!(
        "KNN(logo): k={}, q={:.2}, threshold={:.4}, seeds={}",
        k,
        quantile,
        threshold,
        logo_seeds.len()
    );

    let scores: Vec<f64> = (0..samples.len())
        .map(|i| seed_distance_score(samples, i, logo_seeds, k))
        .collect();
    let has_logo = scores.iter().map(|s| *s <= threshold).collect();

    KnnDetail {
        scores,
        has_logo,
        k,
        quantile,
        threshold,
        seed_count: logo_seeds.len(),
    }
}

/// Mean of the k smallest Bhattacharyya distances from sample `i` to the
/// seeds (excluding itself when it is a seed).
pub fn seed_distance_score(samples: &[Sample], i: usize, seeds: &[usize], k: usize) -> f64 {
    let dists: Vec<f64> = seeds
        .iter()
        .filter(|&&s| s != i && s < samples.len())
        .map(|&s| stats::bhattacharyya(&samples[i].hist, &samples[s].hist))
        .collect();
    stats::mean_of_k_smallest(&dists, k)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(index: usize, peak: usize, weight: f32) -> Sample {
        let mut hist = vec![0.0f32; 512];
        hist[peak] = weight;
        hist[peak + 1] = 1.0 - weight;
        Sample {
            index,
            t_sec: index as f64 * 5.0,
            hist,
            roi_png: None,
        }
    }

    fn population() -> (Vec<Sample>, Vec<usize>) {
        // seeds cluster around bin 0, outliers sit on a disjoint bin
        let mut samples = Vec::new();
        for i in 0..8 {
            samples.push(sample(i, 0, 0.9 + (i % 3) as f32 * 0.02));
        }
        for i in 8..12 {
            samples.push(sample(i, 100, 0.95));
        }
        let seeds: Vec<usize> = (0..8).collect();
        (samples, seeds)
    }

    #[test]
    fn test_seeds_never_rejected() {
        let (samples, seeds) = population();
        let detail = classify(&samples, &seeds, 3, 0.95);
        for &s in &seeds {
            assert!(detail.has_logo[s], "seed {} was rejected", s);
        }
    }

    #[test]
    fn test_outliers_rejected() {
        let (samples, seeds) = population();
        let detail = classify(&samples, &seeds, 3, 0.95);
        for i in 8..12 {
            assert!(!detail.has_logo[i], "outlier {} accepted", i);
        }
    }

    #[test]
    fn test_threshold_at_least_margin_over_worst_seed() {
        let (samples, seeds) = population();
        let detail = classify(&samples, &seeds, 3, 0.5);
        let worst_seed = seeds
            .iter()
            .map(|&s| detail.scores[s])
            .fold(f64::MIN, f64::max);
        assert!(detail.threshold >= worst_seed);
    }

    #[test]
    fn test_score_excludes_self() {
        let (samples, seeds) = population();
        // a seed's score against identical siblings is ~0, not polluted by itself
        let s = seed_distance_score(&samples, 0, &seeds, 2);
        assert!(s < 0.5);
    }
}
