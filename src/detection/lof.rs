// src/detection/lof.rs
//
// Local Outlier Factor over the 2-D PCA projection. Scores near 1 mean the
// point sits in a density comparable to its neighbors; scores at or above
// the threshold mark outliers, which read as no-logo samples.

use crate::stats;
use tracing::info;

#[derive(Debug, Clone)]
pub struct LofDetail {
    pub scores: Vec<f64>,
    pub has_logo: Vec<bool>,
    pub k: usize,
    pub threshold: f64,
}

pub fn classify(points: &[[f32; 2]], k: usize, threshold: f64) -> LofDetail {
    let n = points.len();
    let k = k.clamp(2, n.saturating_sub(1).max(2));
    info!("LOF: k={}, threshold={:.2}", k, threshold);

    let scores = lof_scores(points, k);
    let has_logo = scores.iter().map(|s| *s < threshold).collect();
    LofDetail {
        scores,
        has_logo,
        k,
        threshold,
    }
}

/// Standard LOF: k-distance, reachability, local reachability density, then
/// the ratio of neighbor densities to own density.
pub fn lof_scores(points: &[[f32; 2]], k: usize) -> Vec<f64> {
    let n = points.len();
    let mut scores = vec![1.0f64; n];
    if n <= 2 {
        return scores;
    }
    let k = k.clamp(2, n - 1);

    // k nearest neighbors and k-distance per point
    let mut knn: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut kdist = vec![0.0f64; n];
    let mut tmp: Vec<(f64, usize)> = Vec::with_capacity(n - 1);
    for i in 0..n {
        tmp.clear();
        for j in 0..n {
            if i != j {
                tmp.push((stats::euclidean_2d(points[i], points[j]), j));
            }
        }
        tmp.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        kdist[i] = tmp[k - 1].0;
        knn[i] = tmp[..k].iter().map(|(_, j)| *j).collect();
    }

    // local reachability density
    let mut lrd = vec![0.0f64; n];
    for i in 0..n {
        let mut sum_reach = 0.0;
        for &j in &knn[i] {
            let dij = stats::euclidean_2d(points[i], points[j]);
            sum_reach += kdist[j].max(dij);
        }
        lrd[i] = if sum_reach <= 1e-12 {
            1e12
        } else {
            knn[i].len() as f64 / sum_reach
        };
    }

    for i in 0..n {
        if knn[i].is_empty() || lrd[i] <= 1e-12 {
            continue;
        }
        let sum_ratio: f64 = knn[i].iter().map(|&j| lrd[j] / lrd[i]).sum();
        scores[i] = sum_ratio / knn[i].len() as f64;
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_cluster_scores_near_one() {
        // a regular grid: every point has the density of its neighbors
        let mut pts = Vec::new();
        for x in 0..5 {
            for y in 0..5 {
                pts.push([x as f32, y as f32]);
            }
        }
        let scores = lof_scores(&pts, 4);
        for s in scores {
            assert!((s - 1.0).abs() < 0.35, "score {}", s);
        }
    }

    #[test]
    fn test_outlier_scores_high() {
        let mut pts: Vec<[f32; 2]> = Vec::new();
        for x in 0..4 {
            for y in 0..4 {
                pts.push([x as f32 * 0.1, y as f32 * 0.1]);
            }
        }
        pts.push([10.0, 10.0]);
        let scores = lof_scores(&pts, 4);
        let outlier = *scores.last().unwrap();
        assert!(outlier >= 1.6, "outlier score {}", outlier);
        assert!(scores[..16].iter().all(|s| *s < outlier));
    }

    #[test]
    fn test_classify_thresholding() {
        let mut pts: Vec<[f32; 2]> = Vec::new();
        for x in 0..4 {
            for y in 0..4 {
                pts.push([x as f32 * 0.1, y as f32 * 0.1]);
            }
        }
        pts.push([10.0, 10.0]);
        let detail = classify(&pts, 4, 1.6);
        assert!(detail.has_logo[..16].iter().all(|&b| b));
        assert!(!detail.has_logo[16]);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(lof_scores(&[], 5), Vec::<f64>::new());
        assert_eq!(lof_scores(&[[0.0, 0.0], [1.0, 1.0]], 5), vec![1.0, 1.0]);
    }
}
