// src/trainer.rs
//
// Unsupervised appearance-model training. No labels exist, so the logo is
// assumed to be the modal appearance of the corner: PCA + k-means discover
// that mode, the intra-cluster tail is trimmed to reject no-logo frames that
// k-means absorbed, and the base threshold either stays conservative (no
// counter-cluster) or bisects the two modes.

use crate::features::HIST_LEN;
use crate::stats;
use crate::types::{AppearanceModel, Corner, Sample};
use anyhow::{Context, Result};
use opencv::{
    core::{self, Mat, TermCriteria},
    prelude::*,
};
use tracing::debug;

/// Fraction of the logo cluster kept as seeds (by distance to the mean).
const SEED_KEEP_QUANTILE: f64 = 0.85;
/// Seed refinement never shrinks the seed set below min(this, cluster size).
const SEED_FLOOR: usize = 5;
/// Threshold = mean + this many seed standard deviations, absent a counter-mode.
const THRESHOLD_SIGMA: f64 = 5.0;
const THRESHOLD_MIN: f64 = 0.05;
const THRESHOLD_MAX: f64 = 0.95;

const KMEANS_ATTEMPTS: i32 = 5;
const KMEANS_MAX_ITERS: i32 = 40;
const KMEANS_EPSILON: f64 = 1e-4;

#[derive(Debug)]
pub struct TrainingOutput {
    pub model: AppearanceModel,
    /// 2-D PCA projection of every sample histogram, for the clustering
    /// classifiers and the debug scatter plots
    pub pca2d: Vec<[f32; 2]>,
    pub kmeans_labels: Vec<i32>,
    pub logo_cluster_label: i32,
}

/// Train the appearance model from the sampled histograms.
pub fn train(samples: &[Sample], k: usize, corner: Corner) -> Result<TrainingOutput> {
    anyhow::ensure!(k >= 2, "k must be >= 2");
    anyhow::ensure!(!samples.is_empty(), "no samples to train on");

    let data = histogram_matrix(samples)?;
    let pca2d = project_pca2d(&data)?;
    let labels = kmeans_labels(&pca2d, k as i32)?;

    let logo_cluster = densest_cluster(&labels, k);
    let logo_idx: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|(_, l)| **l == logo_cluster)
        .map(|(i, _)| i)
        .collect();
    debug!(
        "k-means: logo cluster {} with {}/{} members",
        logo_cluster,
        logo_idx.len(),
        samples.len()
    );

    let mut mean_hist = mean_histogram(samples, &logo_idx);
    let dists: Vec<f64> = logo_idx
        .iter()
        .map(|&i| stats::bhattacharyya(&samples[i].hist, &mean_hist))
        .collect();

    let seeds = refine_seeds(&logo_idx, &dists);
    if seeds.len() < logo_idx.len() {
        mean_hist = mean_histogram(samples, &seeds);
    }

    let seed_dists: Vec<f64> = seeds
        .iter()
        .map(|&i| stats::bhattacharyya(&samples[i].hist, &mean_hist))
        .collect();
    let non_seed_dists: Vec<f64> = (0..samples.len())
        .filter(|i| !seeds.contains(i))
        .map(|i| stats::bhattacharyya(&samples[i].hist, &mean_hist))
        .collect();

    let threshold = base_threshold(&seed_dists, &non_seed_dists);

    Ok(TrainingOutput {
        model: AppearanceModel {
            corner,
            mean_hist,
            threshold,
            logo_seeds: seeds,
        },
        pca2d,
        kmeans_labels: labels,
        logo_cluster_label: logo_cluster,
    })
}

// ============================================================================
// OPENCV STAGES
// ============================================================================

fn histogram_matrix(samples: &[Sample]) -> Result<Mat> {
    let rows: Vec<&[f32]> = samples.iter().map(|s| s.hist.as_slice()).collect();
    for row in &rows {
        anyhow::ensure!(row.len() == HIST_LEN, "histogram has unexpected length");
    }
    Mat::from_slice_2d(&rows).context("could not build histogram matrix")
}

fn project_pca2d(data: &Mat) -> Result<Vec<[f32; 2]>> {
    let pca = core::PCA::new(data, &Mat::default(), core::PCA_DATA_AS_ROW, 2)
        .context("PCA failed")?;
    let projected = pca.project(data).context("PCA projection failed")?;

    let mut points = Vec::with_capacity(projected.rows() as usize);
    for r in 0..projected.rows() {
        points.push([
            *projected.at_2d::<f32>(r, 0)?,
            *projected.at_2d::<f32>(r, 1)?,
        ]);
    }
    Ok(points)
}

fn kmeans_labels(points: &[[f32; 2]], k: i32) -> Result<Vec<i32>> {
    let rows: Vec<&[f32]> = points.iter().map(|p| p.as_slice()).collect();
    let data = Mat::from_slice_2d(&rows)?;

    let criteria = TermCriteria::new(
        core::TermCriteria_EPS + core::TermCriteria_COUNT,
        KMEANS_MAX_ITERS,
        KMEANS_EPSILON,
    )?;
    let mut labels = Mat::default();
    let mut centers = Mat::default();
    core::kmeans(
        &data,
        k,
        &mut labels,
        criteria,
        KMEANS_ATTEMPTS,
        core::KMEANS_PP_CENTERS,
        &mut centers,
    )
    .context("k-means failed")?;

    let mut out = Vec::with_capacity(points.len());
    for r in 0..labels.rows() {
        out.push(*labels.at_2d::<i32>(r, 0)?);
    }
    Ok(out)
}

// ============================================================================
// MODEL ARITHMETIC (pure)
// ============================================================================

/// Cluster with the most members; ties resolve to the lower label.
fn densest_cluster(labels: &[i32], k: usize) -> i32 {
    let mut counts = vec![0usize; k];
    for &l in labels {
        if (l as usize) < k {
            counts[l as usize] += 1;
        }
    }
    let mut best = 0usize;
    for (label, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = label;
        }
    }
    best as i32
}

fn mean_histogram(samples: &[Sample], indices: &[usize]) -> Vec<f32> {
    let mut acc = vec![0.0f32; HIST_LEN];
    for &i in indices {
        for (a, v) in acc.iter_mut().zip(&samples[i].hist) {
            *a += v;
        }
    }
    let n = indices.len().max(1) as f32;
    for a in &mut acc {
        *a /= n;
    }
    acc
}

/// Keep cluster members within the 85th-percentile distance to the mean.
/// Reverts to the whole cluster rather than collapsing below the floor.
fn refine_seeds(cluster_idx: &[usize], dists: &[f64]) -> Vec<usize> {
    debug_assert_eq!(cluster_idx.len(), dists.len());
    let cut = stats::quantile(dists, SEED_KEEP_QUANTILE);
    let kept: Vec<usize> = cluster_idx
        .iter()
        .zip(dists)
        .filter(|(_, d)| **d <= cut)
        .map(|(i, _)| *i)
        .collect();
    if kept.len() < SEED_FLOOR.min(cluster_idx.len()) {
        cluster_idx.to_vec()
    } else {
        kept
    }
}

/// Base distance threshold from the seed and non-seed distance populations.
fn base_threshold(seed_dists: &[f64], non_seed_dists: &[f64]) -> f64 {
    let m_logo = stats::mean(seed_dists);
    let mut threshold = m_logo + THRESHOLD_SIGMA * stats::stddev(seed_dists);
    if !non_seed_dists.is_empty() {
        let m_non = stats::mean(non_seed_dists);
        if m_non > m_logo {
            threshold = (m_logo + m_non) / 2.0;
        }
    }
    threshold.clamp(THRESHOLD_MIN, THRESHOLD_MAX)
}
