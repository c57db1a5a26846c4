// src/detection/dbscan.rs
//
// Density-based clustering over the 2-D PCA projection. The logo cluster is
// the DBSCAN cluster holding the most trainer seeds (ties to the lower
// label); with no seed overlap, the largest cluster. Noise and every other
// cluster become no-logo.

use crate::stats;
use tracing::{info, warn};

pub const NOISE: i32 = -1;
const UNASSIGNED: i32 = -99;

/// Auto-eps fallback when the median-kNN heuristic degenerates.
const EPS_FALLBACK: f64 = 0.5;
/// Scale on the median (minPts-1)-NN distance.
const EPS_MEDIAN_SCALE: f64 = 1.6;

#[derive(Debug, Clone)]
pub struct DbscanDetail {
    pub labels: Vec<i32>,
    pub has_logo: Vec<bool>,
    pub eps: f64,
    pub min_pts: usize,
    /// NOISE when no dense cluster exists (then everything counts as logo)
    pub logo_cluster_label: i32,
}

pub fn classify(
    points: &[[f32; 2]],
    logo_seeds: &[usize],
    eps: f64,
    min_pts: usize,
) -> DbscanDetail {
    let n = points.len();
    let min_pts = min_pts.clamp(2, n.max(2));
    let eps = if eps > 0.0 {
        eps
    } else {
        let auto = auto_eps(points, min_pts);
        if auto > 0.0 {
            auto
        } else {
            EPS_FALLBACK
        }
    };
    info!("DBSCAN: eps={:.4}, minPts={}", eps, min_pts);

    let labels = run(points, eps, min_pts);
    let logo_cluster_label = pick_logo_cluster(&labels, logo_seeds);

    let has_logo: Vec<bool> = if logo_cluster_label == NOISE {
        warn!("DBSCAN: no dense cluster; assuming logo present everywhere");
        vec![true; n]
    } else {
        labels.iter().map(|l| *l == logo_cluster_label).collect()
    };

    DbscanDetail {
        labels,
        has_logo,
        eps,
        min_pts,
        logo_cluster_label,
    }
}

/// 1.6 x the median of each point's (minPts-1)-nearest-neighbor distance.
pub fn auto_eps(points: &[[f32; 2]], min_pts: usize) -> f64 {
    let n = points.len();
    if n <= 2 {
        return 0.0;
    }
    let k = min_pts.clamp(2, n - 1);

    let mut kth_dists = Vec::with_capacity(n);
    let mut d = Vec::with_capacity(n - 1);
    for i in 0..n {
        d.clear();
        for j in 0..n {
            if i != j {
                d.push(stats::euclidean_2d(points[i], points[j]));
            }
        }
        if d.len() < k - 1 {
            continue;
        }
        let mut v = d.clone();
        let (_, nth, _) = v.select_nth_unstable_by(k - 2, |a, b| {
            a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
        });
        kth_dists.push(*nth);
    }

    if kth_dists.is_empty() {
        return 0.0;
    }
    let mid = kth_dists.len() / 2;
    let (_, median, _) = kth_dists.select_nth_unstable_by(mid, |a, b| {
        a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
    });
    *median * EPS_MEDIAN_SCALE
}

/// Classic DBSCAN; labels are NOISE or 0..C.
pub fn run(points: &[[f32; 2]], eps: f64, min_pts: usize) -> Vec<i32> {
    let n = points.len();
    let mut labels = vec![UNASSIGNED; n];
    let mut visited = vec![false; n];
    let eps_sq = eps * eps;

    let region_query = |idx: usize, out: &mut Vec<usize>| {
        out.clear();
        let p = points[idx];
        for (j, q) in points.iter().enumerate() {
            let dx = (p[0] - q[0]) as f64;
            let dy = (p[1] - q[1]) as f64;
            if dx * dx + dy * dy <= eps_sq {
                out.push(j);
            }
        }
    };

    let mut cluster_id = 0i32;
    let mut neighbors = Vec::new();
    let mut expansion = Vec::new();
    let mut in_seed = vec![false; n];
    let mut seed = Vec::new();

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        region_query(i, &mut neighbors);
        if neighbors.len() < min_pts {
            labels[i] = NOISE;
            continue;
        }

        in_seed.iter_mut().for_each(|b| *b = false);
        seed.clear();
        for &idx in &neighbors {
            if !in_seed[idx] {
                in_seed[idx] = true;
                seed.push(idx);
            }
        }

        labels[i] = cluster_id;
        let mut si = 0;
        while si < seed.len() {
            let p = seed[si];
            si += 1;
            if !visited[p] {
                visited[p] = true;
                region_query(p, &mut expansion);
                if expansion.len() >= min_pts {
                    for &q in &expansion {
                        if !in_seed[q] {
                            in_seed[q] = true;
                            seed.push(q);
                        }
                    }
                }
            }
            if labels[p] == UNASSIGNED || labels[p] == NOISE {
                labels[p] = cluster_id;
            }
        }

        cluster_id += 1;
    }

    for l in &mut labels {
        if *l == UNASSIGNED {
            *l = NOISE;
        }
    }
    labels
}

/// Cluster containing the most seeds, ties to the lower label id; with no
/// seed overlap, the largest cluster; NOISE when no cluster exists at all.
pub fn pick_logo_cluster(labels: &[i32], logo_seeds: &[usize]) -> i32 {
    let cluster_count = labels.iter().copied().max().map_or(0, |m| (m + 1).max(0)) as usize;
    if cluster_count == 0 {
        return NOISE;
    }

    let mut sizes = vec![0usize; cluster_count];
    for &l in labels {
        if l >= 0 {
            sizes[l as usize] += 1;
        }
    }

    let mut seed_overlap = vec![0usize; cluster_count];
    for &s in logo_seeds {
        if let Some(&l) = labels.get(s) {
            if l >= 0 {
                seed_overlap[l as usize] += 1;
            }
        }
    }

    // Strict > keeps the lower label on ties.
    let mut best_by_seeds = NOISE;
    let mut best_overlap = 0usize;
    for (label, &overlap) in seed_overlap.iter().enumerate() {
        if overlap > best_overlap {
            best_by_seeds = label as i32;
            best_overlap = overlap;
        }
    }
    if best_by_seeds != NOISE {
        info!(
            "DBSCAN: logo cluster {} by seed overlap {}/{} (size {})",
            best_by_seeds,
            best_overlap,
            logo_seeds.len(),
            sizes[best_by_seeds as usize]
        );
        return best_by_seeds;
    }

    let mut best = NOISE;
    let mut best_size = 0usize;
    for (label, &size) in sizes.iter().enumerate() {
        if size > best_size {
            best = label as i32;
            best_size = size;
        }
    }
    if best != NOISE {
        info!(
            "DBSCAN: no seed overlap; using largest cluster {} (size {})",
            best, best_size
        );
    }
    best
}
