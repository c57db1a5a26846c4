// src/detection/mod.rs
//
// The classifier bank: one strategy is active per run, producing either a
// binary logo/no-logo vector or a continuous distance track with asymmetric
// enter/exit thresholds. The segmenter consumes both through the same
// predicate pair.

pub mod dbscan;
pub mod distance;
pub mod knn;
pub mod lof;
pub mod tokayo;

use crate::trainer::TrainingOutput;
use crate::types::Sample;
use anyhow::Result;
use tracing::info;

// ============================================================================
// Strategy selection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlierMode {
    Dbscan,
    Lof,
    Knn,
}

impl OutlierMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutlierMode::Dbscan => "dbscan",
            OutlierMode::Lof => "lof",
            OutlierMode::Knn => "knn",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Distance to the mean histogram with hysteresis (default)
    Bhattacharyya,
    /// Outlier detection over the PCA projection / histogram space
    Outlier(OutlierMode),
    /// Pixel-median template + normalized cross-correlation
    Tokayo,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Bhattacharyya => "bhattacharyya",
            Strategy::Outlier(_) => "outlier",
            Strategy::Tokayo => "tokayo",
        }
    }
}

// ============================================================================
// Classification result
// ============================================================================

/// Per-sample labels in the form the segmenter consumes. The continuous form
/// keeps the asymmetry `!strong_logo != strong_no_logo` that gives the
/// default mode its hysteresis.
#[derive(Debug, Clone)]
pub enum Classification {
    Binary(Vec<bool>),
    Continuous {
        scores: Vec<f64>,
        enter_threshold: f64,
        exit_threshold: f64,
    },
}

impl Classification {
    pub fn len(&self) -> usize {
        match self {
            Classification::Binary(v) => v.len(),
            Classification::Continuous { scores, .. } => scores.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Confident no-logo: enters (or keeps accumulating toward) an ad.
    pub fn strong_no_logo(&self, i: usize) -> bool {
        match self {
            Classification::Binary(v) => !v[i],
            Classification::Continuous {
                scores,
                enter_threshold,
                ..
            } => scores[i] >= *enter_threshold,
        }
    }

    /// Confident logo: accumulates toward leaving an ad.
    pub fn strong_logo(&self, i: usize) -> bool {
        match self {
            Classification::Binary(v) => v[i],
            Classification::Continuous {
                scores,
                exit_threshold,
                ..
            } => scores[i] <= *exit_threshold,
        }
    }

    pub fn logo_count(&self) -> usize {
        (0..self.len()).filter(|&i| self.strong_logo(i)).count()
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Parameters for the individual strategies, validated at the CLI boundary.
#[derive(Debug, Clone)]
pub struct ClassifierParams {
    /// ROI width fraction, needed by the template model for later re-probing
    pub roi_width_pct: f64,
    pub smooth_window: usize,
    pub enter_mult: f64,
    pub exit_mult: f64,
    pub dbscan_eps: f64,
    pub dbscan_min_pts: usize,
    pub lof_k: usize,
    pub lof_threshold: f64,
    pub knn_k: usize,
    pub knn_quantile: f64,
    pub tokayo_threshold: f64,
}

/// Mode-specific evidence kept for the report and the debug CSV exports.
#[derive(Debug)]
pub enum DetectionDetail {
    Distance(distance::DistanceDetail),
    Dbscan(dbscan::DbscanDetail),
    Lof(lof::LofDetail),
    Knn(knn::KnnDetail),
    Tokayo(Box<tokayo::TokayoDetail>),
}

#[derive(Debug)]
pub struct DetectionOutcome {
    pub classification: Classification,
    pub detail: DetectionDetail,
}

/// Run the selected strategy over the training samples.
pub fn classify(
    strategy: Strategy,
    params: &ClassifierParams,
    samples: &[Sample],
    training: &TrainingOutput,
) -> Result<DetectionOutcome> {
    match strategy {
        Strategy::Bhattacharyya => {
            let detail = distance::classify(samples, &training.model, params);
            Ok(DetectionOutcome {
                classification: Classification::Continuous {
                    scores: detail.smoothed.clone(),
                    enter_threshold: detail.enter_threshold,
                    exit_threshold: detail.exit_threshold,
                },
                detail: DetectionDetail::Distance(detail),
            })
        }
        Strategy::Outlier(OutlierMode::Lof) => {
            let detail = lof::classify(&training.pca2d, params.lof_k, params.lof_threshold);
            Ok(DetectionOutcome {
                classification: Classification::Binary(detail.has_logo.clone()),
                detail: DetectionDetail::Lof(detail),
            })
        }
        Strategy::Outlier(OutlierMode::Knn) => {
            if training.model.logo_seeds.len() < 3 {
                info!("KNN: not enough logo seeds; falling back to DBSCAN");
                return classify(
                    Strategy::Outlier(OutlierMode::Dbscan),
                    params,
                    samples,
                    training,
                );
            }
            let detail = knn::classify(
                samples,
                &training.model.logo_seeds,
                params.knn_k,
                params.knn_quantile,
            );
            Ok(DetectionOutcome {
                classification: Classification::Binary(detail.has_logo.clone()),
                detail: DetectionDetail::Knn(detail),
            })
        }
        Strategy::Outlier(OutlierMode::Dbscan) => {
            let detail = dbscan::classify(
                &training.pca2d,
                &training.model.logo_seeds,
                params.dbscan_eps,
                params.dbscan_min_pts,
            );
            Ok(DetectionOutcome {
                classification: Classification::Binary(detail.has_logo.clone()),
                detail: DetectionDetail::Dbscan(detail),
            })
        }
        Strategy::Tokayo => {
            let detail = tokayo::classify(
                samples,
                training.model.corner,
                params.roi_width_pct,
                params.tokayo_threshold,
            )?;
            Ok(DetectionOutcome {
                classification: Classification::Binary(detail.has_logo.clone()),
                detail: DetectionDetail::Tokayo(Box::new(detail)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_predicates_are_complements() {
        let c = Classification::Binary(vec![true, false, true]);
        assert!(!c.strong_no_logo(0));
        assert!(c.strong_logo(0));
        assert!(c.strong_no_logo(1));
        assert!(!c.strong_logo(1));
        assert_eq!(c.logo_count(), 2);
    }

    #[test]
    fn test_continuous_predicates_have_dead_zone() {
        let c = Classification::Continuous {
            scores: vec![0.1, 0.35, 0.8],
            enter_threshold: 0.5,
            exit_threshold: 0.3,
        };
        // below exit: strong logo
        assert!(c.strong_logo(0) && !c.strong_no_logo(0));
        // between exit and enter: neither predicate fires
        assert!(!c.strong_logo(1) && !c.strong_no_logo(1));
        // above enter: strong no-logo
        assert!(!c.strong_logo(2) && c.strong_no_logo(2));
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(Strategy::Bhattacharyya.name(), "bhattacharyya");
        assert_eq!(Strategy::Outlier(OutlierMode::Knn).name(), "outlier");
        assert_eq!(OutlierMode::Lof.as_str(), "lof");
        assert_eq!(Strategy::Tokayo.name(), "tokayo");
    }
}
