// src/report.rs
//
// Stable JSON schema of the final report. Wall-clock fields serialize as
// null when no segment anchor covers the boundary; mode-specific blocks
// appear only for the strategy that actually ran.

use crate::cli::DetectorConfig;
use crate::detection::{DetectionDetail, DetectionOutcome};
use crate::timecode;
use crate::trainer::TrainingOutput;
use crate::types::{AdInterval, SubRect};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub m3u8: String,
    pub total_duration_sec: f64,
    pub process: ProcessBlock,
    pub training: TrainingBlock,
    pub ads: Vec<AdBlock>,
    pub debug: DebugBlock,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessBlock {
    pub elapsed_ms: u64,
    pub elapsed_sec: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingBlock {
    pub sample_every_sec: f64,
    pub sample_count: usize,
    pub roi_width_pct: f64,
    pub k: usize,
    pub logo_corner: String,
    pub logo_threshold_bhattacharyya: f64,
    pub detection: DetectionBlock,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionBlock {
    pub strategy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outlier_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smooth_window: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enter_mult: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_mult: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enter_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dbscan: Option<DbscanBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lof: Option<LofBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knn: Option<KnnBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokayo: Option<TokayoBlock>,
    pub enter_consecutive: usize,
    pub exit_consecutive: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbscanBlock {
    pub eps: f64,
    pub min_pts: usize,
    pub logo_cluster_label: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LofBlock {
    pub k: usize,
    pub threshold: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnnBlock {
    pub k: usize,
    pub quantile: f64,
    pub threshold: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokayoBlock {
    pub method: String,
    pub ncc_threshold: f64,
    pub logo_sub_rect: SubRect,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdBlock {
    pub start_offset_sec: f64,
    pub start_offset_hms: String,
    pub end_offset_sec: f64,
    pub end_offset_hms: String,
    pub start_program_date_time: Option<String>,
    pub end_program_date_time: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugBlock {
    pub enabled: bool,
    pub logos_output_dir: Option<String>,
    pub logo_sample_count: usize,
}

#[allow(clippy::too_many_arguments)]
pub fn build_report(
    config: &DetectorConfig,
    total_duration_sec: f64,
    elapsed: Duration,
    sample_count: usize,
    training: &TrainingOutput,
    outcome: &DetectionOutcome,
    ads: &[AdInterval],
    logos_output_dir: Option<String>,
) -> Report {
    Report {
        m3u8: config.source.clone(),
        total_duration_sec,
        process: ProcessBlock {
            elapsed_ms: elapsed.as_millis() as u64,
            elapsed_sec: elapsed.as_secs_f64(),
        },
        training: TrainingBlock {
            sample_every_sec: config.every_sec,
            sample_count,
            roi_width_pct: config.roi_width_pct,
            k: config.k,
            logo_corner: training.model.corner.as_str().to_string(),
            logo_threshold_bhattacharyya: training.model.threshold,
            detection: detection_block(config, outcome),
        },
        ads: ads.iter().map(ad_block).collect(),
        debug: DebugBlock {
            enabled: config.debug,
            logos_output_dir,
            logo_sample_count: training.model.logo_seeds.len(),
        },
    }
}

fn ad_block(interval: &AdInterval) -> AdBlock {
    AdBlock {
        start_offset_sec: interval.start_sec,
        start_offset_hms: timecode::format_hms(interval.start_sec),
        end_offset_sec: interval.end_sec,
        end_offset_hms: timecode::format_hms(interval.end_sec),
        start_program_date_time: interval.start_pdt.clone(),
        end_program_date_time: interval.end_pdt.clone(),
    }
}

fn detection_block(config: &DetectorConfig, outcome: &DetectionOutcome) -> DetectionBlock {
    use crate::detection::Strategy;

    let mut block = DetectionBlock {
        strategy: config.strategy.name().to_string(),
        outlier_mode: match config.strategy {
            Strategy::Outlier(mode) => Some(mode.as_str().to_string()),
            _ => None,
        },
        smooth_window: None,
        enter_mult: None,
        exit_mult: None,
        enter_threshold: None,
        exit_threshold: None,
        dbscan: None,
        lof: None,
        knn: None,
        tokayo: None,
        enter_consecutive: config.segmenter.enter_consecutive,
        exit_consecutive: config.segmenter.exit_consecutive,
    };

    match &outcome.detail {
        DetectionDetail::Distance(d) => {
            block.smooth_window = Some(d.smooth_window);
            block.enter_mult = Some(d.enter_mult);
            block.exit_mult = Some(d.exit_mult);
            block.enter_threshold = Some(d.enter_threshold);
            block.exit_threshold = Some(d.exit_threshold);
        }
        DetectionDetail::Dbscan(d) => {
            block.dbscan = Some(DbscanBlock {
                eps: d.eps,
                min_pts: d.min_pts,
                logo_cluster_label: d.logo_cluster_label,
            });
        }
        DetectionDetail::Lof(d) => {
            block.lof = Some(LofBlock {
                k: d.k,
                threshold: d.threshold,
            });
        }
        DetectionDetail::Knn(d) => {
            block.knn = Some(KnnBlock {
                k: d.k,
                quantile: d.quantile,
                threshold: d.threshold,
            });
        }
        DetectionDetail::Tokayo(d) => {
            block.tokayo = Some(TokayoBlock {
                method: "pixel-median + NCC".to_string(),
                ncc_threshold: d.model.ncc_threshold,
                logo_sub_rect: d.model.sub_rect,
            });
        }
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> Report {
        Report {
            m3u8: "https://example.com/stream.m3u8".into(),
            total_duration_sec: 3600.0,
            process: ProcessBlock {
                elapsed_ms: 1500,
                elapsed_sec: 1.5,
            },
            training: TrainingBlock {
                sample_every_sec: 5.0,
                sample_count: 720,
                roi_width_pct: 0.15,
                k: 2,
                logo_corner: "top_right".into(),
                logo_threshold_bhattacharyya: 0.31,
                detection: DetectionBlock {
                    strategy: "bhattacharyya".into(),
                    outlier_mode: None,
                    smooth_window: Some(3),
                    enter_mult: Some(1.25),
                    exit_mult: Some(1.0),
                    enter_threshold: Some(0.3875),
                    exit_threshold: Some(0.31),
                    dbscan: None,
                    lof: None,
                    knn: None,
                    tokayo: None,
                    enter_consecutive: 2,
                    exit_consecutive: 2,
                },
            },
            ads: vec![AdBlock {
                start_offset_sec: 100.0,
                start_offset_hms: "00:01:40".into(),
                end_offset_sec: 150.0,
                end_offset_hms: "00:02:30".into(),
                start_program_date_time: Some("2024-05-01T10:01:40.000+0000".into()),
                end_program_date_time: None,
            }],
            debug: DebugBlock {
                enabled: false,
                logos_output_dir: None,
                logo_sample_count: 612,
            },
        }
    }

    #[test]
    fn test_schema_keys_are_camel_case() {
        let json = serde_json::to_string_pretty(&sample_report()).unwrap();
        for key in [
            "\"m3u8\"",
            "\"totalDurationSec\"",
            "\"elapsedMs\"",
            "\"sampleEverySec\"",
            "\"roiWidthPct\"",
            "\"logoCorner\"",
            "\"logoThresholdBhattacharyya\"",
            "\"enterConsecutive\"",
            "\"startOffsetSec\"",
            "\"startOffsetHms\"",
            "\"startProgramDateTime\"",
            "\"logoSampleCount\"",
        ] {
            assert!(json.contains(key), "missing {} in {}", key, json);
        }
    }

    #[test]
    fn test_absent_wall_clock_serializes_as_null() {
        let json = serde_json::to_string(&sample_report()).unwrap();
        assert!(json.contains("\"endProgramDateTime\":null"));
        assert!(json.contains("\"logosOutputDir\":null"));
    }

    #[test]
    fn test_inactive_mode_blocks_are_omitted() {
        let json = serde_json::to_string(&sample_report()).unwrap();
        assert!(!json.contains("\"dbscan\""));
        assert!(!json.contains("\"lof\""));
        assert!(!json.contains("\"knn\""));
        assert!(!json.contains("\"tokayo\""));
        assert!(json.contains("\"smoothWindow\":3"));
    }
}
