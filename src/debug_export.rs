// src/debug_export.rs
//
// Debug artifact export: sampled ROI PNGs, per-mode score CSVs, PCA scatter
// plots and the tokayo imagery. PNG payloads go through a `.tmp` + rename so
// a crash mid-run never leaves a truncated file where a previous run wrote a
// valid one.

use crate::detection::{dbscan::NOISE, DetectionDetail, DetectionOutcome};
use crate::refiner::RefineRecord;
use crate::trainer::TrainingOutput;
use crate::types::Sample;
use anyhow::{Context, Result};
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const SCATTER_WIDTH: i32 = 900;
const SCATTER_HEIGHT: i32 = 650;
const SCATTER_PAD: i32 = 60;

/// Artifacts land next to the executable, falling back to the working dir.
pub fn debug_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("logos_output")
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("png.tmp");
    fs::write(&tmp, bytes)
        .with_context(|| format!("could not write {}", tmp.display()))?;
    if fs::rename(&tmp, path).is_err() {
        // a stale file may block the rename on some platforms
        let _ = fs::remove_file(path);
        fs::rename(&tmp, path)
            .with_context(|| format!("could not move {} into place", path.display()))?;
    }
    Ok(())
}

fn write_png_mat(path: &Path, image: &Mat) -> Result<()> {
    let bytes = crate::features::encode_roi_png(image)?;
    write_atomic(path, &bytes)
}

// ============================================================================
// ROI EXPORTS
// ============================================================================

/// All sampled ROIs into `samples/`, the logo seeds into `logos/`.
pub fn export_training_rois(dir: &Path, samples: &[Sample], training: &TrainingOutput) -> Result<()> {
    let samples_dir = dir.join("samples");
    let logos_dir = dir.join("logos");
    fs::create_dir_all(&samples_dir)?;
    fs::create_dir_all(&logos_dir)?;

    for (i, s) in samples.iter().enumerate() {
        let Some(bytes) = &s.roi_png else { continue };
        let t_ms = (s.t_sec * 1000.0) as i64;
        write_atomic(&samples_dir.join(format!("sample_{:06}_t{}.png", i, t_ms)), bytes)?;
    }
    for &idx in &training.model.logo_seeds {
        let Some(s) = samples.get(idx) else { continue };
        let Some(bytes) = &s.roi_png else { continue };
        let t_ms = (s.t_sec * 1000.0) as i64;
        write_atomic(&logos_dir.join(format!("logo_{:06}_t{}.png", idx, t_ms)), bytes)?;
    }
    info!("debug: exported ROI sets to {}", dir.display());
    Ok(())
}

/// ROIs the template mode rejected, into `no-logos/`.
fn export_no_logo_rois(dir: &Path, samples: &[Sample], has_logo: &[bool]) -> Result<()> {
    let out = dir.join("no-logos");
    fs::create_dir_all(&out)?;
    for (i, s) in samples.iter().enumerate() {
        if *has_logo.get(i).unwrap_or(&true) {
            continue;
        }
        let Some(bytes) = &s.roi_png else { continue };
        let t_ms = (s.t_sec * 1000.0) as i64;
        write_atomic(&out.join(format!("nologo_{:06}_t{}.png", i, t_ms)), bytes)?;
    }
    Ok(())
}

// ============================================================================
// PCA SCATTER
// ============================================================================

/// CSV + PNG scatter of the PCA projection. Green marks the logo cluster;
/// with DBSCAN-style labels, noise is dark and other clusters take a small
/// palette, otherwise non-logo points are red.
pub fn export_pca_scatter(
    dir: &Path,
    training: &TrainingOutput,
    labels: &[i32],
    logo_label: i32,
    dbscan_style: bool,
    times: &[f64],
    base_name: &str,
) -> Result<()> {
    let points = &training.pca2d;
    if points.is_empty() {
        return Ok(());
    }

    let mut csv = String::from("index,timeSec,x,y,cluster,isLogo\n");
    for (i, p) in points.iter().enumerate() {
        let cluster = labels.get(i).copied().unwrap_or(NOISE);
        let _ = writeln!(
            csv,
            "{},{},{},{},{},{}",
            i,
            times.get(i).copied().unwrap_or(0.0),
            p[0],
            p[1],
            cluster,
            (cluster == logo_label) as u8
        );
    }
    fs::write(dir.join(format!("{}.csv", base_name)), csv)?;

    let (mut min_x, mut max_x) = (points[0][0], points[0][0]);
    let (mut min_y, mut max_y) = (points[0][1], points[0][1]);
    for p in points {
        min_x = min_x.min(p[0]);
        max_x = max_x.max(p[0]);
        min_y = min_y.min(p[1]);
        max_y = max_y.max(p[1]);
    }
    if (max_x - min_x).abs() < 1e-6 {
        min_x -= 1.0;
        max_x += 1.0;
    }
    if (max_y - min_y).abs() < 1e-6 {
        min_y -= 1.0;
        max_y += 1.0;
    }

    let mut img = Mat::new_rows_cols_with_default(
        SCATTER_HEIGHT,
        SCATTER_WIDTH,
        core::CV_8UC3,
        core::Scalar::all(255.0),
    )?;

    let map_x = |x: f32| -> i32 {
        let n = (x - min_x) / (max_x - min_x);
        SCATTER_PAD + (n * (SCATTER_WIDTH - 2 * SCATTER_PAD) as f32) as i32
    };
    let map_y = |y: f32| -> i32 {
        let n = (y - min_y) / (max_y - min_y);
        (SCATTER_HEIGHT - SCATTER_PAD) - (n * (SCATTER_HEIGHT - 2 * SCATTER_PAD) as f32) as i32
    };

    let black = core::Scalar::new(0.0, 0.0, 0.0, 0.0);
    imgproc::line(
        &mut img,
        core::Point::new(SCATTER_PAD, SCATTER_HEIGHT - SCATTER_PAD),
        core::Point::new(SCATTER_WIDTH - SCATTER_PAD, SCATTER_HEIGHT - SCATTER_PAD),
        black,
        1,
        imgproc::LINE_8,
        0,
    )?;
    imgproc::line(
        &mut img,
        core::Point::new(SCATTER_PAD, SCATTER_PAD),
        core::Point::new(SCATTER_PAD, SCATTER_HEIGHT - SCATTER_PAD),
        black,
        1,
        imgproc::LINE_8,
        0,
    )?;
    imgproc::put_text(
        &mut img,
        "PCA X",
        core::Point::new(SCATTER_WIDTH / 2 - 30, SCATTER_HEIGHT - 20),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.6,
        black,
        1,
        imgproc::LINE_8,
        false,
    )?;
    imgproc::put_text(
        &mut img,
        "PCA Y",
        core::Point::new(15, SCATTER_HEIGHT / 2),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.6,
        black,
        1,
        imgproc::LINE_8,
        false,
    )?;

    // BGR palette for non-logo DBSCAN clusters
    let palette = [
        core::Scalar::new(220.0, 120.0, 0.0, 0.0),
        core::Scalar::new(180.0, 0.0, 180.0, 0.0),
        core::Scalar::new(0.0, 160.0, 220.0, 0.0),
        core::Scalar::new(220.0, 0.0, 0.0, 0.0),
        core::Scalar::new(0.0, 220.0, 220.0, 0.0),
        core::Scalar::new(120.0, 120.0, 220.0, 0.0),
    ];
    let logo_color = core::Scalar::new(0.0, 180.0, 0.0, 0.0);
    let non_logo_color = core::Scalar::new(0.0, 0.0, 220.0, 0.0);
    let noise_color = core::Scalar::new(40.0, 40.0, 40.0, 0.0);

    for (i, p) in points.iter().enumerate() {
        let cluster = labels.get(i).copied().unwrap_or(NOISE);
        let color = if cluster == logo_label {
            logo_color
        } else if dbscan_style && cluster == NOISE {
            noise_color
        } else if dbscan_style && cluster >= 0 {
            palette[(cluster as usize) % palette.len()]
        } else {
            non_logo_color
        };
        imgproc::circle(
            &mut img,
            core::Point::new(map_x(p[0]), map_y(p[1])),
            4,
            color,
            -1,
            imgproc::LINE_8,
            0,
        )?;
    }

    imgproc::put_text(
        &mut img,
        "logo cluster",
        core::Point::new(SCATTER_WIDTH - SCATTER_PAD - 170, SCATTER_PAD + 10),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        logo_color,
        1,
        imgproc::LINE_8,
        false,
    )?;
    let second_label = if dbscan_style { "dbscan noise (-1)" } else { "non-logo" };
    let second_color = if dbscan_style { noise_color } else { non_logo_color };
    imgproc::put_text(
        &mut img,
        second_label,
        core::Point::new(SCATTER_WIDTH - SCATTER_PAD - 170, SCATTER_PAD + 30),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        second_color,
        1,
        imgproc::LINE_8,
        false,
    )?;

    write_png_mat(&dir.join(format!("{}.png", base_name)), &img)
}

// ============================================================================
// MODE CSVS
// ============================================================================

/// Per-strategy scores and the matching scatter plot.
pub fn export_detection_artifacts(
    dir: &Path,
    samples: &[Sample],
    training: &TrainingOutput,
    outcome: &DetectionOutcome,
    enter_consecutive: usize,
    exit_consecutive: usize,
) -> Result<()> {
    let times: Vec<f64> = samples.iter().map(|s| s.t_sec).collect();
    match &outcome.detail {
        DetectionDetail::Distance(d) => {
            let mut csv = String::from(
                "baseThreshold,enterThreshold,exitThreshold,smoothWindow,enterMult,exitMult,enterN,exitN\n",
            );
            let _ = writeln!(
                csv,
                "{},{},{},{},{},{},{},{}",
                d.base_threshold,
                d.enter_threshold,
                d.exit_threshold,
                d.smooth_window,
                d.enter_mult,
                d.exit_mult,
                enter_consecutive,
                exit_consecutive
            );
            csv.push_str("\nindex,timeSec,distRaw,distSmooth\n");
            for i in 0..samples.len() {
                let _ = writeln!(csv, "{},{},{},{}", i, times[i], d.raw[i], d.smoothed[i]);
            }
            fs::write(dir.join("distance_scores.csv"), csv)?;
        }
        DetectionDetail::Dbscan(d) => {
            let mut csv = String::from("eps,minPts,logoClusterLabel\n");
            let _ = writeln!(csv, "{},{},{}", d.eps, d.min_pts, d.logo_cluster_label);
            csv.push_str("\nindex,timeSec,label,isLogo,isSeed\n");
            for i in 0..samples.len() {
                let _ = writeln!(
                    csv,
                    "{},{},{},{},{}",
                    i,
                    times[i],
                    d.labels[i],
                    d.has_logo[i] as u8,
                    training.model.logo_seeds.contains(&i) as u8
                );
            }
            fs::write(dir.join("dbscan_labels.csv"), csv)?;
            export_pca_scatter(
                dir,
                training,
                &d.labels,
                d.logo_cluster_label,
                true,
                &times,
                "pca_xy_dbscan",
            )?;
        }
        DetectionDetail::Lof(d) => {
            let mut csv = String::from("k,threshold\n");
            let _ = writeln!(csv, "{},{}", d.k, d.threshold);
            csv.push_str("\nindex,timeSec,lof,isOutlier\n");
            for i in 0..samples.len() {
                let _ = writeln!(
                    csv,
                    "{},{},{},{}",
                    i,
                    times[i],
                    d.scores[i],
                    !d.has_logo[i] as u8
                );
            }
            fs::write(dir.join("lof_scores.csv"), csv)?;
            let labels: Vec<i32> = d.has_logo.iter().map(|&b| if b { 0 } else { NOISE }).collect();
            export_pca_scatter(dir, training, &labels, 0, false, &times, "pca_xy_lof")?;
        }
        DetectionDetail::Knn(d) => {
            let mut csv = String::from("k,quantile,threshold,seedCount\n");
            let _ = writeln!(csv, "{},{},{},{}", d.k, d.quantile, d.threshold, d.seed_count);
            csv.push_str("\nindex,timeSec,score,isLogo,isSeed\n");
            for i in 0..samples.len() {
                let _ = writeln!(
                    csv,
                    "{},{},{},{},{}",
                    i,
                    times[i],
                    d.scores[i],
                    d.has_logo[i] as u8,
                    training.model.logo_seeds.contains(&i) as u8
                );
            }
            fs::write(dir.join("knn_logo_distance.csv"), csv)?;
            let labels: Vec<i32> = d.has_logo.iter().map(|&b| if b { 0 } else { NOISE }).collect();
            export_pca_scatter(dir, training, &labels, 0, false, &times, "pca_xy_knnlogo")?;
        }
        DetectionDetail::Tokayo(d) => {
            let mut csv =
                String::from("nccThreshold,logoSubRectX,logoSubRectY,logoSubRectW,logoSubRectH\n");
            let _ = writeln!(
                csv,
                "{},{},{},{},{}",
                d.model.ncc_threshold,
                d.model.sub_rect.x,
                d.model.sub_rect.y,
                d.model.sub_rect.w,
                d.model.sub_rect.h
            );
            csv.push_str("\nindex,timeSec,ncc,isLogo\n");
            for i in 0..samples.len() {
                let _ = writeln!(
                    csv,
                    "{},{},{},{}",
                    i,
                    times[i],
                    d.ncc_scores[i],
                    d.has_logo[i] as u8
                );
            }
            fs::write(dir.join("tokayo_ncc_scores.csv"), csv)?;
            export_tokayo_images(dir, d)?;
            export_no_logo_rois(dir, samples, &d.has_logo)?;
        }
    }
    Ok(())
}

fn export_tokayo_images(dir: &Path, d: &crate::detection::tokayo::TokayoDetail) -> Result<()> {
    write_png_mat(&dir.join("tokayo_median.png"), &d.median)?;
    write_png_mat(&dir.join("tokayo_stddev.png"), &d.stddev_norm)?;
    write_png_mat(&dir.join("tokayo_logo_mask.png"), &d.logo_mask)?;

    let template = Mat::from_slice(&d.model.template)?
        .reshape(1, d.model.template_h)?
        .try_clone()?;
    write_png_mat(&dir.join("tokayo_logo_template.png"), &template)?;

    // median with the detected sub-ROI highlighted
    let mut annotated = Mat::default();
    imgproc::cvt_color_def(&d.median, &mut annotated, imgproc::COLOR_GRAY2BGR)?;
    imgproc::rectangle(
        &mut annotated,
        core::Rect::new(
            d.model.sub_rect.x,
            d.model.sub_rect.y,
            d.model.sub_rect.w,
            d.model.sub_rect.h,
        ),
        core::Scalar::new(0.0, 255.0, 0.0, 0.0),
        2,
        imgproc::LINE_8,
        0,
    )?;
    write_png_mat(&dir.join("tokayo_median_annotated.png"), &annotated)
}

// ============================================================================
// REFINE CSV
// ============================================================================

pub fn export_refine_csv(dir: &Path, records: &[RefineRecord]) -> Result<()> {
    let mut csv = String::from("idx,coarseStart,coarseEnd,refinedStart,refinedEnd\n");
    for r in records {
        let _ = writeln!(
            csv,
            "{},{},{},{},{}",
            r.interval_idx, r.coarse_start, r.coarse_end, r.refined_start, r.refined_end
        );
    }
    fs::write(dir.join("refine_intervals.csv"), csv)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_replaces_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("artifact.png");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        // no stray tmp file remains
        assert!(!path.with_extension("png.tmp").exists());
    }

    #[test]
    fn test_refine_csv_layout() {
        let dir = tempdir().unwrap();
        let records = vec![RefineRecord {
            interval_idx: 0,
            coarse_start: 100.0,
            coarse_end: 150.0,
            refined_start: 97.5,
            refined_end: 147.5,
        }];
        export_refine_csv(dir.path(), &records).unwrap();
        let body = fs::read_to_string(dir.path().join("refine_intervals.csv")).unwrap();
        assert!(body.starts_with("idx,coarseStart,coarseEnd,refinedStart,refinedEnd\n"));
        assert!(body.contains("0,100,150,97.5,147.5"));
    }
}
