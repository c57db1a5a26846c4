// src/detection/tokayo.rs
//
// Pixel-median template mode. Across many sampled ROIs the logo pixels are
// the ones that barely change: the per-pixel median is "what the corner
// almost always looks like" and the per-pixel stddev localizes the stable
// region. The median crop at that region becomes an NCC template.

use crate::features;
use crate::types::{Corner, Sample, SubRect, TokayoModel};
use anyhow::{Context, Result};
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
};
use tracing::info;

/// Padding around the detected logo bounding box, clamped to the ROI.
const SUB_RECT_PAD: i32 = 2;
/// Auto threshold fallback when the score gap degenerates.
const NCC_FALLBACK_THRESHOLD: f64 = 0.5;

#[derive(Debug)]
pub struct TokayoDetail {
    pub ncc_scores: Vec<f64>,
    pub has_logo: Vec<bool>,
    pub model: TokayoModel,
    pub auto_threshold: bool,
    /// Debug imagery: pixel-median, normalized stddev and the Otsu mask
    pub median: Mat,
    pub stddev_norm: Mat,
    pub logo_mask: Mat,
}

pub fn classify(
    samples: &[Sample],
    corner: Corner,
    roi_width_pct: f64,
    requested_threshold: f64,
) -> Result<TokayoDetail> {
    // 1. Decode every captured ROI to blurred grayscale.
    let mut rois: Vec<Vec<u8>> = Vec::with_capacity(samples.len());
    let mut roi_w = 0i32;
    let mut roi_h = 0i32;
    for s in samples {
        let png = s
            .roi_png
            .as_ref()
            .with_context(|| format!("tokayo: missing ROI image for sample {}", s.index))?;
        let bgr = features::decode_png(png)
            .with_context(|| format!("tokayo: could not decode ROI for sample {}", s.index))?;
        let gray = features::gray_blurred(&bgr)?;
        if roi_w == 0 {
            roi_w = gray.cols();
            roi_h = gray.rows();
        } else if gray.cols() != roi_w || gray.rows() != roi_h {
            anyhow::bail!(
                "tokayo: ROI size mismatch at sample {} ({}x{} vs {}x{})",
                s.index,
                gray.cols(),
                gray.rows(),
                roi_w,
                roi_h
            );
        }
        rois.push(gray.data_bytes()?.to_vec());
    }
    anyhow::ensure!(!rois.is_empty(), "tokayo: no ROI images captured");
    info!("tokayo: ROI size {}x{}, samples={}", roi_w, roi_h, rois.len());

    // 2-3. Per-pixel median and stddev across all samples.
    let median_px = pixel_median(&rois);
    let stddev_px = pixel_stddev(&rois);

    // 4. Low variance = stable = logo: invert before Otsu.
    let stddev_norm_px = normalize_minmax_u8(&stddev_px);
    let stddev_norm = mat_from_gray(&stddev_norm_px, roi_w, roi_h)?;
    let mut logo_mask = Mat::default();
    imgproc::threshold(
        &stddev_norm,
        &mut logo_mask,
        0.0,
        255.0,
        imgproc::THRESH_BINARY_INV | imgproc::THRESH_OTSU,
    )?;

    let kernel = imgproc::get_structuring_element(
        imgproc::MORPH_RECT,
        core::Size::new(5, 5),
        core::Point::new(-1, -1),
    )?;
    let mut closed = Mat::default();
    imgproc::morphology_ex_def(&logo_mask, &mut closed, imgproc::MORPH_CLOSE, &kernel)?;
    let mut opened = Mat::default();
    imgproc::morphology_ex_def(&closed, &mut opened, imgproc::MORPH_OPEN, &kernel)?;
    let logo_mask = opened;

    // Largest external contour bounds the logo.
    let mut contours: core::Vector<core::Vector<core::Point>> = core::Vector::new();
    imgproc::find_contours_def(
        &logo_mask,
        &mut contours,
        imgproc::RETR_EXTERNAL,
        imgproc::CHAIN_APPROX_SIMPLE,
    )?;
    if contours.is_empty() {
        anyhow::bail!("tokayo: no logo region found in stddev analysis");
    }
    let mut largest_idx = 0usize;
    let mut largest_area = 0.0f64;
    for (ci, contour) in contours.iter().enumerate() {
        let area = imgproc::contour_area(&contour, false)?;
        if area > largest_area {
            largest_area = area;
            largest_idx = ci;
        }
    }
    let bounds = imgproc::bounding_rect(&contours.get(largest_idx)?)?;
    let sub_rect = pad_rect(
        SubRect {
            x: bounds.x,
            y: bounds.y,
            w: bounds.width,
            h: bounds.height,
        },
        SUB_RECT_PAD,
        roi_w,
        roi_h,
    );
    info!(
        "tokayo: logo sub-ROI {},{} {}x{}",
        sub_rect.x, sub_rect.y, sub_rect.w, sub_rect.h
    );

    // 5. The template is the median image cropped at the logo rectangle.
    let median = mat_from_gray(&median_px, roi_w, roi_h)?;
    let rect = core::Rect::new(sub_rect.x, sub_rect.y, sub_rect.w, sub_rect.h);
    let template = Mat::roi(&median, rect)?.try_clone()?;

    // 6. NCC of every sample's sub-rectangle against the template.
    let mut ncc_scores = Vec::with_capacity(rois.len());
    for bytes in &rois {
        let gray = mat_from_gray(bytes, roi_w, roi_h)?;
        let sample_sub = Mat::roi(&gray, rect)?.try_clone()?;
        ncc_scores.push(ncc(&sample_sub, &template)?);
    }

    // 7. Threshold: explicit, or the midpoint of the widest score gap.
    let auto_threshold = requested_threshold <= 0.0;
    let ncc_threshold = if auto_threshold {
        let th = largest_gap_threshold(&ncc_scores);
        info!("tokayo: auto NCC threshold {:.4}", th);
        th
    } else {
        requested_threshold
    };

    let has_logo: Vec<bool> = ncc_scores.iter().map(|s| *s >= ncc_threshold).collect();
    let logo_count = has_logo.iter().filter(|b| **b).count();
    info!(
        "tokayo: logo={}, no-logo={}, nccThreshold={:.4}",
        logo_count,
        has_logo.len() - logo_count,
        ncc_threshold
    );

    let model = TokayoModel {
        template: template.data_bytes()?.to_vec(),
        template_w: template.cols(),
        template_h: template.rows(),
        sub_rect,
        ncc_threshold,
        corner,
        roi_width_pct,
    };

    Ok(TokayoDetail {
        ncc_scores,
        has_logo,
        model,
        auto_threshold,
        median,
        stddev_norm,
        logo_mask,
    })
}

/// NCC decision for one blurred grayscale ROI, used by the boundary refiner.
/// A ROI that cannot host the template rectangle reads as no-logo.
pub fn ncc_has_logo(gray_roi: &Mat, model: &TokayoModel) -> Result<bool> {
    let x0 = model.sub_rect.x.max(0);
    let y0 = model.sub_rect.y.max(0);
    let x1 = (model.sub_rect.x + model.sub_rect.w).min(gray_roi.cols());
    let y1 = (model.sub_rect.y + model.sub_rect.h).min(gray_roi.rows());
    if x1 - x0 != model.template_w || y1 - y0 != model.template_h {
        return Ok(false);
    }
    let clipped = core::Rect::new(x0, y0, x1 - x0, y1 - y0);
    let sub = Mat::roi(gray_roi, clipped)?.try_clone()?;
    let template = mat_from_gray(&model.template, model.template_w, model.template_h)?;
    Ok(ncc(&sub, &template)? >= model.ncc_threshold)
}

fn ncc(image: &Mat, template: &Mat) -> Result<f64> {
    let mut result = Mat::default();
    imgproc::match_template(
        image,
        template,
        &mut result,
        imgproc::TM_CCOEFF_NORMED,
        &core::no_array(),
    )?;
    Ok(*result.at_2d::<f32>(0, 0)? as f64)
}

fn mat_from_gray(bytes: &[u8], w: i32, h: i32) -> Result<Mat> {
    anyhow::ensure!(bytes.len() as i32 == w * h, "gray buffer size mismatch");
    let flat = Mat::from_slice(bytes)?;
    Ok(flat.reshape(1, h)?.try_clone()?)
}

// ============================================================================
// PER-PIXEL ARITHMETIC (pure)
// ============================================================================

/// Per-pixel median across equally sized grayscale buffers.
pub fn pixel_median(rois: &[Vec<u8>]) -> Vec<u8> {
    let n = rois.len();
    if n == 0 {
        return Vec::new();
    }
    let len = rois[0].len();
    let mut out = vec![0u8; len];
    let mut vals = vec![0u8; n];
    for px in 0..len {
        for (i, roi) in rois.iter().enumerate() {
            vals[i] = roi[px];
        }
        let mid = n / 2;
        let (_, nth, _) = vals.select_nth_unstable(mid);
        out[px] = *nth;
    }
    out
}

/// Per-pixel population standard deviation across the buffers.
pub fn pixel_stddev(rois: &[Vec<u8>]) -> Vec<f32> {
    let n = rois.len();
    if n == 0 {
        return Vec::new();
    }
    let len = rois[0].len();
    let mut out = vec![0.0f32; len];
    for px in 0..len {
        let mut sum = 0.0f64;
        let mut sum2 = 0.0f64;
        for roi in rois {
            let v = roi[px] as f64;
            sum += v;
            sum2 += v * v;
        }
        let mean = sum / n as f64;
        let var = (sum2 / n as f64) - mean * mean;
        out[px] = var.max(0.0).sqrt() as f32;
    }
    out
}

/// Min-max normalization into [0, 255]. A flat input maps to all zeros.
pub fn normalize_minmax_u8(values: &[f32]) -> Vec<u8> {
    let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if !min.is_finite() || max - min <= f32::EPSILON {
        return vec![0u8; values.len()];
    }
    values
        .iter()
        .map(|v| (((v - min) / (max - min)) * 255.0).round() as u8)
        .collect()
}

/// Midpoint of the largest gap in the sorted scores; 0.5 when degenerate.
pub fn largest_gap_threshold(scores: &[f64]) -> f64 {
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mut best_gap = 0.0;
    let mut threshold = 0.0;
    for pair in sorted.windows(2) {
        let gap = pair[1] - pair[0];
        if gap > best_gap {
            best_gap = gap;
            threshold = (pair[0] + pair[1]) / 2.0;
        }
    }
    if threshold <= 0.0 {
        NCC_FALLBACK_THRESHOLD
    } else {
        threshold
    }
}

fn pad_rect(r: SubRect, pad: i32, roi_w: i32, roi_h: i32) -> SubRect {
    let x = (r.x - pad).max(0);
    let y = (r.y - pad).max(0);
    SubRect {
        x,
        y,
        w: (r.w + 2 * pad).min(roi_w - x),
        h: (r.h + 2 * pad).min(roi_h - y),
    }
}
