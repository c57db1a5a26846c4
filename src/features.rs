// src/features.rs
//
// Corner ROI extraction and per-sample feature computation: the 512-bin HSV
// histogram used for training/classification and the blurred grayscale ROI
// used by the pixel-median template mode.

use crate::types::Corner;
use anyhow::Result;
use opencv::{
    core::{self, Mat, Vector},
    imgcodecs, imgproc,
    prelude::*,
};

/// Histogram geometry: 8 bins per HSV channel, 512 cells total.
pub const HIST_BINS_PER_CHANNEL: i32 = 8;
pub const HIST_LEN: usize = 512;

/// Side of the downscaled ROI fed to the histogram.
const HIST_ROI_SIDE: i32 = 64;

/// Fraction of min(w, h) used as the center-mask radius.
const MASK_RADIUS_FRACTION: f64 = 0.40;

// ============================================================================
// ROI GEOMETRY (pure)
// ============================================================================

fn clamp_pct(pct: f64) -> f64 {
    pct.clamp(0.01, 1.0)
}

/// ROI side in pixels. Both sides derive from the frame *width* so the square
/// stays stable across aspect ratios; the result is clamped to the frame.
pub fn roi_side(width: i32, height: i32, roi_width_pct: f64) -> i32 {
    if width <= 0 || height <= 0 {
        return 1;
    }
    let side = (width as f64 * clamp_pct(roi_width_pct)).round() as i32;
    side.clamp(1, width.min(height))
}

/// Top-left origin of the `side`x`side` square at the given corner.
pub fn corner_origin(width: i32, height: i32, side: i32, corner: Corner) -> (i32, i32) {
    match corner {
        Corner::TopLeft => (0, 0),
        Corner::TopRight => (width - side, 0),
        Corner::BottomLeft => (0, height - side),
        Corner::BottomRight => (width - side, height - side),
    }
}

pub fn corner_rect(width: i32, height: i32, corner: Corner, roi_width_pct: f64) -> core::Rect {
    let side = roi_side(width, height, roi_width_pct);
    let (x, y) = corner_origin(width, height, side, corner);
    core::Rect::new(x, y, side, side)
}

// ============================================================================
// FEATURE EXTRACTION
// ============================================================================

/// Crop the corner ROI out of a BGR frame.
pub fn corner_roi(frame: &Mat, corner: Corner, roi_width_pct: f64) -> Result<Mat> {
    let rect = corner_rect(frame.cols(), frame.rows(), corner, roi_width_pct);
    let roi = Mat::roi(frame, rect)?;
    Ok(roi.try_clone()?)
}

/// 512-bin joint HSV histogram of a BGR ROI, L1-normalized.
///
/// The ROI is area-resampled to 64x64 when larger, converted to HSV and
/// histogrammed under a filled circular mask centered on the ROI. The mask
/// keeps the logo interior and suppresses the variable outer edges.
pub fn hist512_hsv(bgr_roi: &Mat) -> Result<Vec<f32>> {
    let mut small = Mat::default();
    let roi = if bgr_roi.cols() > HIST_ROI_SIDE || bgr_roi.rows() > HIST_ROI_SIDE {
        imgproc::resize(
            bgr_roi,
            &mut small,
            core::Size::new(HIST_ROI_SIDE, HIST_ROI_SIDE),
            0.0,
            0.0,
            imgproc::INTER_AREA,
        )?;
        &small
    } else {
        bgr_roi
    };

    let mut hsv = Mat::default();
    imgproc::cvt_color_def(roi, &mut hsv, imgproc::COLOR_BGR2HSV)?;

    let mut mask = Mat::new_rows_cols_with_default(
        hsv.rows(),
        hsv.cols(),
        core::CV_8UC1,
        core::Scalar::all(0.0),
    )?;
    let center = core::Point::new(hsv.cols() / 2, hsv.rows() / 2);
    let radius = ((hsv.cols().min(hsv.rows()) as f64) * MASK_RADIUS_FRACTION).round() as i32;
    imgproc::circle(
        &mut mask,
        center,
        radius.max(1),
        core::Scalar::all(255.0),
        -1,
        imgproc::LINE_8,
        0,
    )?;

    let mut images: Vector<Mat> = Vector::new();
    images.push(hsv);
    let channels = Vector::from_slice(&[0, 1, 2]);
    let hist_size = Vector::from_slice(&[
        HIST_BINS_PER_CHANNEL,
        HIST_BINS_PER_CHANNEL,
        HIST_BINS_PER_CHANNEL,
    ]);
    // Flat ranges: [h_min, h_max, s_min, s_max, v_min, v_max]
    let ranges = Vector::from_slice(&[0.0f32, 180.0, 0.0, 256.0, 0.0, 256.0]);

    let mut hist = Mat::default();
    imgproc::calc_hist(&images, &channels, &mask, &mut hist, &hist_size, &ranges, false)?;

    let mut flat = Vec::with_capacity(HIST_LEN);
    for h in 0..HIST_BINS_PER_CHANNEL {
        for s in 0..HIST_BINS_PER_CHANNEL {
            for v in 0..HIST_BINS_PER_CHANNEL {
                flat.push(*hist.at_3d::<f32>(h, s, v)?);
            }
        }
    }
    Ok(l1_normalize(flat))
}

/// Histogram of the selected corner of a full BGR frame.
pub fn corner_hist(frame: &Mat, corner: Corner, roi_width_pct: f64) -> Result<Vec<f32>> {
    let rect = corner_rect(frame.cols(), frame.rows(), corner, roi_width_pct);
    let roi = Mat::roi(frame, rect)?;
    hist512_hsv(&roi)
}

/// Grayscale ROI with a 3x3 Gaussian blur, at full ROI resolution.
pub fn gray_blurred(bgr_roi: &Mat) -> Result<Mat> {
    let mut gray = Mat::default();
    imgproc::cvt_color_def(bgr_roi, &mut gray, imgproc::COLOR_BGR2GRAY)?;
    let mut blurred = Mat::default();
    imgproc::gaussian_blur_def(&gray, &mut blurred, core::Size::new(3, 3), 0.0)?;
    Ok(blurred)
}

/// PNG-encode a ROI. Callers serialize access behind a mutex: the underlying
/// codec is not guaranteed re-entrant.
pub fn encode_roi_png(roi: &Mat) -> Result<Vec<u8>> {
    let mut buf: Vector<u8> = Vector::new();
    let params: Vector<i32> = Vector::new();
    imgcodecs::imencode(".png", roi, &mut buf, &params)?;
    Ok(buf.to_vec())
}

/// Decode PNG bytes back into a BGR Mat.
pub fn decode_png(bytes: &[u8]) -> Result<Mat> {
    let buf: Vector<u8> = Vector::from_slice(bytes);
    let mat = imgcodecs::imdecode(&buf, imgcodecs::IMREAD_COLOR)?;
    if mat.empty() {
        anyhow::bail!("could not decode ROI PNG");
    }
    Ok(mat)
}

fn l1_normalize(mut hist: Vec<f32>) -> Vec<f32> {
    let sum: f32 = hist.iter().sum();
    if sum > 0.0 {
        for v in &mut hist {
            *v /= sum;
        }
    }
    hist
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roi_side_from_width() {
        assert_eq!(roi_side(1920, 1080, 0.15), 288);
        assert_eq!(roi_side(1280, 720, 0.15), 192);
    }

    #[test]
    fn test_roi_side_clamped_to_frame() {
        // portrait frame: the width-derived square would exceed the height
        assert_eq!(roi_side(1080, 400, 0.5), 400);
        // tiny frame still yields at least one pixel
        assert_eq!(roi_side(3, 3, 0.01), 1);
        assert_eq!(roi_side(0, 100, 0.15), 1);
    }

    #[test]
    fn test_roi_pct_clamped() {
        // pct beyond 1.0 behaves like 1.0
        assert_eq!(roi_side(100, 200, 5.0), 100);
        // pct below 0.01 behaves like 0.01
        assert_eq!(roi_side(1000, 1000, 0.0001), 10);
    }

    #[test]
    fn test_corner_origins() {
        assert_eq!(corner_origin(100, 80, 20, Corner::TopLeft), (0, 0));
        assert_eq!(corner_origin(100, 80, 20, Corner::TopRight), (80, 0));
        assert_eq!(corner_origin(100, 80, 20, Corner::BottomLeft), (0, 60));
        assert_eq!(corner_origin(100, 80, 20, Corner::BottomRight), (80, 60));
    }

    #[test]
    fn test_l1_normalize() {
        let h = l1_normalize(vec![1.0, 3.0]);
        assert!((h[0] - 0.25).abs() < 1e-6);
        assert!((h[1] - 0.75).abs() < 1e-6);
        let z = l1_normalize(vec![0.0; 4]);
        assert!(z.iter().all(|v| *v == 0.0));
    }
}
