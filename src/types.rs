// src/types.rs

use serde::{Deserialize, Serialize};

// ============================================================================
// Corner selection
// ============================================================================

/// Frame corner that carries the channel logo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Corner {
    pub fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(Corner::TopLeft),
            1 => Some(Corner::TopRight),
            2 => Some(Corner::BottomLeft),
            3 => Some(Corner::BottomRight),
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Corner::TopLeft => 0,
            Corner::TopRight => 1,
            Corner::BottomLeft => 2,
            Corner::BottomRight => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Corner::TopLeft => "top_left",
            Corner::TopRight => "top_right",
            Corner::BottomLeft => "bottom_left",
            Corner::BottomRight => "bottom_right",
        }
    }
}

impl std::fmt::Display for Corner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Samples
// ============================================================================

/// One probed frame: its position in the timestamp grid, the HSV histogram of
/// the corner ROI, and (when requested) the PNG-encoded ROI itself.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Position in the sampling grid (contiguous 0..N-1 after collection)
    pub index: usize,
    /// Seconds from playlist start
    pub t_sec: f64,
    /// L1-normalized 512-bin HSV histogram (zero vector when the mask is empty)
    pub hist: Vec<f32>,
    /// PNG bytes of the raw corner ROI, captured only in debug/tokayo runs
    pub roi_png: Option<Vec<u8>>,
}

// ============================================================================
// Appearance models
// ============================================================================

/// Histogram-space logo model produced by training. Read-only afterwards.
#[derive(Debug, Clone)]
pub struct AppearanceModel {
    pub corner: Corner,
    /// Mean histogram of the refined logo seeds (512 floats)
    pub mean_hist: Vec<f32>,
    /// Base Bhattacharyya threshold, clamped to [0.05, 0.95]
    pub threshold: f64,
    /// Sample indices the trainer considers archetypally logo-present
    pub logo_seeds: Vec<usize>,
}

/// Pixel-median template model for tokayo mode. The template is stored as raw
/// grayscale bytes so the model can be shared across refine workers; each
/// worker rebuilds its own Mat view.
#[derive(Debug, Clone)]
pub struct TokayoModel {
    /// Grayscale template pixels, row-major, `template_w * template_h` bytes
    pub template: Vec<u8>,
    pub template_w: i32,
    pub template_h: i32,
    /// Position of the template within the corner ROI
    pub sub_rect: SubRect,
    /// NCC acceptance threshold in (0, 1]
    pub ncc_threshold: f64,
    pub corner: Corner,
    pub roi_width_pct: f64,
}

/// Axis-aligned rectangle within a ROI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubRect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

// ============================================================================
// Detected intervals
// ============================================================================

/// One advertisement interval. Mutated exactly once, by the boundary refiner.
#[derive(Debug, Clone)]
pub struct AdInterval {
    pub start_sec: f64,
    pub end_sec: f64,
    pub start_pdt: Option<String>,
    pub end_pdt: Option<String>,
}

impl AdInterval {
    pub fn new(start_sec: f64, end_sec: f64) -> Self {
        Self {
            start_sec,
            end_sec,
            start_pdt: None,
            end_pdt: None,
        }
    }

    pub fn duration_sec(&self) -> f64 {
        self.end_sec - self.start_sec
    }
}
