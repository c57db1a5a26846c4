// src/cli.rs
//
// Command-line surface and validation. Flag names and aliases mirror the
// deployments this tool replaces, so existing invocations keep working.

use crate::detection::{ClassifierParams, OutlierMode, Strategy};
use crate::segmenter::SegmenterConfig;
use crate::types::Corner;
use anyhow::Result;
use clap::{ArgGroup, Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ads_detector", about = "Detect advertisement intervals in an HLS stream by channel-logo absence")]
#[command(group(ArgGroup::new("corner").required(true).args(["tl", "tr", "bl", "br"])))]
pub struct Args {
    /// HLS media playlist (URL or local path)
    #[arg(long, value_name = "URL|PATH")]
    m3u8: Option<String>,

    /// Positional fallback for the playlist source
    #[arg(value_name = "URL|PATH")]
    source: Option<String>,

    /// Output JSON path
    #[arg(long, default_value = "ads.json")]
    output: PathBuf,

    /// Sampling period in seconds
    #[arg(long = "every-sec", visible_alias = "interval", alias = "scan-step-sec", default_value_t = 5.0)]
    every_sec: f64,

    /// ROI width fraction of the frame width; values above 1 are percentages
    #[arg(long, alias = "roi-pct", default_value_t = 0.15)]
    roi: f64,

    /// k-means cluster count
    #[arg(long, default_value_t = 2)]
    k: usize,

    /// Worker threads (0 = detected cores)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Minimum interval length to report, in seconds
    #[arg(long = "min-ad-sec", default_value_t = 60.0)]
    min_ad_sec: f64,

    /// Moving-average window over distances (1 = disabled)
    #[arg(long, alias = "smooth-window", default_value_t = 3)]
    smooth: usize,

    /// Enter an ad when distance >= threshold * enter-mult
    #[arg(long = "enter-mult", default_value_t = 1.25)]
    enter_mult: f64,

    /// Leave an ad when distance <= threshold * exit-mult (must be <= enter-mult)
    #[arg(long = "exit-mult", default_value_t = 1.0)]
    exit_mult: f64,

    /// Consecutive no-logo samples required to enter an ad
    #[arg(long = "enter-n", alias = "enter-consecutive", default_value_t = 2)]
    enter_n: usize,

    /// Consecutive logo samples required to leave an ad
    #[arg(long = "exit-n", alias = "exit-consecutive", default_value_t = 2)]
    exit_n: usize,

    /// Classify by outlier detection instead of the distance threshold
    #[arg(long)]
    outlier: bool,

    #[arg(long = "outlier-mode", value_enum, default_value = "dbscan")]
    outlier_mode: OutlierModeArg,

    /// DBSCAN epsilon (0 = auto from neighbor distances)
    #[arg(long = "dbscan-eps", default_value_t = 0.0)]
    dbscan_eps: f64,

    #[arg(long = "dbscan-minpts", default_value_t = 5)]
    dbscan_minpts: usize,

    #[arg(long = "lof-k", default_value_t = 10)]
    lof_k: usize,

    #[arg(long = "lof-th", default_value_t = 1.60)]
    lof_th: f64,

    #[arg(long = "knn-k", default_value_t = 10)]
    knn_k: usize,

    #[arg(long = "knn-q", alias = "knn-quantile", default_value_t = 0.95)]
    knn_q: f64,

    /// Pixel-median template mode (mutually exclusive with --outlier)
    #[arg(long, conflicts_with = "outlier")]
    tokayo: bool,

    /// NCC acceptance threshold (0 = auto from the score gap)
    #[arg(long = "tokayo-th", default_value_t = 0.0)]
    tokayo_th: f64,

    /// Logo sits in the top-left corner
    #[arg(long)]
    tl: bool,
    /// Logo sits in the top-right corner
    #[arg(long)]
    tr: bool,
    /// Logo sits in the bottom-left corner
    #[arg(long)]
    bl: bool,
    /// Logo sits in the bottom-right corner
    #[arg(long)]
    br: bool,

    /// Export debug artifacts (ROI PNGs, CSVs, scatter plots)
    #[arg(long)]
    debug: bool,

    /// Suppress progress output; the final JSON still goes to stdout
    #[arg(long)]
    quiet: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlierModeArg {
    Dbscan,
    Lof,
    Knn,
}

/// Fully validated run configuration.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub source: String,
    pub output: PathBuf,
    pub every_sec: f64,
    pub roi_width_pct: f64,
    pub k: usize,
    pub threads: usize,
    pub corner: Corner,
    pub strategy: Strategy,
    pub classifier: ClassifierParams,
    pub segmenter: SegmenterConfig,
    pub debug: bool,
    pub quiet: bool,
}

impl Args {
    pub fn into_config(self) -> Result<DetectorConfig> {
        let source = self
            .m3u8
            .or(self.source)
            .ok_or_else(|| anyhow::anyhow!("--m3u8 is required"))?;

        let corner = match (self.tl, self.tr, self.bl, self.br) {
            (true, _, _, _) => Corner::TopLeft,
            (_, true, _, _) => Corner::TopRight,
            (_, _, true, _) => Corner::BottomLeft,
            (_, _, _, true) => Corner::BottomRight,
            _ => anyhow::bail!("corner flag required: choose one of --tl --tr --bl --br"),
        };

        // --roi 15 means 15 percent
        let roi_width_pct = if self.roi > 1.0 {
            self.roi / 100.0
        } else {
            self.roi
        };
        anyhow::ensure!(
            roi_width_pct > 0.0 && roi_width_pct <= 1.0,
            "--roi must be in (0,1] or (0,100] as percentage"
        );
        anyhow::ensure!(self.every_sec > 0.0, "--every-sec must be > 0");
        anyhow::ensure!(self.k >= 2, "--k must be >= 2");
        anyhow::ensure!(self.smooth >= 1, "--smooth must be >= 1");
        anyhow::ensure!(
            self.enter_mult > 0.0 && self.exit_mult > 0.0,
            "--enter-mult and --exit-mult must be > 0"
        );
        anyhow::ensure!(
            self.exit_mult <= self.enter_mult,
            "--exit-mult must be <= --enter-mult"
        );
        anyhow::ensure!(
            self.enter_n >= 1 && self.exit_n >= 1,
            "--enter-n and --exit-n must be >= 1"
        );
        anyhow::ensure!(self.dbscan_eps >= 0.0, "--dbscan-eps must be >= 0");
        anyhow::ensure!(self.dbscan_minpts >= 2, "--dbscan-minpts must be >= 2");
        anyhow::ensure!(self.lof_k >= 2, "--lof-k must be >= 2");
        anyhow::ensure!(self.lof_th > 0.0, "--lof-th must be > 0");
        anyhow::ensure!(self.knn_k >= 1, "--knn-k must be >= 1");
        anyhow::ensure!(
            self.knn_q > 0.0 && self.knn_q <= 1.0,
            "--knn-q must be in (0,1]"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.tokayo_th),
            "--tokayo-th must be in [0,1] (0 = auto-detect)"
        );

        let strategy = if self.tokayo {
            Strategy::Tokayo
        } else if self.outlier {
            Strategy::Outlier(match self.outlier_mode {
                OutlierModeArg::Dbscan => OutlierMode::Dbscan,
                OutlierModeArg::Lof => OutlierMode::Lof,
                OutlierModeArg::Knn => OutlierMode::Knn,
            })
        } else {
            Strategy::Bhattacharyya
        };

        Ok(DetectorConfig {
            source,
            output: self.output,
            every_sec: self.every_sec,
            roi_width_pct,
            k: self.k,
            threads: self.threads,
            corner,
            strategy,
            classifier: ClassifierParams {
                roi_width_pct,
                smooth_window: self.smooth,
                enter_mult: self.enter_mult,
                exit_mult: self.exit_mult,
                dbscan_eps: self.dbscan_eps,
                dbscan_min_pts: self.dbscan_minpts,
                lof_k: self.lof_k,
                lof_threshold: self.lof_th,
                knn_k: self.knn_k,
                knn_quantile: self.knn_q,
                tokayo_threshold: self.tokayo_th,
            },
            segmenter: SegmenterConfig {
                enter_consecutive: self.enter_n,
                exit_consecutive: self.exit_n,
                min_ad_sec: self.min_ad_sec,
            },
            debug: self.debug,
            quiet: self.quiet,
        })
    }
}
