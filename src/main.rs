mod cli;
mod debug_export;
mod detection;
mod features;
mod playlist;
mod refiner;
mod report;
mod sampler;
mod segmenter;
mod stats;
mod timecode;
mod trainer;
mod types;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use detection::{DetectionDetail, Strategy};
use sampler::ProbeClassifier;
use std::time::Instant;
use tracing::info;

fn main() {
    let started = Instant::now();
    if let Err(e) = run(started) {
        eprintln!("ads_detector error: {e:#}");
        std::process::exit(1);
    }
}

fn run(started: Instant) -> Result<()> {
    let args = match cli::Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return Ok(());
        }
        Err(e) => {
            let rendered = e.to_string();
            let first = rendered.lines().next().unwrap_or("invalid arguments");
            anyhow::bail!("{}", first.trim_start_matches("error: "));
        }
    };
    let config = args.into_config()?;

    let filter = if config.quiet {
        "ads_detector=error"
    } else {
        "ads_detector=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("start");
    info!(
        "selected corner: {} (roiWidthPct={})",
        config.corner, config.roi_width_pct
    );

    // ------------------------------------------------------------------
    // Playlist
    // ------------------------------------------------------------------
    let is_http = playlist::is_http_url(&config.source);
    info!(
        "reading m3u8 ({})",
        if is_http { "HTTP" } else { "local file" }
    );
    let body = playlist::load(&config.source)?;
    info!("parsing m3u8 playlist");
    let segments = playlist::parse(&body);
    let total_duration_sec = playlist::total_duration(&segments);
    if segments.is_empty() || total_duration_sec <= 0.0 {
        anyhow::bail!("could not parse segments/duration from m3u8");
    }
    info!(
        "segments: {}, approx total duration: {:.1}s",
        segments.len(),
        total_duration_sec
    );

    info!("resolving EXT-X-PROGRAM-DATE-TIME anchors (when present)");
    let anchors_ms = timecode::segment_anchors_ms(&segments);

    // ------------------------------------------------------------------
    // Sampling + training
    // ------------------------------------------------------------------
    info!("training logo model (every {}s)", config.every_sec);
    let capture_rois = config.debug || config.strategy == Strategy::Tokayo;
    let progress = |done: usize, total: usize| {
        info!("training: samples read {}/{}", done, total);
    };
    let samples = sampler::collect_samples(
        &config.source,
        total_duration_sec,
        config.every_sec,
        config.corner,
        config.roi_width_pct,
        config.threads,
        capture_rois,
        Some(&progress),
    )?;

    let training = trainer::train(&samples, config.k, config.corner)?;
    info!(
        "training: threshold {:.4}, logoSamples {}, totalSamples {}",
        training.model.threshold,
        training.model.logo_seeds.len(),
        samples.len()
    );

    let mut logos_output_dir: Option<String> = None;
    if config.debug {
        let dir = debug_export::debug_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("could not create debug dir {}", dir.display()))?;
        info!("debug enabled: exporting artifacts to {}", dir.display());
        debug_export::export_training_rois(&dir, &samples, &training)?;
        let times: Vec<f64> = samples.iter().map(|s| s.t_sec).collect();
        debug_export::export_pca_scatter(
            &dir,
            &training,
            &training.kmeans_labels,
            training.logo_cluster_label,
            false,
            &times,
            "pca_xy",
        )?;
        logos_output_dir = Some(dir.display().to_string());
    }

    // ------------------------------------------------------------------
    // Classification + segmentation
    // ------------------------------------------------------------------
    info!(
        "detecting ads (every {}s, minAdSec={}, strategy={}, enterN={}, exitN={})",
        config.every_sec,
        config.segmenter.min_ad_sec,
        config.strategy.name(),
        config.segmenter.enter_consecutive,
        config.segmenter.exit_consecutive
    );
    let outcome = detection::classify(config.strategy, &config.classifier, &samples, &training)?;

    if config.debug {
        let dir = debug_export::debug_dir();
        debug_export::export_detection_artifacts(
            &dir,
            &samples,
            &training,
            &outcome,
            config.segmenter.enter_consecutive,
            config.segmenter.exit_consecutive,
        )?;
    }

    let times: Vec<f64> = samples.iter().map(|s| s.t_sec).collect();
    let mut ads = segmenter::detect_intervals(
        &times,
        &outcome.classification,
        &config.segmenter,
        total_duration_sec,
    );

    // ------------------------------------------------------------------
    // Boundary refinement (non-fatal)
    // ------------------------------------------------------------------
    let probe_classifier = match &outcome.detail {
        DetectionDetail::Tokayo(d) => ProbeClassifier::Template(&d.model),
        _ => ProbeClassifier::Histogram {
            mean_hist: &training.model.mean_hist,
            threshold: training.model.threshold,
            corner: config.corner,
            roi_width_pct: config.roi_width_pct,
        },
    };
    let step_sec = refiner::refine_step_sec(config.strategy == Strategy::Tokayo);
    let records = refiner::refine_intervals(
        &config.source,
        total_duration_sec,
        config.threads,
        step_sec,
        &mut ads,
        &probe_classifier,
    );
    if config.debug {
        if let Some(records) = &records {
            debug_export::export_refine_csv(&debug_export::debug_dir(), records)?;
        }
    }

    let mut ads = refiner::enforce_disjoint(ads);
    for ad in &mut ads {
        ad.start_pdt = timecode::offset_to_program_date_time(&segments, &anchors_ms, ad.start_sec);
        ad.end_pdt = timecode::offset_to_program_date_time(&segments, &anchors_ms, ad.end_sec);
    }

    // ------------------------------------------------------------------
    // Report
    // ------------------------------------------------------------------
    if let Some(parent) = config.output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("could not create output directory: {}", parent.display())
            })?;
        }
    }

    let report = report::build_report(
        &config,
        total_duration_sec,
        started.elapsed(),
        samples.len(),
        &training,
        &outcome,
        &ads,
        logos_output_dir,
    );
    let json = serde_json::to_string_pretty(&report).context("could not serialize report")?;

    info!("writing JSON output to {}", config.output.display());
    std::fs::write(&config.output, format!("{json}\n"))
        .with_context(|| format!("could not open output file: {}", config.output.display()))?;

    // The JSON always reaches stdout, --quiet included.
    println!("{json}");
    info!("done. ads found: {}", ads.len());
    Ok(())
}
