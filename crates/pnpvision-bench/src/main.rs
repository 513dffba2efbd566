//! pnpvision-bench: run a pipeline document over images and print diagnostics.
//!
//! Loads a pipeline document, feeds the given images to its capture stages
//! in order (cycling when there are more captures than images), and prints
//! per-stage timing, color space, image size and model summaries. Useful
//! for:
//!
//! - Tuning stage settings and parameter overrides against saved frames
//! - Measuring per-stage durations to identify bottlenecks
//! - Checking that an edited document still round-trips
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin pnpvision-bench -- [OPTIONS] <PIPELINE> --image <IMAGE>...
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use pnpvision_pipeline::{
    FrameSequence, Pipeline, PipelineDiagnostics, PipelineError, PipelineOptions,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Pipeline document runner and diagnostics for pnpvision.
///
/// Runs the pipeline described by a JSON document over one or more images
/// and prints detailed per-stage diagnostics.
#[derive(Parser)]
#[command(name = "pnpvision-bench", version)]
struct Cli {
    /// Path to the pipeline document (JSON).
    pipeline_path: PathBuf,

    /// Input frame for capture stages (PNG, JPEG, BMP, WebP). Repeat for
    /// multiple frames.
    #[arg(long = "image", short = 'i')]
    images: Vec<PathBuf>,

    /// Pipeline property as `KEY=JSON`, e.g. `--set level=90`. Values that
    /// are not valid JSON are taken as strings.
    #[arg(long = "set", value_parser = parse_property)]
    properties: Vec<(String, serde_json::Value)>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Width of the placeholder image used before any stage produced one.
    #[arg(long, default_value_t = PipelineOptions::DEFAULT_PLACEHOLDER_WIDTH)]
    placeholder_width: u32,

    /// Height of the placeholder image.
    #[arg(long, default_value_t = PipelineOptions::DEFAULT_PLACEHOLDER_HEIGHT)]
    placeholder_height: u32,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Print the document as it would be saved (parameters reset to their
    /// defaults) after the last run.
    #[arg(long)]
    print_document: bool,
}

/// Split `KEY=JSON` into a property name and value.
fn parse_property(arg: &str) -> Result<(String, serde_json::Value), String> {
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {arg:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("property name must not be empty".to_owned());
    }
    let value = serde_json::from_str(raw)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_owned()));
    Ok((key.to_owned(), value))
}

fn load_pipeline(cli: &Cli) -> Result<Pipeline, String> {
    let text = std::fs::read_to_string(&cli.pipeline_path)
        .map_err(|e| format!("Error reading {}: {e}", cli.pipeline_path.display()))?;
    let pipeline = Pipeline::from_document_text(&text)
        .map_err(|e| format!("Error loading {}: {e}", cli.pipeline_path.display()))?;
    Ok(pipeline.with_options(PipelineOptions {
        placeholder_width: cli.placeholder_width,
        placeholder_height: cli.placeholder_height,
    }))
}

fn load_frames(paths: &[PathBuf]) -> Result<FrameSequence, String> {
    let frames = paths
        .iter()
        .map(|path| load_frame(path))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FrameSequence::new(frames))
}

fn load_frame(path: &Path) -> Result<image::DynamicImage, String> {
    let frame = image::open(path).map_err(|e| format!("Error decoding {}: {e}", path.display()))?;
    info!(
        path = %path.display(),
        width = frame.width(),
        height = frame.height(),
        "loaded frame"
    );
    Ok(frame)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut pipeline = match load_pipeline(&cli) {
        Ok(p) => p,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    let frames = match load_frames(&cli.images) {
        Ok(f) => f,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    if frames.is_empty() {
        warn!("no --image given; capture stages will fail");
    } else {
        pipeline.set_frame_source(frames);
    }
    pipeline.add_properties(cli.properties.iter().cloned());

    eprintln!(
        "Pipeline: {} ({} stages)",
        cli.pipeline_path.display(),
        pipeline.stages().len(),
    );
    eprintln!("Frames: {}", cli.images.len());
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        match pipeline.process() {
            Ok(()) => {}
            Err(PipelineError::Terminal { stage, cause }) => {
                eprintln!("Run terminated by stage \"{stage}\": {cause}");
            }
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        }

        let diagnostics = pipeline.diagnostics();
        if cli.json {
            match serde_json::to_string_pretty(&diagnostics) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing diagnostics: {e}");
                    return ExitCode::FAILURE;
                }
            }
        } else {
            println!("{}", diagnostics.report());
        }
        all_diagnostics.push(diagnostics);

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    if cli.print_document {
        match pipeline.to_text() {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Error writing document: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    debug_assert!(!all_diagnostics.is_empty(), "no diagnostics to summarize");

    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    // Per-stage means, keyed by name in first-seen order.
    let mut order: Vec<&str> = Vec::new();
    let mut per_stage: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for stage in all_diagnostics.iter().flat_map(|d| &d.stages) {
        let samples = per_stage.entry(stage.name.as_str()).or_insert_with(|| {
            order.push(stage.name.as_str());
            Vec::new()
        });
        samples.push(stage.duration.as_secs_f64() * 1000.0);
    }

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    for name in order {
        let Some(samples) = per_stage.get(name) else {
            continue;
        };
        let stage_mean = samples.iter().sum::<f64>() / samples.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn property_values_parse_as_json() {
        assert_eq!(
            parse_property("level=90").unwrap(),
            ("level".to_owned(), serde_json::json!(90))
        );
        assert_eq!(
            parse_property("flag=true").unwrap().1,
            serde_json::json!(true)
        );
    }

    #[test]
    fn non_json_values_become_strings() {
        assert_eq!(
            parse_property("part=R0402").unwrap().1,
            serde_json::json!("R0402")
        );
    }

    #[test]
    fn malformed_properties_are_rejected() {
        assert!(parse_property("level").is_err());
        assert!(parse_property(" =3").is_err());
    }

    #[test]
    fn cli_accepts_repeated_images_and_sets() {
        let cli = Cli::try_parse_from([
            "pnpvision-bench",
            "pipe.json",
            "-i",
            "a.png",
            "--image",
            "b.png",
            "--set",
            "level=10",
            "--runs",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.images.len(), 2);
        assert_eq!(cli.properties.len(), 1);
        assert_eq!(cli.runs, 3);
        assert!(Cli::try_parse_from(["pnpvision-bench", "pipe.json", "--runs", "0"]).is_err());
    }
}
