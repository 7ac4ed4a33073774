//! MeterVision CLI - read a utility meter from a photo

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use metervision::config::{self, AppConfig};
use metervision::{logging, storage, MeterVisionPipeline, Prediction, StageTimings};

/// MeterVision - utility meter reading extraction
#[derive(Parser, Debug)]
#[command(name = "metervision")]
#[command(about = "Detects the display and reading of a utility meter and recognizes the reading")]
struct Args {
    /// Meter photo to read
    #[arg(required_unless_present = "print_default_config")]
    image: Option<PathBuf>,

    /// Configuration file (defaults to <config_dir>/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print a JSON report instead of the plain reading
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    print_default_config: bool,
}

/// Width and height of an ROI
#[derive(Debug, Serialize)]
struct Dimensions {
    width: u32,
    height: u32,
}

/// JSON output of `--json`
#[derive(Debug, Serialize)]
struct Report<'a> {
    image: &'a Path,
    reading: &'a str,
    display_roi: Dimensions,
    reading_roi: Dimensions,
    timings_ms: StageTimings,
}

impl<'a> Report<'a> {
    fn new(image: &'a Path, prediction: &'a Prediction) -> Self {
        Self {
            image,
            reading: &prediction.reading_text,
            display_roi: Dimensions {
                width: prediction.display_roi.width(),
                height: prediction.display_roi.height(),
            },
            reading_roi: Dimensions {
                width: prediction.reading_roi.width(),
                height: prediction.reading_roi.height(),
            },
            timings_ms: prediction.timings,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_default_config {
        print!("{}", toml::to_string_pretty(&AppConfig::default())?);
        return Ok(());
    }

    let (config, source) = load_config(args.config.as_deref())?;
    logging::init(&config.logging, args.verbose)?;
    info!("Using configuration from {}", source);
    config.validate().context("Invalid configuration")?;

    let image_path = args.image.context("No image given")?;
    let image = image::open(&image_path)
        .with_context(|| format!("Failed to open image {}", image_path.display()))?
        .to_rgb8();

    let pipeline = MeterVisionPipeline::load(&config.models, &config.runtime).context("Failed to load models")?;
    let prediction = pipeline
        .predict(&image)
        .with_context(|| format!("Failed to read meter in {}", image_path.display()))?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&Report::new(&image_path, &prediction))?
        );
    } else {
        println!("{}", prediction.reading_text);
    }

    Ok(())
}

/// Load configuration from `--config`, the config directory, or the defaults.
/// Returns the config and a description of where it came from.
fn load_config(explicit: Option<&Path>) -> Result<(AppConfig, String)> {
    if let Some(path) = explicit {
        let config = config::load_config(path)?;
        return Ok((config, path.display().to_string()));
    }

    if let Ok(config_path) = storage::default_config_path() {
        if config_path.exists() {
            let config = config::load_config(&config_path)?;
            return Ok((config, config_path.display().to_string()));
        }
    }

    Ok((AppConfig::default(), "defaults".to_string()))
}
