use std::{path::PathBuf, time::Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use predominant_label::{
    deskew::deskew, normalize, parse_detections, Config, LabelService, OcrResponse,
    PrecomputedRecognizer,
};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

#[derive(Debug, Parser)]
#[command(version, about = "Pick the most prominent text label in an image")]
struct Cli {
    /// TOML file overriding deskew and selection defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Binarize and level an image before handing it to a recognition engine
    Deskew { input: PathBuf, output: PathBuf },
    /// Reduce recognition output to its predominant label
    Label {
        /// Engine output as JSON
        #[arg(long)]
        detections: PathBuf,
        /// Run the full pipeline on this image instead of the detections alone
        image: Option<PathBuf>,
        #[arg(long)]
        pretty: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Command::Deskew { input, output } => {
            let image = image::open(&input)
                .with_context(|| format!("Failed to load {}", input.display()))?;
            let start = Instant::now();
            let leveled = deskew(&image, &config.deskew);
            log::debug!("Deskewed in {:?}", start.elapsed());
            leveled
                .save(&output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
        }
        Command::Label {
            detections,
            image,
            pretty,
        } => {
            let json = std::fs::read_to_string(&detections)
                .with_context(|| format!("Failed to read {}", detections.display()))?;
            let raw = parse_detections(&json)?;
            let response = match image {
                Some(image) => {
                    let bytes = std::fs::read(&image)
                        .with_context(|| format!("Failed to read {}", image.display()))?;
                    LabelService::builder(PrecomputedRecognizer::new(raw))
                        .config(config)
                        .build()?
                        .process(&bytes)?
                }
                None => OcrResponse::from_records(normalize(raw), &config.selection),
            };
            let json = if pretty {
                serde_json::to_string_pretty(&response)?
            } else {
                serde_json::to_string(&response)?
            };
            println!("{json}");
        }
    }
    Ok(())
}
