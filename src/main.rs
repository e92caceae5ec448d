use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use stylex::{DeviceChoice, ModelHandle, ServiceConfig, DEFAULT_EMBEDDING_SIZE, DEFAULT_TOP_K};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Fashion image embeddings and compatibility scoring
#[derive(Parser, Debug)]
#[command(name = "stylex")]
#[command(about = "Fashion image embeddings and compatibility scoring", long_about = None)]
struct Args {
    /// Trained checkpoint applied on top of the backbone
    #[arg(long, env = "EMBEDDING_MODEL_PATH", global = true)]
    model_path: Option<PathBuf>,

    /// Pretrained backbone weights
    #[arg(long, env = "EMBEDDING_BACKBONE_PATH", global = true)]
    backbone_path: Option<PathBuf>,

    /// Compute device: auto, cpu, cuda[:N] or metal[:N]
    #[arg(long, env = "EMBEDDING_DEVICE", default_value = "auto", global = true)]
    device: String,

    /// Fetch the ImageNet backbone when no backbone file is given
    #[arg(long, env = "EMBEDDING_PRETRAINED", default_value_t = true, action = clap::ArgAction::Set, global = true)]
    pretrained: bool,

    /// Embedding dimensionality
    #[arg(long, env = "EMBEDDING_SIZE", default_value_t = DEFAULT_EMBEDDING_SIZE, global = true)]
    embedding_size: usize,

    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print one JSON embedding line per image
    Embed {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Score how well two items go together
    Compare { first: PathBuf, second: PathBuf },
    /// Rank candidate items by compatibility with a target image
    Rank {
        /// Image of the item to match against
        #[arg(long)]
        target: PathBuf,

        /// JSON file holding an array of `{"id", "embedding", ...}` objects
        #[arg(long)]
        candidates: PathBuf,

        /// Number of results to keep
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },
}

#[derive(Serialize)]
struct EmbedLine<'a> {
    path: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedding: Option<&'a [f32]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct Comparison {
    similarity: f64,
    compatibility_score: f64,
}

impl Args {
    fn service_config(&self) -> anyhow::Result<ServiceConfig> {
        let device: DeviceChoice = self.device.parse()?;
        let config = ServiceConfig {
            checkpoint_path: self.model_path.clone(),
            backbone_path: self.backbone_path.clone(),
            device,
            embedding_size: self.embedding_size,
            pretrained: self.pretrained,
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout carries the JSON output
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Stylex v{}", env!("CARGO_PKG_VERSION"));
    let config = args.service_config()?;
    info!("Checkpoint: {:?}", config.checkpoint_path);
    info!("Device: {}", config.device);

    let service = ModelHandle::new(&config)?;

    match &args.command {
        Command::Embed { images } => embed(&service, images),
        Command::Compare { first, second } => compare(&service, first, second),
        Command::Rank { target, candidates, top_k } => rank(&service, target, candidates, *top_k),
    }
}

fn embed(service: &ModelHandle, paths: &[PathBuf]) -> anyhow::Result<()> {
    let mut contents = Vec::with_capacity(paths.len());
    let mut errors: Vec<Option<String>> = vec![None; paths.len()];
    let mut slots = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
        match std::fs::read(path) {
            Ok(bytes) => {
                slots.push(index);
                contents.push(bytes);
            }
            Err(e) => errors[index] = Some(e.to_string()),
        }
    }

    let report = service.embed_encoded_batch(&contents)?;
    info!("Embedded {} of {} images", report.successes().count(), paths.len());

    let mut embeddings = vec![None; paths.len()];
    for (index, result) in slots.into_iter().zip(report.results()) {
        match result {
            Ok(embedding) => embeddings[index] = Some(embedding.as_slice()),
            Err(e) => errors[index] = Some(e.to_string()),
        }
    }

    for ((path, embedding), error) in paths.iter().zip(embeddings).zip(errors) {
        let line = EmbedLine { path, embedding, error };
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}

fn compare(service: &ModelHandle, first: &Path, second: &Path) -> anyhow::Result<()> {
    let images = [open_image(first)?, open_image(second)?];
    let embeddings = service.embed_batch(&images)?.into_embeddings()?;

    let comparison = Comparison {
        similarity: stylex_core::round_to(service.similarity(&embeddings[0], &embeddings[1])?, 4) + 0.0,
        compatibility_score: service.compatibility_score(&embeddings[0], &embeddings[1])?,
    };
    println!("{}", serde_json::to_string(&comparison)?);
    Ok(())
}

fn rank(service: &ModelHandle, target: &Path, candidates: &Path, top_k: usize) -> anyhow::Result<()> {
    let target = service.embed(&open_image(target)?)?;

    let raw = std::fs::read_to_string(candidates)
        .with_context(|| format!("failed to read candidates from {}", candidates.display()))?;
    let records: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", candidates.display()))?;

    let ranking = service.rank_records(&target, &records, top_k)?;
    if !ranking.rejected.is_empty() {
        tracing::warn!("Skipped {} malformed candidates", ranking.rejected.len());
    }
    println!("{}", serde_json::to_string_pretty(&ranking)?);
    Ok(())
}

fn open_image(path: &Path) -> anyhow::Result<image::DynamicImage> {
    image::open(path).with_context(|| format!("failed to open image {}", path.display()))
}
