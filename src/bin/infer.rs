use std::path::PathBuf;

use anyhow::{anyhow, Context};
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::NdArray;
use burn::prelude::*;
use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use clap::Parser;

use pafusion_detection::model::PROFILE_TABLE_VERSION;
use pafusion_detection::{DetectionModel, ImagePreprocessor, ModelConfig, PROFILES};

type MyBackend = NdArray;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run the fusion detector on one image", long_about = None)]
struct Args {
    /// YAML model config; flags below override its fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model profile (nano, tiny, s, m, l, x)
    #[arg(short, long)]
    profile: Option<String>,

    /// Number of classes
    #[arg(long)]
    classes: Option<usize>,

    /// Input image; a blank canvas of `img_size` is used when omitted
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Checkpoint prefix written by a BinFileRecorder
    #[arg(short, long)]
    weights: Option<PathBuf>,

    /// Save the (possibly freshly initialized) weights to this prefix
    #[arg(long)]
    export: Option<PathBuf>,

    /// Print the architecture and channel plan as JSON and exit
    #[arg(long)]
    summary: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ModelConfig::from_yaml(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ModelConfig::default(),
    };
    if let Some(profile) = args.profile {
        config.profile = profile;
    }
    if let Some(classes) = args.classes {
        config.num_classes = classes;
    }

    let device = NdArrayDevice::default();
    let mut model = DetectionModel::<MyBackend>::from_config(&device, &config)?;

    if args.summary {
        let summary = serde_json::json!({
            "architecture": model.architecture(),
            "plan": model.fusion.plan().describe(),
            "profiles": PROFILES.iter().map(|p| p.name).collect::<Vec<_>>(),
            "profile_table_version": PROFILE_TABLE_VERSION,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if let Some(weights) = &args.weights {
        log::info!("Loading weights from {}", weights.display());
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let record = recorder
            .load(weights.clone(), &device)
            .map_err(|e| anyhow!("failed to load weights: {e:?}"))?;
        model = model.load_record(record);
    }

    let preprocessor = ImagePreprocessor::new(config.img_size as u32)?;
    let size = preprocessor.target_size() as usize;
    let images = match &args.image {
        Some(path) => {
            log::info!("Loading image {} (letterboxed to {size}x{size})", path.display());
            preprocessor.load::<MyBackend>(path, &device)?
        }
        None => {
            log::warn!("No image given, running on a blank {size}x{size} canvas");
            Tensor::zeros([1, 3, size, size], &device)
        }
    };

    let predictions = model.forward(images)?;
    for pred in &predictions {
        let objectness = pred.objectness().max().into_scalar();
        log::info!(
            "level {} (stride {}): shape {:?}, {} classes, max objectness logit {:.3}",
            pred.level,
            pred.level.stride(),
            pred.dims(),
            pred.num_classes(),
            objectness
        );
    }

    if let Some(path) = &args.export {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        recorder
            .record(model.into_record(), path.clone())
            .map_err(|e| anyhow!("failed to save weights: {e:?}"))?;
        log::info!("Weights saved to {}", path.display());
    }

    Ok(())
}
