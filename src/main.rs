//! `neutrain`: train, sample and run the EM segmentation transformer.
//!
//!   neutrain train   --config experiment.toml [--resume] [--monitor 127.0.0.1:7878]
//!   neutrain sample  --config experiment.toml --count 8 --output patches/
//!   neutrain predict --checkpoint model_00010000.json --image raw/ --output pred/

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use neutorch::train::latest_checkpoint;
use neutorch::volume::{read_image_stack, write_image_stack, write_label_stack};
use neutorch::{
    predict_volume, train_loop, Checkpoint, ExperimentConfig, Monitor, SegmentationDataset,
    TrainConfig, ViT,
};

#[derive(Parser, Debug)]
#[command(name = "neutrain", version, about = "Neuron segmentation and synapse detection in EM volumes")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a model described by an experiment file
    Train {
        #[arg(short, long)]
        config: PathBuf,
        /// Continue from the newest checkpoint in the output directory
        #[arg(long)]
        resume: bool,
        /// Serve live progress on this address
        #[arg(long)]
        monitor: Option<String>,
    },
    /// Write augmented patches to disk for inspection
    Sample {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short = 'n', long, default_value = "8")]
        count: usize,
        #[arg(short, long)]
        output: PathBuf,
        /// Sample from the validation volumes
        #[arg(long)]
        validation: bool,
    },
    /// Predict a volume with a trained checkpoint
    Predict {
        #[arg(long)]
        checkpoint: PathBuf,
        #[arg(long)]
        image: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Block size, e.g. 16,64,64; defaults to the training patch size
        #[arg(long, value_delimiter = ',')]
        patch_size: Option<Vec<usize>>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "neutorch=debug,neutrain=debug" } else { "neutorch=info,neutrain=info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match cli.command {
        Commands::Train { config, resume, monitor } => run_train(&config, resume, monitor.as_deref()),
        Commands::Sample { config, count, output, validation } => run_sample(&config, count, &output, validation),
        Commands::Predict { checkpoint, image, output, patch_size } => {
            run_predict(&checkpoint, &image, &output, patch_size)
        }
    }
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

fn load_experiment(path: &Path) -> Result<(ExperimentConfig, SegmentationDataset)> {
    let config = ExperimentConfig::load(path)
        .with_context(|| format!("loading experiment {}", path.display()))?;
    let dataset = SegmentationDataset::from_config(&config.dataset, Path::new(""))
        .context("building dataset")?;
    info!(
        training = dataset.training_volumes().len(),
        validation = dataset.validation_volumes().len(),
        patch_size = ?dataset.patch_size(),
        transforms = ?dataset.transform().names(),
        "dataset ready"
    );
    Ok((config, dataset))
}

fn run_train(config_path: &Path, resume: bool, monitor_addr: Option<&str>) -> Result<()> {
    let (config, dataset) = load_experiment(config_path)?;
    let mut rng = seeded_rng(config.training.seed);
    let mut train_config = TrainConfig::from_settings(&config.training, config.dataset.target);

    let resumed = if resume { latest_checkpoint(&config.training.output_dir)? } else { None };
    let mut model = match resumed {
        Some(path) => {
            let ckpt = Checkpoint::load_json(&path)
                .with_context(|| format!("loading checkpoint {}", path.display()))?;
            if ckpt.model.config() != &config.model {
                warn!("checkpoint architecture differs from the experiment file; using the checkpoint's");
            }
            info!(path = %path.display(), iteration = ckpt.iteration, "resuming");
            train_config.start_iteration = ckpt.iteration;
            ckpt.model
        }
        None => ViT::new(config.model.clone(), &mut rng).context("building model")?,
    };
    info!(parameters = model.num_parameters(), "model ready");

    let monitor = match monitor_addr {
        Some(addr) => {
            let (tx, rx) = mpsc::channel();
            train_config.progress_tx = Some(tx);
            Some(Monitor::spawn(addr, rx).with_context(|| format!("starting monitor on {}", addr))?)
        }
        None => None,
    };

    let mut optimizer = config.training.optimizer.build(config.training.learning_rate);
    let t_start = Instant::now();
    let loss = train_loop(&mut model, &dataset, optimizer.as_mut(), &train_config, &mut rng)?;
    info!(loss, elapsed_s = t_start.elapsed().as_secs(), "training finished");

    // Closing the channel lets the monitor finish its event streams.
    drop(train_config);
    if let Some(m) = monitor {
        m.shutdown();
    }
    Ok(())
}

fn run_sample(config_path: &Path, count: usize, output: &Path, validation: bool) -> Result<()> {
    let (config, dataset) = load_experiment(config_path)?;
    let mut rng = seeded_rng(config.training.seed);

    for i in 0..count {
        let t_start = Instant::now();
        let patch = if validation {
            dataset.random_validation_patch(&mut rng)?
        } else {
            dataset.random_training_patch(&mut rng)?
        };
        info!(
            patch = i,
            elapsed_ms = t_start.elapsed().as_millis() as u64,
            nonzero_label_voxels = patch.label.count_where(|id| id != 0),
            "generated patch"
        );
        let dir = output.join(format!("patch_{:04}", i));
        write_image_stack(&patch.image, &dir.join("image"))?;
        write_label_stack(&patch.label, &dir.join("label"))
            .with_context(|| format!("writing labels of patch {}", i))?;
    }
    Ok(())
}

fn run_predict(checkpoint: &Path, image_dir: &Path, output: &Path, patch_size: Option<Vec<usize>>) -> Result<()> {
    let ckpt = Checkpoint::load_json(checkpoint)
        .with_context(|| format!("loading checkpoint {}", checkpoint.display()))?;
    let patch_size = match (patch_size, ckpt.patch_size) {
        (Some(p), _) => {
            let Ok(p) = <[usize; 3]>::try_from(p.as_slice()) else {
                bail!("--patch-size needs three values");
            };
            p
        }
        (None, Some(p)) => p,
        (None, None) => bail!("checkpoint has no patch size; pass --patch-size"),
    };

    let image = read_image_stack(image_dir)
        .with_context(|| format!("reading {}", image_dir.display()))?;
    let mut model = ckpt.model;
    let t_start = Instant::now();
    let prediction = predict_volume(&mut model, &image, patch_size)?;
    info!(shape = ?image.shape(), elapsed_ms = t_start.elapsed().as_millis() as u64, "predicted");

    for (channel, name) in prediction.iter().zip(ckpt.target.channel_names()) {
        let dir = output.join(name);
        write_image_stack(channel, &dir)?;
        info!(dir = %dir.display(), "wrote channel");
    }
    Ok(())
}
