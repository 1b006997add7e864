use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    optim::AdamConfig,
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use clap::{Parser, Subcommand, ValueEnum};
use folder_classifier::{
    data::load_data, evaluate, logging, train, DataConfig, EvalSplit, TrainingConfig,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "folder-classifier",
    about = "Split class-labelled image folders, train a classifier and evaluate it"
)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(long, value_enum, default_value_t = BackendKind::Wgpu, global = true)]
    backend: BackendKind,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a training configuration with default values.
    InitConfig {
        /// Root holding the train/ and test/ folders.
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long, default_value = "config.json")]
        output: PathBuf,
    },
    /// Discover and split the dataset, then report partition sizes.
    Split {
        #[arg(long)]
        config: PathBuf,
    },
    /// Train the baseline classifier, keeping the best validation checkpoint.
    Train {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value = "artifact")]
        artifact_dir: PathBuf,
    },
    /// Evaluate the saved checkpoint for one epoch.
    Valid {
        #[arg(long, default_value = "artifact")]
        artifact_dir: PathBuf,
        #[arg(long, value_enum, default_value_t = SplitArg::Test)]
        split: SplitArg,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendKind {
    Wgpu,
    Ndarray,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SplitArg {
    Valid,
    Test,
}

impl From<SplitArg> for EvalSplit {
    fn from(split: SplitArg) -> Self {
        match split {
            SplitArg::Valid => EvalSplit::Valid,
            SplitArg::Test => EvalSplit::Test,
        }
    }
}

fn load_config(path: &Path) -> Result<TrainingConfig> {
    TrainingConfig::load(path)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("failed to read config {}", path.display()))
}

fn run<B: AutodiffBackend>(command: Command, device: B::Device) -> Result<()> {
    match command {
        Command::InitConfig { data_dir, output } => {
            let config = TrainingConfig::new(DataConfig::new(data_dir), AdamConfig::new());
            config
                .save(&output)
                .with_context(|| format!("failed to write {}", output.display()))?;
            info!("Wrote default configuration to {}", output.display());
        }
        Command::Split { config } => {
            let config = load_config(&config)?;
            let data = load_data(&config.data).context("failed to prepare the dataset")?;

            for entry in data.classes.iter() {
                info!("class {:>4}: {}", entry.index, entry.name);
            }

            let loaders =
                data.into_loaders::<B, B>(&config.data.dataset, device.clone(), device);
            info!(
                "Loaders ready: {} train, {} validation, {} test batches",
                loaders.train.num_batches(),
                loaders.valid.num_batches(),
                loaders.test.as_ref().map_or(0, |test| test.num_batches())
            );
        }
        Command::Train {
            config,
            artifact_dir,
        } => {
            let config = load_config(&config)?;
            let report = train::<B>(&artifact_dir, config, device).context("training failed")?;

            if let Some(best) = report.best_loss {
                info!("Best monitored loss: {best:.4}");
            }
            if let Some(test) = report.test {
                info!("Test set: {test}");
            }
        }
        Command::Valid {
            artifact_dir,
            split,
        } => {
            let metrics = evaluate::<B::InnerBackend>(&artifact_dir, split.into(), device)
                .context("evaluation failed")?;
            println!("{metrics}");
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    match cli.backend {
        BackendKind::Wgpu => run::<Autodiff<Wgpu<f32, i32>>>(cli.command, WgpuDevice::default()),
        BackendKind::Ndarray => run::<Autodiff<NdArray>>(cli.command, NdArrayDevice::default()),
    }
}
