use std::{fs, path::Path};

use burn::{
    module::AutodiffModule,
    nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig},
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    config::DataConfig,
    data::{load_data, ClassMap, SplitLoader},
    error::{self, Error},
    metrics::{EpochAccumulator, EpochMetrics},
    model::{BaselineCnn, BaselineCnnConfig, ImageClassifier},
    valid::{
        class_indices, finish_epoch, predicted_classes, progress_bar, test_one_epoch,
        ModelCheckpoint,
    },
};

pub const CONFIG_FILE: &str = "config.json";
pub const MODEL_CONFIG_FILE: &str = "model.json";
pub const CLASSES_FILE: &str = "classes.json";
pub const BEST_MODEL_FILE: &str = "best_model";

#[derive(Config)]
pub struct TrainingConfig {
    pub data: DataConfig,

    pub optimizer: AdamConfig,

    #[config(default = 10)]
    pub epoch_count: usize,

    #[config(default = 42)]
    pub seed: u64,

    #[config(default = 1.0e-4)]
    pub learning_rate: f64,

    #[config(default = "vec![32, 64, 128]")]
    pub channels: Vec<usize>,

    #[config(default = 0.5)]
    pub dropout: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalSplit {
    Valid,
    Test,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub train: EpochMetrics,
    pub valid: Option<EpochMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub history: Vec<EpochSummary>,
    pub best_loss: Option<f64>,
    pub test: Option<EpochMetrics>,
}

fn create_artifact_dir(artifact_dir: &Path) -> error::Result<()> {
    fs::remove_dir_all(artifact_dir).ok();
    fs::create_dir_all(artifact_dir)?;
    Ok(())
}

fn config_error(path: &Path, err: impl std::fmt::Display) -> Error {
    Error::Config(format!("cannot read {}: {err}", path.display()))
}

/// One pass over `loader` with a gradient step per batch.
pub fn train_one_epoch<B, M, O>(
    mut model: M,
    optim: &mut O,
    loader: &SplitLoader<B>,
    learning_rate: f64,
    f_loss: &CrossEntropyLoss<B>,
) -> error::Result<(M, EpochMetrics)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ImageClassifier<B>,
    O: Optimizer<M, B>,
{
    let bar = progress_bar(loader.num_batches(), "train");
    let mut accumulator = EpochAccumulator::new();

    for batch in loader.iter() {
        let outputs = model.forward(batch.images);
        let loss = f_loss.forward(outputs.clone(), batch.targets.clone());

        let predictions = predicted_classes(outputs)?;
        let targets = class_indices(batch.targets)?;
        accumulator.update(
            loss.clone().into_scalar().elem::<f64>(),
            &predictions,
            &targets,
        );

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optim.step(learning_rate, model, grads);

        bar.inc(1);
    }
    bar.finish_and_clear();

    let metrics = finish_epoch(&accumulator, loader)?;
    Ok((model, metrics))
}

/// Restores the best checkpoint written by [`train`].
pub fn load_model<B: Backend>(
    artifact_dir: &Path,
    device: &B::Device,
) -> error::Result<BaselineCnn<B>> {
    let config_path = artifact_dir.join(MODEL_CONFIG_FILE);
    let model_config =
        BaselineCnnConfig::load(&config_path).map_err(|e| config_error(&config_path, e))?;

    model_config
        .init::<B>(device)
        .load_file(
            artifact_dir.join(BEST_MODEL_FILE),
            &CompactRecorder::new(),
            device,
        )
        .map_err(|e| Error::Record(e.to_string()))
}

pub fn train<B: AutodiffBackend>(
    artifact_dir: &Path,
    config: TrainingConfig,
    device: B::Device,
) -> error::Result<TrainingReport> {
    config.data.validate()?;
    create_artifact_dir(artifact_dir)?;
    config.save(artifact_dir.join(CONFIG_FILE))?;

    B::seed(config.seed);

    let data = load_data(&config.data)?;
    data.classes.save(artifact_dir.join(CLASSES_FILE))?;

    let model_config = BaselineCnnConfig::new(data.classes.num_outputs())
        .with_channels(config.channels.clone())
        .with_dropout(config.dropout);
    model_config.save(artifact_dir.join(MODEL_CONFIG_FILE))?;

    let loaders = data.into_loaders::<B, B::InnerBackend>(
        &config.data.dataset,
        device.clone(),
        device.clone(),
    );
    if loaders.valid.is_empty() {
        warn!("The validation set is empty, checkpoints follow the training loss");
    }

    let mut model = model_config.init::<B>(&device);
    let mut optim = config.optimizer.init::<B, BaselineCnn<B>>();
    let loss_train = CrossEntropyLossConfig::new().init::<B>(&device);
    let loss_eval = CrossEntropyLossConfig::new().init::<B::InnerBackend>(&device);

    let mut checkpoint = ModelCheckpoint::new(artifact_dir.join(BEST_MODEL_FILE));
    let mut history = Vec::with_capacity(config.epoch_count);

    for epoch in 1..=config.epoch_count {
        let (trained, train_metrics) = train_one_epoch(
            model,
            &mut optim,
            &loaders.train,
            config.learning_rate,
            &loss_train,
        )?;
        model = trained;

        let model_valid = model.valid();
        let valid_metrics = if loaders.valid.is_empty() {
            None
        } else {
            Some(test_one_epoch(&model_valid, &loaders.valid, &loss_eval)?)
        };

        match &valid_metrics {
            Some(valid) => info!(
                "Epoch {epoch}/{}: train {train_metrics} | valid {valid}",
                config.epoch_count
            ),
            None => info!("Epoch {epoch}/{}: train {train_metrics}", config.epoch_count),
        }

        let monitored = valid_metrics.map_or(train_metrics.loss, |valid| valid.loss);
        checkpoint.update::<B::InnerBackend, _>(&model_valid, monitored)?;

        history.push(EpochSummary {
            epoch,
            train: train_metrics,
            valid: valid_metrics,
        });
    }

    let test = match &loaders.test {
        Some(test_loader) if !test_loader.is_empty() && checkpoint.min_loss().is_some() => {
            let best = load_model::<B::InnerBackend>(artifact_dir, &device)?;
            let metrics = test_one_epoch(&best, test_loader, &loss_eval)?;
            info!("Test: {metrics}");
            Some(metrics)
        }
        _ => None,
    };

    Ok(TrainingReport {
        history,
        best_loss: checkpoint.min_loss(),
        test,
    })
}

/// Scores the best checkpoint in `artifact_dir` on the validation or test
/// partition. The split is rebuilt from the saved configuration, so the
/// validation images are the ones held out during training.
pub fn evaluate<B: Backend>(
    artifact_dir: &Path,
    split: EvalSplit,
    device: B::Device,
) -> error::Result<EpochMetrics> {
    let config_path = artifact_dir.join(CONFIG_FILE);
    let config =
        TrainingConfig::load(&config_path).map_err(|e| config_error(&config_path, e))?;
    let classes_path = artifact_dir.join(CLASSES_FILE);
    let classes = ClassMap::load(&classes_path).map_err(|e| config_error(&classes_path, e))?;

    let model = load_model::<B>(artifact_dir, &device)?;
    let data = load_data(&config.data)?;
    if data.classes != classes {
        return Err(Error::Config(format!(
            "class folders under {} changed since training",
            config.data.train_dir().display()
        )));
    }

    let dataset = match split {
        EvalSplit::Valid => data.valid,
        EvalSplit::Test => data
            .test
            .ok_or_else(|| Error::MissingDirectory(config.data.test_dir()))?,
    };

    let dataset_config = &config.data.dataset;
    let loader = SplitLoader::<B>::new(
        dataset,
        dataset_config.batch_size,
        dataset_config.num_threads,
        None,
        device.clone(),
    );
    let loss = CrossEntropyLossConfig::new().init::<B>(&device);

    test_one_epoch(&model, &loader, &loss)
}
