use std::path::PathBuf;

use burn::{nn::loss::CrossEntropyLoss, prelude::*, record::CompactRecorder};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::{
    data::SplitLoader,
    error::{Error, Result},
    metrics::{EpochAccumulator, EpochMetrics},
    model::ImageClassifier,
};

/// Keeps the model with the lowest loss seen so far on disk.
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    filepath: PathBuf,
    min_loss: Option<f64>,
}

impl ModelCheckpoint {
    /// `filepath` has no extension, the recorder adds its own.
    pub fn new(filepath: impl Into<PathBuf>) -> Self {
        Self {
            filepath: filepath.into(),
            min_loss: None,
        }
    }

    pub fn min_loss(&self) -> Option<f64> {
        self.min_loss
    }

    /// Saves `model` when `loss` beats every earlier loss. Returns whether it did.
    /// Non-finite losses never replace the checkpoint.
    pub fn update<B: Backend, M: Module<B>>(&mut self, model: &M, loss: f64) -> Result<bool> {
        if !loss.is_finite() {
            warn!("Ignoring non-finite loss {loss} for the checkpoint");
            return Ok(false);
        }
        if self.min_loss.is_some_and(|min| loss >= min) {
            return Ok(false);
        }

        info!("Saving a better model (loss {loss:.4})");
        model
            .clone()
            .save_file(self.filepath.clone(), &CompactRecorder::new())
            .map_err(|e| Error::Record(e.to_string()))?;
        self.min_loss = Some(loss);

        Ok(true)
    }
}

pub(crate) fn class_indices<B: Backend>(tensor: Tensor<B, 1, Int>) -> Result<Vec<usize>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map(|values| values.into_iter().map(|v| v as usize).collect())
        .map_err(|e| Error::TensorData(format!("{e:?}")))
}

/// Arg-max class per row of `[batch, classes]` scores.
pub(crate) fn predicted_classes<B: Backend>(scores: Tensor<B, 2>) -> Result<Vec<usize>> {
    class_indices(scores.argmax(1).squeeze(1))
}

/// Closes an epoch, failing when the loader stopped before its last sample.
pub(crate) fn finish_epoch<B: Backend>(
    accumulator: &EpochAccumulator,
    loader: &SplitLoader<B>,
) -> Result<EpochMetrics> {
    if accumulator.n_samples() != loader.len() {
        return Err(Error::IncompleteEpoch {
            expected: loader.len(),
            seen: accumulator.n_samples(),
        });
    }
    accumulator.finish()
}

pub(crate) fn progress_bar(len: usize, label: &str) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    let template = "{prefix} {bar:40.cyan/blue} {pos}/{len} [{elapsed_precise}] {msg}";
    if let Ok(style) = ProgressStyle::with_template(template) {
        bar.set_style(style);
    }
    bar.set_prefix(label.to_string());
    bar
}

/// Runs the model over every batch of `loader` without gradients and
/// returns the epoch loss, accuracy and weighted F1.
///
/// Use a non-autodiff backend (e.g. the result of `AutodiffModule::valid`)
/// so that layers like dropout and batch norm run in inference mode.
pub fn test_one_epoch<B, M>(
    model: &M,
    loader: &SplitLoader<B>,
    f_loss: &CrossEntropyLoss<B>,
) -> Result<EpochMetrics>
where
    B: Backend,
    M: ImageClassifier<B>,
{
    let bar = progress_bar(loader.num_batches(), "eval");
    let mut accumulator = EpochAccumulator::new();

    for batch in loader.iter() {
        let outputs = model.forward(batch.images);

        let loss = f_loss
            .forward(outputs.clone(), batch.targets.clone())
            .into_scalar()
            .elem::<f64>();

        let predictions = predicted_classes(outputs)?;
        let targets = class_indices(batch.targets)?;
        accumulator.update(loss, &predictions, &targets);

        bar.inc(1);
    }
    bar.finish_and_clear();

    finish_epoch(&accumulator, loader)
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;
    use crate::model::BaselineCnnConfig;

    #[test]
    fn argmax_per_row() {
        let device = Default::default();
        let scores =
            Tensor::<NdArray, 2>::from_floats([[0.1, 2.0, -1.0], [3.0, 0.0, 0.5]], &device);

        assert_eq!(predicted_classes(scores).unwrap(), vec![1, 0]);
    }

    #[test]
    fn checkpoint_keeps_only_improvements() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model = BaselineCnnConfig::new(2)
            .with_channels(vec![2])
            .init::<NdArray>(&device);

        let mut checkpoint = ModelCheckpoint::new(dir.path().join("best"));

        assert!(checkpoint.update::<NdArray, _>(&model, 1.5).unwrap());
        assert!(dir.path().join("best.mpk").exists());
        assert!(!checkpoint.update::<NdArray, _>(&model, 1.5).unwrap());
        assert!(!checkpoint.update::<NdArray, _>(&model, 2.0).unwrap());
        assert!(checkpoint.update::<NdArray, _>(&model, 0.7).unwrap());
        assert_eq!(checkpoint.min_loss(), Some(0.7));
    }

    #[test]
    fn checkpoint_ignores_non_finite_losses() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model = BaselineCnnConfig::new(2)
            .with_channels(vec![2])
            .init::<NdArray>(&device);

        let mut checkpoint = ModelCheckpoint::new(dir.path().join("best"));

        assert!(!checkpoint.update::<NdArray, _>(&model, f64::NAN).unwrap());
        assert!(!dir.path().join("best.mpk").exists());
        assert_eq!(checkpoint.min_loss(), None);

        assert!(checkpoint.update::<NdArray, _>(&model, 0.9).unwrap());
        assert!(!checkpoint.update::<NdArray, _>(&model, f64::NAN).unwrap());
        assert!(!checkpoint.update::<NdArray, _>(&model, f64::INFINITY).unwrap());
        assert_eq!(checkpoint.min_loss(), Some(0.9));
    }
}
