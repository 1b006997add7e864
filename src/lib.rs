//! Image classification over class-labelled folders: dataset discovery and
//! splitting, preprocessing, batched loading and epoch evaluation on `burn`.

pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod training;
pub mod valid;

pub use config::{ClassIndexing, DataConfig, DatasetConfig, PreprocessingConfig};
pub use error::{Error, Result};
pub use metrics::{EpochAccumulator, EpochMetrics};
pub use model::{BaselineCnn, BaselineCnnConfig, ImageClassifier};
pub use training::{evaluate, train, EvalSplit, TrainingConfig, TrainingReport};
pub use valid::{test_one_epoch, ModelCheckpoint};
