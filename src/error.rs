use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("dataset directory does not exist: {0}")]
    MissingDirectory(PathBuf),

    #[error("no class folders found in {0}")]
    NoClasses(PathBuf),

    #[error("class folder '{0}' does not start with a numeric class index")]
    ClassIndex(String),

    #[error("class folders '{first}' and '{second}' map to the same index {index}")]
    DuplicateClassIndex {
        first: String,
        second: String,
        index: usize,
    },

    #[error("found no valid file for the classes {classes}. Supported extensions are: {extensions}")]
    EmptyClasses { classes: String, extensions: String },

    #[error("class folder '{class}' in {dir} is not a training class")]
    UnknownClass { class: String, dir: PathBuf },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to load image at '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("cannot compute metrics over an epoch without samples")]
    EmptyEpoch,

    #[error("epoch stopped after {seen} of {expected} samples, an image failed to load")]
    IncompleteEpoch { expected: usize, seen: usize },

    #[error("valid_ratio {ratio} leaves no training image out of {total}")]
    EmptyTrainSplit { ratio: f64, total: usize },

    #[error("tensor data error: {0}")]
    TensorData(String),

    #[error("model record error: {0}")]
    Record(String),

    #[error("failed to walk dataset directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
