use std::path::PathBuf;

use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::error::{self, Error};

/// How a class folder name turns into a class index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassIndexing {
    /// Position of the folder in the sorted list of class folders.
    Sorted,
    /// Leading decimal digits of the folder name, e.g. `017.Cardinal` is 17.
    NumericPrefix,
}

#[derive(Config, Debug)]
pub struct PreprocessingConfig {
    /// Target size as `[height, width]`.
    #[config(default = "[224, 224]")]
    pub resize: [usize; 2],

    pub center_crop: Option<[usize; 2]>,

    #[config(default = 0.5)]
    pub horizontal_flip: f64,

    #[config(default = 0.0)]
    pub vertical_flip: f64,

    #[config(default = true)]
    pub normalize: bool,

    #[config(default = "[0.485, 0.456, 0.406]")]
    pub mean: [f32; 3],

    #[config(default = "[0.229, 0.224, 0.225]")]
    pub std: [f32; 3],
}

impl PreprocessingConfig {
    pub fn validate(&self) -> error::Result<()> {
        let [height, width] = self.resize;
        if height == 0 || width == 0 {
            return Err(Error::Config(format!(
                "resize must be non-zero, got {height}x{width}"
            )));
        }

        if let Some([crop_height, crop_width]) = self.center_crop {
            if crop_height == 0 || crop_width == 0 {
                return Err(Error::Config(format!(
                    "center crop must be non-zero, got {crop_height}x{crop_width}"
                )));
            }
            if crop_height > height || crop_width > width {
                return Err(Error::Config(format!(
                    "center crop {crop_height}x{crop_width} exceeds resize {height}x{width}"
                )));
            }
        }

        for (name, p) in [
            ("horizontal_flip", self.horizontal_flip),
            ("vertical_flip", self.vertical_flip),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::Config(format!(
                    "{name} probability must be in [0, 1], got {p}"
                )));
            }
        }

        if self.normalize && self.std.iter().any(|s| *s <= 0.0) {
            return Err(Error::Config(format!(
                "normalization std must be positive, got {:?}",
                self.std
            )));
        }

        Ok(())
    }
}

#[derive(Config, Debug)]
pub struct DatasetConfig {
    /// Split the train/validation ratio inside each class instead of globally.
    #[config(default = true)]
    pub smart_split: bool,

    /// Share of each split held out for validation, in `[0, 1)`.
    #[config(default = 0.2)]
    pub valid_ratio: f64,

    #[config(default = 32)]
    pub batch_size: usize,

    /// Loader worker threads; 0 loads batches on the calling thread.
    #[config(default = 4)]
    pub num_threads: usize,

    #[config(default = true)]
    pub verbosity: bool,

    #[config(default = 42)]
    pub seed: u64,

    #[config(default = "ClassIndexing::Sorted")]
    pub class_indexing: ClassIndexing,

    /// Decode every image before training and drop unreadable files.
    #[config(default = true)]
    pub verify_images: bool,

    #[config(default = "PreprocessingConfig::new()")]
    pub preprocessing: PreprocessingConfig,
}

impl DatasetConfig {
    pub fn validate(&self) -> error::Result<()> {
        if !(0.0..1.0).contains(&self.valid_ratio) {
            return Err(Error::Config(format!(
                "valid_ratio must be in [0, 1), got {}",
                self.valid_ratio
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }

        self.preprocessing.validate()
    }
}

#[derive(Config, Debug)]
pub struct DataConfig {
    /// Root holding the `train/` and `test/` class folder trees.
    pub data_dir: PathBuf,

    #[config(default = "DatasetConfig::new()")]
    pub dataset: DatasetConfig,
}

impl DataConfig {
    pub fn train_dir(&self) -> PathBuf {
        self.data_dir.join("train")
    }

    pub fn test_dir(&self) -> PathBuf {
        self.data_dir.join("test")
    }

    pub fn validate(&self) -> error::Result<()> {
        self.dataset.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DataConfig::new(PathBuf::from("data"));

        assert!(config.validate().is_ok());
        assert!(config.dataset.smart_split);
        assert_eq!(config.dataset.class_indexing, ClassIndexing::Sorted);
        assert_eq!(config.train_dir(), PathBuf::from("data").join("train"));
        assert_eq!(config.test_dir(), PathBuf::from("data").join("test"));
    }

    #[test]
    fn rejects_out_of_range_ratio() {
        for ratio in [1.5, 1.0, -0.1] {
            let config = DatasetConfig::new().with_valid_ratio(ratio);
            assert!(matches!(config.validate(), Err(Error::Config(_))));
        }
    }

    #[test]
    fn rejects_zero_batch_size() {
        let config = DatasetConfig::new().with_batch_size(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_crop_larger_than_resize() {
        let config = PreprocessingConfig::new()
            .with_resize([64, 64])
            .with_center_crop(Some([65, 32]));
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = config.with_center_crop(Some([64, 32]));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_flip_probability() {
        let config = PreprocessingConfig::new().with_vertical_flip(-0.1);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");

        let config = DataConfig::new(PathBuf::from("/srv/birds")).with_dataset(
            DatasetConfig::new()
                .with_smart_split(false)
                .with_class_indexing(ClassIndexing::NumericPrefix),
        );
        config.save(&path).unwrap();

        let loaded = DataConfig::load(&path).unwrap();
        assert_eq!(loaded.data_dir, PathBuf::from("/srv/birds"));
        assert!(!loaded.dataset.smart_split);
        assert_eq!(loaded.dataset.class_indexing, ClassIndexing::NumericPrefix);
    }
}
