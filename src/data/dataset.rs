use std::sync::atomic::{AtomicU64, Ordering};

use burn::data::dataset::{Dataset, InMemDataset};
use image::ImageReader;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::error;

use super::{
    folder::ImageSample,
    transform::{Compose, TensorImage},
};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ImageItem {
    pub image: TensorImage,
    pub label: usize,
}

/// Decodes samples lazily and runs them through a transform pipeline.
///
/// Every load draws its random ops from a `ChaCha8Rng` seeded with `seed`,
/// on the stream numbered by the loads made so far. Augmentations repeat for
/// a given read order and still differ from one epoch to the next.
pub struct DatasetTransformer<D> {
    dataset: D,
    transform: Compose,
    seed: u64,
    draws: AtomicU64,
}

impl<D: Dataset<ImageSample>> DatasetTransformer<D> {
    pub fn new(dataset: D, transform: Compose, seed: u64) -> Self {
        Self {
            dataset,
            transform,
            seed,
            draws: AtomicU64::new(0),
        }
    }

    pub fn load(&self, sample: &ImageSample) -> Result<ImageItem> {
        let image = ImageReader::open(&sample.path)?
            .with_guessed_format()?
            .decode()
            .map_err(|source| Error::Image {
                path: sample.path.clone(),
                source,
            })?;

        let draw = self.draws.fetch_add(1, Ordering::Relaxed);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(draw);

        Ok(ImageItem {
            image: self.transform.apply(image, &mut rng),
            label: sample.label,
        })
    }
}

impl DatasetTransformer<InMemDataset<ImageSample>> {
    pub fn from_samples(samples: Vec<ImageSample>, transform: Compose, seed: u64) -> Self {
        Self::new(InMemDataset::new(samples), transform, seed)
    }
}

impl<D: Dataset<ImageSample>> Dataset<ImageItem> for DatasetTransformer<D> {
    fn get(&self, index: usize) -> Option<ImageItem> {
        let sample = self.dataset.get(index)?;

        match self.load(&sample) {
            Ok(item) => Some(item),
            Err(err) => {
                error!("{err}");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}
