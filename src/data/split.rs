//! Train/validation partitioning of a class folder tree.
//!
//! Two strategies are offered. The basic split draws one random permutation
//! over every image, so a rare class may end up missing from one side. The
//! smart split applies the ratio inside each class before concatenating, which
//! keeps class proportions equal between train and validation.

use std::path::Path;

use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::folder::{find_classes, make_dataset, ClassMap, ImageSample};
use crate::{config::ClassIndexing, error::Result};

#[derive(Debug, Clone)]
pub struct SampleSplit {
    pub classes: ClassMap,
    pub train: Vec<ImageSample>,
    pub valid: Vec<ImageSample>,
}

/// Number of training items kept out of `len` for a given validation ratio.
pub fn train_count(len: usize, valid_ratio: f64) -> usize {
    (((1.0 - valid_ratio) * len as f64) as usize).min(len)
}

/// Randomly partitions `items`: the first `train_count` items of a random
/// permutation go to train, the rest to validation.
pub fn random_split<T: Clone, R: Rng + ?Sized>(
    items: &[T],
    valid_ratio: f64,
    rng: &mut R,
) -> (Vec<T>, Vec<T>) {
    let nb_train = train_count(items.len(), valid_ratio);

    let mut indices: Vec<usize> = (0..items.len()).collect();
    indices.shuffle(rng);

    let (train, valid) = indices.split_at(nb_train);
    (
        train.iter().map(|&i| items[i].clone()).collect(),
        valid.iter().map(|&i| items[i].clone()).collect(),
    )
}

/// One global split over every image under `path_to_train`.
pub fn basic_random_split(
    path_to_train: &Path,
    valid_ratio: f64,
    indexing: ClassIndexing,
    seed: u64,
) -> Result<SampleSplit> {
    let classes = find_classes(path_to_train, indexing)?;
    let samples = make_dataset(path_to_train, &classes)?;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let (train, valid) = random_split(&samples, valid_ratio, &mut rng);

    Ok(SampleSplit {
        classes,
        train,
        valid,
    })
}

/// Splits each class on its own with the same ratio, then concatenates the
/// per-class parts in class order.
pub fn random_split_for_unbalanced_dataset(
    path_to_train: &Path,
    valid_ratio: f64,
    indexing: ClassIndexing,
    seed: u64,
) -> Result<SampleSplit> {
    let classes = find_classes(path_to_train, indexing)?;
    let samples = make_dataset(path_to_train, &classes)?;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(samples.len());
    let mut valid = Vec::new();

    for entry in classes.iter() {
        let class_samples: Vec<_> = samples
            .iter()
            .filter(|sample| sample.label == entry.index)
            .cloned()
            .collect();

        let (class_train, class_valid) = random_split(&class_samples, valid_ratio, &mut rng);
        debug!(
            "Class '{}': {} train, {} valid",
            entry.name,
            class_train.len(),
            class_valid.len()
        );

        train.extend(class_train);
        valid.extend(class_valid);
    }

    Ok(SampleSplit {
        classes,
        train,
        valid,
    })
}
