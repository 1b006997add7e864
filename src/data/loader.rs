use std::sync::Arc;

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder, DataLoaderIterator},
        dataset::{Dataset, InMemDataset},
    },
    prelude::*,
};
use tracing::{debug, info, warn};

use super::{
    batcher::{ImageBatch, ImageBatcher},
    dataset::{DatasetTransformer, ImageItem},
    folder::{make_test_dataset, verify_samples, ClassMap, ImageSample},
    split::{basic_random_split, random_split_for_unbalanced_dataset},
    transform::{apply_preprocessing, Compose},
};
use crate::{
    config::{DataConfig, DatasetConfig},
    error::{Error, Result},
};

pub type ImageDataset = DatasetTransformer<InMemDataset<ImageSample>>;

pub fn num_batches(len: usize, batch_size: usize) -> usize {
    len.div_ceil(batch_size.max(1))
}

/// A burn data loader over one partition, together with its size.
pub struct SplitLoader<B: Backend> {
    loader: Arc<dyn DataLoader<ImageBatch<B>>>,
    len: usize,
    batch_size: usize,
}

impl<B: Backend> SplitLoader<B> {
    /// `shuffle` carries the seed for partitions read in random order.
    pub fn new<D>(
        dataset: D,
        batch_size: usize,
        num_threads: usize,
        shuffle: Option<u64>,
        device: B::Device,
    ) -> Self
    where
        D: Dataset<ImageItem> + 'static,
    {
        let len = dataset.len();

        let mut builder =
            DataLoaderBuilder::new(ImageBatcher::<B>::new(device)).batch_size(batch_size);
        if let Some(seed) = shuffle {
            builder = builder.shuffle(seed);
        }
        if num_threads > 0 {
            builder = builder.num_workers(num_threads);
        }

        Self {
            loader: builder.build(dataset),
            len,
            batch_size,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn num_batches(&self) -> usize {
        num_batches(self.len, self.batch_size)
    }

    pub fn iter(&self) -> Box<dyn DataLoaderIterator<ImageBatch<B>> + '_> {
        self.loader.iter()
    }
}

pub struct Loaders<BT: Backend, BE: Backend> {
    pub train: SplitLoader<BT>,
    pub valid: SplitLoader<BE>,
    pub test: Option<SplitLoader<BE>>,
}

/// Train, validation and test partitions ready to be wrapped in loaders.
pub struct PreparedData {
    pub classes: ClassMap,
    pub train: ImageDataset,
    pub valid: ImageDataset,
    pub test: Option<ImageDataset>,
}

impl PreparedData {
    /// Train batches land on `train_device`, validation and test batches on
    /// `eval_device`. Only the train partition is shuffled.
    pub fn into_loaders<BT: Backend, BE: Backend>(
        self,
        config: &DatasetConfig,
        train_device: BT::Device,
        eval_device: BE::Device,
    ) -> Loaders<BT, BE> {
        let train = SplitLoader::new(
            self.train,
            config.batch_size,
            config.num_threads,
            Some(config.seed),
            train_device,
        );
        let valid = SplitLoader::new(
            self.valid,
            config.batch_size,
            config.num_threads,
            None,
            eval_device.clone(),
        );
        let test = self.test.map(|test| {
            SplitLoader::new(test, config.batch_size, config.num_threads, None, eval_device)
        });

        Loaders { train, valid, test }
    }
}

fn verified(samples: Vec<ImageSample>, name: &str) -> Vec<ImageSample> {
    let (kept, rejected) = verify_samples(samples);
    if !rejected.is_empty() {
        warn!(
            "Dropped {} unreadable images from the {name} set",
            rejected.len()
        );
    }
    kept
}

fn report(name: &str, len: usize, batch_size: usize, verbose: bool) {
    let batches = num_batches(len, batch_size);
    if verbose {
        info!("The {name} set contains {len} images, in {batches} batches");
    } else {
        debug!("The {name} set contains {len} images, in {batches} batches");
    }
}

/// Discovers `train/` and `test/` under the data directory, splits the
/// training tree and attaches the per-partition transforms.
pub fn load_data(config: &DataConfig) -> Result<PreparedData> {
    config.validate()?;
    let dataset = &config.dataset;
    let path_to_train = config.train_dir();

    let split = if dataset.smart_split {
        random_split_for_unbalanced_dataset(
            &path_to_train,
            dataset.valid_ratio,
            dataset.class_indexing,
            dataset.seed,
        )?
    } else {
        basic_random_split(
            &path_to_train,
            dataset.valid_ratio,
            dataset.class_indexing,
            dataset.seed,
        )?
    };

    if split.train.is_empty() {
        return Err(Error::EmptyTrainSplit {
            ratio: dataset.valid_ratio,
            total: split.valid.len(),
        });
    }

    let path_to_test = config.test_dir();
    let test_samples = if path_to_test.is_dir() {
        Some(make_test_dataset(&path_to_test, &split.classes)?)
    } else {
        warn!(
            "No test directory at {}, the test set is skipped",
            path_to_test.display()
        );
        None
    };

    let (train, valid, test) = if dataset.verify_images {
        (
            verified(split.train, "train"),
            verified(split.valid, "validation"),
            test_samples.map(|samples| verified(samples, "test")),
        )
    } else {
        (split.train, split.valid, test_samples)
    };

    let transforms = apply_preprocessing(&dataset.preprocessing);
    let wrap = |samples: Vec<ImageSample>, transform: Compose| {
        DatasetTransformer::from_samples(samples, transform, dataset.seed)
    };

    report("train", train.len(), dataset.batch_size, dataset.verbosity);
    report("validation", valid.len(), dataset.batch_size, dataset.verbosity);
    if let Some(test) = &test {
        report("test", test.len(), dataset.batch_size, dataset.verbosity);
    }

    Ok(PreparedData {
        classes: split.classes,
        train: wrap(train, transforms.train),
        valid: wrap(valid, transforms.valid),
        test: test.map(|test| wrap(test, transforms.test)),
    })
}
