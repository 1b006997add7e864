pub mod batcher;
pub mod dataset;
pub mod folder;
pub mod loader;
pub mod split;
pub mod transform;

pub use batcher::{ImageBatch, ImageBatcher};
pub use dataset::{DatasetTransformer, ImageItem};
pub use folder::{find_classes, make_dataset, make_test_dataset, ClassEntry, ClassMap, ImageSample};
pub use loader::{load_data, ImageDataset, Loaders, PreparedData, SplitLoader};
pub use split::{basic_random_split, random_split, random_split_for_unbalanced_dataset, SampleSplit};
pub use transform::{apply_preprocessing, Compose, ImageOp, Normalize, SplitTransforms, TensorImage};
