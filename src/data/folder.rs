use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::config::Config;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{
    config::ClassIndexing,
    error::{self, Error},
};

pub const IMG_EXTENSIONS: [&str; 9] = [
    "jpg", "jpeg", "png", "ppm", "bmp", "pgm", "tif", "tiff", "webp",
];

/// One image file and the index of the class folder it was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSample {
    pub path: PathBuf,
    pub label: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassEntry {
    pub name: String,
    pub index: usize,
}

/// Class folder names and their indices, ordered by folder name.
#[derive(Config, Debug, PartialEq, Eq)]
pub struct ClassMap {
    pub classes: Vec<ClassEntry>,
}

impl ClassMap {
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.classes
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.index)
    }

    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.classes
            .iter()
            .find(|entry| entry.index == index)
            .map(|entry| entry.name.as_str())
    }

    /// Width of the logits layer needed to cover every class index.
    pub fn num_outputs(&self) -> usize {
        self.classes
            .iter()
            .map(|entry| entry.index + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassEntry> {
        self.classes.iter()
    }
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMG_EXTENSIONS.contains(&ext.as_str()))
}

fn numeric_prefix(name: &str) -> Option<usize> {
    let digits: String = name.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn class_folder_names(dir: &Path) -> error::Result<Vec<String>> {
    if !dir.is_dir() {
        return Err(Error::MissingDirectory(dir.to_path_buf()));
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !entry.path().is_dir() {
            continue;
        }
        names.push(name);
    }
    names.sort();

    Ok(names)
}

/// Finds the class folders directly under `dir`.
pub fn find_classes(dir: &Path, indexing: ClassIndexing) -> error::Result<ClassMap> {
    let names = class_folder_names(dir)?;
    if names.is_empty() {
        return Err(Error::NoClasses(dir.to_path_buf()));
    }

    let mut classes = Vec::with_capacity(names.len());
    for (position, name) in names.into_iter().enumerate() {
        let index = match indexing {
            ClassIndexing::Sorted => position,
            ClassIndexing::NumericPrefix => {
                numeric_prefix(&name).ok_or_else(|| Error::ClassIndex(name.clone()))?
            }
        };

        if let Some(previous) = classes.iter().find(|c: &&ClassEntry| c.index == index) {
            return Err(Error::DuplicateClassIndex {
                first: previous.name.clone(),
                second: name,
                index,
            });
        }

        classes.push(ClassEntry { name, index });
    }

    debug!("Found {} classes in {}", classes.len(), dir.display());

    Ok(ClassMap { classes })
}

fn collect_class(class_dir: &Path, label: usize) -> error::Result<Vec<ImageSample>> {
    let mut samples = Vec::new();
    if !class_dir.is_dir() {
        return Ok(samples);
    }

    for entry in WalkDir::new(class_dir)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry?;
        if entry.file_type().is_file() && has_image_extension(entry.path()) {
            samples.push(ImageSample {
                path: entry.into_path(),
                label,
            });
        }
    }

    Ok(samples)
}

/// Lists every image under each class folder of `dir`, in class order.
///
/// Fails when a class of `classes` contributes no image at all.
pub fn make_dataset(dir: &Path, classes: &ClassMap) -> error::Result<Vec<ImageSample>> {
    if classes.is_empty() {
        return Err(Error::NoClasses(dir.to_path_buf()));
    }

    let mut samples = Vec::new();
    let mut empty_classes = Vec::new();

    for entry in classes.iter() {
        let found = collect_class(&dir.join(&entry.name), entry.index)?;
        if found.is_empty() {
            empty_classes.push(entry.name.clone());
        }
        samples.extend(found);
    }

    if !empty_classes.is_empty() {
        return Err(Error::EmptyClasses {
            classes: empty_classes.join(", "),
            extensions: IMG_EXTENSIONS.join(", "),
        });
    }

    Ok(samples)
}

/// Lists the images of a held-out tree labelled with the training classes.
///
/// Classes missing from `dir` are allowed, class folders that the training
/// set does not know are not.
pub fn make_test_dataset(dir: &Path, classes: &ClassMap) -> error::Result<Vec<ImageSample>> {
    let mut samples = Vec::new();

    for name in class_folder_names(dir)? {
        let label = classes.index_of(&name).ok_or_else(|| Error::UnknownClass {
            class: name.clone(),
            dir: dir.to_path_buf(),
        })?;
        samples.extend(collect_class(&dir.join(&name), label)?);
    }

    Ok(samples)
}

/// Splits `samples` into images that decode fully and rejected ones.
pub fn verify_samples(samples: Vec<ImageSample>) -> (Vec<ImageSample>, Vec<ImageSample>) {
    samples
        .into_par_iter()
        .partition(|sample| match image::open(&sample.path) {
            Ok(_) => true,
            Err(err) => {
                warn!("Skipping unreadable image {}: {err}", sample.path.display());
                false
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn sorted_indexing_follows_folder_names() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["zebra", "ant", "moose"] {
            fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        touch(&dir.path().join("README.txt"));
        fs::create_dir_all(dir.path().join(".cache")).unwrap();

        let classes = find_classes(dir.path(), ClassIndexing::Sorted).unwrap();

        assert_eq!(classes.len(), 3);
        assert_eq!(classes.index_of("ant"), Some(0));
        assert_eq!(classes.index_of("moose"), Some(1));
        assert_eq!(classes.index_of("zebra"), Some(2));
        assert_eq!(classes.name_of(1), Some("moose"));
        assert_eq!(classes.num_outputs(), 3);
    }

    #[test]
    fn numeric_prefix_indexing() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["001.Albatross", "017.Cardinal"] {
            fs::create_dir_all(dir.path().join(name)).unwrap();
        }

        let classes = find_classes(dir.path(), ClassIndexing::NumericPrefix).unwrap();

        assert_eq!(classes.index_of("001.Albatross"), Some(1));
        assert_eq!(classes.index_of("017.Cardinal"), Some(17));
        assert_eq!(classes.num_outputs(), 18);
    }

    #[test]
    fn numeric_prefix_requires_digits() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("001.Albatross")).unwrap();
        fs::create_dir_all(dir.path().join("Cardinal")).unwrap();

        let err = find_classes(dir.path(), ClassIndexing::NumericPrefix).unwrap_err();
        assert!(matches!(err, Error::ClassIndex(name) if name == "Cardinal"));
    }

    #[test]
    fn numeric_prefix_rejects_collisions() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("01.a")).unwrap();
        fs::create_dir_all(dir.path().join("1.b")).unwrap();

        let err = find_classes(dir.path(), ClassIndexing::NumericPrefix).unwrap_err();
        assert!(matches!(err, Error::DuplicateClassIndex { index: 1, .. }));
    }

    #[test]
    fn missing_and_empty_roots() {
        let dir = tempfile::tempdir().unwrap();

        let err = find_classes(&dir.path().join("nope"), ClassIndexing::Sorted).unwrap_err();
        assert!(matches!(err, Error::MissingDirectory(_)));

        let err = find_classes(dir.path(), ClassIndexing::Sorted).unwrap_err();
        assert!(matches!(err, Error::NoClasses(_)));
    }

    #[test]
    fn make_dataset_walks_nested_folders_in_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("cat/b.jpg"));
        touch(&dir.path().join("cat/a.PNG"));
        touch(&dir.path().join("cat/nested/c.jpeg"));
        touch(&dir.path().join("cat/notes.txt"));
        touch(&dir.path().join("dog/x.bmp"));

        let classes = find_classes(dir.path(), ClassIndexing::Sorted).unwrap();
        let samples = make_dataset(dir.path(), &classes).unwrap();

        let names: Vec<_> = samples
            .iter()
            .map(|s| {
                let rel = s.path.strip_prefix(dir.path()).unwrap();
                (rel.to_string_lossy().replace('\\', "/"), s.label)
            })
            .collect();
        assert_eq!(
            names,
            vec![
                ("cat/a.PNG".to_string(), 0),
                ("cat/b.jpg".to_string(), 0),
                ("cat/nested/c.jpeg".to_string(), 0),
                ("dog/x.bmp".to_string(), 1),
            ]
        );
    }

    #[test]
    fn make_dataset_reports_empty_classes() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("cat/a.jpg"));
        touch(&dir.path().join("dog/readme.md"));
        fs::create_dir_all(dir.path().join("emu")).unwrap();

        let classes = find_classes(dir.path(), ClassIndexing::Sorted).unwrap();
        let err = make_dataset(dir.path(), &classes).unwrap_err();

        match err {
            Error::EmptyClasses {
                classes,
                extensions,
            } => {
                assert_eq!(classes, "dog, emu");
                assert!(extensions.contains("jpeg"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_dataset_uses_training_classes() {
        let train = tempfile::tempdir().unwrap();
        for name in ["cat", "dog", "emu"] {
            fs::create_dir_all(train.path().join(name)).unwrap();
        }
        let classes = find_classes(train.path(), ClassIndexing::Sorted).unwrap();

        let test = tempfile::tempdir().unwrap();
        touch(&test.path().join("emu/1.jpg"));
        touch(&test.path().join("cat/1.jpg"));

        let samples = make_test_dataset(test.path(), &classes).unwrap();
        let labels: Vec<_> = samples.iter().map(|s| s.label).collect();
        assert_eq!(labels, vec![0, 2]);

        touch(&test.path().join("yak/1.jpg"));
        let err = make_test_dataset(test.path(), &classes).unwrap_err();
        assert!(matches!(err, Error::UnknownClass { class, .. } if class == "yak"));
    }

    #[test]
    fn verify_drops_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        image::RgbImage::new(4, 4).save(&good).unwrap();
        let bad = dir.path().join("bad.png");
        fs::write(&bad, b"not an image").unwrap();

        let (kept, rejected) = verify_samples(vec![
            ImageSample {
                path: good.clone(),
                label: 0,
            },
            ImageSample {
                path: bad.clone(),
                label: 1,
            },
        ]);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].path, good);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].path, bad);
    }

    #[test]
    fn verify_drops_images_with_truncated_pixel_data() {
        let dir = tempfile::tempdir().unwrap();
        let full = dir.path().join("full.png");
        image::RgbImage::from_fn(32, 32, |x, y| {
            image::Rgb([(x * 7) as u8, (y * 5) as u8, (x ^ y) as u8])
        })
        .save(&full)
        .unwrap();
        let bytes = fs::read(&full).unwrap();
        let cut = dir.path().join("cut.png");
        fs::write(&cut, &bytes[..bytes.len() / 2]).unwrap();
        assert!(image::image_dimensions(&cut).is_ok());

        let (kept, rejected) = verify_samples(vec![ImageSample {
            path: cut.clone(),
            label: 0,
        }]);

        assert!(kept.is_empty());
        assert_eq!(rejected[0].path, cut);
    }
}
