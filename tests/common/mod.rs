use std::{fs, path::Path};

use image::{Rgb, RgbImage};

/// Writes `count` small PNGs of varying size and a class-specific colour.
pub fn write_class(dir: &Path, class: &str, count: usize, shade: u8) {
    let class_dir = dir.join(class);
    fs::create_dir_all(&class_dir).unwrap();

    for i in 0..count {
        let (width, height) = (6 + (i % 3) as u32, 5 + (i % 4) as u32);
        RgbImage::from_pixel(width, height, Rgb([shade, 255 - shade, (i * 10) as u8]))
            .save(class_dir.join(format!("img_{i:03}.png")))
            .unwrap();
    }
}

/// `train/` with classes of 10, 5 and 3 images and a `test/` with 2 per class.
pub fn write_dataset(root: &Path) {
    let train = root.join("train");
    write_class(&train, "ant", 10, 20);
    write_class(&train, "bee", 5, 120);
    write_class(&train, "cow", 3, 220);

    let test = root.join("test");
    write_class(&test, "ant", 2, 20);
    write_class(&test, "bee", 2, 120);
    write_class(&test, "cow", 2, 220);
}
