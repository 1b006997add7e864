use image::{imageops::FilterType, DynamicImage};
use rand::Rng;

use crate::config::PreprocessingConfig;

const CHANNEL_COUNT: usize = 3;

/// Channel-first `f32` pixels, shaped `[channels, height, width]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorImage {
    pub data: Vec<f32>,
    pub shape: [usize; 3],
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageOp {
    Resize { height: usize, width: usize },
    CenterCrop { height: usize, width: usize },
    RandomHorizontalFlip(f64),
    RandomVerticalFlip(f64),
}

impl ImageOp {
    pub fn apply<R: Rng>(&self, image: DynamicImage, rng: &mut R) -> DynamicImage {
        match *self {
            ImageOp::Resize { height, width } => {
                image.resize_exact(width as u32, height as u32, FilterType::Triangle)
            }
            ImageOp::CenterCrop { height, width } => {
                let (height, width) = (
                    (height as u32).min(image.height()),
                    (width as u32).min(image.width()),
                );
                let top = (image.height() - height) / 2;
                let left = (image.width() - width) / 2;
                image.crop_imm(left, top, width, height)
            }
            ImageOp::RandomHorizontalFlip(p) => {
                if rng.gen::<f64>() < p {
                    image.fliph()
                } else {
                    image
                }
            }
            ImageOp::RandomVerticalFlip(p) => {
                if rng.gen::<f64>() < p {
                    image.flipv()
                } else {
                    image
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalize {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalize {
    pub fn apply(&self, image: &mut TensorImage) {
        let plane = image.shape[1] * image.shape[2];
        for (channel, values) in image.data.chunks_mut(plane).enumerate() {
            let (mean, std) = (self.mean[channel], self.std[channel]);
            values.iter_mut().for_each(|v| *v = (*v - mean) / std);
        }
    }
}

/// Image ops applied in order, then conversion to `[0, 1]` floats and an
/// optional normalization.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Compose {
    pub ops: Vec<ImageOp>,
    pub normalize: Option<Normalize>,
}

impl Compose {
    pub fn new(ops: Vec<ImageOp>, normalize: Option<Normalize>) -> Self {
        Self { ops, normalize }
    }

    pub fn apply<R: Rng>(&self, image: DynamicImage, rng: &mut R) -> TensorImage {
        let image = self.ops.iter().fold(image, |image, op| op.apply(image, rng));

        let mut tensor = to_tensor(&image);
        if let Some(normalize) = &self.normalize {
            normalize.apply(&mut tensor);
        }
        tensor
    }

    /// Shape every output shares, known when the last sizing op is fixed.
    pub fn output_shape(&self) -> Option<[usize; 3]> {
        let mut shape = None;
        for op in &self.ops {
            match *op {
                ImageOp::Resize { height, width } => shape = Some([CHANNEL_COUNT, height, width]),
                ImageOp::CenterCrop { height, width } => {
                    shape = shape.map(|[c, h, w]: [usize; 3]| [c, h.min(height), w.min(width)])
                }
                _ => {}
            }
        }
        shape
    }
}

fn to_tensor(image: &DynamicImage) -> TensorImage {
    let rgb = image.to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    let plane = width * height;

    let mut data = vec![0.0f32; CHANNEL_COUNT * plane];
    for (i, pixel) in rgb.pixels().enumerate() {
        let [r, g, b] = pixel.0;
        data[i] = r as f32 / 255.0;
        data[plane + i] = g as f32 / 255.0;
        data[2 * plane + i] = b as f32 / 255.0;
    }

    TensorImage {
        data,
        shape: [CHANNEL_COUNT, height, width],
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitTransforms {
    pub train: Compose,
    pub valid: Compose,
    pub test: Compose,
}

pub fn apply_preprocessing(config: &PreprocessingConfig) -> SplitTransforms {
    let [height, width] = config.resize;
    let resize = ImageOp::Resize { height, width };
    let crop = config
        .center_crop
        .map(|[height, width]| ImageOp::CenterCrop { height, width });
    let normalize = config.normalize.then(|| Normalize {
        mean: config.mean,
        std: config.std,
    });

    let mut train_ops = vec![resize.clone()];
    if config.horizontal_flip > 0.0 {
        train_ops.push(ImageOp::RandomHorizontalFlip(config.horizontal_flip));
    }
    if config.vertical_flip > 0.0 {
        train_ops.push(ImageOp::RandomVerticalFlip(config.vertical_flip));
    }
    train_ops.extend(crop.clone());

    let mut eval_ops = vec![resize];
    eval_ops.extend(crop);

    let eval = Compose::new(eval_ops, normalize.clone());
    SplitTransforms {
        train: Compose::new(train_ops, normalize),
        valid: eval.clone(),
        test: eval,
    }
}
