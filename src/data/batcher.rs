use burn::{data::dataloader::batcher::Batcher, prelude::*};

use super::dataset::ImageItem;

#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// `[batch, channels, height, width]`
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>) -> ImageBatch<B> {
        let [channels, height, width] = items
            .first()
            .map(|item| item.image.shape)
            .unwrap_or([3, 0, 0]);
        debug_assert!(items.iter().all(|item| item.image.shape == [channels, height, width]));

        let pixels: Vec<f32> = items
            .iter()
            .flat_map(|item| item.image.data.iter().copied())
            .collect();
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [items.len(), channels, height, width])
                .convert::<B::FloatElem>(),
            &self.device,
        );

        let labels: Vec<B::IntElem> = items
            .iter()
            .map(|item| (item.label as i64).elem::<B::IntElem>())
            .collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [items.len()]), &self.device);

        ImageBatch { images, targets }
    }
}
