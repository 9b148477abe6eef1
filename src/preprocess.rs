//! Decoding fetched bytes and turning the image into the model's input
//! tensor.
//!
//! The transform here must be the one the model was trained with (for the
//! bundled Xception model: nearest-neighbour resize to 299x299, then
//! `x / 127.5 - 1`, NHWC). A mismatch does not fail; it only makes
//! predictions worse, so any change to the model must come with a matching
//! change to `PreprocessSettings`.

use crate::config::{Filter, Layout, Normalization, PreprocessSettings};
use crate::error::PredictError;
use image::{DynamicImage, GenericImageView, RgbImage};

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// A decoded image, owned by the request that fetched it
pub type DecodedImage = DynamicImage;

/// A fixed-shape input for the model, batch dimension first
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    pub shape: [usize; 4],
    pub data: Vec<f32>,
}

impl InputTensor {
    pub fn new(shape: [usize; 4], data: Vec<f32>) -> Result<Self, PredictError> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(PredictError::ShapeMismatch {
                expected: shape.to_vec(),
                actual: vec![data.len()],
            });
        }
        Ok(InputTensor { shape, data })
    }
}

#[derive(Debug, Clone)]
pub struct Preprocessor {
    size: u32,
    layout: Layout,
    normalization: Normalization,
    filter: Filter,
}

impl Preprocessor {
    pub fn new(settings: &PreprocessSettings) -> Self {
        Preprocessor {
            size: settings.size,
            layout: settings.layout,
            normalization: settings.normalization,
            filter: settings.filter,
        }
    }

    /// Decode JPEG, PNG, GIF or BMP bytes
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, PredictError> {
        let format = image::guess_format(bytes)
            .map_err(|_| PredictError::Decode("data is not a recognized image format".into()))?;
        let image = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| PredictError::Decode(e.to_string()))?;
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PredictError::Decode("image has no pixels".into()));
        }
        Ok(image)
    }

    /// Resize, normalize and lay out the image as the model expects
    pub fn to_tensor(&self, image: &DecodedImage) -> Result<InputTensor, PredictError> {
        let rgb = self.resize(image);
        let (width, height) = (rgb.width() as usize, rgb.height() as usize);
        let mut data = vec![0f32; width * height * 3];

        for (x, y, pixel) in rgb.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                let value = self.normalize(pixel.0[c], c);
                let idx = match self.layout {
                    Layout::Nhwc => (y * width + x) * 3 + c,
                    Layout::Nchw => c * height * width + y * width + x,
                };
                data[idx] = value;
            }
        }

        let shape = match self.layout {
            Layout::Nhwc => [1, height, width, 3],
            Layout::Nchw => [1, 3, height, width],
        };
        InputTensor::new(shape, data)
    }

    /// Decode then convert, the whole CPU-bound part of a request
    pub fn run(&self, bytes: &[u8]) -> Result<InputTensor, PredictError> {
        let image = self.decode(bytes)?;
        self.to_tensor(&image)
    }

    fn resize(&self, image: &DecodedImage) -> RgbImage {
        let rgb = image.to_rgb8();
        if rgb.width() == self.size && rgb.height() == self.size {
            return rgb;
        }
        image::imageops::resize(&rgb, self.size, self.size, self.filter.into())
    }

    fn normalize(&self, value: u8, channel: usize) -> f32 {
        let x = value as f32;
        match self.normalization {
            Normalization::Tf => x / 127.5 - 1.0,
            Normalization::Torch => (x / 255.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel],
            Normalization::Unit => x / 255.0,
        }
    }
}
