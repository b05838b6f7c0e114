use image::{GrayImage, Luma};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// An 8-bit image mask applied to every keyframe of a map.
///
/// Pixels with a value of zero are excluded. Features are discarded when they fall on an
/// excluded pixel or outside of the mask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMask {
    #[serde(with = "gray_image")]
    image: GrayImage,
}

impl ImageMask {
    /// Creates a mask from row-major pixels. Returns `None` if the pixel count does not
    /// match the dimensions.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        GrayImage::from_raw(width, height, pixels).map(Self::from)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    /// Checks if a feature at `point` (in pixels) may be used.
    pub fn allows(&self, point: Point2<f64>) -> bool {
        if !(point.x >= 0.0 && point.y >= 0.0) {
            return false;
        }
        self.image
            .get_pixel_checked(point.x as u32, point.y as u32)
            .map_or(false, |&Luma([value])| value != 0)
    }
}

impl From<GrayImage> for ImageMask {
    fn from(image: GrayImage) -> Self {
        Self { image }
    }
}

/// Stores a gray image as its dimensions followed by the raw pixels.
mod gray_image {
    use image::GrayImage;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(image: &GrayImage, serializer: S) -> Result<S::Ok, S::Error> {
        (image.width(), image.height(), image.as_raw()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<GrayImage, D::Error> {
        let (width, height, pixels) = <(u32, u32, Vec<u8>)>::deserialize(deserializer)?;
        GrayImage::from_raw(width, height, pixels)
            .ok_or_else(|| D::Error::custom("mask pixel count does not match its dimensions"))
    }
}
