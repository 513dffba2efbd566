//! Binary threshold of a grayscale working image.

use image::{DynamicImage, GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::context::ProcessContext;
use crate::mat::Mat;
use crate::stage::{Stage, StageOutput, bool_property, f64_property, require_color_space};
use crate::types::{ColorSpace, Model, StageError};

/// Map every pixel above `threshold` to 255 and the rest to 0 (or the
/// reverse when `invert` is set).
///
/// The model is the number of foreground (255) pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Threshold {
    /// Cut-off; pixels strictly above it are foreground.
    pub threshold: u8,
    /// Swap foreground and background.
    pub invert: bool,
}

impl Default for Threshold {
    fn default() -> Self {
        Self {
            threshold: 128,
            invert: false,
        }
    }
}

impl Threshold {
    /// Threshold `gray`, returning the binary image and its foreground
    /// pixel count.
    #[must_use]
    pub fn apply(&self, gray: &GrayImage) -> (GrayImage, u64) {
        let mut foreground = 0_u64;
        let binary = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            let above = gray.get_pixel(x, y).0[0] > self.threshold;
            if above != self.invert {
                foreground += 1;
                Luma([255])
            } else {
                Luma([0])
            }
        });
        (binary, foreground)
    }
}

impl Stage for Threshold {
    fn process(&self, ctx: &mut ProcessContext<'_>) -> Result<StageOutput, StageError> {
        let source = ctx.working_image().share();
        require_color_space(ctx.working_color_space(), ColorSpace::Gray)?;
        let gray = source
            .image()
            .ok_or_else(|| StageError::Image("working image is empty".to_owned()))?
            .to_luma8();
        let (binary, foreground) = self.apply(&gray);
        #[allow(clippy::cast_precision_loss)]
        let count = foreground as f64;
        Ok(StageOutput::image(Mat::new(DynamicImage::ImageLuma8(binary)))
            .with_model(Model::Scalar(count))
            .with_color_space(ColorSpace::Gray))
    }

    fn set_property(&mut self, property: &str, value: &serde_json::Value) -> Result<(), StageError> {
        match property {
            "threshold" => {
                let raw = f64_property(property, value)?;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let threshold = raw.round().clamp(0.0, 255.0) as u8;
                self.threshold = threshold;
                Ok(())
            }
            "invert" => {
                self.invert = bool_property(property, value)?;
                Ok(())
            }
            _ => Err(StageError::UnknownProperty(property.to_owned())),
        }
    }
}
