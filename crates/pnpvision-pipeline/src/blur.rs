//! Gaussian blur of the working image.
//!
//! Wraps [`imageproc::filter::gaussian_blur_f32`], which only accepts
//! single-channel images. Color images are split into channels, blurred
//! independently and reassembled; Gaussian blur is linear and
//! per-channel, so the channel order (RGB or BGR) does not matter and the
//! working color space is left untouched.

use image::{DynamicImage, GrayImage, ImageBuffer, Pixel};
use serde::{Deserialize, Serialize};

use crate::context::ProcessContext;
use crate::mat::Mat;
use crate::stage::{Stage, StageOutput, f64_property};
use crate::types::StageError;

/// Gaussian blur with a configurable kernel width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BlurGaussian {
    /// Standard deviation of the kernel in pixels. Non-positive values
    /// leave the image unchanged; values above [`Self::MAX_SIGMA`] (or not
    /// finite) fail the stage.
    pub sigma: f32,
}

impl BlurGaussian {
    /// Default kernel standard deviation.
    pub const DEFAULT_SIGMA: f32 = 1.4;

    /// Largest accepted kernel standard deviation.
    pub const MAX_SIGMA: f32 = 1000.0;
}

impl Default for BlurGaussian {
    fn default() -> Self {
        Self {
            sigma: Self::DEFAULT_SIGMA,
        }
    }
}

impl Stage for BlurGaussian {
    fn process(&self, ctx: &mut ProcessContext<'_>) -> Result<StageOutput, StageError> {
        if !self.sigma.is_finite() || self.sigma > Self::MAX_SIGMA {
            return Err(invalid_sigma(f64::from(self.sigma)));
        }
        let source = ctx.working_image().share();
        let image = source
            .image()
            .ok_or_else(|| StageError::Image("working image is empty".to_owned()))?;
        Ok(StageOutput::image(Mat::new(blur_image(image, self.sigma))))
    }

    fn set_property(&mut self, property: &str, value: &serde_json::Value) -> Result<(), StageError> {
        match property {
            "sigma" => {
                let raw = f64_property(property, value)?;
                if !raw.is_finite() || raw > f64::from(Self::MAX_SIGMA) {
                    return Err(invalid_sigma(raw));
                }
                #[allow(clippy::cast_possible_truncation)]
                let sigma = raw as f32;
                self.sigma = sigma;
                Ok(())
            }
            _ => Err(StageError::UnknownProperty(property.to_owned())),
        }
    }
}

fn invalid_sigma(sigma: f64) -> StageError {
    StageError::InvalidProperty {
        property: "sigma".to_owned(),
        reason: format!(
            "{sigma} is not a finite value of at most {}",
            BlurGaussian::MAX_SIGMA
        ),
    }
}

/// Blur any supported image, keeping its pixel layout where possible.
///
/// 8-bit gray, RGB and RGBA buffers keep their layout; anything else is
/// converted to 8-bit RGBA first.
#[must_use = "returns the blurred image"]
pub fn blur_image(image: &DynamicImage, sigma: f32) -> DynamicImage {
    if !(sigma.is_finite() && sigma > 0.0) {
        return image.clone();
    }
    match image {
        DynamicImage::ImageLuma8(gray) => DynamicImage::ImageLuma8(gaussian_blur(gray, sigma)),
        DynamicImage::ImageRgb8(rgb) => DynamicImage::ImageRgb8(blur_channels(rgb, sigma)),
        DynamicImage::ImageRgba8(rgba) => DynamicImage::ImageRgba8(blur_channels(rgba, sigma)),
        other => DynamicImage::ImageRgba8(blur_channels(&other.to_rgba8(), sigma)),
    }
}

/// Apply Gaussian blur to a grayscale image.
///
/// Non-positive and non-finite sigma values return the image unchanged,
/// since `imageproc` panics on them. Sigma is capped at
/// [`BlurGaussian::MAX_SIGMA`].
#[must_use = "returns the blurred image"]
pub fn gaussian_blur(image: &GrayImage, sigma: f32) -> GrayImage {
    if !(sigma.is_finite() && sigma > 0.0) {
        return image.clone();
    }

    imageproc::filter::gaussian_blur_f32(image, sigma.min(BlurGaussian::MAX_SIGMA))
}

/// Blur each channel of an 8-bit multi-channel image independently.
fn blur_channels<P>(image: &ImageBuffer<P, Vec<u8>>, sigma: f32) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let (w, h) = (image.width(), image.height());
    let channels = usize::from(P::CHANNEL_COUNT);

    let blurred: Vec<GrayImage> = (0..channels)
        .map(|c| {
            let plane = GrayImage::from_fn(w, h, |x, y| {
                image::Luma([image.get_pixel(x, y).channels()[c]])
            });
            gaussian_blur(&plane, sigma)
        })
        .collect();

    ImageBuffer::from_fn(w, h, |x, y| {
        let mut pixel = *image.get_pixel(x, y);
        for (c, value) in pixel.channels_mut().iter_mut().enumerate() {
            *value = blurred[c].get_pixel(x, y).0[0];
        }
        pixel
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::{RgbImage, RgbaImage};

    /// A test image with a sharp black-to-white boundary at x=5.
    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(10, 10, |x, _y| {
            if x < 5 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    #[test]
    fn non_positive_sigma_returns_identical_image() {
        let img = sharp_edge_image();
        assert_eq!(gaussian_blur(&img, 0.0), img);
        assert_eq!(gaussian_blur(&img, -1.0), img);
    }

    #[test]
    fn blur_smooths_sharp_edge() {
        let blurred = gaussian_blur(&sharp_edge_image(), 2.0);
        let left_of_edge = blurred.get_pixel(4, 5).0[0];
        let right_of_edge = blurred.get_pixel(5, 5).0[0];
        assert!(left_of_edge > 0, "left of edge stayed at {left_of_edge}");
        assert!(right_of_edge < 255, "right of edge stayed at {right_of_edge}");
    }

    #[test]
    fn layouts_are_preserved() {
        let rgb = DynamicImage::ImageRgb8(RgbImage::new(7, 5));
        let out = blur_image(&rgb, 1.0);
        assert!(matches!(out, DynamicImage::ImageRgb8(_)));
        assert_eq!((out.width(), out.height()), (7, 5));

        let gray = DynamicImage::ImageLuma8(GrayImage::new(3, 3));
        assert!(matches!(blur_image(&gray, 1.0), DynamicImage::ImageLuma8(_)));

        let wide = DynamicImage::ImageLuma16(image::ImageBuffer::new(3, 3));
        assert!(matches!(blur_image(&wide, 1.0), DynamicImage::ImageRgba8(_)));
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn color_blur_matches_per_channel_gray_blur() {
        let img = RgbaImage::from_fn(10, 10, |x, y| {
            image::Rgba([
                ((x * 25) % 256) as u8,
                ((y * 30) % 256) as u8,
                (((x + y) * 20) % 256) as u8,
                255,
            ])
        });
        let sigma = 1.4;
        let blurred = blur_channels(&img, sigma);

        for c in 0..4 {
            let plane = GrayImage::from_fn(10, 10, |x, y| image::Luma([img.get_pixel(x, y).0[c]]));
            let plane_blurred = gaussian_blur(&plane, sigma);
            for (x, y, pixel) in plane_blurred.enumerate_pixels() {
                assert_eq!(
                    blurred.get_pixel(x, y).0[c],
                    pixel.0[0],
                    "mismatch at ({x},{y}) channel {c}",
                );
            }
        }
    }

    #[test]
    fn sigma_is_settable() {
        let mut stage = BlurGaussian::default();
        stage.set_property("sigma", &serde_json::json!(3)).unwrap();
        assert!((stage.sigma - 3.0).abs() < f32::EPSILON);
        assert!(stage.set_property("sigma", &serde_json::json!("x")).is_err());
        assert!(stage.set_property("radius", &serde_json::json!(1)).is_err());
    }

    #[test]
    fn out_of_range_sigma_is_rejected() {
        let mut stage = BlurGaussian::default();
        for value in [serde_json::json!(1e300), serde_json::json!(1e6)] {
            assert!(matches!(
                stage.set_property("sigma", &value),
                Err(StageError::InvalidProperty { .. })
            ));
        }
        assert!((stage.sigma - BlurGaussian::DEFAULT_SIGMA).abs() < f32::EPSILON);
    }

    #[test]
    fn non_finite_sigma_leaves_image_unchanged() {
        let img = sharp_edge_image();
        assert_eq!(gaussian_blur(&img, f32::INFINITY), img);
        assert_eq!(gaussian_blur(&img, f32::NAN), img);
        let rgb = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 3, image::Rgb([9, 8, 7])));
        assert_eq!(blur_image(&rgb, f32::INFINITY), rgb);
    }

    #[test]
    fn non_finite_sigma_fails_the_stage() {
        let mut pipeline = crate::Pipeline::new().with_options(crate::PipelineOptions {
            placeholder_width: 8,
            placeholder_height: 8,
        });
        pipeline
            .add_named("blur", BlurGaussian { sigma: f32::INFINITY })
            .unwrap();
        pipeline.process().unwrap();
        let result = pipeline.get_result("blur").unwrap();
        assert!(matches!(
            result.error(),
            Some(StageError::InvalidProperty { property, .. }) if property == "sigma"
        ));
    }
}
