//! Color-space conversion of the working image.
//!
//! Pixel buffers do not know their channel order; the working color space
//! tag does. Conversions read the tag, reorder or collapse channels and
//! hand back a new image with the new tag. Buffers tagged BGR are stored
//! as three-channel images with red and blue swapped.

use image::{DynamicImage, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::context::ProcessContext;
use crate::mat::Mat;
use crate::stage::{Stage, StageOutput};
use crate::types::{ColorSpace, StageError};

/// Which conversion [`ConvertColor`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Conversion {
    /// Collapse to luminance.
    #[default]
    ToGray,
    /// Three channels, red first.
    ToRgb,
    /// Three channels, blue first.
    ToBgr,
    /// Swap the red and blue channels and flip the tag between the RGB
    /// and BGR families.
    SwapRedBlue,
}

/// Convert the working image to another color space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConvertColor {
    /// The conversion to apply.
    pub conversion: Conversion,
}

impl ConvertColor {
    /// A stage performing `conversion`.
    #[must_use]
    pub const fn new(conversion: Conversion) -> Self {
        Self { conversion }
    }
}

impl Stage for ConvertColor {
    fn process(&self, ctx: &mut ProcessContext<'_>) -> Result<StageOutput, StageError> {
        let source = ctx.working_image().share();
        let found = ctx.working_color_space();
        let image = source
            .image()
            .ok_or_else(|| StageError::Image("working image is empty".to_owned()))?;
        let (converted, color_space) = convert(image, found, self.conversion)?;
        Ok(StageOutput::image(Mat::new(converted)).with_color_space(color_space))
    }

    fn set_property(&mut self, property: &str, value: &serde_json::Value) -> Result<(), StageError> {
        match property {
            "conversion" => {
                self.conversion = serde_json::from_value(value.clone()).map_err(|e| {
                    StageError::InvalidProperty {
                        property: property.to_owned(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(())
            }
            _ => Err(StageError::UnknownProperty(property.to_owned())),
        }
    }
}

/// Apply `conversion` to an image tagged `found`.
///
/// # Errors
///
/// [`StageError::ColorSpace`] when the image carries no tag, is HSV, or
/// (for [`Conversion::SwapRedBlue`]) is grayscale.
pub fn convert(
    image: &DynamicImage,
    found: Option<ColorSpace>,
    conversion: Conversion,
) -> Result<(DynamicImage, ColorSpace), StageError> {
    let unsupported = |expected: &str| StageError::ColorSpace {
        expected: expected.to_owned(),
        found: found.map_or_else(|| "none".to_owned(), |cs| cs.to_string()),
    };
    let Some(found) = found else {
        return Err(unsupported("a tagged color space"));
    };
    match conversion {
        Conversion::ToGray => {
            let rgb = canonical_rgb(image, found).ok_or_else(|| unsupported("Gray or RGB family"))?;
            Ok((DynamicImage::ImageLuma8(luminance(&rgb)), ColorSpace::Gray))
        }
        Conversion::ToRgb => {
            let rgb = canonical_rgb(image, found).ok_or_else(|| unsupported("Gray or RGB family"))?;
            Ok((DynamicImage::ImageRgb8(rgb), ColorSpace::Rgb))
        }
        Conversion::ToBgr => {
            let mut rgb =
                canonical_rgb(image, found).ok_or_else(|| unsupported("Gray or RGB family"))?;
            swap_red_blue(&mut rgb);
            Ok((DynamicImage::ImageRgb8(rgb), ColorSpace::Bgr))
        }
        Conversion::SwapRedBlue => {
            let target = match found {
                ColorSpace::Rgb => ColorSpace::Bgr,
                ColorSpace::Bgr => ColorSpace::Rgb,
                ColorSpace::Rgba => ColorSpace::Bgra,
                ColorSpace::Bgra => ColorSpace::Rgba,
                ColorSpace::Gray | ColorSpace::Hsv => {
                    return Err(unsupported("RGB or BGR family"));
                }
            };
            let swapped = if found.channels() == 4 {
                let mut rgba = image.to_rgba8();
                for pixel in rgba.pixels_mut() {
                    pixel.0.swap(0, 2);
                }
                DynamicImage::ImageRgba8(rgba)
            } else {
                let mut rgb = image.to_rgb8();
                swap_red_blue(&mut rgb);
                DynamicImage::ImageRgb8(rgb)
            };
            Ok((swapped, target))
        }
    }
}

/// The image as true RGB, undoing a BGR channel order. `None` for HSV.
fn canonical_rgb(image: &DynamicImage, found: ColorSpace) -> Option<RgbImage> {
    match found {
        ColorSpace::Gray | ColorSpace::Rgb | ColorSpace::Rgba => Some(image.to_rgb8()),
        ColorSpace::Bgr | ColorSpace::Bgra => {
            let mut rgb = image.to_rgb8();
            swap_red_blue(&mut rgb);
            Some(rgb)
        }
        ColorSpace::Hsv => None,
    }
}

fn swap_red_blue(image: &mut RgbImage) {
    for pixel in image.pixels_mut() {
        pixel.0.swap(0, 2);
    }
}

fn luminance(rgb: &RgbImage) -> GrayImage {
    image::imageops::grayscale(rgb)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn one_pixel(r: u8, g: u8, b: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, image::Rgb([r, g, b])))
    }

    #[test]
    fn bgr_to_rgb_swaps_channels() {
        let (out, cs) = convert(&one_pixel(0, 0, 255), Some(ColorSpace::Bgr), Conversion::ToRgb)
            .unwrap();
        assert_eq!(cs, ColorSpace::Rgb);
        assert_eq!(out.to_rgb8().get_pixel(0, 0).0, [255, 0, 0]);
    }

    #[test]
    fn rgb_to_bgr_swaps_channels() {
        let (out, cs) = convert(&one_pixel(10, 20, 30), Some(ColorSpace::Rgb), Conversion::ToBgr)
            .unwrap();
        assert_eq!(cs, ColorSpace::Bgr);
        assert_eq!(out.to_rgb8().get_pixel(0, 0).0, [30, 20, 10]);
    }

    #[test]
    fn to_gray_respects_channel_order() {
        // Pure blue in BGR order is stored as [255, 0, 0]; it must come out
        // with blue's (small) luminance, not red's.
        let (from_bgr, cs) =
            convert(&one_pixel(255, 0, 0), Some(ColorSpace::Bgr), Conversion::ToGray).unwrap();
        let (from_rgb, _) =
            convert(&one_pixel(0, 0, 255), Some(ColorSpace::Rgb), Conversion::ToGray).unwrap();
        assert_eq!(cs, ColorSpace::Gray);
        assert_eq!(from_bgr.to_luma8(), from_rgb.to_luma8());
    }

    #[test]
    fn swap_flips_tag_family() {
        let (_, cs) =
            convert(&one_pixel(1, 2, 3), Some(ColorSpace::Rgb), Conversion::SwapRedBlue).unwrap();
        assert_eq!(cs, ColorSpace::Bgr);
        let rgba = DynamicImage::new_rgba8(1, 1);
        let (out, cs) = convert(&rgba, Some(ColorSpace::Bgra), Conversion::SwapRedBlue).unwrap();
        assert_eq!(cs, ColorSpace::Rgba);
        assert_eq!(out.color().channel_count(), 4);
    }

    #[test]
    fn unsupported_inputs_fail() {
        let image = one_pixel(1, 2, 3);
        assert!(matches!(
            convert(&image, Some(ColorSpace::Hsv), Conversion::ToGray),
            Err(StageError::ColorSpace { .. })
        ));
        assert!(matches!(
            convert(&image, Some(ColorSpace::Gray), Conversion::SwapRedBlue),
            Err(StageError::ColorSpace { .. })
        ));
        assert!(matches!(
            convert(&image, None, Conversion::ToRgb),
            Err(StageError::ColorSpace { .. })
        ));
    }

    #[test]
    fn conversion_serializes_kebab_case() {
        let json = serde_json::to_value(ConvertColor::new(Conversion::SwapRedBlue)).unwrap();
        assert_eq!(json, serde_json::json!({ "conversion": "swap-red-blue" }));
    }
}
