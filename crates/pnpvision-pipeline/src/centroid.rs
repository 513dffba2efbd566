//! Centroid of the foreground of a binary image.

use serde::{Deserialize, Serialize};

use crate::context::ProcessContext;
use crate::stage::{Stage, StageOutput, f64_property, require_color_space};
use crate::types::{ColorSpace, Model, Point, StageError};

/// Locate the mean position of all non-zero pixels of a Gray working
/// image. The model is a single [`Point`]; the image is left as it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Centroid {
    /// Fail if fewer foreground pixels than this are present.
    pub min_pixels: u64,
}

impl Default for Centroid {
    fn default() -> Self {
        Self { min_pixels: 1 }
    }
}

impl Stage for Centroid {
    fn process(&self, ctx: &mut ProcessContext<'_>) -> Result<StageOutput, StageError> {
        let source = ctx.working_image().share();
        require_color_space(ctx.working_color_space(), ColorSpace::Gray)?;
        let gray = source
            .image()
            .ok_or_else(|| StageError::Image("working image is empty".to_owned()))?
            .to_luma8();

        let (mut count, mut sum_x, mut sum_y) = (0_u64, 0_u64, 0_u64);
        for (x, y, pixel) in gray.enumerate_pixels() {
            if pixel.0[0] > 0 {
                count += 1;
                sum_x += u64::from(x);
                sum_y += u64::from(y);
            }
        }
        if count == 0 || count < self.min_pixels {
            return Err(StageError::Failed(format!(
                "{count} foreground pixels, need at least {}",
                self.min_pixels.max(1)
            )));
        }
        #[allow(clippy::cast_precision_loss)]
        let center = Point::new(sum_x as f64 / count as f64, sum_y as f64 / count as f64);
        Ok(StageOutput::model(Model::Points(vec![center])))
    }

    fn set_property(&mut self, property: &str, value: &serde_json::Value) -> Result<(), StageError> {
        match property {
            "min-pixels" => {
                let raw = f64_property(property, value)?;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let min_pixels = raw.max(0.0).round() as u64;
                self.min_pixels = min_pixels;
                Ok(())
            }
            _ => Err(StageError::UnknownProperty(property.to_owned())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{DynamicImage, GrayImage, Luma};

    use super::*;
    use crate::mat::Mat;
    use crate::{Conversion, ConvertColor, Pipeline, StageKind};

    /// Emits a fixed binary image tagged Gray.
    #[derive(Debug)]
    struct Binary(GrayImage);

    impl Stage for Binary {
        fn process(&self, _ctx: &mut ProcessContext<'_>) -> Result<StageOutput, StageError> {
            Ok(StageOutput::image(Mat::new(DynamicImage::ImageLuma8(self.0.clone())))
                .with_color_space(ColorSpace::Gray))
        }
    }

    fn run(image: GrayImage, centroid: Centroid) -> Pipeline {
        let mut pipeline = Pipeline::new();
        pipeline
            .add_named("binary", StageKind::external(Binary(image)))
            .unwrap();
        pipeline.add_named("center", centroid).unwrap();
        pipeline.process().unwrap();
        pipeline
    }

    fn two_dots() -> GrayImage {
        let mut image = GrayImage::new(10, 10);
        image.put_pixel(2, 4, Luma([255]));
        image.put_pixel(6, 8, Luma([255]));
        image
    }

    #[test]
    fn locates_mean_of_foreground() {
        let pipeline = run(two_dots(), Centroid::default());
        let model = pipeline.get_result("center").unwrap().model().unwrap();
        assert_eq!(model.as_points(), Some(&[Point::new(4.0, 6.0)][..]));
    }

    #[test]
    fn empty_foreground_fails() {
        let pipeline = run(GrayImage::new(5, 5), Centroid { min_pixels: 0 });
        assert!(matches!(
            pipeline.get_result("center").unwrap().error(),
            Some(StageError::Failed(message)) if message.starts_with("0 foreground pixels")
        ));
    }

    #[test]
    fn too_few_pixels_fails() {
        let pipeline = run(two_dots(), Centroid { min_pixels: 3 });
        assert_eq!(
            pipeline.get_result("center").unwrap().error(),
            Some(&StageError::Failed(
                "2 foreground pixels, need at least 3".to_owned()
            ))
        );
    }

    #[test]
    fn color_input_is_rejected() {
        let mut pipeline = Pipeline::new();
        pipeline
            .add_named("color", ConvertColor::new(Conversion::ToRgb))
            .unwrap();
        pipeline.add_named("center", Centroid::default()).unwrap();
        pipeline.process().unwrap();
        assert!(matches!(
            pipeline.get_result("center").unwrap().error(),
            Some(StageError::ColorSpace { .. })
        ));
    }

    #[test]
    fn min_pixels_property_is_clamped() {
        let mut stage = Centroid::default();
        stage.set_property("min-pixels", &serde_json::json!(7.6)).unwrap();
        assert_eq!(stage.min_pixels, 8);
        stage.set_property("min-pixels", &serde_json::json!(-4)).unwrap();
        assert_eq!(stage.min_pixels, 0);
        assert!(matches!(
            stage.set_property("min-pixels", &serde_json::json!("many")),
            Err(StageError::InvalidProperty { .. })
        ));
        assert!(matches!(
            stage.set_property("radius", &serde_json::json!(1)),
            Err(StageError::UnknownProperty(_))
        ));
    }
}
