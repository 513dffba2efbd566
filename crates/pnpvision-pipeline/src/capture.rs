//! Frame acquisition.
//!
//! The pipeline does not talk to cameras. It holds an optional
//! [`FrameSource`] and the [`ImageCapture`] stage asks it for a frame.
//! Anything that can produce a [`DynamicImage`] on demand qualifies: a
//! closure, a [`FrameSequence`] of pre-decoded files, or a real camera
//! driver living in another crate.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::context::ProcessContext;
use crate::mat::Mat;
use crate::stage::{Stage, StageOutput};
use crate::types::{ColorSpace, StageError};

/// Something that produces camera frames.
pub trait FrameSource: Send {
    /// Grab the next frame. May block.
    ///
    /// # Errors
    ///
    /// [`StageError::Capture`] (or any other stage error) when no frame
    /// can be produced.
    fn capture(&mut self) -> Result<DynamicImage, StageError>;
}

impl<F> FrameSource for F
where
    F: FnMut() -> Result<DynamicImage, StageError> + Send,
{
    fn capture(&mut self) -> Result<DynamicImage, StageError> {
        self()
    }
}

/// A fixed list of frames, handed out in order and then again from the
/// start.
#[derive(Debug, Clone, Default)]
pub struct FrameSequence {
    frames: Vec<DynamicImage>,
    next: usize,
}

impl FrameSequence {
    /// Cycle through `frames`.
    #[must_use]
    pub const fn new(frames: Vec<DynamicImage>) -> Self {
        Self { frames, next: 0 }
    }

    /// Number of distinct frames.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether there are no frames at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for FrameSequence {
    fn capture(&mut self) -> Result<DynamicImage, StageError> {
        let frame = self
            .frames
            .get(self.next)
            .cloned()
            .ok_or_else(|| StageError::Capture("frame sequence is empty".to_owned()))?;
        self.next = (self.next + 1) % self.frames.len();
        Ok(frame)
    }
}

/// Grab a frame from the pipeline's frame source.
///
/// Failing to get a frame is terminal: nothing downstream can mean
/// anything without one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ImageCapture {
    /// How to tag multi-channel frames. Single-channel frames are always
    /// tagged [`ColorSpace::Gray`].
    pub default_color_space: ColorSpace,
}

impl Default for ImageCapture {
    fn default() -> Self {
        Self {
            default_color_space: ColorSpace::Rgb,
        }
    }
}

impl Stage for ImageCapture {
    fn process(&self, ctx: &mut ProcessContext<'_>) -> Result<StageOutput, StageError> {
        let frame = ctx.capture_frame().map_err(StageError::terminal)?;
        let color_space = if frame.color().channel_count() == 1 {
            ColorSpace::Gray
        } else {
            self.default_color_space
        };
        ctx.set_last_captured_image(frame.clone());
        Ok(StageOutput::image(Mat::new(frame)).with_color_space(color_space))
    }

    fn set_property(&mut self, property: &str, value: &serde_json::Value) -> Result<(), StageError> {
        match property {
            "default-color-space" => {
                self.default_color_space = serde_json::from_value(value.clone()).map_err(|e| {
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn frame(value: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(image::GrayImage::from_pixel(1, 1, image::Luma([value])))
    }

    #[test]
    fn sequence_cycles() {
        let mut source = FrameSequence::new(vec![frame(1), frame(2)]);
        let values: Vec<u8> = (0..5)
            .map(|_| source.capture().unwrap().to_luma8().get_pixel(0, 0).0[0])
            .collect();
        assert_eq!(values, [1, 2, 1, 2, 1]);
    }

    #[test]
    fn empty_sequence_fails() {
        let mut source = FrameSequence::default();
        assert!(source.is_empty());
        assert!(matches!(source.capture(), Err(StageError::Capture(_))));
    }

    #[test]
    fn closures_are_frame_sources() {
        let mut calls = 0;
        let mut source = move || -> Result<DynamicImage, StageError> {
            calls += 1;
            Ok(frame(calls))
        };
        assert_eq!(
            FrameSource::capture(&mut source).unwrap().to_luma8().get_pixel(0, 0).0[0],
            1
        );
        assert_eq!(
            FrameSource::capture(&mut source).unwrap().to_luma8().get_pixel(0, 0).0[0],
            2
        );
    }

    #[test]
    fn default_color_space_property() {
        let mut stage = ImageCapture::default();
        stage
            .set_property("default-color-space", &serde_json::json!("bgr"))
            .unwrap();
        assert_eq!(stage.default_color_space, ColorSpace::Bgr);
        assert!(matches!(
            stage.set_property("default-color-space", &serde_json::json!(3)),
            Err(StageError::InvalidProperty { .. })
        ));
    }
}
