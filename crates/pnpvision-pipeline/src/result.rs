//! Cached per-stage results.

use std::time::Duration;

use crate::mat::Mat;
use crate::stage::StageId;
use crate::types::{ColorSpace, Model, StageError};

/// Snapshot of what one stage produced during the last run.
///
/// The image is a private deep copy, so it stays valid after the working
/// image moves on. `outcome` is either the model the stage returned
/// (possibly none) or the error it failed with.
#[derive(Debug, Clone)]
pub struct StageResult {
    image: Mat,
    color_space: Option<ColorSpace>,
    outcome: Result<Option<Model>, StageError>,
    processing_time: Duration,
    stage: StageId,
    stage_name: String,
}

impl StageResult {
    /// A result with no image and no timing.
    #[must_use]
    pub fn new(
        stage: StageId,
        stage_name: impl Into<String>,
        outcome: Result<Option<Model>, StageError>,
    ) -> Self {
        Self {
            image: Mat::empty(),
            color_space: None,
            outcome,
            processing_time: Duration::ZERO,
            stage,
            stage_name: stage_name.into(),
        }
    }

    /// Attach an image.
    #[must_use]
    pub fn with_image(mut self, image: Mat) -> Self {
        self.image = image;
        self
    }

    /// Attach a color space.
    #[must_use]
    pub fn with_color_space(mut self, color_space: Option<ColorSpace>) -> Self {
        self.color_space = color_space;
        self
    }

    /// Attach the time the stage took.
    #[must_use]
    pub fn with_processing_time(mut self, processing_time: Duration) -> Self {
        self.processing_time = processing_time;
        self
    }

    /// The stage's image, or the working image as it stood when the stage
    /// produced none.
    #[must_use]
    pub const fn image(&self) -> &Mat {
        &self.image
    }

    /// Color space of [`image`](Self::image).
    #[must_use]
    pub const fn color_space(&self) -> Option<ColorSpace> {
        self.color_space
    }

    /// The model the stage returned, `None` if it returned none or failed.
    #[must_use]
    pub fn model(&self) -> Option<&Model> {
        self.outcome.as_ref().ok().and_then(Option::as_ref)
    }

    /// The failure, if the stage failed (or was disabled).
    #[must_use]
    pub fn error(&self) -> Option<&StageError> {
        self.outcome.as_ref().err()
    }

    /// Whether the stage failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.outcome.is_err()
    }

    /// The raw outcome.
    #[must_use]
    pub const fn outcome(&self) -> &Result<Option<Model>, StageError> {
        &self.outcome
    }

    /// Wall-clock time spent in the stage.
    #[must_use]
    pub const fn processing_time(&self) -> Duration {
        self.processing_time
    }

    /// Identity of the stage that produced this result.
    #[must_use]
    pub const fn stage(&self) -> StageId {
        self.stage
    }

    /// Name the stage had when it ran.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// `Ok(self)` for a successful result, the stored failure otherwise.
    ///
    /// # Errors
    ///
    /// A clone of the stage's own error.
    pub fn expect_success(&self) -> Result<&Self, StageError> {
        match &self.outcome {
            Ok(_) => Ok(self),
            Err(e) => Err(e.clone()),
        }
    }

    pub(crate) fn release_image(&mut self) {
        self.image.release();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn successful_result_exposes_model() {
        let result = StageResult::new(StageId(1), "a", Ok(Some(Model::Scalar(3.0))));
        assert!(!result.is_failed());
        assert_eq!(result.model(), Some(&Model::Scalar(3.0)));
        assert!(result.error().is_none());
        assert!(result.expect_success().is_ok());
    }

    #[test]
    fn failed_result_has_no_model() {
        let result = StageResult::new(StageId(1), "a", Err(StageError::Failed("x".into())));
        assert!(result.is_failed());
        assert!(result.model().is_none());
        assert_eq!(
            result.expect_success().unwrap_err(),
            StageError::Failed("x".into())
        );
    }

    #[test]
    fn release_image_empties_the_snapshot() {
        let mut result = StageResult::new(StageId(1), "a", Ok(None)).with_image(Mat::new(
            image::DynamicImage::new_luma8(2, 2),
        ));
        let weak = result.image().downgrade();
        result.release_image();
        assert!(result.image().is_empty());
        assert!(weak.is_released());
    }
}
