//! Re-emit the image of an earlier stage.

use serde::{Deserialize, Serialize};

use crate::context::ProcessContext;
use crate::stage::{Stage, StageOutput};
use crate::types::StageError;

/// Make the cached image of `image_stage_name` the working image again,
/// together with its color space.
///
/// Fails like [`ProcessContext::get_expected_result`] when the named stage
/// is missing, has not run, or failed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ImageRecall {
    /// Stage whose image to recall.
    pub image_stage_name: String,
}

impl ImageRecall {
    /// Recall the image of `stage_name`.
    #[must_use]
    pub fn new(stage_name: impl Into<String>) -> Self {
        Self {
            image_stage_name: stage_name.into(),
        }
    }
}

impl Stage for ImageRecall {
    fn process(&self, ctx: &mut ProcessContext<'_>) -> Result<StageOutput, StageError> {
        let result = ctx.get_expected_result(&self.image_stage_name)?;
        let mut output = StageOutput::image(result.image().clone());
        output.color_space = result.color_space();
        Ok(output)
    }
}
