//! What a stage can see while it runs.
//!
//! The pipeline keeps its runtime state in a [`Session`] that is separate
//! from the stage list, so a stage can be borrowed from the list while the
//! session is borrowed mutably on its behalf.

use std::collections::HashMap;

use image::DynamicImage;

use crate::capture::FrameSource;
use crate::mat::Mat;
use crate::result::StageResult;
use crate::stage::{StageEntry, StageId};
use crate::types::{ColorSpace, Model, PipelineOptions, Properties, StageError};
use crate::working::WorkingState;

/// Runtime state of a pipeline: everything except the stage list.
#[derive(Default)]
pub(crate) struct Session {
    pub(crate) working: WorkingState,
    pub(crate) results: HashMap<StageId, StageResult>,
    pub(crate) properties: Properties,
    pub(crate) options: PipelineOptions,
    pub(crate) last_captured: Option<DynamicImage>,
    pub(crate) frame_source: Option<Box<dyn FrameSource>>,
}

impl Session {
    pub(crate) fn working_image(&mut self) -> &Mat {
        self.working
            .image_or_placeholder(self.options.placeholder_width, self.options.placeholder_height)
    }

    /// Free the working image and every cached result image.
    pub(crate) fn release(&mut self) {
        self.working.release();
        for result in self.results.values_mut() {
            result.release_image();
        }
        self.results.clear();
    }
}

pub(crate) fn find_stage<'a>(stages: &'a [StageEntry], name: &str) -> Option<&'a StageEntry> {
    stages.iter().find(|stage| stage.name() == name)
}

pub(crate) fn find_result<'a>(
    stages: &[StageEntry],
    results: &'a HashMap<StageId, StageResult>,
    name: &str,
) -> Option<&'a StageResult> {
    find_stage(stages, name).and_then(|stage| results.get(&stage.id()))
}

/// Look up the result of a stage that is required to have succeeded.
pub(crate) fn expected_result<'a>(
    stages: &[StageEntry],
    results: &'a HashMap<StageId, StageResult>,
    name: &str,
) -> Result<&'a StageResult, StageError> {
    if name.trim().is_empty() {
        return Err(StageError::MissingName);
    }
    let stage = find_stage(stages, name).ok_or_else(|| StageError::NotFound(name.to_owned()))?;
    let result = results
        .get(&stage.id())
        .ok_or_else(|| StageError::NoResult(name.to_owned()))?;
    result.expect_success()
}

/// Read-only view handed to [`Stage::prepare`](crate::Stage::prepare).
pub struct PrepareContext<'a> {
    stages: &'a [StageEntry],
    properties: &'a Properties,
}

impl<'a> PrepareContext<'a> {
    pub(crate) const fn new(stages: &'a [StageEntry], properties: &'a Properties) -> Self {
        Self { stages, properties }
    }

    /// The full stage list.
    #[must_use]
    pub const fn stages(&self) -> &[StageEntry] {
        self.stages
    }

    /// Look up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageEntry> {
        find_stage(self.stages, name)
    }

    /// Ambient pipeline properties.
    #[must_use]
    pub const fn properties(&self) -> &Properties {
        self.properties
    }

    /// One ambient property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name)
    }
}

/// Access to the pipeline granted to [`Stage::process`](crate::Stage::process).
pub struct ProcessContext<'a> {
    stages: &'a [StageEntry],
    session: &'a mut Session,
    current: &'a StageEntry,
}

impl<'a> ProcessContext<'a> {
    pub(crate) const fn new(
        stages: &'a [StageEntry],
        session: &'a mut Session,
        current: &'a StageEntry,
    ) -> Self {
        Self {
            stages,
            session,
            current,
        }
    }

    /// Name of the stage being processed.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        self.current.name()
    }

    /// The full stage list.
    #[must_use]
    pub const fn stages(&self) -> &[StageEntry] {
        self.stages
    }

    /// The working image, or the synthetic placeholder if no stage has
    /// produced one.
    pub fn working_image(&mut self) -> &Mat {
        self.session.working_image()
    }

    /// The most recent model.
    #[must_use]
    pub fn working_model(&self) -> Option<&Model> {
        self.session.working.model()
    }

    /// The most recent color space.
    #[must_use]
    pub fn working_color_space(&self) -> Option<ColorSpace> {
        self.session.working.color_space()
    }

    /// Ambient pipeline properties.
    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.session.properties
    }

    /// One ambient property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.session.properties.get(name)
    }

    /// Set an ambient property, visible to later stages.
    pub fn set_property(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.session.properties.insert(name.into(), value);
    }

    /// Result of an earlier stage in this run, if any.
    #[must_use]
    pub fn get_result(&self, name: &str) -> Option<&StageResult> {
        find_result(self.stages, &self.session.results, name)
    }

    /// Result of an earlier stage that this stage depends on.
    ///
    /// # Errors
    ///
    /// [`StageError::MissingName`] for a blank name,
    /// [`StageError::NotFound`] if no such stage exists,
    /// [`StageError::NoResult`] if it has not produced a result in this
    /// run, or the stage's own error if it failed.
    pub fn get_expected_result(&self, name: &str) -> Result<&StageResult, StageError> {
        expected_result(self.stages, &self.session.results, name)
    }

    /// Grab a frame from the attached frame source.
    ///
    /// # Errors
    ///
    /// [`StageError::NoFrameSource`] when none is attached, otherwise
    /// whatever the source reports.
    pub fn capture_frame(&mut self) -> Result<DynamicImage, StageError> {
        self.session
            .frame_source
            .as_mut()
            .ok_or(StageError::NoFrameSource)?
            .capture()
    }

    /// Record the raw frame most recently captured.
    pub fn set_last_captured_image(&mut self, image: DynamicImage) {
        self.session.last_captured = Some(image);
    }

    /// Engine options.
    #[must_use]
    pub fn options(&self) -> &PipelineOptions {
        &self.session.options
    }
}
