//! The pipeline engine.
//!
//! A [`Pipeline`] owns an ordered list of stages and runs them one after
//! another over a shared working image, model and color space:
//!
//! ```rust
//! # use pnpvision_pipeline::{Pipeline, PipelineError, StageEntry, Threshold, BlurGaussian};
//! # fn run() -> Result<(), PipelineError> {
//! let mut pipeline = Pipeline::new();
//! pipeline.add_named("blur", BlurGaussian { sigma: 2.0 })?;
//! pipeline.add(StageEntry::unnamed(Threshold::default()))?;
//! assert_eq!(pipeline.stages()[1].name(), "0");
//! # Ok(())
//! # }
//! ```
//!
//! # Run semantics
//!
//! [`process`](Pipeline::process) first releases everything the previous
//! run left behind, then gives every enabled stage a chance to
//! [`prepare`](crate::Stage::prepare), then processes the stages in list
//! order. Every stage, enabled or not, ends up with exactly one
//! [`StageResult`]:
//!
//! - a disabled stage gets a [`StageError::NotEnabled`] failure;
//! - an ordinary failure is recorded and the run continues;
//! - a terminal failure is recorded the same way, remembered, and its
//!   underlying cause is returned once every remaining stage has run.
//!
//! A stage that returns no image gets a deep copy of the working image as
//! it stood before the stage ran. A stage that returns an image replaces
//! the working image (the superseded buffer is released on the spot) and
//! its result gets a deep copy. Models and color spaces are sticky: a
//! stage that yields none leaves the previous one in place. A failed
//! stage yields none either; its error lives only in its own result and
//! never shows up in [`working_model`](Pipeline::working_model).
//!
//! # Resources
//!
//! Image buffers are released at the start of every run, by
//! [`release`](Pipeline::release), and when the pipeline is dropped.

use std::fmt;
use std::time::Duration;

use image::DynamicImage;
use tracing::{debug, trace, warn};
use web_time::Instant;

use crate::capture::FrameSource;
use crate::context::{self, PrepareContext, ProcessContext, Session};
use crate::document;
use crate::mat::Mat;
use crate::result::StageResult;
use crate::shot::ShotList;
use crate::stage::{PropertyAssignment, StageEntry, StageId, StageKind};
use crate::types::{ColorSpace, Model, PipelineError, PipelineOptions, Properties, StageError};

/// An ordered list of named stages and the state of its last run.
pub struct Pipeline {
    pub(crate) stages: Vec<StageEntry>,
    pub(crate) session: Session,
    pub(crate) shots: ShotList,
    terminal: Option<(String, StageError)>,
    total_processing_time: Duration,
    next_id: u64,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// An empty pipeline with default options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            session: Session::default(),
            shots: ShotList::default(),
            terminal: None,
            total_processing_time: Duration::ZERO,
            next_id: 0,
        }
    }

    /// Replace the engine options (builder style).
    #[must_use]
    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.session.options = options;
        self
    }

    /// Engine options.
    #[must_use]
    pub const fn options(&self) -> &PipelineOptions {
        &self.session.options
    }

    /// Replace the engine options.
    pub fn set_options(&mut self, options: PipelineOptions) {
        self.session.options = options;
    }

    /// Build a pipeline from a pipeline document.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Serialization`] for malformed text,
    /// [`PipelineError::DuplicateStageName`] if two stages share a name.
    pub fn from_document_text(text: &str) -> Result<Self, PipelineError> {
        let mut pipeline = Self::new();
        pipeline.from_text(text)?;
        Ok(pipeline)
    }

    // ─────────────────────────── stage list ────────────────────────────

    /// Append a stage. An empty name is replaced by the first free decimal
    /// name (`"0"`, `"1"`, ...).
    ///
    /// # Errors
    ///
    /// [`PipelineError::DuplicateStageName`] if the name is taken.
    pub fn add(&mut self, entry: StageEntry) -> Result<StageId, PipelineError> {
        let index = self.stages.len();
        self.insert(index, entry)
    }

    /// Append `kind` under `name`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::DuplicateStageName`] if the name is taken.
    pub fn add_named(
        &mut self,
        name: impl Into<String>,
        kind: impl Into<StageKind>,
    ) -> Result<StageId, PipelineError> {
        self.add(StageEntry::new(name, kind))
    }

    /// Insert a stage at `index` (clamped to the list length).
    ///
    /// # Errors
    ///
    /// [`PipelineError::DuplicateStageName`] if the name is taken.
    pub fn insert(&mut self, index: usize, mut entry: StageEntry) -> Result<StageId, PipelineError> {
        if entry.name().is_empty() {
            entry.set_name(self.generate_unique_name());
        } else if self.stage(entry.name()).is_some() {
            return Err(PipelineError::DuplicateStageName(entry.name().to_owned()));
        }
        self.next_id += 1;
        let id = StageId(self.next_id);
        entry.assign_id(id);
        let index = index.min(self.stages.len());
        self.stages.insert(index, entry);
        Ok(id)
    }

    /// Remove the stage called `name`, along with its cached result.
    pub fn remove(&mut self, name: &str) -> Option<StageEntry> {
        let index = self.stages.iter().position(|e| e.name() == name)?;
        Some(self.remove_at(index))
    }

    /// Remove the stage with identity `id`, along with its cached result.
    pub fn remove_stage(&mut self, id: StageId) -> Option<StageEntry> {
        let index = self.stages.iter().position(|e| e.id() == id)?;
        Some(self.remove_at(index))
    }

    fn remove_at(&mut self, index: usize) -> StageEntry {
        let entry = self.stages.remove(index);
        if let Some(mut result) = self.session.results.remove(&entry.id()) {
            result.release_image();
        }
        entry
    }

    /// Rename a stage. An empty new name is replaced by a generated one.
    ///
    /// # Errors
    ///
    /// [`PipelineError::StageNotFound`] if there is no stage called `from`,
    /// [`PipelineError::DuplicateStageName`] if `to` is taken by another.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), PipelineError> {
        if from == to && self.stage(from).is_some() {
            return Ok(());
        }
        if self.stage(to).is_some() {
            return Err(PipelineError::DuplicateStageName(to.to_owned()));
        }
        let name = if to.is_empty() {
            self.generate_unique_name()
        } else {
            to.to_owned()
        };
        let entry = self
            .stage_mut(from)
            .ok_or_else(|| PipelineError::StageNotFound(from.to_owned()))?;
        entry.set_name(name);
        Ok(())
    }

    /// The stage list, in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageEntry] {
        &self.stages
    }

    /// Look up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageEntry> {
        context::find_stage(&self.stages, name)
    }

    /// Look up a stage by name, mutably (to toggle it or change its
    /// configuration).
    pub fn stage_mut(&mut self, name: &str) -> Option<&mut StageEntry> {
        self.stages.iter_mut().find(|e| e.name() == name)
    }

    /// Look up a stage by identity.
    #[must_use]
    pub fn stage_by_id(&self, id: StageId) -> Option<&StageEntry> {
        self.stages.iter().find(|e| e.id() == id)
    }

    fn generate_unique_name(&self) -> String {
        (0_u64..)
            .map(|i| i.to_string())
            .find(|name| self.stage(name).is_none())
            .unwrap_or_default()
    }

    // ───────────────────────────── running ─────────────────────────────

    /// Run every stage in order.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Terminal`] carrying the cause of the last terminal
    /// failure, after all stages have run and every result is cached.
    pub fn process(&mut self) -> Result<(), PipelineError> {
        self.release();
        self.terminal = None;
        self.total_processing_time = Duration::ZERO;
        self.prepare_stages();

        let stages = &self.stages;
        let session = &mut self.session;
        let mut total = Duration::ZERO;
        let mut terminal = None;

        for entry in stages {
            let started = Instant::now();
            let outcome = if entry.enabled() {
                let mut ctx = ProcessContext::new(stages, session, entry);
                entry.stage().process(&mut ctx)
            } else {
                Err(StageError::NotEnabled(entry.name().to_owned()))
            };
            let elapsed = started.elapsed();
            total += elapsed;

            let result = match outcome {
                Ok(output) => {
                    let image = match output.image {
                        Some(image) => session.working.adopt_image(image),
                        None => session.working.snapshot_image(),
                    };
                    session
                        .working
                        .absorb(output.model.as_ref(), output.color_space);
                    StageResult::new(entry.id(), entry.name(), Ok(output.model)).with_image(image)
                }
                Err(error) => {
                    let error = if error.is_terminal() {
                        let cause = error.into_cause();
                        debug!(stage = entry.name(), error = %cause, "stage terminated the run");
                        terminal = Some((entry.name().to_owned(), cause.clone()));
                        cause
                    } else {
                        if entry.enabled() {
                            debug!(stage = entry.name(), %error, "stage failed");
                        }
                        error
                    };
                    StageResult::new(entry.id(), entry.name(), Err(error))
                        .with_image(session.working.snapshot_image())
                }
            };
            let result = result
                .with_color_space(session.working.color_space())
                .with_processing_time(elapsed);
            session.results.insert(entry.id(), result);
        }

        self.total_processing_time = total;
        trace!(
            stages = self.stages.len(),
            total_ms = total.as_secs_f64() * 1000.0,
            terminal = terminal.is_some(),
            "pipeline run finished"
        );
        self.terminal = terminal;
        match &self.terminal {
            Some((stage, cause)) => Err(PipelineError::Terminal {
                stage: stage.clone(),
                cause: cause.clone(),
            }),
            None => Ok(()),
        }
    }

    fn prepare_stages(&mut self) {
        let mut assignments = Vec::new();
        let ctx = PrepareContext::new(&self.stages, &self.session.properties);
        for entry in self.stages.iter().filter(|e| e.enabled()) {
            match entry.stage().prepare(&ctx) {
                Ok(mut requested) => assignments.append(&mut requested),
                Err(error) => warn!(stage = entry.name(), %error, "prepare failed"),
            }
        }
        self.apply_assignments(assignments);
    }

    fn apply_assignments(&mut self, assignments: Vec<PropertyAssignment>) {
        for assignment in assignments {
            let Some(target) = self.stage_mut(&assignment.stage_name) else {
                warn!(stage = %assignment.stage_name, "assignment target not found");
                continue;
            };
            if let Err(error) = target.set_property(&assignment.property, &assignment.value) {
                warn!(
                    stage = %assignment.stage_name,
                    property = %assignment.property,
                    %error,
                    "could not apply property"
                );
            }
        }
    }

    /// Free the working image and every cached result. Safe to call at any
    /// time, any number of times.
    pub fn release(&mut self) {
        self.session.release();
    }

    /// The cause of the terminal failure of the last run, if any.
    #[must_use]
    pub fn terminal_error(&self) -> Option<&StageError> {
        self.terminal.as_ref().map(|(_, cause)| cause)
    }

    // ───────────────────────────── results ─────────────────────────────

    /// Cached result of the stage called `name`.
    #[must_use]
    pub fn get_result(&self, name: &str) -> Option<&StageResult> {
        context::find_result(&self.stages, &self.session.results, name)
    }

    /// Cached result of the stage with identity `id`.
    #[must_use]
    pub fn get_result_for(&self, id: StageId) -> Option<&StageResult> {
        self.session.results.get(&id)
    }

    /// Cached result of a stage that is required to exist and to have
    /// succeeded.
    ///
    /// # Errors
    ///
    /// [`StageError::MissingName`], [`StageError::NotFound`],
    /// [`StageError::NoResult`], or the stage's own stored failure.
    pub fn get_expected_result(&self, name: &str) -> Result<&StageResult, StageError> {
        context::expected_result(&self.stages, &self.session.results, name)
    }

    /// Cached results in stage-list order.
    pub fn results(&self) -> impl Iterator<Item = &StageResult> {
        self.stages
            .iter()
            .filter_map(|e| self.session.results.get(&e.id()))
    }

    // ────────────────────────── working state ──────────────────────────

    /// The working image; the synthetic placeholder if nothing has
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
    pub const fn working_color_space(&self) -> Option<ColorSpace> {
        self.session.working.color_space()
    }

    /// Re-tag the working image.
    pub fn set_working_color_space(&mut self, color_space: Option<ColorSpace>) {
        self.session.working.set_color_space(color_space);
    }

    /// The raw frame most recently captured.
    #[must_use]
    pub const fn last_captured_image(&self) -> Option<&DynamicImage> {
        self.session.last_captured.as_ref()
    }

    /// Record a raw captured frame.
    pub fn set_last_captured_image(&mut self, image: Option<DynamicImage>) {
        self.session.last_captured = image;
    }

    /// Sum of the stage times of the last run.
    #[must_use]
    pub const fn total_processing_time(&self) -> Duration {
        self.total_processing_time
    }

    /// Overwrite the recorded total processing time.
    pub const fn set_total_processing_time(&mut self, total: Duration) {
        self.total_processing_time = total;
    }

    // ──────────────────────────── properties ───────────────────────────

    /// One ambient property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.session.properties.get(name)
    }

    /// Set an ambient property.
    pub fn set_property(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.session.properties.insert(name.into(), value);
    }

    /// Merge a batch of ambient properties.
    pub fn add_properties(
        &mut self,
        properties: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) {
        self.session.properties.extend(properties);
    }

    /// All ambient properties.
    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.session.properties
    }

    // ─────────────────────────── frame source ──────────────────────────

    /// Attach the camera (or any other frame source).
    pub fn set_frame_source(&mut self, source: impl FrameSource + 'static) {
        self.session.frame_source = Some(Box::new(source));
    }

    /// Detach the frame source.
    pub fn take_frame_source(&mut self) -> Option<Box<dyn FrameSource>> {
        self.session.frame_source.take()
    }

    // ──────────────────────────── parameters ───────────────────────────

    /// Enabled parameter stages that expose a named parameter, in list
    /// order.
    #[must_use]
    pub fn parameter_stages(&self) -> Vec<&StageEntry> {
        self.stages
            .iter()
            .filter(|e| e.enabled())
            .filter(|e| e.parameter().is_some_and(|p| !p.parameter_name().is_empty()))
            .collect()
    }

    /// Write every parameter's default back onto its target stage.
    /// Failures are logged, never returned.
    pub fn reset_to_defaults(&mut self) {
        let assignments: Vec<PropertyAssignment> = self
            .parameter_stages()
            .into_iter()
            .filter_map(StageEntry::parameter)
            .map(|p| p.assignment(p.default_value()))
            .collect();
        self.apply_assignments(assignments);
    }

    // ─────────────────────────── persistence ───────────────────────────

    /// Reset parameters to their defaults and serialize the stage list.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Serialization`], e.g. for an external stage.
    pub fn to_text(&mut self) -> Result<String, PipelineError> {
        self.reset_to_defaults();
        document::to_text(&self.stages)
    }

    /// Release all resources and replace the stage list with the one in
    /// `text`. Stages get fresh identities. On error the current list is
    /// kept.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Serialization`] for malformed text,
    /// [`PipelineError::DuplicateStageName`] if two stages share a name.
    pub fn from_text(&mut self, text: &str) -> Result<(), PipelineError> {
        self.release();
        let entries = document::from_text(text)?;
        let previous = std::mem::take(&mut self.stages);
        for entry in entries {
            if let Err(e) = self.add(entry) {
                self.stages = previous;
                return Err(e);
            }
        }
        Ok(())
    }

    /// The text [`to_text`](Self::to_text) would produce, without touching
    /// this pipeline.
    fn canonical_text(&self) -> Result<String, PipelineError> {
        let text = document::to_text(&self.stages)?;
        Self::from_document_text(&text)?.to_text()
    }

    /// An independent pipeline with the same configuration and options.
    /// Runtime state, properties and shots are not copied.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Serialization`] if the stage list cannot be
    /// serialized.
    pub fn try_clone(&self) -> Result<Self, PipelineError> {
        let copy = Self::from_document_text(&self.canonical_text()?)?;
        Ok(copy.with_options(self.session.options.clone()))
    }
}

impl PartialEq for Pipeline {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        match (self.canonical_text(), other.canonical_text()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages)
            .field("results", &self.session.results.len())
            .field("terminal", &self.terminal)
            .field("total_processing_time", &self.total_processing_time)
            .finish_non_exhaustive()
    }
}
