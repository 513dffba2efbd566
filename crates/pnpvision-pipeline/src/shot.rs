//! Composite shots: one pipeline, several takes.
//!
//! Some measurements need more than one image, e.g. the same part seen at
//! several rotations. A shot records the pipeline properties at the moment
//! it is created. A driver then loops:
//!
//! 1. [`step_to_next_pipeline_shot`](Pipeline::step_to_next_pipeline_shot)
//!    (restores that shot's properties and calls its handler's
//!    [`apply`](ShotHandler::apply), which may move hardware),
//! 2. [`process`](Pipeline::process),
//! 3. [`consume_shot_result`](Pipeline::consume_shot_result),
//!
//! and finally asks for the [`composite_result`](Pipeline::composite_result).

use std::fmt;

use crate::context;
use crate::pipeline::Pipeline;
use crate::result::StageResult;
use crate::types::{PipelineError, Properties, StageError};

/// What a shot does with its results. Implemented by the caller.
pub trait ShotHandler: Send {
    /// Called after the shot's properties have been restored onto the
    /// pipeline.
    ///
    /// # Errors
    ///
    /// Anything that prevents the shot from being taken.
    fn apply(&mut self, properties: &Properties) -> Result<(), StageError> {
        let _ = properties;
        Ok(())
    }

    /// Take in the result of one run made for this shot.
    fn process_result(&mut self, result: &StageResult);

    /// Merge everything received so far into a single result.
    ///
    /// # Errors
    ///
    /// Whatever the merge decides is fatal, e.g. too few usable takes.
    fn process_composite_result(&mut self) -> Result<StageResult, StageError>;
}

/// One take: a property snapshot plus the handler that consumes results.
pub struct PipelineShot {
    index: usize,
    properties: Properties,
    handler: Box<dyn ShotHandler>,
}

impl PipelineShot {
    /// Position in the shot list.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// The properties recorded when the shot was created.
    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    /// The handler.
    #[must_use]
    pub fn handler(&self) -> &dyn ShotHandler {
        self.handler.as_ref()
    }

    /// The handler, mutably.
    pub fn handler_mut(&mut self) -> &mut dyn ShotHandler {
        self.handler.as_mut()
    }
}

impl fmt::Debug for PipelineShot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineShot")
            .field("index", &self.index)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub(crate) struct ShotList {
    shots: Vec<PipelineShot>,
    current: usize,
}

impl Pipeline {
    /// Snapshot the current properties into a new shot, append it and make
    /// it current. Returns its index.
    pub fn create_shot(&mut self, handler: impl ShotHandler + 'static) -> usize {
        let index = self.shots.shots.len();
        self.shots.shots.push(PipelineShot {
            index,
            properties: self.session.properties.clone(),
            handler: Box::new(handler),
        });
        self.shots.current = index;
        index
    }

    /// Restore shot `index`'s properties, make it current and run its
    /// handler's `apply`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ShotNotFound`] for a bad index,
    /// [`PipelineError::Shot`] if the handler fails.
    pub fn apply_shot(&mut self, index: usize) -> Result<(), PipelineError> {
        let shot = self
            .shots
            .shots
            .get_mut(index)
            .ok_or(PipelineError::ShotNotFound(index))?;
        self.session.properties.clone_from(&shot.properties);
        self.shots.current = index;
        shot.handler
            .apply(&self.session.properties)
            .map_err(PipelineError::Shot)
    }

    /// Advance circularly to the next shot and apply it. Does nothing
    /// unless there are at least two shots.
    ///
    /// # Errors
    ///
    /// As [`apply_shot`](Self::apply_shot).
    pub fn step_to_next_pipeline_shot(&mut self) -> Result<(), PipelineError> {
        let count = self.shots.shots.len();
        if count > 1 {
            self.apply_shot((self.shots.current + 1) % count)
        } else {
            Ok(())
        }
    }

    /// All shots, in creation order.
    #[must_use]
    pub fn pipeline_shots(&self) -> &[PipelineShot] {
        &self.shots.shots
    }

    /// Shot `index`, if it exists.
    #[must_use]
    pub fn pipeline_shot(&self, index: usize) -> Option<&PipelineShot> {
        self.shots.shots.get(index)
    }

    /// The current shot, if any shots exist.
    #[must_use]
    pub fn current_pipeline_shot(&self) -> Option<&PipelineShot> {
        self.shots.shots.get(self.shots.current)
    }

    /// Index of the current shot, if any shots exist.
    #[must_use]
    pub fn current_shot_index(&self) -> Option<usize> {
        self.current_pipeline_shot().map(PipelineShot::index)
    }

    /// Number of shots.
    #[must_use]
    pub fn pipeline_shots_count(&self) -> usize {
        self.shots.shots.len()
    }

    /// Hand the cached result of `stage_name` to the current shot.
    ///
    /// # Errors
    ///
    /// [`PipelineError::StageNotFound`] for an unknown stage,
    /// [`PipelineError::Shot`] with [`StageError::NoResult`] if it has not
    /// run, [`PipelineError::ShotNotFound`] if there are no shots.
    pub fn consume_shot_result(&mut self, stage_name: &str) -> Result<(), PipelineError> {
        if context::find_stage(&self.stages, stage_name).is_none() {
            return Err(PipelineError::StageNotFound(stage_name.to_owned()));
        }
        let result = context::find_result(&self.stages, &self.session.results, stage_name)
            .ok_or_else(|| PipelineError::Shot(StageError::NoResult(stage_name.to_owned())))?;
        let current = self.shots.current;
        let shot = self
            .shots
            .shots
            .get_mut(current)
            .ok_or(PipelineError::ShotNotFound(current))?;
        shot.handler.process_result(result);
        Ok(())
    }

    /// Ask the current shot for the merged result of all takes.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ShotNotFound`] if there are no shots,
    /// [`PipelineError::Shot`] if the handler fails.
    pub fn composite_result(&mut self) -> Result<StageResult, PipelineError> {
        let current = self.shots.current;
        let shot = self
            .shots
            .shots
            .get_mut(current)
            .ok_or(PipelineError::ShotNotFound(current))?;
        shot.handler
            .process_composite_result()
            .map_err(PipelineError::Shot)
    }

    /// Forget all properties and shots so the pipeline can be reused for
    /// another part.
    pub fn reset_reused_pipeline(&mut self) {
        self.session.properties.clear();
        self.shots.shots.clear();
        self.shots.current = 0;
    }
}
