//! pnpvision-pipeline: a linear vision pipeline engine (sans-IO).
//!
//! A [`Pipeline`] is an ordered list of named stages run in sequence over
//! a shared working image, model and color space, as used to locate
//! parts, fiducials and features in camera frames. The engine handles:
//!
//! - stage sequencing with per-stage error isolation and terminal
//!   failures that are reported after the run completes,
//! - image buffer ownership: superseded working images are released as
//!   soon as they are replaced, cached results hold private copies,
//! - a result cache queryable by stage name after every run,
//! - parameter stages whose overrides never reach the persisted document,
//! - composite shots (several takes merged into one result),
//! - round-tripping the stage list through a JSON document.
//!
//! This crate has **no I/O dependencies**: frames come from a
//! [`FrameSource`] supplied by the caller and documents are plain strings.
//! Stages other than the built-ins implement [`Stage`] and are added as
//! [`StageKind::External`].

pub mod blur;
pub mod capture;
pub mod centroid;
pub mod context;
pub mod convert;
pub mod diagnostics;
pub mod document;
pub mod mat;
pub mod parameter;
pub mod pipeline;
pub mod recall;
pub mod result;
pub mod shot;
pub mod stage;
pub mod threshold;
pub mod types;
pub mod working;

pub use blur::BlurGaussian;
pub use capture::{FrameSequence, FrameSource, ImageCapture};
pub use centroid::Centroid;
pub use context::{PrepareContext, ProcessContext};
pub use convert::{Conversion, ConvertColor};
pub use diagnostics::{PipelineDiagnostics, StageDiagnostics, StageStatus};
pub use document::PipelineDocument;
pub use mat::{Mat, WeakMat};
pub use parameter::{ParameterNumeric, ParameterStage};
pub use pipeline::Pipeline;
pub use recall::ImageRecall;
pub use result::StageResult;
pub use shot::{PipelineShot, ShotHandler};
pub use stage::{PropertyAssignment, Stage, StageEntry, StageId, StageKind, StageOutput};
pub use threshold::Threshold;
pub use types::{
    ColorSpace, DynamicImage, Model, PipelineError, PipelineOptions, Point, Properties, StageError,
};
pub use working::{WorkingState, merge};
