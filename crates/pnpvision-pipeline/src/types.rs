//! Shared types for the pnpvision pipeline.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Re-export `DynamicImage` so stage implementations can build
/// [`Mat`](crate::Mat)s without depending on `image` directly.
pub use image::DynamicImage;

/// Ambient pipeline properties, keyed by name.
///
/// Stages read these during `process` (e.g. externally supplied part
/// geometry, or a parameter override). Values are plain JSON so that
/// callers, shots and the CLI can all produce them without sharing types.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// How the channels of a working image are to be interpreted.
///
/// The tag travels alongside the image; the pixel buffer itself does not
/// know whether its three channels are RGB or BGR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorSpace {
    /// Single-channel luminance.
    Gray,
    /// Red, green, blue.
    Rgb,
    /// Blue, green, red (the usual camera byte order).
    Bgr,
    /// Red, green, blue, alpha.
    Rgba,
    /// Blue, green, red, alpha.
    Bgra,
    /// Hue, saturation, value.
    Hsv,
}

impl ColorSpace {
    /// Number of channels an image in this color space carries.
    #[must_use]
    pub const fn channels(self) -> u8 {
        match self {
            Self::Gray => 1,
            Self::Rgb | Self::Bgr | Self::Hsv => 3,
            Self::Rgba | Self::Bgra => 4,
        }
    }
}

impl fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gray => "Gray",
            Self::Rgb => "RGB",
            Self::Bgr => "BGR",
            Self::Rgba => "RGBA",
            Self::Bgra => "BGRA",
            Self::Hsv => "HSV",
        })
    }
}

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.hypot(dy)
    }
}

/// Data extracted from an image by a stage.
///
/// The pipeline never inspects a model; it only carries the most recent
/// one forward. Stages agree among themselves on what they produce.
#[derive(Clone)]
pub enum Model {
    /// A single measurement (a count, a threshold, an angle).
    Scalar(f64),
    /// Detected locations, e.g. fiducial or hole centers.
    Points(Vec<Point>),
    /// Structured data in JSON form.
    Value(serde_json::Value),
    /// Anything else a third-party stage wants to hand downstream.
    Custom(Arc<dyn Any + Send + Sync>),
}

impl Model {
    /// The scalar value, if this is a [`Model::Scalar`].
    #[must_use]
    pub fn as_scalar(&self) -> Option<f64> {
        match *self {
            Self::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// The points, if this is a [`Model::Points`].
    #[must_use]
    pub fn as_points(&self) -> Option<&[Point]> {
        match self {
            Self::Points(points) => Some(points),
            _ => None,
        }
    }

    /// Downcast a [`Model::Custom`] payload.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Custom(any) => any.downcast_ref(),
            _ => None,
        }
    }

    /// Short description used by diagnostics.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Scalar(v) => format!("{v}"),
            Self::Points(points) => format!("{} points", points.len()),
            Self::Value(value) => {
                let s = value.to_string();
                if s.chars().count() > 40 {
                    let mut short: String = s.chars().take(37).collect();
                    short.push_str("...");
                    short
                } else {
                    s
                }
            }
            Self::Custom(_) => "<custom>".to_owned(),
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            Self::Points(points) => f.debug_tuple("Points").field(points).finish(),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => a == b,
            (Self::Points(a), Self::Points(b)) => a == b,
            (Self::Value(a), Self::Value(b)) => a == b,
            (Self::Custom(a), Self::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Engine-level configuration that is not part of any stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PipelineOptions {
    /// Width of the synthetic working image used before any stage has
    /// produced one.
    pub placeholder_width: u32,
    /// Height of the synthetic working image.
    pub placeholder_height: u32,
}

impl PipelineOptions {
    /// Default placeholder width in pixels.
    pub const DEFAULT_PLACEHOLDER_WIDTH: u32 = 640;
    /// Default placeholder height in pixels.
    pub const DEFAULT_PLACEHOLDER_HEIGHT: u32 = 480;
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            placeholder_width: Self::DEFAULT_PLACEHOLDER_WIDTH,
            placeholder_height: Self::DEFAULT_PLACEHOLDER_HEIGHT,
        }
    }
}

/// Failure of a single stage, or of a query a stage made.
///
/// Stored in the stage's [`StageResult`](crate::StageResult), so it must be
/// cheap to clone and compare.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    /// The stage is disabled and was not run.
    #[error("stage \"{0}\" not enabled")]
    NotEnabled(String),

    /// A stage reference was left blank.
    #[error("stage name must be given")]
    MissingName,

    /// No stage with this name is in the pipeline.
    #[error("stage \"{0}\" is missing in the pipeline")]
    NotFound(String),

    /// The stage exists but has no cached result (e.g. it has not run yet).
    #[error("stage \"{0}\" returned no result")]
    NoResult(String),

    /// The working image is in a color space the stage cannot handle.
    #[error("expected color space {expected}, found {found}")]
    ColorSpace {
        /// What the stage needs.
        expected: String,
        /// What the working state held.
        found: String,
    },

    /// `set_property` named a property the stage does not have.
    #[error("unknown property \"{0}\"")]
    UnknownProperty(String),

    /// `set_property` received a value of the wrong shape.
    #[error("invalid value for property \"{property}\": {reason}")]
    InvalidProperty {
        /// Property name.
        property: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A capture stage ran but no frame source is attached.
    #[error("no frame source attached to the pipeline")]
    NoFrameSource,

    /// The frame source failed to deliver a frame.
    #[error("capture failed: {0}")]
    Capture(String),

    /// Image decoding or buffer manipulation failed.
    #[error("image error: {0}")]
    Image(String),

    /// Free-form failure, for third-party stages.
    #[error("{0}")]
    Failed(String),

    /// A failure that invalidates the whole run.
    ///
    /// The wrapped cause is what ends up in the stage's result and what
    /// [`Pipeline::process`](crate::Pipeline::process) re-raises after the
    /// remaining stages have run.
    #[error("terminal: {0}")]
    Terminal(Box<StageError>),
}

impl StageError {
    /// Wrap `cause` as a terminal failure.
    #[must_use]
    pub fn terminal(cause: Self) -> Self {
        Self::Terminal(Box::new(cause))
    }

    /// Whether this is a [`StageError::Terminal`].
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    /// Strip any terminal wrapping and return the underlying cause.
    #[must_use]
    pub fn into_cause(self) -> Self {
        match self {
            Self::Terminal(cause) => cause.into_cause(),
            other => other,
        }
    }
}

impl From<image::ImageError> for StageError {
    fn from(e: image::ImageError) -> Self {
        Self::Image(e.to_string())
    }
}

/// Errors surfaced by [`Pipeline`](crate::Pipeline) operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A stage raised a terminal failure during `process`. Carries the
    /// underlying cause, not the terminal wrapper.
    #[error("stage \"{stage}\" terminated the run: {cause}")]
    Terminal {
        /// Name of the last stage that raised a terminal failure.
        stage: String,
        /// The underlying cause.
        cause: StageError,
    },

    /// Reading or writing the pipeline document failed.
    #[error("pipeline serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stage with this name is already in the pipeline.
    #[error("a stage named \"{0}\" already exists")]
    DuplicateStageName(String),

    /// No stage with this name is in the pipeline.
    #[error("stage \"{0}\" is missing in the pipeline")]
    StageNotFound(String),

    /// No pipeline shot at this index.
    #[error("no pipeline shot at index {0}")]
    ShotNotFound(usize),

    /// A shot handler failed.
    #[error("pipeline shot failed: {0}")]
    Shot(StageError),
}

impl PipelineError {
    /// The underlying stage failure, for terminal and shot errors.
    #[must_use]
    pub const fn stage_error(&self) -> Option<&StageError> {
        match self {
            Self::Terminal { cause, .. } | Self::Shot(cause) => Some(cause),
            _ => None,
        }
    }
}
