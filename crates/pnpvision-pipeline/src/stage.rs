//! The stage contract and the stage list element.
//!
//! A pipeline is an ordered list of [`StageEntry`]s. Each entry carries the
//! user-facing name and enabled flag plus a [`StageKind`], which is either
//! one of the built-in stages or an arbitrary [`Stage`] implementation
//! supplied by the caller.
//!
//! # Strategy pattern
//!
//! Built-in stages are enum variants so that the persistence format can
//! name them (`"type": "blur-gaussian"`) and round-trip their configured
//! fields. Third-party stages go in [`StageKind::External`]; they run like
//! any other stage but cannot be written to a pipeline document.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::blur::BlurGaussian;
use crate::capture::ImageCapture;
use crate::centroid::Centroid;
use crate::context::{PrepareContext, ProcessContext};
use crate::convert::ConvertColor;
use crate::mat::Mat;
use crate::parameter::{ParameterNumeric, ParameterStage};
use crate::recall::ImageRecall;
use crate::threshold::Threshold;
use crate::types::{ColorSpace, Model, StageError};

/// Pipeline-assigned identity of a stage.
///
/// Results are keyed by identity, not by name, so renaming a stage does not
/// orphan its result. Identities are never persisted: a pipeline loaded
/// from text gets fresh ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StageId(pub(crate) u64);

/// What a stage hands back from [`Stage::process`].
///
/// Every field is optional. A missing image means "leave the working image
/// as it is"; a missing model or color space means "keep the previous one".
#[derive(Debug, Default)]
pub struct StageOutput {
    /// A new working image.
    pub image: Option<Mat>,
    /// Data extracted by the stage.
    pub model: Option<Model>,
    /// Color space of `image`, or a re-interpretation of the current one.
    pub color_space: Option<ColorSpace>,
}

impl StageOutput {
    /// Produce nothing; the working state is left untouched.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Produce a new working image.
    #[must_use]
    pub fn image(image: Mat) -> Self {
        Self {
            image: Some(image),
            ..Self::default()
        }
    }

    /// Produce only a model.
    #[must_use]
    pub fn model(model: Model) -> Self {
        Self {
            model: Some(model),
            ..Self::default()
        }
    }

    /// Attach a model.
    #[must_use]
    pub fn with_model(mut self, model: Model) -> Self {
        self.model = Some(model);
        self
    }

    /// Attach a color space.
    #[must_use]
    pub fn with_color_space(mut self, color_space: ColorSpace) -> Self {
        self.color_space = Some(color_space);
        self
    }
}

/// A request, produced during the prepare pass, to override a property of
/// another stage for the coming run.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyAssignment {
    /// Name of the stage to modify.
    pub stage_name: String,
    /// Property on that stage.
    pub property: String,
    /// New value.
    pub value: serde_json::Value,
}

/// One unit of image processing.
///
/// `process` runs with exclusive access to the working state through the
/// [`ProcessContext`]. A stage must not hold on to the working image after
/// returning: the pipeline may release it as soon as a later stage
/// replaces it.
pub trait Stage: fmt::Debug + Send {
    /// Pre-pass run over every enabled stage before any stage is processed.
    ///
    /// Returned assignments are applied to their target stages. Errors are
    /// logged and ignored; they never abort the run.
    fn prepare(&self, ctx: &PrepareContext<'_>) -> Result<Vec<PropertyAssignment>, StageError> {
        let _ = ctx;
        Ok(Vec::new())
    }

    /// Run the stage.
    ///
    /// # Errors
    ///
    /// Any error is recorded in this stage's result. Wrap it with
    /// [`StageError::terminal`] to also fail the whole run.
    fn process(&self, ctx: &mut ProcessContext<'_>) -> Result<StageOutput, StageError>;

    /// Override a configured property, by name.
    ///
    /// # Errors
    ///
    /// [`StageError::UnknownProperty`] unless the stage supports it.
    fn set_property(&mut self, property: &str, value: &serde_json::Value) -> Result<(), StageError> {
        let _ = value;
        Err(StageError::UnknownProperty(property.to_owned()))
    }

    /// This stage's parameter interface, if it is a parameter stage.
    fn as_parameter(&self) -> Option<&dyn ParameterStage> {
        None
    }
}

/// The concrete stage behind a [`StageEntry`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StageKind {
    /// Grab a frame from the attached frame source.
    ImageCapture(ImageCapture),
    /// Convert the working image to another color space.
    ConvertColor(ConvertColor),
    /// Gaussian blur.
    BlurGaussian(BlurGaussian),
    /// Binary threshold of a grayscale image.
    Threshold(Threshold),
    /// Centroid of the foreground pixels of a binary image.
    Centroid(Centroid),
    /// Re-emit the image of an earlier stage.
    ImageRecall(ImageRecall),
    /// Externally overridable numeric parameter.
    ParameterNumeric(ParameterNumeric),
    /// A caller-supplied stage. Cannot be serialized.
    #[serde(skip)]
    External(Box<dyn Stage>),
}

impl StageKind {
    /// Wrap a third-party stage.
    #[must_use]
    pub fn external(stage: impl Stage + 'static) -> Self {
        Self::External(Box::new(stage))
    }

    /// The stage behaviour.
    #[must_use]
    pub fn as_stage(&self) -> &dyn Stage {
        match self {
            Self::ImageCapture(s) => s,
            Self::ConvertColor(s) => s,
            Self::BlurGaussian(s) => s,
            Self::Threshold(s) => s,
            Self::Centroid(s) => s,
            Self::ImageRecall(s) => s,
            Self::ParameterNumeric(s) => s,
            Self::External(s) => &**s,
        }
    }

    /// The stage behaviour, mutably.
    pub fn as_stage_mut(&mut self) -> &mut dyn Stage {
        match self {
            Self::ImageCapture(s) => s,
            Self::ConvertColor(s) => s,
            Self::BlurGaussian(s) => s,
            Self::Threshold(s) => s,
            Self::Centroid(s) => s,
            Self::ImageRecall(s) => s,
            Self::ParameterNumeric(s) => s,
            Self::External(s) => &mut **s,
        }
    }
}

macro_rules! impl_from_stage {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for StageKind {
                fn from(stage: $variant) -> Self {
                    Self::$variant(stage)
                }
            }
        )*
    };
}

impl_from_stage!(
    ImageCapture,
    ConvertColor,
    BlurGaussian,
    Threshold,
    Centroid,
    ImageRecall,
    ParameterNumeric,
);

/// One element of the stage list.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StageEntry {
    #[serde(skip)]
    id: StageId,
    #[serde(default)]
    name: String,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    #[serde(flatten)]
    kind: StageKind,
}

const fn enabled_by_default() -> bool {
    true
}

impl StageEntry {
    /// A new enabled stage. An empty name is replaced by a generated one
    /// when the stage is added to a pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<StageKind>) -> Self {
        Self {
            id: StageId::default(),
            name: name.into(),
            enabled: true,
            kind: kind.into(),
        }
    }

    /// A new enabled stage with a generated name.
    #[must_use]
    pub fn unnamed(kind: impl Into<StageKind>) -> Self {
        Self::new(String::new(), kind)
    }

    /// Set the enabled flag (builder style).
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Pipeline-assigned identity.
    #[must_use]
    pub const fn id(&self) -> StageId {
        self.id
    }

    /// Unique name within the pipeline.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the stage runs.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable the stage.
    pub const fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// The concrete stage.
    #[must_use]
    pub const fn kind(&self) -> &StageKind {
        &self.kind
    }

    /// The concrete stage, mutably.
    pub const fn kind_mut(&mut self) -> &mut StageKind {
        &mut self.kind
    }

    /// The stage behaviour.
    #[must_use]
    pub fn stage(&self) -> &dyn Stage {
        self.kind.as_stage()
    }

    /// The parameter interface, if this is a parameter stage.
    #[must_use]
    pub fn parameter(&self) -> Option<&dyn ParameterStage> {
        self.stage().as_parameter()
    }

    /// Override one of the stage's configured properties.
    ///
    /// # Errors
    ///
    /// Whatever the stage's [`Stage::set_property`] returns.
    pub fn set_property(
        &mut self,
        property: &str,
        value: &serde_json::Value,
    ) -> Result<(), StageError> {
        self.kind.as_stage_mut().set_property(property, value)
    }

    pub(crate) const fn assign_id(&mut self, id: StageId) {
        self.id = id;
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }
}

/// Read a numeric property value.
pub(crate) fn f64_property(property: &str, value: &serde_json::Value) -> Result<f64, StageError> {
    value.as_f64().ok_or_else(|| StageError::InvalidProperty {
        property: property.to_owned(),
        reason: format!("expected a number, got {value}"),
    })
}

/// Read a boolean property value.
pub(crate) fn bool_property(property: &str, value: &serde_json::Value) -> Result<bool, StageError> {
    value.as_bool().ok_or_else(|| StageError::InvalidProperty {
        property: property.to_owned(),
        reason: format!("expected a boolean, got {value}"),
    })
}

/// Fail unless the working image is in `expected`.
pub(crate) fn require_color_space(
    found: Option<ColorSpace>,
    expected: ColorSpace,
) -> Result<(), StageError> {
    if found == Some(expected) {
        Ok(())
    } else {
        Err(StageError::ColorSpace {
            expected: expected.to_string(),
            found: found.map_or_else(|| "none".to_owned(), |cs| cs.to_string()),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Noop;

    impl Stage for Noop {
        fn process(&self, _ctx: &mut ProcessContext<'_>) -> Result<StageOutput, StageError> {
            Ok(StageOutput::none())
        }
    }

    #[test]
    fn builtin_entry_serializes_with_type_tag() {
        let entry = StageEntry::new("blur", BlurGaussian { sigma: 1.5 });
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "blur",
                "enabled": true,
                "type": "blur-gaussian",
                "sigma": 1.5,
            })
        );
    }

    #[test]
    fn entry_deserializes_with_defaults() {
        let entry: StageEntry =
            serde_json::from_str(r#"{ "type": "threshold", "threshold": 90 }"#).unwrap();
        assert_eq!(entry.name(), "");
        assert!(entry.enabled());
        assert!(matches!(
            entry.kind(),
            StageKind::Threshold(Threshold {
                threshold: 90,
                invert: false
            })
        ));
    }

    #[test]
    fn external_stage_cannot_be_serialized() {
        let entry = StageEntry::new("custom", StageKind::external(Noop));
        assert!(serde_json::to_string(&entry).is_err());
    }

    #[test]
    fn default_set_property_rejects() {
        let mut entry = StageEntry::new("custom", StageKind::external(Noop));
        let err = entry
            .set_property("anything", &serde_json::json!(1))
            .unwrap_err();
        assert_eq!(err, StageError::UnknownProperty("anything".to_owned()));
    }

    #[test]
    fn require_color_space_reports_found() {
        let err = require_color_space(Some(ColorSpace::Bgr), ColorSpace::Gray).unwrap_err();
        assert_eq!(
            err,
            StageError::ColorSpace {
                expected: "Gray".to_owned(),
                found: "BGR".to_owned(),
            }
        );
        let err = require_color_space(None, ColorSpace::Gray).unwrap_err();
        assert!(err.to_string().contains("none"));
    }
}
