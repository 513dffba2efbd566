//! Parameter stages: externally overridable stage properties.
//!
//! A parameter stage exposes one named value and a target (another stage
//! and one of its properties). During the prepare pass it looks for a
//! pipeline property of the same name, clamps it, and asks the pipeline
//! to write the effective value onto the target. When no override is
//! present the default is written instead, so a run never inherits a
//! stale override from the previous one.
//!
//! Overrides are transient. [`Pipeline::reset_to_defaults`] writes every
//! default back, and [`Pipeline::to_text`] does so before serializing.
//!
//! [`Pipeline::reset_to_defaults`]: crate::Pipeline::reset_to_defaults
//! [`Pipeline::to_text`]: crate::Pipeline::to_text

use serde::{Deserialize, Serialize};

use crate::context::{PrepareContext, ProcessContext};
use crate::stage::{PropertyAssignment, Stage, StageOutput};
use crate::types::{Properties, StageError};

/// The interface the pipeline uses to enumerate and reset parameters.
pub trait ParameterStage {
    /// Name of the pipeline property that overrides this parameter.
    /// An empty name means the parameter is not exposed.
    fn parameter_name(&self) -> &str;

    /// Value used when there is no override.
    fn default_value(&self) -> serde_json::Value;

    /// The stage and property this parameter controls.
    fn target(&self) -> (&str, &str);

    /// The value to apply given the current pipeline properties.
    fn value_for(&self, properties: &Properties) -> serde_json::Value;

    /// The assignment that writes `value` onto the target.
    fn assignment(&self, value: serde_json::Value) -> PropertyAssignment {
        let (stage_name, property) = self.target();
        PropertyAssignment {
            stage_name: stage_name.to_owned(),
            property: property.to_owned(),
            value,
        }
    }
}

/// A numeric parameter with bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParameterNumeric {
    /// Pipeline property that overrides the value.
    pub parameter_name: String,
    /// Stage to modify.
    pub stage_name: String,
    /// Property of that stage.
    pub property_name: String,
    /// Value when not overridden.
    pub default_value: f64,
    /// Lower bound for overrides.
    pub minimum: f64,
    /// Upper bound for overrides.
    pub maximum: f64,
}

impl Default for ParameterNumeric {
    fn default() -> Self {
        Self {
            parameter_name: String::new(),
            stage_name: String::new(),
            property_name: String::new(),
            default_value: 0.0,
            minimum: 0.0,
            maximum: 255.0,
        }
    }
}

impl ParameterNumeric {
    /// Expose `stage_name.property_name` as the parameter `parameter_name`.
    #[must_use]
    pub fn new(
        parameter_name: impl Into<String>,
        stage_name: impl Into<String>,
        property_name: impl Into<String>,
    ) -> Self {
        Self {
            parameter_name: parameter_name.into(),
            stage_name: stage_name.into(),
            property_name: property_name.into(),
            ..Self::default()
        }
    }

    /// Set the default and the bounds.
    #[must_use]
    pub fn with_range(mut self, default_value: f64, minimum: f64, maximum: f64) -> Self {
        self.default_value = default_value;
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    /// The effective number: the override clamped into bounds, or the
    /// default.
    #[must_use]
    pub fn effective(&self, properties: &Properties) -> f64 {
        if self.parameter_name.is_empty() {
            return self.default_value;
        }
        properties
            .get(&self.parameter_name)
            .and_then(serde_json::Value::as_f64)
            .map_or(self.default_value, |v| v.max(self.minimum).min(self.maximum))
    }
}

impl ParameterStage for ParameterNumeric {
    fn parameter_name(&self) -> &str {
        &self.parameter_name
    }

    fn default_value(&self) -> serde_json::Value {
        serde_json::json!(self.default_value)
    }

    fn target(&self) -> (&str, &str) {
        (&self.stage_name, &self.property_name)
    }

    fn value_for(&self, properties: &Properties) -> serde_json::Value {
        serde_json::json!(self.effective(properties))
    }
}

impl Stage for ParameterNumeric {
    fn prepare(&self, ctx: &PrepareContext<'_>) -> Result<Vec<PropertyAssignment>, StageError> {
        if ctx.stage(&self.stage_name).is_none() {
            return Err(StageError::NotFound(self.stage_name.clone()));
        }
        Ok(vec![self.assignment(self.value_for(ctx.properties()))])
    }

    fn process(&self, _ctx: &mut ProcessContext<'_>) -> Result<StageOutput, StageError> {
        Ok(StageOutput::none())
    }

    fn as_parameter(&self) -> Option<&dyn ParameterStage> {
        Some(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parameter() -> ParameterNumeric {
        ParameterNumeric::new("level", "threshold", "threshold").with_range(100.0, 10.0, 200.0)
    }

    #[test]
    fn default_without_override() {
        assert!((parameter().effective(&Properties::new()) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn override_is_clamped() {
        let mut properties = Properties::new();
        properties.insert("level".to_owned(), serde_json::json!(500));
        assert!((parameter().effective(&properties) - 200.0).abs() < f64::EPSILON);
        properties.insert("level".to_owned(), serde_json::json!(-1));
        assert!((parameter().effective(&properties) - 10.0).abs() < f64::EPSILON);
        properties.insert("level".to_owned(), serde_json::json!(42.5));
        assert!((parameter().effective(&properties) - 42.5).abs() < f64::EPSILON);
    }

    #[test]
    fn non_numeric_override_falls_back_to_default() {
        let mut properties = Properties::new();
        properties.insert("level".to_owned(), serde_json::json!("high"));
        assert!((parameter().effective(&properties) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unnamed_parameter_ignores_properties() {
        let mut unnamed = parameter();
        unnamed.parameter_name.clear();
        let mut properties = Properties::new();
        properties.insert(String::new(), serde_json::json!(150));
        assert!((unnamed.effective(&properties) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn assignment_targets_the_configured_property() {
        let assignment = parameter().assignment(serde_json::json!(1.0));
        assert_eq!(assignment.stage_name, "threshold");
        assert_eq!(assignment.property, "threshold");
        assert_eq!(assignment.value, serde_json::json!(1.0));
    }
}
