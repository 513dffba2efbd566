//! Per-stage diagnostics of a pipeline run.
//!
//! Built from the result cache after [`Pipeline::process`]; one entry per
//! stage, in list order. Intended for tuning pipelines from the command
//! line and for logging.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::Pipeline;
use crate::result::StageResult;
use crate::types::{ColorSpace, StageError};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics for one run of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// One entry per stage, in execution order.
    pub stages: Vec<StageDiagnostics>,
    /// Sum of all stage times (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// The terminal failure of the run, if any.
    pub terminal: Option<String>,
}

/// What happened to a single stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Stage name.
    pub name: String,
    /// Wall-clock time spent in the stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Outcome.
    pub status: StageStatus,
    /// Color space recorded in the result.
    pub color_space: Option<ColorSpace>,
    /// Width of the result image (0 when there is none).
    pub width: u32,
    /// Height of the result image.
    pub height: u32,
    /// Short rendering of the model, if the stage produced one.
    pub model: Option<String>,
}

/// Outcome of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageStatus {
    /// Ran and succeeded.
    Ok,
    /// Not run because it is disabled.
    Disabled,
    /// Ran and failed with this message.
    Failed(String),
}

impl StageDiagnostics {
    fn from_result(result: &StageResult) -> Self {
        let status = match result.error() {
            None => StageStatus::Ok,
            Some(StageError::NotEnabled(_)) => StageStatus::Disabled,
            Some(error) => StageStatus::Failed(error.to_string()),
        };
        Self {
            name: result.stage_name().to_owned(),
            duration: result.processing_time(),
            status,
            color_space: result.color_space(),
            width: result.image().width(),
            height: result.image().height(),
            model: result.model().map(crate::types::Model::summary),
        }
    }
}

impl PipelineDiagnostics {
    /// Collect diagnostics from the results of the last run.
    #[must_use]
    pub fn from_pipeline(pipeline: &Pipeline) -> Self {
        Self {
            stages: pipeline.results().map(StageDiagnostics::from_result).collect(),
            total_duration: pipeline.total_processing_time(),
            terminal: pipeline.terminal_error().map(ToString::to_string),
        }
    }

    /// Number of stages that ran and failed.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| matches!(s.status, StageStatus::Failed(_)))
            .count()
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Stages: {} ({} failed)",
            self.stages.len(),
            self.failed_count()
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<20} {:>10} {:>8}  {:<10} {:<6} {}",
            "Stage", "Duration", "% Total", "Image", "Color", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for stage in &self.stages {
            let ms = duration_ms(stage.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let size = format!("{}x{}", stage.width, stage.height);
            let color = stage
                .color_space
                .map_or_else(|| "-".to_owned(), |cs| cs.to_string());
            let details = match &stage.status {
                StageStatus::Ok => stage.model.clone().unwrap_or_default(),
                StageStatus::Disabled => "disabled".to_owned(),
                StageStatus::Failed(error) => format!("FAILED: {error}"),
            };
            lines.push(format!(
                "{:<20} {ms:>8.3}ms {pct:>7.1}%  {size:<10} {color:<6} {details}",
                stage.name
            ));
        }

        if let Some(terminal) = &self.terminal {
            lines.push(String::new());
            lines.push(format!("Terminated: {terminal}"));
        }

        lines.join("\n")
    }
}

impl Pipeline {
    /// Diagnostics for the last run.
    #[must_use]
    pub fn diagnostics(&self) -> PipelineDiagnostics {
        PipelineDiagnostics::from_pipeline(self)
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> PipelineDiagnostics {
        PipelineDiagnostics {
            stages: vec![
                StageDiagnostics {
                    name: "capture".to_owned(),
                    duration: Duration::from_millis(10),
                    status: StageStatus::Ok,
                    color_space: Some(ColorSpace::Bgr),
                    width: 640,
                    height: 480,
                    model: None,
                },
                StageDiagnostics {
                    name: "threshold".to_owned(),
                    duration: Duration::from_millis(5),
                    status: StageStatus::Failed("expected color space Gray, found BGR".to_owned()),
                    color_space: Some(ColorSpace::Bgr),
                    width: 640,
                    height: 480,
                    model: None,
                },
                StageDiagnostics {
                    name: "centroid".to_owned(),
                    duration: Duration::ZERO,
                    status: StageStatus::Disabled,
                    color_space: Some(ColorSpace::Bgr),
                    width: 640,
                    height: 480,
                    model: None,
                },
            ],
            total_duration: Duration::from_millis(15),
            terminal: None,
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let ms = duration_ms(Duration::from_millis(1234));
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn report_lists_every_stage() {
        let report = sample().report();
        assert!(report.contains("Pipeline Diagnostics Report"));
        assert!(report.contains("Stages: 3 (1 failed)"));
        assert!(report.contains("capture"));
        assert!(report.contains("FAILED: expected color space Gray"));
        assert!(report.contains("disabled"));
        assert!(!report.contains("Terminated"));
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["total_duration"], serde_json::json!(0.015));
        assert_eq!(json["stages"][2]["status"], serde_json::json!("disabled"));
        let back: PipelineDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample());
    }
}
