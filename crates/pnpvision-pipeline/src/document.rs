//! The pipeline document: the persisted form of a stage list.
//!
//! ```json
//! {
//!   "stages": [
//!     { "name": "capture", "enabled": true, "type": "image-capture", "default-color-space": "bgr" },
//!     { "name": "gray", "enabled": true, "type": "convert-color", "conversion": "to-gray" }
//!   ]
//! }
//! ```
//!
//! Only configured fields are written. Identities, results, working state
//! and properties never are.

use serde::{Deserialize, Serialize};

use crate::stage::StageEntry;
use crate::types::PipelineError;

/// A deserialized pipeline document.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineDocument {
    /// The stages, in execution order.
    #[serde(default)]
    pub stages: Vec<StageEntry>,
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    stages: &'a [StageEntry],
}

/// Serialize a stage list as a pretty-printed pipeline document.
///
/// # Errors
///
/// [`PipelineError::Serialization`] if any stage cannot be written
/// (external stages cannot).
pub fn to_text(stages: &[StageEntry]) -> Result<String, PipelineError> {
    Ok(serde_json::to_string_pretty(&DocumentRef { stages })?)
}

/// Parse a pipeline document.
///
/// # Errors
///
/// [`PipelineError::Serialization`] for malformed text or unknown stage
/// types.
pub fn from_text(text: &str) -> Result<Vec<StageEntry>, PipelineError> {
    let document: PipelineDocument = serde_json::from_str(text)?;
    Ok(document.stages)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::stage::StageKind;
    use crate::{Conversion, ConvertColor, ImageCapture, ParameterNumeric, Threshold};

    #[test]
    fn parses_builtin_stages() {
        let stages = from_text(
            r#"{
                "stages": [
                    { "name": "capture", "type": "image-capture" },
                    { "name": "gray", "type": "convert-color", "conversion": "to-gray" },
                    { "name": "bin", "enabled": false, "type": "threshold", "threshold": 60, "invert": true },
                    {
                        "name": "level",
                        "type": "parameter-numeric",
                        "parameter-name": "level",
                        "stage-name": "bin",
                        "property-name": "threshold",
                        "default-value": 60.0,
                        "minimum": 0.0,
                        "maximum": 255.0
                    }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(stages.len(), 4);
        assert!(matches!(stages[0].kind(), StageKind::ImageCapture(c) if *c == ImageCapture::default()));
        assert!(matches!(
            stages[1].kind(),
            StageKind::ConvertColor(ConvertColor {
                conversion: Conversion::ToGray
            })
        ));
        assert!(!stages[2].enabled());
        assert!(matches!(
            stages[2].kind(),
            StageKind::Threshold(Threshold {
                threshold: 60,
                invert: true
            })
        ));
        let StageKind::ParameterNumeric(ParameterNumeric { stage_name, .. }) = stages[3].kind() else {
            panic!("expected a numeric parameter");
        };
        assert_eq!(stage_name, "bin");
    }

    #[test]
    fn unknown_type_is_a_serialization_error() {
        let err = from_text(r#"{ "stages": [ { "type": "warp-drive" } ] }"#).unwrap_err();
        assert!(matches!(err, PipelineError::Serialization(_)));
    }

    #[test]
    fn empty_document_has_no_stages() {
        assert!(from_text("{}").unwrap().is_empty());
    }

    #[test]
    fn written_keys_are_hyphenated() {
        let stages = vec![StageEntry::new(
            "p",
            ParameterNumeric::new("level", "bin", "threshold"),
        )];
        let text = to_text(&stages).unwrap();
        assert!(text.contains("\"parameter-name\": \"level\""));
        assert!(text.contains("\"type\": \"parameter-numeric\""));
        assert!(!text.contains("parameter_name"));
    }
}
