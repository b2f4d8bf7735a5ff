//! Completeness validation of a normalized model reply.
//!
//! Issues fail validation but are advisory by default: the run is persisted
//! in full with the issues attached for human review. Only explicit
//! completeness violations (unparseable reply, wrong image count, broken
//! per-image indexing) escalate to a hard item failure. Warnings never block
//! anything. The Validator is the schema: nothing upstream enforces one on
//! the wire.

use std::collections::BTreeSet;

use super::parser::NormalizedResponse;

/// Markers that escalate a failed validation into a hard item failure.
const ESCALATION_MARKERS: &[&str] = &["INCOMPLETE", "INVALID"];

/// Result of validating one normalized reply.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub passed: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

/// Validate a normalized reply against the expected image count.
pub fn validate(normalized: &NormalizedResponse, expected_images: u32) -> ValidationOutcome {
    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    if let Some(error) = &normalized.parse_error {
        issues.push(format!("INVALID: reply is not parseable JSON ({error})"));
        return ValidationOutcome {
            passed: false,
            issues,
            warnings,
        };
    }

    // Missing sections are advisory: the extractor can still recover
    // attributes from the per-image data and gauge readings.
    if normalized.validation.is_null() {
        issues.push("missing validation section".to_string());
    }
    if normalized.consolidated_data.is_null() {
        issues.push("missing consolidated data section".to_string());
    }

    let returned = normalized.individual_analyses.len() as u32;
    if returned != expected_images {
        issues.push(format!(
            "INCOMPLETE: model returned {returned} image analyses but {expected_images} images were supplied"
        ));
    }

    let indices: BTreeSet<u32> = normalized
        .individual_analyses
        .iter()
        .map(|a| a.image_index)
        .collect();
    if indices.len() != normalized.individual_analyses.len() {
        issues.push("INCOMPLETE: duplicate image indices in per-image analyses".to_string());
    }
    if returned == expected_images && expected_images > 0 {
        let expected_set: BTreeSet<u32> = (1..=expected_images).collect();
        if indices != expected_set {
            issues.push(format!(
                "INCOMPLETE: image indices are not the contiguous range 1..={expected_images}"
            ));
        }
    }

    if normalized.gauge_readings.is_empty() {
        warnings.push(
            "no gauge readings found; images may contain no measuring devices".to_string(),
        );
    }
    if normalized.primary_image_selection.is_none() {
        warnings.push("model did not select a primary image".to_string());
    }

    ValidationOutcome {
        passed: issues.is_empty(),
        issues,
        warnings,
    }
}

/// Whether a failed validation must become a hard failure for the item.
///
/// Hard failures keep only the run record for audit; every other failed
/// validation is persisted in full with its issues attached for human review
/// and the item completes.
pub fn escalates_to_hard_failure(outcome: &ValidationOutcome) -> bool {
    !outcome.passed
        && outcome
            .issues
            .iter()
            .any(|issue| ESCALATION_MARKERS.iter().any(|m| issue.contains(m)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::parse_model_response;
    use serde_json::json;

    fn reply_with_indices(indices: &[u32]) -> NormalizedResponse {
        let analyses: Vec<_> = indices
            .iter()
            .map(|i| json!({"image_index": i, "classification": "gemstone_photo", "confidence": 0.9}))
            .collect();
        let reply = json!({
            "validation": {"all_images_analyzed": true},
            "individual_analyses": analyses,
            "gauge_readings": [
                {"image_index": 1, "device_type": "digital_scale",
                 "measurement_type": "weight", "value": 2.5, "unit": "ct", "confidence": 0.9}
            ],
            "consolidated_data": {"cut": {"value": "oval", "confidence": 0.9}},
            "primary_image_selection": {"image_index": 1, "score": 0.9}
        })
        .to_string();
        parse_model_response(&reply)
    }

    #[test]
    fn test_complete_reply_passes() {
        let outcome = validate(&reply_with_indices(&[1, 2, 3]), 3);
        assert!(outcome.passed, "issues: {:?}", outcome.issues);
        assert!(outcome.issues.is_empty());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_count_mismatch_is_explicit_issue() {
        let outcome = validate(&reply_with_indices(&[1, 2, 3, 4, 5, 6, 7]), 8);
        assert!(!outcome.passed);
        assert!(
            outcome.issues.iter().any(|i| i.contains("7") && i.contains("8")),
            "issue must spell out 7 vs 8: {:?}",
            outcome.issues
        );
        assert!(escalates_to_hard_failure(&outcome));
    }

    #[test]
    fn test_noncontiguous_indices_are_an_issue() {
        let outcome = validate(&reply_with_indices(&[1, 2, 4]), 3);
        assert!(!outcome.passed);
        assert!(outcome.issues.iter().any(|i| i.contains("contiguous")));
    }

    #[test]
    fn test_zero_gauge_readings_is_warning_only() {
        let reply = json!({
            "validation": {"all_images_analyzed": true},
            "individual_analyses": [
                {"image_index": 1, "classification": "gemstone_photo", "confidence": 0.9}
            ],
            "consolidated_data": {"cut": {"value": "oval", "confidence": 0.9}},
            "primary_image_selection": {"image_index": 1, "score": 0.9}
        })
        .to_string();
        let outcome = validate(&parse_model_response(&reply), 1);
        assert!(outcome.passed);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("gauge"));
    }

    #[test]
    fn test_missing_primary_selection_is_warning() {
        let reply = json!({
            "validation": {"all_images_analyzed": true},
            "individual_analyses": [
                {"image_index": 1, "classification": "gemstone_photo", "confidence": 0.9}
            ],
            "gauge_readings": [
                {"image_index": 1, "device_type": "caliper",
                 "measurement_type": "length", "value": 9.0, "unit": "mm", "confidence": 0.8}
            ],
            "consolidated_data": {"cut": {"value": "oval", "confidence": 0.9}}
        })
        .to_string();
        let outcome = validate(&parse_model_response(&reply), 1);
        assert!(outcome.passed);
        assert!(outcome.warnings.iter().any(|w| w.contains("primary")));
    }

    #[test]
    fn test_missing_consolidated_block_stays_advisory() {
        let reply = json!({
            "validation": {"all_images_analyzed": true},
            "individual_analyses": [
                {"image_index": 1, "classification": "gemstone_photo", "confidence": 0.9},
                {"image_index": 2, "classification": "digital_scale", "confidence": 0.85}
            ],
            "gauge_readings": [
                {"image_index": 2, "device_type": "digital_scale",
                 "measurement_type": "weight", "value": 2.5, "unit": "ct", "confidence": 0.9}
            ],
            "primary_image_selection": {"image_index": 1, "score": 0.9}
        })
        .to_string();
        let outcome = validate(&parse_model_response(&reply), 2);
        assert!(!outcome.passed);
        assert!(outcome.issues.iter().any(|i| i.contains("consolidated data")));
        assert!(!escalates_to_hard_failure(&outcome));
    }

    #[test]
    fn test_empty_reply_escalates_on_count_not_sections() {
        let outcome = validate(&parse_model_response("{}"), 2);
        assert!(!outcome.passed);
        assert!(outcome.issues.iter().any(|i| i.contains("validation section")));
        assert!(
            outcome.issues.iter().any(|i| i.starts_with("INCOMPLETE")),
            "count mismatch must carry the escalation marker: {:?}",
            outcome.issues
        );
        assert!(escalates_to_hard_failure(&outcome));
    }

    #[test]
    fn test_parse_failure_escalates() {
        let outcome = validate(&parse_model_response("not json at all"), 2);
        assert!(!outcome.passed);
        assert!(escalates_to_hard_failure(&outcome));
    }

    #[test]
    fn test_passed_outcome_never_escalates() {
        let outcome = validate(&reply_with_indices(&[1]), 1);
        assert!(!escalates_to_hard_failure(&outcome));
    }
}
