//! Analysis domain: response parsing, validation, attribute extraction, and
//! primary-image selection.
//!
//! The model reply is loosely typed; everything in this module exists to turn
//! it into a `ConsolidatedAnalysis` without fabricating or dropping data.

mod extractor;
mod parser;
mod primary;
mod validator;

pub use extractor::{
    extract_attributes, should_update_field, ExtractedField, ExtractedGemstoneAttributes,
};
pub use parser::{parse_model_response, NormalizedResponse};
pub use primary::{select_primary, PrimaryChoice};
pub use validator::{escalates_to_hard_failure, validate, ValidationOutcome};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The central artifact: one merged, validated result for all images of one
/// item in one model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedAnalysis {
    /// Whether validation passed without issues.
    pub validation_passed: bool,
    /// Completeness/correctness failures; may escalate to a hard failure.
    pub validation_issues: Vec<String>,
    /// Advisory, non-blocking observations.
    pub validation_warnings: Vec<String>,
    /// The model's consolidated attribute block, as returned.
    pub consolidated_data: Value,
    /// One analysis per supplied image.
    pub individual_analyses: Vec<PerImageAnalysis>,
    /// Gauge readings recorded across all images; never merged at this layer.
    pub gauge_readings: Vec<GaugeReading>,
    /// The model's cross-verification notes, as returned.
    pub data_verification: Value,
    /// The model's display-image pick, if any survived validation.
    pub primary_image_selection: Option<PrimaryImageSelection>,
    /// Aggregate quality metrics for the run.
    pub overall_metrics: OverallMetrics,
    /// Cost/latency/provenance metadata.
    pub processing_metadata: ProcessingMetadata,
    /// The unmodified model reply, preserved for audit and reparse.
    pub raw_model_response: String,
}

/// The model's reading of one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerImageAnalysis {
    /// 1-based position in the supplied image set.
    pub image_index: u32,
    /// What the image is: gemstone photo, label, scale, caliper, gauge,
    /// certificate.
    pub classification: String,
    /// Whatever the model pulled out of this image.
    #[serde(default)]
    pub extracted_data: Value,
    /// Confidence for this image's analysis (0.0-1.0).
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub notes: String,
}

/// One value read off a physical measuring instrument in a photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeReading {
    pub image_index: u32,
    /// Instrument kind: digital_scale, caliper, thickness_gauge.
    pub device_type: String,
    /// Physical quantity: weight, length, width, depth.
    pub measurement_type: String,
    pub value: f64,
    pub unit: String,
    #[serde(default)]
    pub confidence: f64,
    /// The literal text visible on the instrument display.
    #[serde(default)]
    pub display_text: String,
}

/// The model's pick for the canonical display image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryImageSelection {
    /// 1-based index into the supplied image set.
    pub image_index: u32,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Aggregate quality metrics for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverallMetrics {
    pub confidence_score: f64,
    pub data_completeness: f64,
    pub images_analyzed: u32,
    /// Must equal the originating request's image count; a mismatch is a
    /// validation issue, never silently corrected.
    pub expected_images: u32,
    pub gauge_readings_found: u32,
}

/// Cost, latency, and provenance for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub image_count: u32,
    pub time_ms: u64,
    pub cost_usd: f64,
    pub model_version: String,
    pub timestamp: DateTime<Utc>,
}

impl ConsolidatedAnalysis {
    /// Assemble the consolidated artifact from a normalized reply, its
    /// validation outcome, and the invocation accounting.
    pub fn assemble(
        normalized: &NormalizedResponse,
        outcome: ValidationOutcome,
        expected_images: u32,
        metadata: ProcessingMetadata,
    ) -> Self {
        let individual_analyses = normalized.individual_analyses.clone();
        let gauge_readings = normalized.gauge_readings.clone();

        let confidence_score = if individual_analyses.is_empty() {
            0.0
        } else {
            individual_analyses.iter().map(|a| a.confidence).sum::<f64>()
                / individual_analyses.len() as f64
        };
        let data_completeness = if expected_images == 0 {
            0.0
        } else {
            individual_analyses.len() as f64 / expected_images as f64
        };

        Self {
            validation_passed: outcome.passed,
            validation_issues: outcome.issues,
            validation_warnings: outcome.warnings,
            consolidated_data: normalized.consolidated_data.clone(),
            overall_metrics: OverallMetrics {
                confidence_score,
                data_completeness: data_completeness.min(1.0),
                images_analyzed: individual_analyses.len() as u32,
                expected_images,
                gauge_readings_found: gauge_readings.len() as u32,
            },
            individual_analyses,
            gauge_readings,
            data_verification: normalized.data_verification.clone(),
            primary_image_selection: normalized.primary_image_selection.clone(),
            processing_metadata: metadata,
            raw_model_response: normalized.raw_text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_keeps_expected_images_on_mismatch() {
        let normalized = parse_model_response(
            r#"{"validation": {"all_images_analyzed": true},
                "individual_analyses": [
                    {"image_index": 1, "classification": "gemstone_photo", "confidence": 0.9}
                ],
                "consolidated_data": {"cut": {"value": "oval", "confidence": 0.8}}}"#,
        );
        let outcome = validate(&normalized, 3);
        let analysis = ConsolidatedAnalysis::assemble(
            &normalized,
            outcome,
            3,
            ProcessingMetadata {
                image_count: 3,
                time_ms: 1200,
                cost_usd: 0.01,
                model_version: "gpt-4o".to_string(),
                timestamp: Utc::now(),
            },
        );

        assert!(!analysis.validation_passed);
        assert_eq!(analysis.overall_metrics.expected_images, 3);
        assert_eq!(analysis.overall_metrics.images_analyzed, 1);
    }
}
