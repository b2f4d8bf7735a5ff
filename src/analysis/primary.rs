//! Primary display-image selection.
//!
//! The model proposes an index with a score and reasoning; this layer maps it
//! back to a concrete stored image and disqualifies non-product shots. The
//! prompt already forbids picking labels and gauges, but the model is not
//! trusted on that point.

use tracing::warn;

use super::{PerImageAnalysis, PrimaryImageSelection};
use crate::config::{PolicyConfig, PrimaryPolicy};
use crate::images::ImageRef;

/// Classifications that can never be the display image.
const DISQUALIFIED: &[&str] = &[
    "label",
    "digital_scale",
    "caliper",
    "thickness_gauge",
    "certificate",
];

/// A validated primary-image choice, mapped to a stored image.
#[derive(Debug, Clone)]
pub struct PrimaryChoice {
    pub image_id: i64,
    pub score: f64,
    pub reasoning: String,
}

/// Map the model's selection onto the image batch.
///
/// Returns `None` when the selection is absent, out of range, points at a
/// disqualified classification, or scores below the configured floor under
/// the `reject` policy. Under the default `flag` policy a low-confidence
/// pick is kept, with the review flag appended to the stored reasoning.
pub fn select_primary(
    selection: Option<&PrimaryImageSelection>,
    images: &[ImageRef],
    analyses: &[PerImageAnalysis],
    policy: &PolicyConfig,
) -> Option<PrimaryChoice> {
    let selection = selection?;

    let index = selection.image_index;
    if index == 0 || index as usize > images.len() {
        warn!(index, images = images.len(), "Primary selection index out of range");
        return None;
    }

    if let Some(analysis) = analyses.iter().find(|a| a.image_index == index) {
        let classification = analysis.classification.to_lowercase();
        if DISQUALIFIED.iter().any(|d| classification.contains(d)) {
            warn!(
                index,
                classification = %analysis.classification,
                "Primary selection disqualified: not a product shot"
            );
            return None;
        }
    }

    let mut reasoning = selection.reasoning.clone();
    if selection.score < policy.primary_confidence_floor {
        match policy.primary_low_confidence {
            PrimaryPolicy::Reject => {
                warn!(
                    index,
                    score = selection.score,
                    floor = policy.primary_confidence_floor,
                    "Primary selection rejected: score below floor"
                );
                return None;
            }
            PrimaryPolicy::Flag => {
                warn!(
                    index,
                    score = selection.score,
                    floor = policy.primary_confidence_floor,
                    "Primary selection kept despite low score; flagged for review"
                );
                // The flag must survive without log access: it is stored
                // with the image alongside the model's reasoning.
                reasoning = format!(
                    "{reasoning} [flagged for review: score {:.2} below floor {:.2}]",
                    selection.score, policy.primary_confidence_floor
                );
            }
        }
    }

    // 1-based model index into the ordered batch.
    let image = &images[index as usize - 1];
    Some(PrimaryChoice {
        image_id: image.id,
        score: selection.score,
        reasoning,
    })
}
