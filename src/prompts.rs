//! Centralized prompt construction for the analysis pipeline
//!
//! The analysis prompt is parameterized by the exact image count. The model's
//! tendency to silently skip images is the single largest source of
//! validation failures, so the count is restated twice: once in the task
//! framing and once in the closing validation checklist.

/// Build the consolidated-analysis prompt for a batch of `image_count` images.
///
/// Pure function. The returned instructions demand one JSON object covering
/// every supplied image, gauge-reading extraction, cross-verified gemstone
/// attributes, and a primary display-image selection.
pub fn build_analysis_prompt(image_count: usize) -> String {
    format!(
        r#"You are a gemstone inventory analyst. You are given EXACTLY {count} photographs of ONE physical gemstone inventory item. Analyze ALL {count} images together and produce a single consolidated result.

The images may include: gemstone photos, handwritten or printed labels, digital scale displays, caliper readouts, thickness gauges, and certificates. Every image carries evidence; none may be skipped.

Your response MUST be valid JSON in this exact format:
{{
  "validation": {{
    "images_received": {count},
    "all_images_analyzed": true,
    "notes": ""
  }},
  "individual_analyses": [
    {{
      "image_index": 1,
      "classification": "gemstone_photo | label | digital_scale | caliper | thickness_gauge | certificate",
      "extracted_data": {{}},
      "confidence": 0.9,
      "notes": ""
    }}
  ],
  "gauge_readings": [
    {{
      "image_index": 2,
      "device_type": "digital_scale",
      "measurement_type": "weight",
      "value": 2.48,
      "unit": "ct",
      "confidence": 0.95,
      "display_text": "2.48"
    }}
  ],
  "consolidated_data": {{
    "weight_carats": {{"value": 2.48, "confidence": 0.95, "sources": [2]}},
    "length_mm": {{"value": 9.1, "confidence": 0.9, "sources": [3]}},
    "width_mm": {{"value": 7.0, "confidence": 0.9, "sources": [3]}},
    "depth_mm": {{"value": 4.2, "confidence": 0.8, "sources": [4]}},
    "color": {{"value": "royal blue", "confidence": 0.85, "sources": [1]}},
    "clarity": {{"value": "VS", "confidence": 0.6, "sources": [5]}},
    "cut": {{"value": "oval", "confidence": 0.9, "sources": [1]}}
  }},
  "data_verification": {{}},
  "primary_image_selection": {{
    "image_index": 1,
    "score": 0.92,
    "reasoning": "sharp, well-lit product shot"
  }}
}}

Rules:
- individual_analyses MUST contain one entry per image, image_index 1 through {count}, no gaps, no duplicates
- Read every visible measuring instrument into gauge_readings; record each reading separately even when two devices show the same quantity
- When sources disagree, keep the higher-confidence value in consolidated_data and list every contributing image in sources; never average silently
- primary_image_selection must be an actual gemstone photo, never a label, gauge, or certificate
- confidence values are between 0.0 and 1.0

Validation checklist before you answer:
1. Did you produce exactly {count} entries in individual_analyses?
2. Is every image_index from 1 to {count} present exactly once?
3. Did you attempt gauge extraction on every instrument image?
4. Is the selected primary image a product shot?

Always respond with valid JSON only, no other text."#,
        count = image_count
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_restates_count_twice() {
        let prompt = build_analysis_prompt(8);
        // Task framing and the validation checklist must both carry the count.
        assert!(prompt.contains("EXACTLY 8 photographs"));
        assert!(prompt.contains("exactly 8 entries"));
        assert!(prompt.contains("1 to 8"));
    }

    #[test]
    fn test_prompt_is_pure() {
        assert_eq!(build_analysis_prompt(3), build_analysis_prompt(3));
    }

    #[test]
    fn test_prompt_forbids_non_product_primary() {
        let prompt = build_analysis_prompt(2);
        assert!(prompt.contains("never a label, gauge, or certificate"));
    }
}
