//! Canonical attribute extraction from a consolidated analysis.
//!
//! Three ordered strategies, each tried only when the previous one yields
//! nothing: the model's pre-aggregated block, derivation from the per-image
//! readings, and a last-resort recursive key search. Conflicting readings are
//! resolved by confidence with every source listed; values are never averaged
//! silently.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{ConsolidatedAnalysis, GaugeReading, PerImageAnalysis};

/// One extracted field with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedField<T> {
    pub value: T,
    pub confidence: f64,
    /// 1-based indices of every image that contributed a reading.
    pub sources: Vec<u32>,
}

/// Canonical per-item attributes derived from one analysis run.
///
/// Derived fresh on every run. Manual values are a protected field set:
/// extraction output only ever fills fields with no manual value, and only
/// above the confidence threshold (`should_update_field`).
#[derive(Debug, Clone, Default)]
pub struct ExtractedGemstoneAttributes {
    pub weight_carats: Option<ExtractedField<f64>>,
    pub length_mm: Option<ExtractedField<f64>>,
    pub width_mm: Option<ExtractedField<f64>>,
    pub depth_mm: Option<ExtractedField<f64>>,
    pub color: Option<ExtractedField<String>>,
    pub clarity: Option<ExtractedField<String>>,
    pub cut: Option<ExtractedField<String>>,
    /// Mean of the per-field confidences actually found; 0 when none were.
    pub confidence: f64,
    pub extracted_at: Option<DateTime<Utc>>,
}

impl ExtractedGemstoneAttributes {
    fn is_empty(&self) -> bool {
        self.weight_carats.is_none()
            && self.length_mm.is_none()
            && self.width_mm.is_none()
            && self.depth_mm.is_none()
            && self.color.is_none()
            && self.clarity.is_none()
            && self.cut.is_none()
    }

    fn finalize(mut self) -> Self {
        let confidences: Vec<f64> = [
            self.weight_carats.as_ref().map(|f| f.confidence),
            self.length_mm.as_ref().map(|f| f.confidence),
            self.width_mm.as_ref().map(|f| f.confidence),
            self.depth_mm.as_ref().map(|f| f.confidence),
            self.color.as_ref().map(|f| f.confidence),
            self.clarity.as_ref().map(|f| f.confidence),
            self.cut.as_ref().map(|f| f.confidence),
        ]
        .into_iter()
        .flatten()
        .collect();

        self.confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };
        self.extracted_at = Some(Utc::now());
        self
    }
}

/// Candidate key spellings per logical field.
const WEIGHT_KEYS: &[&str] = &["weight_carats", "weight", "carat_weight", "carats"];
const LENGTH_KEYS: &[&str] = &["length_mm", "length"];
const WIDTH_KEYS: &[&str] = &["width_mm", "width"];
const DEPTH_KEYS: &[&str] = &["depth_mm", "depth", "thickness_mm", "thickness"];
const COLOR_KEYS: &[&str] = &["color", "colour"];
const CLARITY_KEYS: &[&str] = &["clarity"];
const CUT_KEYS: &[&str] = &["cut", "shape", "cut_shape"];

/// Extract canonical gemstone attributes from a consolidated analysis.
pub fn extract_attributes(analysis: &ConsolidatedAnalysis) -> ExtractedGemstoneAttributes {
    let from_block = from_consolidated_block(&analysis.consolidated_data);
    if !from_block.is_empty() {
        return from_block.finalize();
    }

    let from_readings =
        from_per_image_readings(&analysis.gauge_readings, &analysis.individual_analyses);
    if !from_readings.is_empty() {
        return from_readings.finalize();
    }

    from_recursive_search(analysis).finalize()
}

/// Whether an AI-derived value may populate a record field.
///
/// Absolute precedence rule: a manually-entered value always wins, and an AI
/// value only qualifies above the confidence threshold. Never violated
/// regardless of how confident the model claims to be.
pub fn should_update_field<T>(
    manual: Option<&T>,
    ai: Option<&T>,
    confidence: f64,
    threshold: f64,
) -> bool {
    manual.is_none() && ai.is_some() && confidence > threshold
}

/// Strategy (a): the model's pre-aggregated consolidated block.
fn from_consolidated_block(block: &Value) -> ExtractedGemstoneAttributes {
    let Some(obj) = block.as_object() else {
        return ExtractedGemstoneAttributes::default();
    };

    ExtractedGemstoneAttributes {
        weight_carats: numeric_field(obj, WEIGHT_KEYS),
        length_mm: numeric_field(obj, LENGTH_KEYS),
        width_mm: numeric_field(obj, WIDTH_KEYS),
        depth_mm: numeric_field(obj, DEPTH_KEYS),
        color: text_field(obj, COLOR_KEYS),
        clarity: text_field(obj, CLARITY_KEYS),
        cut: text_field(obj, CUT_KEYS),
        ..Default::default()
    }
}

/// Strategy (b): highest-confidence reading per physical quantity across the
/// per-image array and gauge readings. Every contributing image is listed as
/// a source; values are never averaged.
fn from_per_image_readings(
    readings: &[GaugeReading],
    analyses: &[PerImageAnalysis],
) -> ExtractedGemstoneAttributes {
    let mut attributes = ExtractedGemstoneAttributes {
        weight_carats: best_reading(readings, &["weight", "weight_carats"]),
        length_mm: best_reading(readings, &["length", "length_mm"]),
        width_mm: best_reading(readings, &["width", "width_mm"]),
        depth_mm: best_reading(readings, &["depth", "thickness", "depth_mm"]),
        ..Default::default()
    };

    // Visual attributes come from whichever per-image analysis mentions them
    // with the highest confidence.
    for analysis in analyses {
        let Some(obj) = analysis.extracted_data.as_object() else {
            continue;
        };
        merge_text(&mut attributes.color, obj, COLOR_KEYS, analysis);
        merge_text(&mut attributes.clarity, obj, CLARITY_KEYS, analysis);
        merge_text(&mut attributes.cut, obj, CUT_KEYS, analysis);
    }

    attributes
}

fn best_reading(readings: &[GaugeReading], types: &[&str]) -> Option<ExtractedField<f64>> {
    let matching: Vec<&GaugeReading> = readings
        .iter()
        .filter(|r| types.contains(&r.measurement_type.as_str()))
        .collect();

    let best = matching
        .iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;

    Some(ExtractedField {
        value: best.value,
        confidence: best.confidence,
        sources: matching.iter().map(|r| r.image_index).collect(),
    })
}

fn merge_text(
    slot: &mut Option<ExtractedField<String>>,
    obj: &Map<String, Value>,
    keys: &[&str],
    analysis: &PerImageAnalysis,
) {
    let Some(value) = keys.iter().find_map(|k| obj.get(*k)).and_then(Value::as_str) else {
        return;
    };

    match slot {
        Some(existing) if existing.confidence >= analysis.confidence => {
            existing.sources.push(analysis.image_index);
        }
        _ => {
            let mut sources = slot.take().map(|f| f.sources).unwrap_or_default();
            sources.push(analysis.image_index);
            *slot = Some(ExtractedField {
                value: value.to_string(),
                confidence: analysis.confidence,
                sources,
            });
        }
    }
}

/// Strategy (c): last resort. Recursively search every corner of the
/// normalized object for recognizable keys, depth-first, first hit wins.
fn from_recursive_search(analysis: &ConsolidatedAnalysis) -> ExtractedGemstoneAttributes {
    let mut roots = vec![
        analysis.consolidated_data.clone(),
        analysis.data_verification.clone(),
    ];
    roots.extend(analysis.individual_analyses.iter().map(|a| a.extracted_data.clone()));
    let haystack = Value::Array(roots);

    ExtractedGemstoneAttributes {
        weight_carats: search_numeric(&haystack, WEIGHT_KEYS),
        length_mm: search_numeric(&haystack, LENGTH_KEYS),
        width_mm: search_numeric(&haystack, WIDTH_KEYS),
        depth_mm: search_numeric(&haystack, DEPTH_KEYS),
        color: search_text(&haystack, COLOR_KEYS),
        clarity: search_text(&haystack, CLARITY_KEYS),
        cut: search_text(&haystack, CUT_KEYS),
        ..Default::default()
    }
}

fn search_numeric(value: &Value, keys: &[&str]) -> Option<ExtractedField<f64>> {
    find_key(value, keys).and_then(|v| {
        as_number(v).map(|n| ExtractedField {
            value: n,
            // Unattributed finds carry no confidence of their own.
            confidence: confidence_of(v).unwrap_or(0.0),
            sources: Vec::new(),
        })
    })
}

fn search_text(value: &Value, keys: &[&str]) -> Option<ExtractedField<String>> {
    find_key(value, keys).and_then(|v| {
        as_text(v).map(|s| ExtractedField {
            value: s,
            confidence: confidence_of(v).unwrap_or(0.0),
            sources: Vec::new(),
        })
    })
}

fn find_key<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    match value {
        Value::Object(obj) => {
            if let Some(found) = keys.iter().find_map(|k| obj.get(*k)) {
                return Some(found);
            }
            obj.values().find_map(|v| find_key(v, keys))
        }
        Value::Array(items) => items.iter().find_map(|v| find_key(v, keys)),
        _ => None,
    }
}

/// Read a field that may be `{value, confidence, sources}` or a bare value.
fn numeric_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<ExtractedField<f64>> {
    let raw = keys.iter().find_map(|k| obj.get(*k))?;
    Some(ExtractedField {
        value: as_number(raw)?,
        confidence: confidence_of(raw).unwrap_or(0.0),
        sources: sources_of(raw),
    })
}

fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<ExtractedField<String>> {
    let raw = keys.iter().find_map(|k| obj.get(*k))?;
    Some(ExtractedField {
        value: as_text(raw)?,
        confidence: confidence_of(raw).unwrap_or(0.0),
        sources: sources_of(raw),
    })
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(obj) => obj.get("value").and_then(as_number),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(obj) => obj.get("value").and_then(as_text),
        _ => None,
    }
}

fn confidence_of(value: &Value) -> Option<f64> {
    value.as_object()?.get("confidence")?.as_f64()
}

fn sources_of(value: &Value) -> Vec<u32> {
    value
        .as_object()
        .and_then(|o| o.get("sources"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_u64().map(|n| n as u32))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{parse_model_response, validate, ProcessingMetadata};
    use serde_json::json;

    fn analysis_from(reply: &str, expected: u32) -> ConsolidatedAnalysis {
        let normalized = parse_model_response(reply);
        let outcome = validate(&normalized, expected);
        ConsolidatedAnalysis::assemble(
            &normalized,
            outcome,
            expected,
            ProcessingMetadata {
                image_count: expected,
                time_ms: 0,
                cost_usd: 0.0,
                model_version: "test".to_string(),
                timestamp: Utc::now(),
            },
        )
    }

    #[test]
    fn test_manual_value_always_wins() {
        assert!(!should_update_field(Some(&5.2), Some(&5.3), 0.9, 0.7));
    }

    #[test]
    fn test_empty_field_fills_above_threshold() {
        assert!(should_update_field(None, Some(&5.3), 0.9, 0.7));
    }

    #[test]
    fn test_low_confidence_never_fills() {
        assert!(!should_update_field(None, Some(&5.3), 0.5, 0.7));
    }

    #[test]
    fn test_threshold_is_strict() {
        assert!(!should_update_field(None, Some(&5.3), 0.7, 0.7));
    }

    #[test]
    fn test_preaggregated_block_wins() {
        let reply = json!({
            "validation": {},
            "individual_analyses": [],
            "consolidated_data": {
                "weight_carats": {"value": 2.48, "confidence": 0.95, "sources": [2, 3]},
                "color": {"value": "royal blue", "confidence": 0.85, "sources": [1]}
            }
        })
        .to_string();

        let attributes = extract_attributes(&analysis_from(&reply, 3));
        let weight = attributes.weight_carats.unwrap();
        assert_eq!(weight.value, 2.48);
        assert_eq!(weight.sources, vec![2, 3]);
        assert_eq!(attributes.color.unwrap().value, "royal blue");
        // Mean of 0.95 and 0.85.
        assert!((attributes.confidence - 0.90).abs() < 1e-9);
    }

    #[test]
    fn test_conflicting_weights_pick_higher_confidence_and_list_both() {
        let reply = json!({
            "validation": {},
            "individual_analyses": [
                {"image_index": 1, "classification": "digital_scale", "confidence": 0.9},
                {"image_index": 2, "classification": "digital_scale", "confidence": 0.9}
            ],
            "gauge_readings": [
                {"image_index": 1, "device_type": "digital_scale", "measurement_type": "weight",
                 "value": 2.48, "unit": "ct", "confidence": 0.95},
                {"image_index": 2, "device_type": "digital_scale", "measurement_type": "weight",
                 "value": 2.47, "unit": "ct", "confidence": 0.80}
            ]
        })
        .to_string();

        let attributes = extract_attributes(&analysis_from(&reply, 2));
        let weight = attributes.weight_carats.unwrap();
        assert_eq!(weight.value, 2.48, "higher-confidence reading wins, never averaged");
        assert_eq!(weight.sources, vec![1, 2], "both sources listed");
    }

    #[test]
    fn test_visual_attributes_from_per_image_data() {
        let reply = json!({
            "validation": {},
            "individual_analyses": [
                {"image_index": 1, "classification": "gemstone_photo", "confidence": 0.7,
                 "extracted_data": {"color": "green", "cut": "round"}},
                {"image_index": 2, "classification": "certificate", "confidence": 0.9,
                 "extracted_data": {"color": "emerald green"}}
            ]
        })
        .to_string();

        let attributes = extract_attributes(&analysis_from(&reply, 2));
        let color = attributes.color.unwrap();
        assert_eq!(color.value, "emerald green");
        assert_eq!(color.confidence, 0.9);
        assert_eq!(color.sources, vec![1, 2]);
        assert_eq!(attributes.cut.unwrap().value, "round");
    }

    #[test]
    fn test_recursive_search_is_last_resort() {
        let reply = json!({
            "validation": {},
            "individual_analyses": [
                {"image_index": 1, "classification": "label", "confidence": 0.8,
                 "extracted_data": {"label_fields": {"nested": {"carat_weight": "3.01"}}}}
            ]
        })
        .to_string();

        let attributes = extract_attributes(&analysis_from(&reply, 1));
        assert_eq!(attributes.weight_carats.unwrap().value, 3.01);
        // Nothing carried a confidence, so the overall score defaults to 0.
        assert_eq!(attributes.confidence, 0.0);
    }

    #[test]
    fn test_nothing_found_yields_empty_with_zero_confidence() {
        let reply = json!({"validation": {}, "individual_analyses": []}).to_string();
        let attributes = extract_attributes(&analysis_from(&reply, 0));
        assert!(attributes.weight_carats.is_none());
        assert!(attributes.color.is_none());
        assert_eq!(attributes.confidence, 0.0);
    }
}
