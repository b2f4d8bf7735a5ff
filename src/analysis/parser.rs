//! Model-reply parsing and shape normalization.
//!
//! The reply is free-form text expected to contain one JSON object, possibly
//! wrapped in prose or a fenced code block, and possibly using any of several
//! plausible top-level key spellings. Parsing never throws out of the
//! pipeline: an unparseable reply becomes a recorded parser-failure value.

use serde_json::{Map, Value};

use super::{GaugeReading, PerImageAnalysis, PrimaryImageSelection};

/// Ordered candidate keys per logical field; first present, non-empty wins.
const VALIDATION_KEYS: &[&str] = &["validation", "validation_check", "completeness_check"];
const ANALYSES_KEYS: &[&str] = &[
    "individual_analyses",
    "image_analyses",
    "per_image_analysis",
    "images",
];
const GAUGE_KEYS: &[&str] = &["gauge_readings", "instrument_readings", "measurements"];
const CONSOLIDATED_KEYS: &[&str] = &[
    "consolidated_data",
    "aggregated_data",
    "overall_summary",
    "gemstone_data",
];
const VERIFICATION_KEYS: &[&str] = &["data_verification", "cross_verification", "verification"];
const PRIMARY_KEYS: &[&str] = &["primary_image_selection", "primary_image", "best_image"];

/// The canonical schema every reply is normalized into.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResponse {
    /// Set when no valid JSON could be extracted; the failure is a recorded
    /// outcome, not an error.
    pub parse_error: Option<String>,
    /// The unmodified reply text.
    pub raw_text: String,
    pub validation: Value,
    pub individual_analyses: Vec<PerImageAnalysis>,
    pub gauge_readings: Vec<GaugeReading>,
    pub consolidated_data: Value,
    pub data_verification: Value,
    pub primary_image_selection: Option<PrimaryImageSelection>,
}

impl NormalizedResponse {
    fn failure(raw_text: &str, error: String) -> Self {
        Self {
            parse_error: Some(error),
            raw_text: raw_text.to_string(),
            validation: Value::Null,
            individual_analyses: Vec::new(),
            gauge_readings: Vec::new(),
            consolidated_data: Value::Null,
            data_verification: Value::Null,
            primary_image_selection: None,
        }
    }
}

/// Parse a raw model reply into the canonical schema.
///
/// Idempotent: the output is a pure function of the input text.
pub fn parse_model_response(raw_text: &str) -> NormalizedResponse {
    let candidate = match extract_json_candidate(raw_text) {
        Some(c) => c,
        None => {
            return NormalizedResponse::failure(raw_text, "no JSON object found in reply".into())
        }
    };

    let root: Value = match serde_json::from_str(&candidate) {
        Ok(v) => v,
        Err(e) => return NormalizedResponse::failure(raw_text, e.to_string()),
    };

    let object = match root.as_object() {
        Some(o) => o,
        None => {
            return NormalizedResponse::failure(raw_text, "top-level JSON is not an object".into())
        }
    };

    NormalizedResponse {
        parse_error: None,
        raw_text: raw_text.to_string(),
        validation: probe(object, VALIDATION_KEYS).cloned().unwrap_or(Value::Null),
        individual_analyses: probe(object, ANALYSES_KEYS)
            .map(parse_per_image_array)
            .unwrap_or_default(),
        gauge_readings: probe(object, GAUGE_KEYS)
            .map(parse_gauge_array)
            .unwrap_or_default(),
        consolidated_data: probe(object, CONSOLIDATED_KEYS)
            .cloned()
            .unwrap_or(Value::Null),
        data_verification: probe(object, VERIFICATION_KEYS)
            .cloned()
            .unwrap_or(Value::Null),
        primary_image_selection: probe(object, PRIMARY_KEYS).and_then(parse_primary_selection),
    }
}

/// Pull the JSON candidate out of the reply text.
///
/// A fenced code block wins; otherwise the span from the first `{` to the
/// last `}`. First/last brace approximates the outermost balanced span,
/// which is sufficient for single-object model output.
fn extract_json_candidate(raw_text: &str) -> Option<String> {
    if let Some(fenced) = extract_fenced_block(raw_text) {
        return Some(fenced);
    }

    let start = raw_text.find('{')?;
    let end = raw_text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(raw_text[start..=end].to_string())
}

fn extract_fenced_block(raw_text: &str) -> Option<String> {
    let open = raw_text.find("```")?;
    let after_fence = &raw_text[open + 3..];
    // Skip the language tag ("json", etc.) up to the first newline.
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    let candidate = body[..close].trim();
    if candidate.is_empty() {
        None
    } else {
        Some(candidate.to_string())
    }
}

/// First candidate key whose value is present and non-empty.
fn probe<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| object.get(*k))
        .find(|v| !is_empty(v))
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn parse_per_image_array(value: &Value) -> Vec<PerImageAnalysis> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let image_index = number_at(obj, &["image_index", "index", "image_number"])? as u32;
            Some(PerImageAnalysis {
                image_index,
                classification: string_at(obj, &["classification", "image_type", "type"])
                    .unwrap_or_else(|| "unknown".to_string()),
                extracted_data: obj
                    .get("extracted_data")
                    .or_else(|| obj.get("data"))
                    .cloned()
                    .unwrap_or(Value::Null),
                confidence: number_at(obj, &["confidence"]).unwrap_or(0.0),
                notes: string_at(obj, &["notes"]).unwrap_or_default(),
            })
        })
        .collect()
}

fn parse_gauge_array(value: &Value) -> Vec<GaugeReading> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            Some(GaugeReading {
                image_index: number_at(obj, &["image_index", "index"])? as u32,
                device_type: string_at(obj, &["device_type", "device", "instrument"])
                    .unwrap_or_else(|| "unknown".to_string()),
                measurement_type: string_at(obj, &["measurement_type", "quantity"])
                    .unwrap_or_else(|| "unknown".to_string()),
                value: number_at(obj, &["value", "reading"])?,
                unit: string_at(obj, &["unit"]).unwrap_or_default(),
                confidence: number_at(obj, &["confidence"]).unwrap_or(0.0),
                display_text: string_at(obj, &["display_text", "display"]).unwrap_or_default(),
            })
        })
        .collect()
}

fn parse_primary_selection(value: &Value) -> Option<PrimaryImageSelection> {
    let obj = value.as_object()?;
    Some(PrimaryImageSelection {
        image_index: number_at(obj, &["image_index", "index"])? as u32,
        score: number_at(obj, &["score", "quality_score"]).unwrap_or(0.0),
        reasoning: string_at(obj, &["reasoning", "reason"]).unwrap_or_default(),
    })
}

fn number_at(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().filter_map(|k| obj.get(*k)).find_map(|v| match v {
        Value::Number(n) => n.as_f64(),
        // Instrument displays sometimes come back as quoted numbers.
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn string_at(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| v.as_str().map(str::to_string))
}
