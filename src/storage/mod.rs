//! Storage layer for items, images, analysis runs, and cost records.
//!
//! The `Storage` trait is the persistence seam; `persist_analysis` drives the
//! four-sub-step save, logging each failure with the exact corrective SQL so
//! a human can recover without rerunning the model call.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analysis::{
    should_update_field, ConsolidatedAnalysis, ExtractedGemstoneAttributes, PrimaryChoice,
};
use crate::error::StorageResult;
use crate::images::ImageRef;

/// An inventory item eligible for analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub analyzed: bool,
}

/// The protected, human-entered attribute set for one item.
///
/// Manual values always win over AI extraction; see `should_update_field`.
#[derive(Debug, Clone, Default)]
pub struct ManualAttributes {
    pub weight_carats: Option<f64>,
    pub length_mm: Option<f64>,
    pub width_mm: Option<f64>,
    pub depth_mm: Option<f64>,
    pub color: Option<String>,
    pub clarity: Option<String>,
    pub cut: Option<String>,
}

/// Append-only per-run cost row; reporting only.
#[derive(Debug, Clone)]
pub struct CostRecord {
    pub item_id: i64,
    pub image_count: u32,
    pub cost_usd: f64,
    pub time_ms: u64,
}

/// AI attribute values that cleared the merge rule and will be written.
#[derive(Debug, Clone, Default)]
pub struct AttributeUpdates {
    pub weight_carats: Option<f64>,
    pub length_mm: Option<f64>,
    pub width_mm: Option<f64>,
    pub depth_mm: Option<f64>,
    pub color: Option<String>,
    pub clarity: Option<String>,
    pub cut: Option<String>,
}

impl AttributeUpdates {
    /// Apply the field-level merge rule: an AI value fills a field only when
    /// no manual value exists and the extraction confidence clears the
    /// threshold. Absolute precedence, never bypassed.
    pub fn from_extraction(
        extracted: &ExtractedGemstoneAttributes,
        manual: &ManualAttributes,
        threshold: f64,
    ) -> Self {
        let c = extracted.confidence;
        Self {
            weight_carats: gate(manual.weight_carats.as_ref(), &extracted.weight_carats, c, threshold),
            length_mm: gate(manual.length_mm.as_ref(), &extracted.length_mm, c, threshold),
            width_mm: gate(manual.width_mm.as_ref(), &extracted.width_mm, c, threshold),
            depth_mm: gate(manual.depth_mm.as_ref(), &extracted.depth_mm, c, threshold),
            color: gate(manual.color.as_ref(), &extracted.color, c, threshold),
            clarity: gate(manual.clarity.as_ref(), &extracted.clarity, c, threshold),
            cut: gate(manual.cut.as_ref(), &extracted.cut, c, threshold),
        }
    }
}

fn gate<T: Clone>(
    manual: Option<&T>,
    ai: &Option<crate::analysis::ExtractedField<T>>,
    overall_confidence: f64,
    threshold: f64,
) -> Option<T> {
    let field = ai.as_ref()?;
    // A field carries its own confidence; fall back to the run-level score
    // when the field has none.
    let confidence = if field.confidence > 0.0 {
        field.confidence
    } else {
        overall_confidence
    };
    if should_update_field(manual, Some(&field.value), confidence, threshold) {
        Some(field.value.clone())
    } else {
        None
    }
}

/// Summary columns written onto the item row when a run completes.
#[derive(Debug, Clone)]
pub struct AnalysisSummary {
    pub analysis_date: DateTime<Utc>,
    pub confidence: f64,
    pub completeness: f64,
}

/// Persistence seam for the pipeline.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Items not yet analyzed, oldest first, optionally limited.
    async fn unanalyzed_items(&self, limit: Option<u32>) -> StorageResult<Vec<Item>>;

    /// Items by explicit id list, preserving only those that exist.
    async fn items_by_ids(&self, ids: &[i64]) -> StorageResult<Vec<Item>>;

    /// Ordered images of one item.
    async fn item_images(&self, item_id: i64) -> StorageResult<Vec<ImageRef>>;

    /// The protected manual attribute set for one item.
    async fn manual_attributes(&self, item_id: i64) -> StorageResult<ManualAttributes>;

    /// Insert the analysis_results row; returns the run id.
    async fn insert_analysis_record(
        &self,
        item_id: i64,
        analysis: &ConsolidatedAnalysis,
    ) -> StorageResult<Uuid>;

    /// Clear all prior primary flags for the item and set exactly one.
    async fn set_primary_image(&self, item_id: i64, choice: &PrimaryChoice) -> StorageResult<()>;

    /// Mark the item analyzed and fill attribute columns that cleared the
    /// merge rule.
    async fn mark_item_analyzed(
        &self,
        item_id: i64,
        summary: &AnalysisSummary,
        updates: &AttributeUpdates,
    ) -> StorageResult<()>;

    /// Insert one row per gauge reading for the run.
    async fn insert_gauge_readings(
        &self,
        analysis_id: Uuid,
        readings: &[crate::analysis::GaugeReading],
    ) -> StorageResult<()>;

    /// Append a cost record. Never read back into analysis logic.
    async fn append_cost_record(&self, record: &CostRecord) -> StorageResult<()>;

    /// Delete prior analysis output and reset flags for the target items, or
    /// for every item when `targets` is `None`. Irreversible.
    async fn clear_analyses(&self, targets: Option<&[i64]>) -> StorageResult<u64>;
}

/// What the persister managed to write for one item.
#[derive(Debug, Clone, Default)]
pub struct PersistReport {
    pub analysis_id: Option<Uuid>,
    pub record_written: bool,
    pub primary_set: bool,
    pub item_marked: bool,
    pub readings_written: bool,
}

/// Drive the per-item save: analysis record, primary flags, item summary,
/// gauge readings, cost row — in that order.
///
/// No step aborts the batch. Each failure logs the corrective statement a
/// human would run; a failed mark-analyzed in particular is loud, because it
/// would otherwise leave the item reprocessed forever.
#[allow(clippy::too_many_arguments)]
pub async fn persist_analysis(
    storage: &dyn Storage,
    item_id: i64,
    analysis: &ConsolidatedAnalysis,
    updates: &AttributeUpdates,
    primary: Option<&PrimaryChoice>,
    mark_analyzed: bool,
) -> PersistReport {
    let mut report = PersistReport::default();

    match storage.insert_analysis_record(item_id, analysis).await {
        Ok(id) => {
            report.analysis_id = Some(id);
            report.record_written = true;
        }
        Err(e) => {
            error!(
                item_id,
                error = %e,
                "Failed to write analysis record; re-run this item or insert the \
                 analysis_results row from the logged raw response manually"
            );
        }
    }

    if let Some(choice) = primary {
        match storage.set_primary_image(item_id, choice).await {
            Ok(()) => report.primary_set = true,
            Err(e) => {
                error!(
                    item_id,
                    image_id = choice.image_id,
                    error = %e,
                    "Failed to set primary image; recover with: UPDATE images SET \
                     is_primary = 0 WHERE item_id = {item_id}; UPDATE images SET \
                     is_primary = 1 WHERE id = {}",
                    choice.image_id
                );
            }
        }
    }

    if mark_analyzed {
        let summary = AnalysisSummary {
            analysis_date: analysis.processing_metadata.timestamp,
            confidence: analysis.overall_metrics.confidence_score,
            completeness: analysis.overall_metrics.data_completeness,
        };
        match storage.mark_item_analyzed(item_id, &summary, updates).await {
            Ok(()) => report.item_marked = true,
            Err(e) => {
                // Left unanalyzed, the item would be reprocessed on every run.
                error!(
                    item_id,
                    error = %e,
                    "Failed to mark item analyzed; recover with: UPDATE items SET \
                     analyzed = 1, analysis_date = datetime('now') WHERE id = {item_id}"
                );
            }
        }
    }

    if let Some(analysis_id) = report.analysis_id {
        if analysis.gauge_readings.is_empty() {
            report.readings_written = true;
        } else {
            match storage
                .insert_gauge_readings(analysis_id, &analysis.gauge_readings)
                .await
            {
                Ok(()) => report.readings_written = true,
                Err(e) => {
                    error!(
                        item_id,
                        analysis_id = %analysis_id,
                        error = %e,
                        "Failed to write gauge readings; re-insert gauge_readings rows \
                         for this analysis id from the stored normalized JSON"
                    );
                }
            }
        }
    }

    let cost = CostRecord {
        item_id,
        image_count: analysis.processing_metadata.image_count,
        cost_usd: analysis.processing_metadata.cost_usd,
        time_ms: analysis.processing_metadata.time_ms,
    };
    if let Err(e) = storage.append_cost_record(&cost).await {
        warn!(item_id, error = %e, "Failed to append cost record; cost reporting only, no recovery needed");
    }

    info!(
        item_id,
        record = report.record_written,
        primary = report.primary_set,
        marked = report.item_marked,
        "Persisted analysis"
    );

    report
}
