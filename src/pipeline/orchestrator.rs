//! Batch orchestration.
//!
//! Items run strictly sequentially: one model call in flight at a time keeps
//! cost accounting and primary-flag clearing trivial to reason about. The one
//! concurrency point is inside a single item, where all image downloads fire
//! at once. An item's failure is terminal for that item only; the batch
//! always completes and reports a summary.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::stats::{ItemOutcome, RunStats, Stage};
use crate::analysis::{
    escalates_to_hard_failure, extract_attributes, parse_model_response, select_primary, validate,
    ConsolidatedAnalysis, ProcessingMetadata,
};
use crate::config::PolicyConfig;
use crate::error::AppResult;
use crate::images::{AnalysisRequest, ImageFetcher};
use crate::prompts::build_analysis_prompt;
use crate::storage::{persist_analysis, AttributeUpdates, Item, ManualAttributes, Storage};
use crate::vision::VisionClient;

/// Options for one batch run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Cap on how many items to process.
    pub limit: Option<u32>,
    /// Explicit item targets; overrides the unanalyzed-item queue.
    pub item_ids: Option<Vec<i64>>,
    /// Wipe prior results for the targets before running. Irreversible.
    pub clear: bool,
}

/// Drives the work queue through fetch → invoke → validate → persist.
pub struct BatchOrchestrator<S> {
    storage: Arc<S>,
    fetcher: ImageFetcher,
    vision: VisionClient,
    policy: PolicyConfig,
}

impl<S: Storage> BatchOrchestrator<S> {
    pub fn new(
        storage: Arc<S>,
        fetcher: ImageFetcher,
        vision: VisionClient,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            storage,
            fetcher,
            vision,
            policy,
        }
    }

    /// Run one batch to completion and return the aggregate statistics.
    pub async fn run(&self, options: RunOptions) -> AppResult<RunStats> {
        if options.clear {
            let cleared = self
                .storage
                .clear_analyses(options.item_ids.as_deref())
                .await?;
            info!(cleared, "Cleared prior analyses before run");
        }

        let items = match &options.item_ids {
            Some(ids) => self.storage.items_by_ids(ids).await?,
            None => self.storage.unanalyzed_items(options.limit).await?,
        };
        let items: Vec<Item> = match options.limit {
            Some(limit) if options.item_ids.is_some() => {
                items.into_iter().take(limit as usize).collect()
            }
            _ => items,
        };

        info!(items = items.len(), "Starting batch run");

        let mut stats = RunStats::default();
        for item in items {
            let outcome = self.process_item(&item).await;
            if let ItemOutcome::Failed { stage, error, .. } = &outcome {
                error!(item_id = item.id, stage = %stage, error = %error, "Item failed");
            }
            stats.record(outcome);
        }

        info!(
            analyzed = stats.analyzed,
            failed = stats.failed,
            cost_usd = stats.total_cost_usd,
            "Batch run finished"
        );
        Ok(stats)
    }

    /// Process one item end to end; every exit path is a terminal outcome.
    async fn process_item(&self, item: &Item) -> ItemOutcome {
        info!(item_id = item.id, name = %item.name, "Processing item");

        // Fetching
        let images = match self.storage.item_images(item.id).await {
            Ok(images) if !images.is_empty() => images,
            Ok(_) => {
                return ItemOutcome::Failed {
                    item_id: item.id,
                    stage: Stage::Fetching,
                    error: "item has no images".to_string(),
                    cost_usd: 0.0,
                }
            }
            Err(e) => {
                return ItemOutcome::Failed {
                    item_id: item.id,
                    stage: Stage::Fetching,
                    error: e.to_string(),
                    cost_usd: 0.0,
                }
            }
        };

        let request = AnalysisRequest {
            item_id: item.id,
            images,
        };

        let payloads = match self.fetcher.fetch_all(&request).await {
            Ok(p) => p,
            Err(e) => {
                return ItemOutcome::Failed {
                    item_id: item.id,
                    stage: Stage::Fetching,
                    error: e.to_string(),
                    cost_usd: 0.0,
                }
            }
        };

        // The all-images invariant is checked before the model call, never
        // discovered after money has been spent.
        if payloads.len() != request.images.len() {
            return ItemOutcome::Failed {
                item_id: item.id,
                stage: Stage::Fetching,
                error: format!(
                    "fetched {} payloads for {} images",
                    payloads.len(),
                    request.images.len()
                ),
                cost_usd: 0.0,
            };
        }

        // Invoking
        let expected_images = payloads.len() as u32;
        let prompt = build_analysis_prompt(payloads.len());
        let reply = match self.vision.analyze(&prompt, &payloads).await {
            Ok(r) => r,
            Err(e) => {
                return ItemOutcome::Failed {
                    item_id: item.id,
                    stage: Stage::Invoking,
                    error: e.to_string(),
                    cost_usd: 0.0,
                }
            }
        };
        drop(payloads);

        // Validating
        let normalized = parse_model_response(&reply.raw_text);
        let outcome = validate(&normalized, expected_images);
        let escalated = escalates_to_hard_failure(&outcome);

        let analysis = ConsolidatedAnalysis::assemble(
            &normalized,
            outcome,
            expected_images,
            ProcessingMetadata {
                image_count: expected_images,
                time_ms: reply.time_ms,
                cost_usd: reply.cost_usd,
                model_version: reply.model.clone(),
                timestamp: Utc::now(),
            },
        );

        // Persisting. Escalated failures keep only the run record for audit:
        // no attribute fills, no primary flags, and the item stays eligible
        // for a corrected rerun.
        let (updates, primary, mark_analyzed) = if escalated {
            (AttributeUpdates::default(), None, false)
        } else {
            let extracted = extract_attributes(&analysis);
            let manual = match self.storage.manual_attributes(item.id).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(item_id = item.id, error = %e, "Could not load manual attributes; treating all fields as manual-free");
                    ManualAttributes::default()
                }
            };
            let updates = AttributeUpdates::from_extraction(
                &extracted,
                &manual,
                self.policy.confidence_threshold,
            );
            let primary = select_primary(
                analysis.primary_image_selection.as_ref(),
                &request.images,
                &analysis.individual_analyses,
                &self.policy,
            );
            (updates, primary, true)
        };

        let report = persist_analysis(
            self.storage.as_ref(),
            item.id,
            &analysis,
            &updates,
            primary.as_ref(),
            mark_analyzed,
        )
        .await;

        if escalated {
            return ItemOutcome::Failed {
                item_id: item.id,
                stage: Stage::Validating,
                error: analysis.validation_issues.join("; "),
                cost_usd: reply.cost_usd,
            };
        }
        if !report.record_written {
            return ItemOutcome::Failed {
                item_id: item.id,
                stage: Stage::Persisting,
                error: "analysis record could not be written".to_string(),
                cost_usd: reply.cost_usd,
            };
        }

        ItemOutcome::Analyzed {
            item_id: item.id,
            image_count: expected_images,
            cost_usd: reply.cost_usd,
            time_ms: reply.time_ms,
            validation_passed: analysis.validation_passed,
        }
    }
}
