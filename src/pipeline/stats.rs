//! Running totals for one batch run.
//!
//! Counters are updated in a single accumulation step per completed item;
//! there is no partial recording and no cross-item shared state beyond this.

use std::fmt;

/// Pipeline stage in which an item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Invoking,
    Validating,
    Persisting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Fetching => write!(f, "fetching"),
            Stage::Invoking => write!(f, "invoking"),
            Stage::Validating => write!(f, "validating"),
            Stage::Persisting => write!(f, "persisting"),
        }
    }
}

/// The terminal outcome of one item, recorded exactly once.
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Analyzed {
        item_id: i64,
        image_count: u32,
        cost_usd: f64,
        time_ms: u64,
        validation_passed: bool,
    },
    Failed {
        item_id: i64,
        stage: Stage,
        error: String,
        /// Cost already incurred before the failure (a model call that
        /// produced an unusable reply still cost money).
        cost_usd: f64,
    },
}

/// Accumulated statistics for one batch run.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub analyzed: u32,
    pub failed: u32,
    pub with_issues: u32,
    pub total_images: u32,
    pub total_cost_usd: f64,
    pub total_time_ms: u64,
    pub failures: Vec<(i64, String)>,
}

impl RunStats {
    /// Record one item's terminal outcome. The single mutation point.
    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Analyzed {
                image_count,
                cost_usd,
                time_ms,
                validation_passed,
                ..
            } => {
                self.analyzed += 1;
                if !validation_passed {
                    self.with_issues += 1;
                }
                self.total_images += image_count;
                self.total_cost_usd += cost_usd;
                self.total_time_ms += time_ms;
            }
            ItemOutcome::Failed {
                item_id,
                stage,
                error,
                cost_usd,
            } => {
                self.failed += 1;
                self.total_cost_usd += cost_usd;
                self.failures.push((item_id, format!("{stage}: {error}")));
            }
        }
    }

    pub fn items_processed(&self) -> u32 {
        self.analyzed + self.failed
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Batch complete: {} analyzed ({} with issues), {} failed, {} images, ${:.4} total, {}ms model time",
            self.analyzed,
            self.with_issues,
            self.failed,
            self.total_images,
            self.total_cost_usd,
            self.total_time_ms
        )?;
        for (item_id, reason) in &self.failures {
            writeln!(f, "  item {item_id} failed while {reason}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_success() {
        let mut stats = RunStats::default();
        stats.record(ItemOutcome::Analyzed {
            item_id: 1,
            image_count: 5,
            cost_usd: 0.03,
            time_ms: 4000,
            validation_passed: true,
        });

        assert_eq!(stats.analyzed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.with_issues, 0);
        assert_eq!(stats.total_images, 5);
        assert!((stats.total_cost_usd - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_record_failure_keeps_incurred_cost() {
        let mut stats = RunStats::default();
        stats.record(ItemOutcome::Failed {
            item_id: 2,
            stage: Stage::Validating,
            error: "count mismatch".to_string(),
            cost_usd: 0.02,
        });

        assert_eq!(stats.failed, 1);
        assert!((stats.total_cost_usd - 0.02).abs() < 1e-12);
        assert_eq!(stats.failures.len(), 1);
        assert!(stats.failures[0].1.contains("validating"));
    }

    #[test]
    fn test_issues_counted_separately_from_failures() {
        let mut stats = RunStats::default();
        stats.record(ItemOutcome::Analyzed {
            item_id: 3,
            image_count: 2,
            cost_usd: 0.01,
            time_ms: 900,
            validation_passed: false,
        });

        assert_eq!(stats.analyzed, 1);
        assert_eq!(stats.with_issues, 1);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn test_summary_display() {
        let mut stats = RunStats::default();
        stats.record(ItemOutcome::Analyzed {
            item_id: 1,
            image_count: 3,
            cost_usd: 0.05,
            time_ms: 1000,
            validation_passed: true,
        });
        let text = stats.to_string();
        assert!(text.contains("1 analyzed"));
        assert!(text.contains("$0.0500"));
    }
}
