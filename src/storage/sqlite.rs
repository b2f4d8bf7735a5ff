use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

use super::{AnalysisSummary, AttributeUpdates, CostRecord, Item, ManualAttributes, Storage};
use crate::analysis::{ConsolidatedAnalysis, GaugeReading, PrimaryChoice};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::images::ImageRef;

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory instance for tests
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert an item row (seed helper, used by tests and fixtures).
    pub async fn insert_item(&self, name: &str) -> StorageResult<i64> {
        let result = sqlx::query("INSERT INTO items (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Insert an image row (seed helper).
    pub async fn insert_image(
        &self,
        item_id: i64,
        url: &str,
        filename: &str,
        sort_order: u32,
    ) -> StorageResult<i64> {
        let result = sqlx::query(
            "INSERT INTO images (item_id, url, original_filename, sort_order) VALUES (?, ?, ?, ?)",
        )
        .bind(item_id)
        .bind(url)
        .bind(filename)
        .bind(sort_order)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Set a manual attribute column (seed helper).
    pub async fn set_manual_weight(&self, item_id: i64, carats: f64) -> StorageResult<()> {
        sqlx::query("UPDATE items SET manual_weight_carats = ? WHERE id = ?")
            .bind(carats)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn unanalyzed_items(&self, limit: Option<u32>) -> StorageResult<Vec<Item>> {
        let limit = limit.map(i64::from).unwrap_or(i64::MAX);
        let rows: Vec<ItemRow> = sqlx::query_as(
            r#"
            SELECT id, name, analyzed
            FROM items
            WHERE analyzed = 0
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn items_by_ids(&self, ids: &[i64]) -> StorageResult<Vec<Item>> {
        // sqlx sqlite has no array bind; item batches are small enough to
        // fetch one by one.
        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            let row: Option<ItemRow> =
                sqlx::query_as("SELECT id, name, analyzed FROM items WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
            match row {
                Some(r) => items.push(r.into()),
                None => warn!(item_id = *id, "Requested item does not exist; skipping"),
            }
        }
        Ok(items)
    }

    async fn item_images(&self, item_id: i64) -> StorageResult<Vec<ImageRef>> {
        let rows: Vec<ImageRow> = sqlx::query_as(
            r#"
            SELECT id, url, original_filename, sort_order
            FROM images
            WHERE item_id = ?
            ORDER BY sort_order ASC, id ASC
            "#,
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn manual_attributes(&self, item_id: i64) -> StorageResult<ManualAttributes> {
        let row: Option<ManualRow> = sqlx::query_as(
            r#"
            SELECT manual_weight_carats, manual_length_mm, manual_width_mm,
                   manual_depth_mm, manual_color, manual_clarity, manual_cut
            FROM items
            WHERE id = ?
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(StorageError::ItemNotFound { item_id })?;
        Ok(row.into())
    }

    async fn insert_analysis_record(
        &self,
        item_id: i64,
        analysis: &ConsolidatedAnalysis,
    ) -> StorageResult<Uuid> {
        let id = Uuid::new_v4();
        let normalized = serde_json::to_string(analysis).map_err(|e| StorageError::Query {
            message: format!("Failed to serialize analysis: {}", e),
        })?;
        let issues = serde_json::to_string(&analysis.validation_issues).unwrap_or_default();
        let warnings = serde_json::to_string(&analysis.validation_warnings).unwrap_or_default();

        sqlx::query(
            r#"
            INSERT INTO analysis_results
                (id, item_id, raw_response, normalized_json, validation_passed,
                 issues_json, warnings_json, confidence, completeness,
                 image_count, cost_usd, time_ms, model_version, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(item_id)
        .bind(&analysis.raw_model_response)
        .bind(&normalized)
        .bind(analysis.validation_passed)
        .bind(&issues)
        .bind(&warnings)
        .bind(analysis.overall_metrics.confidence_score)
        .bind(analysis.overall_metrics.data_completeness)
        .bind(analysis.processing_metadata.image_count)
        .bind(analysis.processing_metadata.cost_usd)
        .bind(analysis.processing_metadata.time_ms as i64)
        .bind(&analysis.processing_metadata.model_version)
        .bind(analysis.processing_metadata.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn set_primary_image(&self, item_id: i64, choice: &PrimaryChoice) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        // Clear all prior flags first so exactly one image ends up primary.
        sqlx::query(
            "UPDATE images SET is_primary = 0, primary_score = NULL, primary_reasoning = NULL \
             WHERE item_id = ?",
        )
        .bind(item_id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            "UPDATE images SET is_primary = 1, primary_score = ?, primary_reasoning = ? \
             WHERE id = ? AND item_id = ?",
        )
        .bind(choice.score)
        .bind(&choice.reasoning)
        .bind(choice.image_id)
        .bind(item_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Query {
                message: format!(
                    "primary image {} does not belong to item {}",
                    choice.image_id, item_id
                ),
            });
        }

        tx.commit().await?;
        Ok(())
    }

    async fn mark_item_analyzed(
        &self,
        item_id: i64,
        summary: &AnalysisSummary,
        updates: &AttributeUpdates,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE items SET
                analyzed = 1,
                analysis_date = ?,
                ai_confidence = ?,
                data_completeness = ?,
                weight_carats = COALESCE(?, weight_carats),
                length_mm = COALESCE(?, length_mm),
                width_mm = COALESCE(?, width_mm),
                depth_mm = COALESCE(?, depth_mm),
                color = COALESCE(?, color),
                clarity = COALESCE(?, clarity),
                cut = COALESCE(?, cut)
            WHERE id = ?
            "#,
        )
        .bind(summary.analysis_date.to_rfc3339())
        .bind(summary.confidence)
        .bind(summary.completeness)
        .bind(updates.weight_carats)
        .bind(updates.length_mm)
        .bind(updates.width_mm)
        .bind(updates.depth_mm)
        .bind(&updates.color)
        .bind(&updates.clarity)
        .bind(&updates.cut)
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::ItemNotFound { item_id });
        }

        Ok(())
    }

    async fn insert_gauge_readings(
        &self,
        analysis_id: Uuid,
        readings: &[GaugeReading],
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        for reading in readings {
            sqlx::query(
                r#"
                INSERT INTO gauge_readings
                    (analysis_id, image_index, device_type, measurement_type,
                     value, unit, confidence, display_text)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(analysis_id.to_string())
            .bind(reading.image_index)
            .bind(&reading.device_type)
            .bind(&reading.measurement_type)
            .bind(reading.value)
            .bind(&reading.unit)
            .bind(reading.confidence)
            .bind(&reading.display_text)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn append_cost_record(&self, record: &CostRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cost_records (item_id, image_count, cost_usd, time_ms, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.item_id)
        .bind(record.image_count)
        .bind(record.cost_usd)
        .bind(record.time_ms as i64)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_analyses(&self, targets: Option<&[i64]>) -> StorageResult<u64> {
        // Irreversible: deletes analysis rows and resets item/image flags.
        warn!(
            targets = ?targets,
            "Clearing prior analyses; this operation is irreversible"
        );

        let mut tx = self.pool.begin().await?;
        let mut cleared = 0u64;

        match targets {
            Some(ids) => {
                for id in ids {
                    sqlx::query(
                        "DELETE FROM gauge_readings WHERE analysis_id IN \
                         (SELECT id FROM analysis_results WHERE item_id = ?)",
                    )
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                    sqlx::query("DELETE FROM analysis_results WHERE item_id = ?")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                    sqlx::query(
                        "UPDATE images SET is_primary = 0, primary_score = NULL, \
                         primary_reasoning = NULL WHERE item_id = ?",
                    )
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                    let result = sqlx::query(
                        "UPDATE items SET analyzed = 0, analysis_date = NULL, \
                         ai_confidence = NULL, data_completeness = NULL WHERE id = ?",
                    )
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                    cleared += result.rows_affected();
                }
            }
            None => {
                sqlx::query("DELETE FROM gauge_readings")
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM analysis_results")
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    "UPDATE images SET is_primary = 0, primary_score = NULL, \
                     primary_reasoning = NULL",
                )
                .execute(&mut *tx)
                .await?;
                let result = sqlx::query(
                    "UPDATE items SET analyzed = 0, analysis_date = NULL, \
                     ai_confidence = NULL, data_completeness = NULL WHERE analyzed = 1",
                )
                .execute(&mut *tx)
                .await?;
                cleared = result.rows_affected();
            }
        }

        tx.commit().await?;
        info!(cleared, "Prior analyses cleared");
        Ok(cleared)
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct ItemRow {
    id: i64,
    name: String,
    analyzed: bool,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            analyzed: row.analyzed,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ImageRow {
    id: i64,
    url: String,
    original_filename: String,
    sort_order: i64,
}

impl From<ImageRow> for ImageRef {
    fn from(row: ImageRow) -> Self {
        Self {
            id: row.id,
            url: row.url,
            original_filename: row.original_filename,
            order: row.sort_order as u32,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ManualRow {
    manual_weight_carats: Option<f64>,
    manual_length_mm: Option<f64>,
    manual_width_mm: Option<f64>,
    manual_depth_mm: Option<f64>,
    manual_color: Option<String>,
    manual_clarity: Option<String>,
    manual_cut: Option<String>,
}

impl From<ManualRow> for ManualAttributes {
    fn from(row: ManualRow) -> Self {
        Self {
            weight_carats: row.manual_weight_carats,
            length_mm: row.manual_length_mm,
            width_mm: row.manual_width_mm,
            depth_mm: row.manual_depth_mm,
            color: row.manual_color,
            clarity: row.manual_clarity,
            cut: row.manual_cut,
        }
    }
}
