//! SQLite implementation of the CalibrationStore trait.
//!
//! Promotion runs demote-then-insert inside one transaction; a partial
//! unique index on `(domain) WHERE promoted = 1` makes a second promoted
//! row for the same domain impossible even under racing writers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::error::StoreError;
use crate::domain::models::CalibrationParameters;
use crate::domain::ports::calibration_store::CalibrationStore;

/// SQLite-backed calibration parameter repository.
#[derive(Clone)]
pub struct SqliteCalibrationRepository {
    pool: SqlitePool,
}

impl SqliteCalibrationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str =
    "SELECT domain, version, scale, bias, fitted_at, accuracy, ece, promoted \
     FROM calibration_parameters";

fn row_to_params(row: CalibrationRow) -> Result<CalibrationParameters, StoreError> {
    let fitted_at = DateTime::parse_from_rfc3339(&row.fitted_at)
        .map_err(|e| StoreError::Query(format!("Invalid fitted_at: {e}")))?
        .with_timezone(&Utc);

    Ok(CalibrationParameters {
        domain: row.domain,
        version: row.version,
        scale: row.scale,
        bias: row.bias,
        fitted_at,
        accuracy: row.accuracy,
        ece: row.ece,
        promoted: row.promoted != 0,
    })
}

#[async_trait]
impl CalibrationStore for SqliteCalibrationRepository {
    async fn get_active(
        &self,
        domain: &str,
    ) -> Result<Option<CalibrationParameters>, StoreError> {
        let row: Option<CalibrationRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE domain = ? AND promoted = 1"))
                .bind(domain)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;

        row.map(row_to_params).transpose()
    }

    async fn load_active(&self) -> Result<Vec<CalibrationParameters>, StoreError> {
        let rows: Vec<CalibrationRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE promoted = 1"))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.into_iter().map(row_to_params).collect()
    }

    async fn history(
        &self,
        domain: &str,
        limit: u32,
    ) -> Result<Vec<CalibrationParameters>, StoreError> {
        let rows: Vec<CalibrationRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE domain = ? ORDER BY version DESC LIMIT ?"
        ))
        .bind(domain)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.into_iter().map(row_to_params).collect()
    }

    async fn promote(&self, params: &CalibrationParameters) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Promotion {
            domain: params.domain.clone(),
            reason: e.to_string(),
        })?;

        let current_version: Option<(i64,)> = sqlx::query_as(
            "SELECT MAX(version) FROM calibration_parameters WHERE domain = ?",
        )
        .bind(&params.domain)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Promotion {
            domain: params.domain.clone(),
            reason: e.to_string(),
        })?;

        let current = current_version.map(|(v,)| v).unwrap_or(0);
        if params.version <= current {
            return Err(StoreError::Promotion {
                domain: params.domain.clone(),
                reason: format!(
                    "version {} does not exceed current version {current}",
                    params.version
                ),
            });
        }

        sqlx::query("UPDATE calibration_parameters SET promoted = 0 WHERE domain = ? AND promoted = 1")
            .bind(&params.domain)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Promotion {
                domain: params.domain.clone(),
                reason: e.to_string(),
            })?;

        sqlx::query(
            r#"
            INSERT INTO calibration_parameters
                (domain, version, scale, bias, fitted_at, accuracy, ece, promoted)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1)
            "#,
        )
        .bind(&params.domain)
        .bind(params.version)
        .bind(params.scale)
        .bind(params.bias)
        .bind(params.fitted_at.to_rfc3339())
        .bind(params.accuracy)
        .bind(params.ece)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Promotion {
            domain: params.domain.clone(),
            reason: e.to_string(),
        })?;

        tx.commit().await.map_err(|e| StoreError::Promotion {
            domain: params.domain.clone(),
            reason: e.to_string(),
        })?;

        Ok(())
    }

    async fn try_acquire_trainer_lock(
        &self,
        holder: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // Take the lease if the row is free or the previous lease expired.
        let result = sqlx::query(
            r#"
            INSERT INTO trainer_lock (id, holder, expires_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE trainer_lock.expires_at < ? OR trainer_lock.holder = excluded.holder
            "#,
        )
        .bind(holder)
        .bind(expires_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_trainer_lock(&self, holder: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM trainer_lock WHERE id = 1 AND holder = ?")
            .bind(holder)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn record_trainer_run(
        &self,
        run_id: &str,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        promoted: bool,
        outcome: &str,
        report_json: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO trainer_runs (id, started_at, finished_at, promoted, outcome, report)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id)
        .bind(started_at.to_rfc3339())
        .bind(finished_at.to_rfc3339())
        .bind(i64::from(promoted))
        .bind(outcome)
        .bind(report_json)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Append(e.to_string()))?;
        Ok(())
    }

    async fn latest_trainer_run(
        &self,
    ) -> Result<Option<(DateTime<Utc>, bool, String)>, StoreError> {
        let row: Option<(String, i64, String)> = sqlx::query_as(
            "SELECT finished_at, promoted, outcome FROM trainer_runs \
             WHERE finished_at IS NOT NULL ORDER BY finished_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        row.map(|(finished_at, promoted, outcome)| {
            let finished_at = DateTime::parse_from_rfc3339(&finished_at)
                .map_err(|e| StoreError::Query(format!("Invalid finished_at: {e}")))?
                .with_timezone(&Utc);
            Ok((finished_at, promoted != 0, outcome))
        })
        .transpose()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CalibrationRow {
    domain: String,
    version: i64,
    scale: f64,
    bias: f64,
    fitted_at: String,
    accuracy: f64,
    ece: f64,
    promoted: i64,
}
