use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CalibrationConfidence, CalibrationFactor, TaskComplexity};

/// Fetch the calibration factor for a (project, complexity) pair, falling
/// back to the global factor (`project_id IS NULL`) when no project-specific
/// one has been learned yet.
pub async fn get_calibration_factor(
    pool: &PgPool,
    project_id: Uuid,
    complexity: TaskComplexity,
) -> Result<Option<CalibrationFactor>> {
    let row = sqlx::query_as::<_, CalibrationFactor>(
        "SELECT * FROM calibration_factors WHERE project_id = $1 AND complexity = $2",
    )
    .bind(project_id)
    .bind(complexity.to_string())
    .fetch_optional(pool)
    .await
    .context("failed to fetch calibration factor")?;

    if row.is_some() {
        return Ok(row);
    }

    let fallback = sqlx::query_as::<_, CalibrationFactor>(
        "SELECT * FROM calibration_factors WHERE project_id IS NULL AND complexity = $1",
    )
    .bind(complexity.to_string())
    .fetch_optional(pool)
    .await
    .context("failed to fetch global calibration factor")?;
    Ok(fallback)
}

/// Upsert a calibration factor, recomputing its confidence from the new
/// sample size.
pub async fn upsert_calibration_factor(
    pool: &PgPool,
    project_id: Option<Uuid>,
    complexity: TaskComplexity,
    sessions_multiplier: f64,
    sample_size: i32,
) -> Result<CalibrationFactor> {
    let confidence = CalibrationConfidence::from_sample_size(sample_size);
    let row = sqlx::query_as::<_, CalibrationFactor>(
        "INSERT INTO calibration_factors (project_id, complexity, sessions_multiplier, sample_size, confidence, updated_at) \
         VALUES ($1, $2, $3, $4, $5, now()) \
         ON CONFLICT (COALESCE(project_id, '00000000-0000-0000-0000-000000000000'), complexity) DO UPDATE SET \
             sessions_multiplier = EXCLUDED.sessions_multiplier, \
             sample_size = EXCLUDED.sample_size, \
             confidence = EXCLUDED.confidence, \
             updated_at = now() \
         RETURNING *",
    )
    .bind(project_id)
    .bind(complexity.to_string())
    .bind(sessions_multiplier)
    .bind(sample_size)
    .bind(confidence.to_string())
    .fetch_one(pool)
    .await
    .context("failed to upsert calibration factor")?;
    Ok(row)
}
