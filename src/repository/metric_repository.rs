use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::{
    domain::SystemMetric,
    error::{AppError, Result},
    repository::MetricRepository,
};

#[derive(FromRow)]
struct MetricRow {
    metric_name: String,
    metric_value: i64,
    last_updated: NaiveDateTime,
}

impl From<MetricRow> for SystemMetric {
    fn from(row: MetricRow) -> Self {
        Self {
            metric_name: row.metric_name,
            metric_value: row.metric_value,
            last_updated: DateTime::from_naive_utc_and_offset(row.last_updated, Utc),
        }
    }
}

pub struct SqliteMetricRepository {
    pool: SqlitePool,
}

impl SqliteMetricRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, name: &str) -> Result<SystemMetric> {
        self.get(name)
            .await?
            .ok_or_else(|| AppError::Database(format!("Metric {} vanished after write", name)))
    }
}

#[async_trait]
impl MetricRepository for SqliteMetricRepository {
    async fn get(&self, name: &str) -> Result<Option<SystemMetric>> {
        let row = sqlx::query_as::<_, MetricRow>(
            "SELECT metric_name, metric_value, last_updated FROM system_metrics WHERE metric_name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list(&self) -> Result<Vec<SystemMetric>> {
        let rows = sqlx::query_as::<_, MetricRow>(
            "SELECT metric_name, metric_value, last_updated FROM system_metrics ORDER BY metric_name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn set(&self, name: &str, value: i64, now: DateTime<Utc>) -> Result<SystemMetric> {
        sqlx::query(
            r#"
            INSERT INTO system_metrics (metric_name, metric_value, last_updated)
            VALUES (?, ?, ?)
            ON CONFLICT(metric_name) DO UPDATE SET
                metric_value = excluded.metric_value,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(name)
        .bind(value.max(0))
        .bind(now.naive_utc())
        .execute(&self.pool)
        .await?;

        self.fetch(name).await
    }

    async fn adjust(&self, name: &str, delta: i64, now: DateTime<Utc>) -> Result<SystemMetric> {
        // Single statement so concurrent adjustments never lose an update.
        sqlx::query(
            r#"
            INSERT INTO system_metrics (metric_name, metric_value, last_updated)
            VALUES (?, MAX(?, 0), ?)
            ON CONFLICT(metric_name) DO UPDATE SET
                metric_value = MAX(system_metrics.metric_value + ?, 0),
                last_updated = excluded.last_updated
            "#,
        )
        .bind(name)
        .bind(delta)
        .bind(now.naive_utc())
        .bind(delta)
        .execute(&self.pool)
        .await?;

        self.fetch(name).await
    }
}
