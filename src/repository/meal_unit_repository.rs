use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{InventorySummary, MealUnit, MealUnitStatus},
    error::{AppError, Result},
    repository::{parse_uuid, MealUnitRepository, UnitCreation},
};

#[derive(FromRow)]
struct MealUnitRow {
    id: String,
    donation_id: String,
    status: String,
    expires_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqliteMealUnitRepository {
    pool: SqlitePool,
}

impl SqliteMealUnitRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_unit(row: MealUnitRow) -> Result<MealUnit> {
        Ok(MealUnit {
            id: parse_uuid(&row.id)?,
            donation_id: parse_uuid(&row.donation_id)?,
            status: MealUnitStatus::from_str(&row.status)
                .ok_or_else(|| AppError::Database(format!("Invalid meal unit status: {}", row.status)))?,
            expires_at: row.expires_at.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }
}

/// Create `count` available units for a donation on an open connection.
///
/// Idempotent: if the donation already owns any unit nothing is inserted,
/// which is what keeps duplicate webhook deliveries from minting meals twice.
pub(crate) async fn insert_units(
    conn: &mut SqliteConnection,
    donation_id: Uuid,
    count: i32,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<UnitCreation> {
    let donation_id_str = donation_id.to_string();

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM meal_units WHERE donation_id = ?")
        .bind(&donation_id_str)
        .fetch_one(&mut *conn)
        .await?;

    if existing > 0 {
        tracing::info!(
            target: "bitebank::idempotency",
            "Donation {} already has {} meal units, skipping creation",
            donation_id,
            existing
        );
        return Ok(UnitCreation { created: 0, existing });
    }

    let now = now.naive_utc();
    let expires_naive = expires_at.map(|dt| dt.naive_utc());

    for _ in 0..count.max(0) {
        sqlx::query(
            r#"
            INSERT INTO meal_units (id, donation_id, status, expires_at, created_at, updated_at)
            VALUES (?, ?, 'available', ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&donation_id_str)
        .bind(expires_naive)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }

    Ok(UnitCreation {
        created: count.max(0) as i64,
        existing: 0,
    })
}

/// Status setter used inside voucher transactions.
pub(crate) async fn update_status(
    conn: &mut SqliteConnection,
    id: Uuid,
    status: MealUnitStatus,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query("UPDATE meal_units SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now.naive_utc())
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

/// `available -> reserved`, only if the unit is still available.
pub(crate) async fn reserve(
    conn: &mut SqliteConnection,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE meal_units SET status = 'reserved', updated_at = ? WHERE id = ? AND status = 'available'",
    )
    .bind(now.naive_utc())
    .bind(id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl MealUnitRepository for SqliteMealUnitRepository {
    async fn create_units(
        &self,
        donation_id: Uuid,
        count: i32,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<UnitCreation> {
        let mut tx = self.pool.begin().await?;
        let creation = insert_units(&mut tx, donation_id, count, expires_at, now).await?;
        tx.commit().await?;
        Ok(creation)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<MealUnit>> {
        let row = sqlx::query_as::<_, MealUnitRow>(
            r#"
            SELECT id, donation_id, status, expires_at, created_at, updated_at
            FROM meal_units
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_unit).transpose()
    }

    async fn list_by_donation(&self, donation_id: Uuid) -> Result<Vec<MealUnit>> {
        let rows = sqlx::query_as::<_, MealUnitRow>(
            r#"
            SELECT id, donation_id, status, expires_at, created_at, updated_at
            FROM meal_units
            WHERE donation_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(donation_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_unit).collect()
    }

    async fn find_oldest_available(&self, now: DateTime<Utc>) -> Result<Option<MealUnit>> {
        let row = sqlx::query_as::<_, MealUnitRow>(
            r#"
            SELECT id, donation_id, status, expires_at, created_at, updated_at
            FROM meal_units
            WHERE status = 'available'
              AND (expires_at IS NULL OR expires_at > ?)
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(now.naive_utc())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_unit).transpose()
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: MealUnitStatus,
        now: DateTime<Utc>,
    ) -> Result<MealUnit> {
        let mut conn = self.pool.acquire().await?;
        let affected = update_status(&mut conn, id, status, now).await?;
        drop(conn);

        if affected == 0 {
            return Err(AppError::NotFound("Meal unit not found".to_string()));
        }

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve updated meal unit".to_string())
        })
    }

    async fn summary(&self) -> Result<InventorySummary> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM meal_units GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut summary = InventorySummary::default();
        for (status, count) in rows {
            match MealUnitStatus::from_str(&status) {
                Some(s) => summary.add(s, count),
                None => tracing::warn!("Ignoring meal units with unknown status {}", status),
            }
        }
        Ok(summary)
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<i64> {
        let result = sqlx::query(
            r#"
            UPDATE meal_units
            SET status = 'expired', updated_at = ?
            WHERE status = 'available'
              AND expires_at IS NOT NULL
              AND expires_at <= ?
            "#,
        )
        .bind(now.naive_utc())
        .bind(now.naive_utc())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as i64)
    }
}
