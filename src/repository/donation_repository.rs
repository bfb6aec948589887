use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{Donation, PaymentStatus},
    error::{AppError, Result},
    repository::{
        meal_unit_repository, parse_uuid, CompletionRecord, DonationRepository, DonationTotals,
    },
};

#[derive(FromRow)]
struct DonationRow {
    id: String,
    donor_id: String,
    amount_centavos: i64,
    meal_count: i32,
    payment_method: String,
    payment_status: String,
    checkout_session_id: Option<String>,
    payment_intent_id: Option<String>,
    provider_metadata: Option<String>,
    completed_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

const SELECT_DONATION: &str = r#"
    SELECT id, donor_id, amount_centavos, meal_count, payment_method,
           payment_status, checkout_session_id, payment_intent_id,
           provider_metadata, completed_at, created_at, updated_at
    FROM donations
"#;

pub struct SqliteDonationRepository {
    pool: SqlitePool,
}

impl SqliteDonationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_donation(row: DonationRow) -> Result<Donation> {
        let provider_metadata = match row.provider_metadata {
            Some(raw) => Some(
                serde_json::from_str(&raw).map_err(|e| AppError::Database(e.to_string()))?,
            ),
            None => None,
        };

        Ok(Donation {
            id: parse_uuid(&row.id)?,
            donor_id: parse_uuid(&row.donor_id)?,
            amount_centavos: row.amount_centavos,
            meal_count: row.meal_count,
            payment_method: row.payment_method,
            payment_status: PaymentStatus::from_str(&row.payment_status).ok_or_else(|| {
                AppError::Database(format!("Invalid payment status: {}", row.payment_status))
            })?,
            checkout_session_id: row.checkout_session_id,
            payment_intent_id: row.payment_intent_id,
            provider_metadata,
            completed_at: row.completed_at.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }

    fn metadata_to_string(metadata: Option<&serde_json::Value>) -> Result<Option<String>> {
        metadata
            .map(|m| serde_json::to_string(m).map_err(|e| AppError::Internal(e.to_string())))
            .transpose()
    }
}

#[async_trait]
impl DonationRepository for SqliteDonationRepository {
    async fn create(&self, donation: Donation) -> Result<Donation> {
        let metadata = Self::metadata_to_string(donation.provider_metadata.as_ref())?;

        sqlx::query(
            r#"
            INSERT INTO donations (
                id, donor_id, amount_centavos, meal_count, payment_method,
                payment_status, checkout_session_id, payment_intent_id,
                provider_metadata, completed_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(donation.id.to_string())
        .bind(donation.donor_id.to_string())
        .bind(donation.amount_centavos)
        .bind(donation.meal_count)
        .bind(&donation.payment_method)
        .bind(donation.payment_status.as_str())
        .bind(&donation.checkout_session_id)
        .bind(&donation.payment_intent_id)
        .bind(metadata)
        .bind(donation.completed_at.map(|dt| dt.naive_utc()))
        .bind(donation.created_at.naive_utc())
        .bind(donation.updated_at.naive_utc())
        .execute(&self.pool)
        .await?;

        self.find_by_id(donation.id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created donation".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Donation>> {
        let row = sqlx::query_as::<_, DonationRow>(&format!("{} WHERE id = ?", SELECT_DONATION))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_donation).transpose()
    }

    async fn find_by_session_id(&self, session_id: &str) -> Result<Option<Donation>> {
        let row = sqlx::query_as::<_, DonationRow>(&format!(
            "{} WHERE checkout_session_id = ?",
            SELECT_DONATION
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_donation).transpose()
    }

    async fn list_by_donor(&self, donor_id: Uuid) -> Result<Vec<Donation>> {
        let rows = sqlx::query_as::<_, DonationRow>(&format!(
            "{} WHERE donor_id = ? ORDER BY created_at DESC",
            SELECT_DONATION
        ))
        .bind(donor_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_donation).collect()
    }

    async fn attach_checkout_session(
        &self,
        id: Uuid,
        session_id: &str,
        metadata: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<Donation> {
        let metadata = Self::metadata_to_string(metadata)?;

        let result = sqlx::query(
            r#"
            UPDATE donations
            SET checkout_session_id = ?,
                provider_metadata = COALESCE(?, provider_metadata),
                updated_at = ?
            WHERE id = ? AND payment_status = 'pending'
            "#,
        )
        .bind(session_id)
        .bind(metadata)
        .bind(now.naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::StateConflict(
                "Donation is no longer pending".to_string(),
            ));
        }

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve updated donation".to_string())
        })
    }

    async fn complete(
        &self,
        completed: &Donation,
        unit_expires_at: Option<DateTime<Utc>>,
    ) -> Result<CompletionRecord> {
        let metadata = Self::metadata_to_string(completed.provider_metadata.as_ref())?;
        let id_str = completed.id.to_string();

        let mut tx = self.pool.begin().await?;

        // Only the caller that still sees `pending` wins.
        let result = sqlx::query(
            r#"
            UPDATE donations
            SET payment_status = 'completed',
                checkout_session_id = ?,
                payment_intent_id = ?,
                provider_metadata = COALESCE(?, provider_metadata),
                completed_at = ?,
                updated_at = ?
            WHERE id = ? AND payment_status = 'pending'
            "#,
        )
        .bind(&completed.checkout_session_id)
        .bind(&completed.payment_intent_id)
        .bind(metadata)
        .bind(completed.completed_at.map(|dt| dt.naive_utc()))
        .bind(completed.updated_at.naive_utc())
        .bind(&id_str)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CompletionRecord {
                applied: false,
                units_created: 0,
                first_for_donor: false,
            });
        }

        let creation = meal_unit_repository::insert_units(
            &mut tx,
            completed.id,
            completed.meal_count,
            unit_expires_at,
            completed.updated_at,
        )
        .await?;

        let earlier: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM donations
            WHERE donor_id = ? AND payment_status = 'completed' AND id != ?
            "#,
        )
        .bind(completed.donor_id.to_string())
        .bind(&id_str)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(CompletionRecord {
            applied: true,
            units_created: creation.created,
            first_for_donor: earlier == 0,
        })
    }

    async fn fail(&self, failed: &Donation) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE donations
            SET payment_status = 'failed',
                checkout_session_id = ?,
                payment_intent_id = ?,
                updated_at = ?
            WHERE id = ? AND payment_status = 'pending'
            "#,
        )
        .bind(&failed.checkout_session_id)
        .bind(&failed.payment_intent_id)
        .bind(failed.updated_at.naive_utc())
        .bind(failed.id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn completed_totals(&self) -> Result<DonationTotals> {
        let (amount, meals, donors): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(amount_centavos), 0),
                   COALESCE(SUM(meal_count), 0),
                   COUNT(DISTINCT donor_id)
            FROM donations
            WHERE payment_status = 'completed'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DonationTotals {
            amount_centavos: amount,
            meal_count: meals,
            donors,
        })
    }
}
