use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{StudentSnapshot, Voucher, VoucherStatus, VoucherTransition},
    error::{AppError, Result},
    repository::{
        is_unique_violation, meal_unit_repository, parse_optional_uuid, parse_uuid, IssueInsert,
        TransitionWrite, VoucherRepository,
    },
};

#[derive(FromRow)]
struct VoucherRow {
    id: String,
    reference_number: String,
    student_id: Option<String>,
    meal_unit_id: Option<String>,
    time_slot_id: String,
    scheduled_date: NaiveDate,
    status: String,
    claimed_at: Option<NaiveDateTime>,
    claimed_by: Option<String>,
    cancelled_at: Option<NaiveDateTime>,
    cancelled_by: Option<String>,
    cancel_reason: Option<String>,
    student_name: Option<String>,
    student_course: Option<String>,
    student_year: Option<String>,
    student_phone: Option<String>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

const SELECT_VOUCHER: &str = r#"
    SELECT id, reference_number, student_id, meal_unit_id, time_slot_id,
           scheduled_date, status, claimed_at, claimed_by, cancelled_at,
           cancelled_by, cancel_reason, student_name, student_course,
           student_year, student_phone, created_at, updated_at
    FROM vouchers
"#;

pub struct SqliteVoucherRepository {
    pool: SqlitePool,
}

impl SqliteVoucherRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_voucher(row: VoucherRow) -> Result<Voucher> {
        Ok(Voucher {
            id: parse_uuid(&row.id)?,
            reference_number: row.reference_number,
            student_id: parse_optional_uuid(row.student_id)?,
            meal_unit_id: parse_optional_uuid(row.meal_unit_id)?,
            time_slot_id: parse_uuid(&row.time_slot_id)?,
            scheduled_date: row.scheduled_date,
            status: VoucherStatus::from_str(&row.status)
                .ok_or_else(|| AppError::Database(format!("Invalid voucher status: {}", row.status)))?,
            claimed_at: row.claimed_at.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            claimed_by: parse_optional_uuid(row.claimed_by)?,
            cancelled_at: row.cancelled_at.map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            cancelled_by: parse_optional_uuid(row.cancelled_by)?,
            cancel_reason: row.cancel_reason,
            student: StudentSnapshot {
                name: row.student_name,
                course: row.student_course,
                year_level: row.student_year,
                phone: row.student_phone,
            },
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }

    /// Compare-and-swap the voucher row, then apply the unit side effects.
    /// Anything but `Applied` leaves the database untouched.
    async fn write_transition(
        conn: &mut SqliteConnection,
        transition: &VoucherTransition,
    ) -> Result<TransitionWrite> {
        let after = &transition.after;

        for (unit_id, _) in transition.unit_updates() {
            let found: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM meal_units WHERE id = ?")
                .bind(unit_id.to_string())
                .fetch_one(&mut *conn)
                .await?;
            if found == 0 {
                tracing::warn!(
                    "Voucher {} references missing meal unit {}",
                    after.reference_number,
                    unit_id
                );
                return Ok(TransitionWrite::MissingUnit(unit_id));
            }
        }

        let result = sqlx::query(
            r#"
            UPDATE vouchers
            SET status = ?,
                claimed_at = ?,
                claimed_by = ?,
                cancelled_at = ?,
                cancelled_by = ?,
                cancel_reason = ?,
                updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(after.status.as_str())
        .bind(after.claimed_at.map(|dt| dt.naive_utc()))
        .bind(after.claimed_by.map(|id| id.to_string()))
        .bind(after.cancelled_at.map(|dt| dt.naive_utc()))
        .bind(after.cancelled_by.map(|id| id.to_string()))
        .bind(&after.cancel_reason)
        .bind(after.updated_at.naive_utc())
        .bind(after.id.to_string())
        .bind(transition.before.status.as_str())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(TransitionWrite::Stale);
        }

        for (unit_id, status) in transition.unit_updates() {
            meal_unit_repository::update_status(&mut *conn, unit_id, status, after.updated_at)
                .await?;
        }

        Ok(TransitionWrite::Applied)
    }
}

#[async_trait]
impl VoucherRepository for SqliteVoucherRepository {
    async fn reference_exists(&self, reference: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vouchers WHERE reference_number = ?")
            .bind(reference)
            .fetch_one(&self.pool)
            .await?;

        Ok(count > 0)
    }

    async fn insert_issued(&self, voucher: &Voucher) -> Result<IssueInsert> {
        let mut tx = self.pool.begin().await?;

        if let Some(unit_id) = voucher.meal_unit_id {
            if !meal_unit_repository::reserve(&mut tx, unit_id, voucher.created_at).await? {
                tx.rollback().await?;
                return Err(AppError::StateConflict(
                    "Meal is no longer available".to_string(),
                ));
            }
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO vouchers (
                id, reference_number, student_id, meal_unit_id, time_slot_id,
                scheduled_date, status, claimed_at, claimed_by, cancelled_at,
                cancelled_by, cancel_reason, student_name, student_course,
                student_year, student_phone, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, NULL, NULL, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(voucher.id.to_string())
        .bind(&voucher.reference_number)
        .bind(voucher.student_id.map(|id| id.to_string()))
        .bind(voucher.meal_unit_id.map(|id| id.to_string()))
        .bind(voucher.time_slot_id.to_string())
        .bind(voucher.scheduled_date)
        .bind(voucher.status.as_str())
        .bind(&voucher.student.name)
        .bind(&voucher.student.course)
        .bind(&voucher.student.year_level)
        .bind(&voucher.student.phone)
        .bind(voucher.created_at.naive_utc())
        .bind(voucher.updated_at.naive_utc())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) && e.to_string().contains("reference_number") => {
                tx.rollback().await?;
                return Ok(IssueInsert::ReferenceTaken);
            }
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                return Err(AppError::StateConflict(
                    "Meal is already backing another voucher".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;

        let stored = self.find_by_id(voucher.id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve issued voucher".to_string())
        })?;
        Ok(IssueInsert::Inserted(stored))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Voucher>> {
        let row = sqlx::query_as::<_, VoucherRow>(&format!("{} WHERE id = ?", SELECT_VOUCHER))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_voucher).transpose()
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Voucher>> {
        let row = sqlx::query_as::<_, VoucherRow>(&format!(
            "{} WHERE reference_number = ?",
            SELECT_VOUCHER
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_voucher).transpose()
    }

    async fn list_by_date(&self, date: NaiveDate) -> Result<Vec<Voucher>> {
        let rows = sqlx::query_as::<_, VoucherRow>(&format!(
            "{} WHERE scheduled_date = ? ORDER BY created_at ASC",
            SELECT_VOUCHER
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_voucher).collect()
    }

    async fn list_overdue(&self, today: NaiveDate) -> Result<Vec<Voucher>> {
        let rows = sqlx::query_as::<_, VoucherRow>(&format!(
            "{} WHERE status = 'active' AND scheduled_date < ? ORDER BY scheduled_date ASC",
            SELECT_VOUCHER
        ))
        .bind(today)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_voucher).collect()
    }

    async fn apply_transition(&self, transition: &VoucherTransition) -> Result<TransitionWrite> {
        let mut tx = self.pool.begin().await?;

        let written = Self::write_transition(&mut tx, transition).await?;
        if written == TransitionWrite::Applied {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }

        Ok(written)
    }

    async fn apply_batch(&self, transitions: &[VoucherTransition]) -> Result<Vec<TransitionWrite>> {
        let mut tx = self.pool.begin().await?;
        let mut written = Vec::with_capacity(transitions.len());

        for transition in transitions {
            written.push(Self::write_transition(&mut tx, transition).await?);
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn count_active_for_slot(&self, time_slot_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM vouchers WHERE time_slot_id = ? AND status = 'active'",
        )
        .bind(time_slot_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn count_by_status(&self, status: VoucherStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vouchers WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn count_all(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vouchers")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
