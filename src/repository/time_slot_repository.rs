use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::TimeSlot,
    error::{AppError, Result},
    repository::{parse_uuid, TimeSlotRepository},
};

#[derive(FromRow)]
struct TimeSlotRow {
    id: String,
    display_name: String,
    start_time: String,
    end_time: String,
    is_active: i32,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqliteTimeSlotRepository {
    pool: SqlitePool,
}

impl SqliteTimeSlotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_slot(row: TimeSlotRow) -> Result<TimeSlot> {
        Ok(TimeSlot {
            id: parse_uuid(&row.id)?,
            display_name: row.display_name,
            start_time: Self::parse_time(&row.start_time)?,
            end_time: Self::parse_time(&row.end_time)?,
            is_active: row.is_active != 0,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
        })
    }

    fn parse_time(s: &str) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(s, "%H:%M:%S")
            .map_err(|e| AppError::Database(format!("Invalid time of day {}: {}", s, e)))
    }

    fn time_to_str(time: NaiveTime) -> String {
        time.format("%H:%M:%S").to_string()
    }
}

#[async_trait]
impl TimeSlotRepository for SqliteTimeSlotRepository {
    async fn create(&self, slot: TimeSlot) -> Result<TimeSlot> {
        sqlx::query(
            r#"
            INSERT INTO time_slots (
                id, display_name, start_time, end_time, is_active,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(slot.id.to_string())
        .bind(&slot.display_name)
        .bind(Self::time_to_str(slot.start_time))
        .bind(Self::time_to_str(slot.end_time))
        .bind(if slot.is_active { 1i32 } else { 0i32 })
        .bind(slot.created_at.naive_utc())
        .bind(slot.updated_at.naive_utc())
        .execute(&self.pool)
        .await?;

        self.find_by_id(slot.id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve created time slot".to_string()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TimeSlot>> {
        let row = sqlx::query_as::<_, TimeSlotRow>(
            r#"
            SELECT id, display_name, start_time, end_time, is_active,
                   created_at, updated_at
            FROM time_slots
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_slot).transpose()
    }

    async fn list(&self, include_inactive: bool) -> Result<Vec<TimeSlot>> {
        let query = if include_inactive {
            r#"
            SELECT id, display_name, start_time, end_time, is_active,
                   created_at, updated_at
            FROM time_slots
            ORDER BY start_time ASC
            "#
        } else {
            r#"
            SELECT id, display_name, start_time, end_time, is_active,
                   created_at, updated_at
            FROM time_slots
            WHERE is_active = 1
            ORDER BY start_time ASC
            "#
        };

        let rows = sqlx::query_as::<_, TimeSlotRow>(query)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_slot).collect()
    }

    async fn update(&self, slot: TimeSlot) -> Result<TimeSlot> {
        let result = sqlx::query(
            r#"
            UPDATE time_slots
            SET display_name = ?, start_time = ?, end_time = ?, is_active = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&slot.display_name)
        .bind(Self::time_to_str(slot.start_time))
        .bind(Self::time_to_str(slot.end_time))
        .bind(if slot.is_active { 1i32 } else { 0i32 })
        .bind(slot.updated_at.naive_utc())
        .bind(slot.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Time slot not found".to_string()));
        }

        self.find_by_id(slot.id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve updated time slot".to_string()))
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM time_slots WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
