use std::sync::Arc;
use chrono::NaiveTime;
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::{find_overlap, CreateTimeSlotRequest, Moment, TimeSlot, UpdateTimeSlotRequest},
    error::{AppError, Result},
    repository::{TimeSlotRepository, VoucherRepository},
};

pub struct TimeSlotService {
    repo: Arc<dyn TimeSlotRepository>,
    voucher_repo: Arc<dyn VoucherRepository>,
}

impl TimeSlotService {
    pub fn new(repo: Arc<dyn TimeSlotRepository>, voucher_repo: Arc<dyn VoucherRepository>) -> Self {
        Self { repo, voucher_repo }
    }

    pub async fn list(&self, include_inactive: bool) -> Result<Vec<TimeSlot>> {
        self.repo.list(include_inactive).await
    }

    pub async fn get(&self, id: Uuid) -> Result<TimeSlot> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Time slot not found".to_string()))
    }

    pub async fn create(&self, request: CreateTimeSlotRequest, at: &Moment) -> Result<TimeSlot> {
        request.validate()?;
        validate_window(request.start_time, request.end_time)?;
        if request.is_active {
            self.ensure_no_overlap(request.start_time, request.end_time, None)
                .await?;
        }

        let slot = TimeSlot {
            id: Uuid::new_v4(),
            display_name: request.display_name.trim().to_string(),
            start_time: request.start_time,
            end_time: request.end_time,
            is_active: request.is_active,
            created_at: at.utc,
            updated_at: at.utc,
        };

        let slot = self.repo.create(slot).await?;
        tracing::info!("Created time slot {} ({})", slot.display_name, slot.id);
        Ok(slot)
    }

    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateTimeSlotRequest,
        at: &Moment,
    ) -> Result<TimeSlot> {
        request.validate()?;
        let mut slot = self.get(id).await?;

        if let Some(name) = request.display_name {
            slot.display_name = name.trim().to_string();
        }
        if let Some(start) = request.start_time {
            slot.start_time = start;
        }
        if let Some(end) = request.end_time {
            slot.end_time = end;
        }
        if let Some(active) = request.is_active {
            slot.is_active = active;
        }

        validate_window(slot.start_time, slot.end_time)?;
        if slot.is_active {
            self.ensure_no_overlap(slot.start_time, slot.end_time, Some(slot.id))
                .await?;
        }

        slot.updated_at = at.utc;
        self.repo.update(slot).await
    }

    /// Refused while any `active` voucher is booked into the slot.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let slot = self.get(id).await?;

        let active = self.voucher_repo.count_active_for_slot(id).await?;
        if active > 0 {
            return Err(AppError::StateConflict(format!(
                "Cannot delete {}: {} active voucher(s) are booked into it",
                slot.display_name, active
            )));
        }

        self.repo.delete(id).await?;
        tracing::info!("Deleted time slot {} ({})", slot.display_name, slot.id);
        Ok(())
    }

    async fn ensure_no_overlap(
        &self,
        start: NaiveTime,
        end: NaiveTime,
        exclude: Option<Uuid>,
    ) -> Result<()> {
        let existing = self.repo.list(false).await?;
        if let Some(clash) = find_overlap(start, end, &existing, exclude) {
            return Err(AppError::Conflict(format!(
                "Overlaps the {} time slot ({} - {})",
                clash.display_name,
                clash.start_time.format("%H:%M"),
                clash.end_time.format("%H:%M")
            )));
        }
        Ok(())
    }
}

fn validate_window(start: NaiveTime, end: NaiveTime) -> Result<()> {
    if end <= start {
        return Err(AppError::Validation(
            "end_time: must be after start_time".to_string(),
        ));
    }
    Ok(())
}
