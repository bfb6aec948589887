use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    domain::{DomainEvent, InventorySummary, MealUnit, MealUnitStatus, Moment},
    error::Result,
    events::EventBus,
    repository::{MealUnitRepository, UnitCreation},
};

/// The pool of donated meals.
pub struct InventoryService {
    repo: Arc<dyn MealUnitRepository>,
    event_bus: Arc<EventBus>,
    unit_ttl_days: Option<i64>,
}

impl InventoryService {
    pub fn new(
        repo: Arc<dyn MealUnitRepository>,
        event_bus: Arc<EventBus>,
        unit_ttl_days: Option<i64>,
    ) -> Self {
        Self {
            repo,
            event_bus,
            unit_ttl_days,
        }
    }

    /// When a unit minted at `at` stops being reservable, if ever.
    pub fn expiry_for(&self, at: &Moment) -> Option<DateTime<Utc>> {
        self.unit_ttl_days
            .filter(|days| *days > 0)
            .map(|days| at.utc + Duration::days(days))
    }

    /// Idempotent: a donation that already owns units gets no more.
    pub async fn create_units(
        &self,
        donation_id: Uuid,
        count: i32,
        at: &Moment,
    ) -> Result<UnitCreation> {
        self.repo
            .create_units(donation_id, count, self.expiry_for(at), at.utc)
            .await
    }

    pub async fn reserve(&self, unit_id: Uuid, at: &Moment) -> Result<MealUnit> {
        self.repo
            .set_status(unit_id, MealUnitStatus::Reserved, at.utc)
            .await
    }

    pub async fn release(&self, unit_id: Uuid, at: &Moment) -> Result<MealUnit> {
        self.repo
            .set_status(unit_id, MealUnitStatus::Available, at.utc)
            .await
    }

    pub async fn mark_claimed(&self, unit_id: Uuid, at: &Moment) -> Result<MealUnit> {
        self.repo
            .set_status(unit_id, MealUnitStatus::Claimed, at.utc)
            .await
    }

    pub async fn find_by_id(&self, unit_id: Uuid) -> Result<Option<MealUnit>> {
        self.repo.find_by_id(unit_id).await
    }

    pub async fn list_for_donation(&self, donation_id: Uuid) -> Result<Vec<MealUnit>> {
        self.repo.list_by_donation(donation_id).await
    }

    pub async fn summary(&self) -> Result<InventorySummary> {
        self.repo.summary().await
    }

    /// Retire available units whose expiry has passed.
    pub async fn expire_stale_units(&self, at: &Moment) -> Result<i64> {
        let count = self.repo.expire_stale(at.utc).await?;

        if count > 0 {
            tracing::info!("Expired {} unreserved meal units", count);
            self.event_bus
                .publish(DomainEvent::MealUnitsExpired { count }, at)
                .await;
        }

        Ok(count)
    }
}
