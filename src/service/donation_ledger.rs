use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::{
        CreateDonationRequest, DomainEvent, Donation, DonationCompletion, LedgerConflict, Moment,
        PaymentStatus,
    },
    error::{AppError, Result},
    events::EventBus,
    repository::DonationRepository,
    service::inventory_service::InventoryService,
};

/// What a ledger transition did. Losing a race, or repeating a transition
/// that already happened, is reported here instead of raised.
#[derive(Debug, Clone)]
pub enum LedgerOutcome {
    Applied(Donation),
    AlreadyHandled {
        donation: Donation,
        conflict: LedgerConflict,
    },
}

impl LedgerOutcome {
    pub fn donation(&self) -> &Donation {
        match self {
            LedgerOutcome::Applied(donation) => donation,
            LedgerOutcome::AlreadyHandled { donation, .. } => donation,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, LedgerOutcome::Applied(_))
    }
}

pub struct DonationLedger {
    repo: Arc<dyn DonationRepository>,
    inventory: Arc<InventoryService>,
    event_bus: Arc<EventBus>,
}

impl DonationLedger {
    pub fn new(
        repo: Arc<dyn DonationRepository>,
        inventory: Arc<InventoryService>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            repo,
            inventory,
            event_bus,
        }
    }

    pub async fn create_pending_donation(
        &self,
        request: &CreateDonationRequest,
        meal_count: i32,
        at: &Moment,
    ) -> Result<Donation> {
        request.validate()?;
        if meal_count < 1 {
            return Err(AppError::Validation(
                "meal_count: at least one meal is required".to_string(),
            ));
        }

        let donation = Donation::new_pending(request, meal_count, at);
        let donation = self.repo.create(donation).await?;

        tracing::info!(
            "Created pending donation {} for {} ({} meals)",
            donation.id,
            donation.amount_display(),
            donation.meal_count
        );

        Ok(donation)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Donation>> {
        self.repo.find_by_id(id).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Donation> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Donation not found".to_string()))
    }

    pub async fn find_by_session_id(&self, session_id: &str) -> Result<Option<Donation>> {
        self.repo.find_by_session_id(session_id).await
    }

    pub async fn list_by_donor(&self, donor_id: Uuid) -> Result<Vec<Donation>> {
        self.repo.list_by_donor(donor_id).await
    }

    pub async fn attach_checkout_session(
        &self,
        id: Uuid,
        session_id: &str,
        metadata: Option<&serde_json::Value>,
        at: &Moment,
    ) -> Result<Donation> {
        self.repo
            .attach_checkout_session(id, session_id, metadata, at.utc)
            .await
    }

    /// `pending -> completed`, minting the donation's meal units in the same
    /// transaction. `DonationCompleted` is published once the write commits.
    pub async fn mark_completed(
        &self,
        donation: &Donation,
        completion: &DonationCompletion,
        at: &Moment,
    ) -> Result<LedgerOutcome> {
        let completed = match donation.complete(completion, at) {
            Ok(next) => next,
            Err(conflict) => return Ok(self.already_handled(donation.clone(), conflict, "complete")),
        };

        let record = self
            .repo
            .complete(&completed, self.inventory.expiry_for(at))
            .await?;

        if !record.applied {
            return self.reload_after_lost_race(donation.id, "complete").await;
        }

        tracing::info!(
            "Donation {} completed: {} meal units created",
            completed.id,
            record.units_created
        );

        let event = DomainEvent::DonationCompleted {
            donation_id: completed.id,
            donor_id: completed.donor_id,
            amount_centavos: completed.amount_centavos,
            meal_count: completed.meal_count,
            first_for_donor: record.first_for_donor,
        };
        self.event_bus.publish(event, at).await;

        Ok(LedgerOutcome::Applied(completed))
    }

    /// `pending -> failed`. Terminal.
    pub async fn mark_failed(&self, donation: &Donation, at: &Moment) -> Result<LedgerOutcome> {
        match donation.fail(at) {
            Ok(failed) => self.write_failure(failed, "fail").await,
            Err(conflict) => Ok(self.already_handled(donation.clone(), conflict, "fail")),
        }
    }

    /// Donor abandoned checkout: fail and forget the session.
    pub async fn mark_cancelled(&self, donation: &Donation, at: &Moment) -> Result<LedgerOutcome> {
        match donation.cancel(at) {
            Ok(cancelled) => self.write_failure(cancelled, "cancel").await,
            Err(conflict) => Ok(self.already_handled(donation.clone(), conflict, "cancel")),
        }
    }

    async fn write_failure(&self, failed: Donation, action: &str) -> Result<LedgerOutcome> {
        if !self.repo.fail(&failed).await? {
            return self.reload_after_lost_race(failed.id, action).await;
        }

        tracing::info!("Donation {} marked failed ({})", failed.id, action);
        Ok(LedgerOutcome::Applied(failed))
    }

    async fn reload_after_lost_race(&self, id: Uuid, action: &str) -> Result<LedgerOutcome> {
        let current = self.get(id).await?;
        let conflict = match current.payment_status {
            PaymentStatus::Completed => LedgerConflict::AlreadyCompleted,
            PaymentStatus::Failed => LedgerConflict::AlreadyFailed,
            PaymentStatus::Pending => {
                return Err(AppError::Internal(format!(
                    "Donation {} is still pending after a rejected {}",
                    id, action
                )))
            }
        };
        Ok(self.already_handled(current, conflict, action))
    }

    fn already_handled(
        &self,
        donation: Donation,
        conflict: LedgerConflict,
        action: &str,
    ) -> LedgerOutcome {
        tracing::info!(
            target: "bitebank::idempotency",
            "Skipping {} of donation {}: {}",
            action,
            donation.id,
            conflict
        );
        LedgerOutcome::AlreadyHandled { donation, conflict }
    }
}
