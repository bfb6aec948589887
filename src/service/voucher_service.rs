use std::sync::Arc;
use chrono::NaiveDate;
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::*,
    error::{AppError, Result},
    events::EventBus,
    repository::{
        IssueInsert, MealUnitRepository, TimeSlotRepository, TransitionWrite, VoucherRepository,
    },
};

/// Pool picks can lose the unit to a concurrent issuance; try the next one.
const MAX_POOL_ATTEMPTS: usize = 3;

pub struct VoucherService {
    voucher_repo: Arc<dyn VoucherRepository>,
    unit_repo: Arc<dyn MealUnitRepository>,
    slot_repo: Arc<dyn TimeSlotRepository>,
    event_bus: Arc<EventBus>,
}

impl VoucherService {
    pub fn new(
        voucher_repo: Arc<dyn VoucherRepository>,
        unit_repo: Arc<dyn MealUnitRepository>,
        slot_repo: Arc<dyn TimeSlotRepository>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            voucher_repo,
            unit_repo,
            slot_repo,
            event_bus,
        }
    }

    /// Issue an `active` voucher with a fresh reference number, reserving
    /// its meal unit in the same transaction.
    pub async fn issue(&self, request: &IssueVoucherRequest, at: &Moment) -> Result<Voucher> {
        request.validate()?;

        let slot = self
            .slot_repo
            .find_by_id(request.time_slot_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Time slot not found".to_string()))?;
        if !slot.is_active {
            return Err(AppError::Validation(format!(
                "time_slot_id: {} is not accepting bookings",
                slot.display_name
            )));
        }
        if request.scheduled_date < at.today() {
            return Err(AppError::Validation(
                "scheduled_date: cannot book a meal in the past".to_string(),
            ));
        }

        let attempts = match request.meal_source {
            MealSource::Pool => MAX_POOL_ATTEMPTS,
            _ => 1,
        };

        let mut last_conflict = None;
        for _ in 0..attempts {
            let meal_unit_id = self.pick_unit(request.meal_source, at).await?;
            match self.insert_with_fresh_reference(request, meal_unit_id, at).await {
                Ok(voucher) => {
                    tracing::info!(
                        "Issued voucher {} for {} ({})",
                        voucher.reference_number,
                        voucher.scheduled_date,
                        slot.display_name
                    );
                    let issued = DomainEvent::VoucherIssued {
                        voucher_id: voucher.id,
                        reference_number: voucher.reference_number.clone(),
                        meal_unit_id: voucher.meal_unit_id,
                    };
                    self.event_bus.publish(issued, at).await;
                    return Ok(voucher);
                }
                Err(AppError::StateConflict(msg)) => {
                    tracing::debug!("Meal unit taken during issuance: {}", msg);
                    last_conflict = Some(msg);
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::StateConflict(
            last_conflict.unwrap_or_else(|| "Meal is no longer available".to_string()),
        ))
    }

    async fn pick_unit(&self, source: MealSource, at: &Moment) -> Result<Option<Uuid>> {
        match source {
            MealSource::Managed => Ok(None),
            MealSource::Pool => {
                let unit = self
                    .unit_repo
                    .find_oldest_available(at.utc)
                    .await?
                    .ok_or_else(|| {
                        AppError::StateConflict("No donated meals are available".to_string())
                    })?;
                Ok(Some(unit.id))
            }
            MealSource::Unit(unit_id) => {
                let unit = self
                    .unit_repo
                    .find_by_id(unit_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Meal unit not found".to_string()))?;
                if unit.status != MealUnitStatus::Available || unit.is_past_expiry(at.utc) {
                    return Err(AppError::StateConflict(format!(
                        "Meal unit is {}",
                        if unit.status == MealUnitStatus::Available {
                            "past its expiry"
                        } else {
                            unit.status.as_str()
                        }
                    )));
                }
                Ok(Some(unit.id))
            }
        }
    }

    async fn insert_with_fresh_reference(
        &self,
        request: &IssueVoucherRequest,
        meal_unit_id: Option<Uuid>,
        at: &Moment,
    ) -> Result<Voucher> {
        loop {
            let reference = ReferenceNumber::generate(at.today(), &mut rand::thread_rng());
            if self.voucher_repo.reference_exists(&reference).await? {
                continue;
            }

            let voucher = Voucher::issue(reference, request, meal_unit_id, at);
            match self.voucher_repo.insert_issued(&voucher).await? {
                IssueInsert::Inserted(stored) => return Ok(stored),
                IssueInsert::ReferenceTaken => {
                    tracing::debug!("Reference {} taken concurrently, re-rolling", voucher.reference_number);
                }
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Voucher> {
        self.voucher_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Voucher not found".to_string()))
    }

    pub async fn find_by_reference(&self, reference: &str) -> Result<Voucher> {
        let reference = ReferenceNumber::normalize(reference);
        if !ReferenceNumber::is_well_formed(&reference) {
            return Err(AppError::Validation(format!(
                "reference_number: {} is not a valid voucher code",
                reference
            )));
        }

        self.voucher_repo
            .find_by_reference(&reference)
            .await?
            .ok_or_else(|| AppError::NotFound("Voucher not found".to_string()))
    }

    pub async fn list_for_date(&self, date: NaiveDate) -> Result<Vec<Voucher>> {
        self.voucher_repo.list_by_date(date).await
    }

    /// Counter hint for a physical same-day claim.
    pub async fn can_claim(&self, voucher: &Voucher, at: &Moment) -> Result<ClaimHint> {
        match self.slot_repo.find_by_id(voucher.time_slot_id).await? {
            Some(slot) => Ok(voucher.claim_hint(&slot, at)),
            None => Ok(ClaimHint {
                can_claim: false,
                reason: Some("Time slot no longer exists".to_string()),
            }),
        }
    }

    pub async fn claim(&self, id: Uuid, staff_id: Uuid, at: &Moment) -> Result<Voucher> {
        self.apply(id, &VoucherAction::Claim { staff_id }, at).await
    }

    pub async fn expire(&self, id: Uuid, at: &Moment) -> Result<Voucher> {
        self.apply(id, &VoucherAction::Expire, at).await
    }

    pub async fn cancel(
        &self,
        id: Uuid,
        actor_id: Uuid,
        reason: &str,
        at: &Moment,
    ) -> Result<Voucher> {
        let action = VoucherAction::Cancel {
            actor_id,
            reason: reason.to_string(),
        };
        self.apply(id, &action, at).await
    }

    async fn apply(&self, id: Uuid, action: &VoucherAction, at: &Moment) -> Result<Voucher> {
        let voucher = self.get(id).await?;
        let transition = voucher.transition(action, at).map_err(transition_error)?;

        match self.voucher_repo.apply_transition(&transition).await? {
            TransitionWrite::Applied => {}
            TransitionWrite::Stale => return Err(changed_underneath(&voucher)),
            TransitionWrite::MissingUnit(unit_id) => return Err(missing_unit(&voucher, unit_id)),
        }

        tracing::info!(
            "Voucher {} {} -> {} ({})",
            voucher.reference_number,
            transition.before.status.as_str(),
            transition.after.status.as_str(),
            action.name()
        );

        self.event_bus.publish_all(transition.events(), at).await;
        Ok(transition.after)
    }

    /// Apply one action to many vouchers in one transaction. A voucher whose
    /// precondition fails is reported and skipped; the rest still apply.
    pub async fn bulk(
        &self,
        request: &BulkVoucherRequest,
        actor_id: Uuid,
        at: &Moment,
    ) -> Result<BulkOutcome> {
        if request.voucher_ids.is_empty() {
            return Err(AppError::Validation(
                "voucher_ids: select at least one voucher".to_string(),
            ));
        }
        if request.action == BulkActionKind::Cancel
            && request.reason.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err(AppError::Validation(
                "reason: a reason is required to cancel vouchers".to_string(),
            ));
        }

        let action = request.to_action(actor_id);
        let mut outcome = BulkOutcome::default();
        let mut transitions = Vec::with_capacity(request.voucher_ids.len());

        for id in &request.voucher_ids {
            let voucher = match self.voucher_repo.find_by_id(*id).await? {
                Some(v) => v,
                None => {
                    outcome.errors.push(format!("voucher {} not found", id));
                    continue;
                }
            };
            match voucher.transition(&action, at) {
                Ok(t) => transitions.push(t),
                Err(e) => outcome.errors.push(e.to_string()),
            }
        }

        self.commit_batch(transitions, &mut outcome, at).await?;

        tracing::info!(
            "Bulk {}: {} applied, {} rejected",
            action.name(),
            outcome.success_count,
            outcome.errors.len()
        );

        Ok(outcome)
    }

    /// Expiry sweep: every `active` voucher dated before today becomes
    /// `expired` and its meal unit goes back to the pool.
    pub async fn expire_overdue(&self, at: &Moment) -> Result<BulkOutcome> {
        let overdue = self.voucher_repo.list_overdue(at.today()).await?;
        let mut outcome = BulkOutcome::default();
        let mut transitions = Vec::with_capacity(overdue.len());

        for voucher in overdue {
            match voucher.transition(&VoucherAction::Expire, at) {
                Ok(t) => transitions.push(t),
                Err(e) => outcome.errors.push(e.to_string()),
            }
        }

        self.commit_batch(transitions, &mut outcome, at).await?;

        if outcome.success_count > 0 {
            tracing::info!("Expired {} overdue vouchers", outcome.success_count);
        }

        Ok(outcome)
    }

    async fn commit_batch(
        &self,
        transitions: Vec<VoucherTransition>,
        outcome: &mut BulkOutcome,
        at: &Moment,
    ) -> Result<()> {
        if transitions.is_empty() {
            return Ok(());
        }

        let written = self.voucher_repo.apply_batch(&transitions).await?;

        let mut events = Vec::new();
        for (transition, write) in transitions.iter().zip(written) {
            match write {
                TransitionWrite::Applied => {
                    outcome.success_count += 1;
                    events.extend(transition.events());
                }
                TransitionWrite::Stale => {
                    outcome.errors.push(changed_underneath(&transition.before).to_string());
                }
                TransitionWrite::MissingUnit(unit_id) => {
                    outcome
                        .errors
                        .push(missing_unit(&transition.before, unit_id).to_string());
                }
            }
        }

        self.event_bus.publish_all(events, at).await;
        Ok(())
    }
}

fn transition_error(err: TransitionError) -> AppError {
    match err {
        TransitionError::MissingReason => AppError::Validation(format!("reason: {}", err)),
        other => AppError::StateConflict(capitalize(&other.to_string())),
    }
}

fn changed_underneath(voucher: &Voucher) -> AppError {
    AppError::StateConflict(format!(
        "Voucher {} was changed by another request, reload and try again",
        voucher.reference_number
    ))
}

fn missing_unit(voucher: &Voucher, unit_id: Uuid) -> AppError {
    AppError::Internal(format!(
        "Voucher {} references missing meal unit {}",
        voucher.reference_number, unit_id
    ))
}

fn capitalize(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
