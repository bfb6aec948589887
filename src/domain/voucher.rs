use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use super::{DomainEvent, MealUnitStatus, Moment, TimeSlot};

pub const MAX_CANCEL_REASON_LEN: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voucher {
    pub id: Uuid,
    pub reference_number: String,
    pub student_id: Option<Uuid>,
    /// `None` for managed meals that are not backed by a donation.
    pub meal_unit_id: Option<Uuid>,
    pub time_slot_id: Uuid,
    pub scheduled_date: NaiveDate,
    pub status: VoucherStatus,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<Uuid>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub cancel_reason: Option<String>,
    pub student: StudentSnapshot,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VoucherStatus {
    Active,
    Claimed,
    Expired,
    Cancelled,
}

impl VoucherStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoucherStatus::Active => "active",
            VoucherStatus::Claimed => "claimed",
            VoucherStatus::Expired => "expired",
            VoucherStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(VoucherStatus::Active),
            "claimed" => Some(VoucherStatus::Claimed),
            "expired" => Some(VoucherStatus::Expired),
            "cancelled" => Some(VoucherStatus::Cancelled),
            _ => None,
        }
    }
}

/// Student details copied onto the voucher at issuance so the counter
/// sees what the student looked like when the meal was granted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, PartialEq)]
pub struct StudentSnapshot {
    #[validate(length(max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 100))]
    pub course: Option<String>,
    #[validate(length(max = 20))]
    pub year_level: Option<String>,
    #[validate(length(max = 30))]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoucherAction {
    Claim { staff_id: Uuid },
    Expire,
    Cancel { actor_id: Uuid, reason: String },
}

impl VoucherAction {
    pub fn name(&self) -> &'static str {
        match self {
            VoucherAction::Claim { .. } => "claim",
            VoucherAction::Expire => "expire",
            VoucherAction::Cancel { .. } => "cancel",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("voucher {0} has already been claimed")]
    AlreadyClaimed(String),
    #[error("voucher {0} has been cancelled")]
    AlreadyCancelled(String),
    #[error("voucher {reference} is {status} and cannot be {action}")]
    NotActive {
        reference: String,
        status: &'static str,
        action: &'static str,
    },
    #[error("voucher {reference} is scheduled for {scheduled_date} and is not overdue yet")]
    NotYetOverdue {
        reference: String,
        scheduled_date: NaiveDate,
    },
    #[error("a reason of 1 to 500 characters is required to cancel a voucher")]
    MissingReason,
}

/// Work the persistence adapter must perform atomically with the voucher write.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    SetMealUnitStatus { unit_id: Uuid, status: MealUnitStatus },
    Emit(DomainEvent),
}

#[derive(Debug, Clone)]
pub struct VoucherTransition {
    pub before: Voucher,
    pub after: Voucher,
    pub effects: Vec<SideEffect>,
}

impl VoucherTransition {
    pub fn unit_updates(&self) -> impl Iterator<Item = (Uuid, MealUnitStatus)> + '_ {
        self.effects.iter().filter_map(|effect| match effect {
            SideEffect::SetMealUnitStatus { unit_id, status } => Some((*unit_id, *status)),
            SideEffect::Emit(_) => None,
        })
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.effects
            .iter()
            .filter_map(|effect| match effect {
                SideEffect::Emit(event) => Some(event.clone()),
                SideEffect::SetMealUnitStatus { .. } => None,
            })
            .collect()
    }
}

impl Voucher {
    pub fn issue(
        reference_number: String,
        request: &IssueVoucherRequest,
        meal_unit_id: Option<Uuid>,
        at: &Moment,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference_number,
            student_id: request.student_id,
            meal_unit_id,
            time_slot_id: request.time_slot_id,
            scheduled_date: request.scheduled_date,
            status: VoucherStatus::Active,
            claimed_at: None,
            claimed_by: None,
            cancelled_at: None,
            cancelled_by: None,
            cancel_reason: None,
            student: request.student.clone(),
            created_at: at.utc,
            updated_at: at.utc,
        }
    }

    /// Pure transition function: the current voucher plus an action yields
    /// the next voucher and the side effects to apply with it.
    pub fn transition(
        &self,
        action: &VoucherAction,
        at: &Moment,
    ) -> Result<VoucherTransition, TransitionError> {
        let mut after = self.clone();
        after.updated_at = at.utc;
        let mut effects = Vec::new();

        match action {
            VoucherAction::Claim { staff_id } => {
                match self.status {
                    VoucherStatus::Active => {}
                    VoucherStatus::Claimed => {
                        return Err(TransitionError::AlreadyClaimed(self.reference_number.clone()))
                    }
                    VoucherStatus::Cancelled => {
                        return Err(TransitionError::AlreadyCancelled(self.reference_number.clone()))
                    }
                    VoucherStatus::Expired => return Err(self.not_active("claimed")),
                }

                after.status = VoucherStatus::Claimed;
                after.claimed_at = Some(at.utc);
                after.claimed_by = Some(*staff_id);

                if let Some(unit_id) = self.meal_unit_id {
                    effects.push(SideEffect::SetMealUnitStatus {
                        unit_id,
                        status: MealUnitStatus::Claimed,
                    });
                }
                effects.push(SideEffect::Emit(DomainEvent::VoucherClaimed {
                    voucher_id: self.id,
                    reference_number: self.reference_number.clone(),
                    claimed_by: *staff_id,
                    meal_unit_id: self.meal_unit_id,
                }));
            }
            VoucherAction::Expire => {
                match self.status {
                    VoucherStatus::Active => {}
                    VoucherStatus::Claimed => {
                        return Err(TransitionError::AlreadyClaimed(self.reference_number.clone()))
                    }
                    VoucherStatus::Cancelled => {
                        return Err(TransitionError::AlreadyCancelled(self.reference_number.clone()))
                    }
                    VoucherStatus::Expired => return Err(self.not_active("expired")),
                }
                if self.scheduled_date >= at.today() {
                    return Err(TransitionError::NotYetOverdue {
                        reference: self.reference_number.clone(),
                        scheduled_date: self.scheduled_date,
                    });
                }

                after.status = VoucherStatus::Expired;

                // The meal goes back to the pool so it can be reissued.
                if let Some(unit_id) = self.meal_unit_id {
                    effects.push(SideEffect::SetMealUnitStatus {
                        unit_id,
                        status: MealUnitStatus::Available,
                    });
                }
                effects.push(SideEffect::Emit(DomainEvent::VoucherExpired {
                    voucher_id: self.id,
                    released_meal_unit: self.meal_unit_id,
                }));
            }
            VoucherAction::Cancel { actor_id, reason } => {
                let reason = reason.trim();
                if reason.is_empty() || reason.chars().count() > MAX_CANCEL_REASON_LEN {
                    return Err(TransitionError::MissingReason);
                }

                let released = match self.status {
                    VoucherStatus::Active => self.meal_unit_id,
                    // Released when the voucher expired.
                    VoucherStatus::Expired => None,
                    VoucherStatus::Claimed => {
                        return Err(TransitionError::AlreadyClaimed(self.reference_number.clone()))
                    }
                    VoucherStatus::Cancelled => {
                        return Err(TransitionError::AlreadyCancelled(self.reference_number.clone()))
                    }
                };

                after.status = VoucherStatus::Cancelled;
                after.cancelled_at = Some(at.utc);
                after.cancelled_by = Some(*actor_id);
                after.cancel_reason = Some(reason.to_string());

                if let Some(unit_id) = released {
                    effects.push(SideEffect::SetMealUnitStatus {
                        unit_id,
                        status: MealUnitStatus::Available,
                    });
                }
                effects.push(SideEffect::Emit(DomainEvent::VoucherCancelled {
                    voucher_id: self.id,
                    released_meal_unit: released,
                    reason: reason.to_string(),
                }));
            }
        }

        Ok(VoucherTransition {
            before: self.clone(),
            after,
            effects,
        })
    }

    fn not_active(&self, action: &'static str) -> TransitionError {
        TransitionError::NotActive {
            reference: self.reference_number.clone(),
            status: self.status.as_str(),
            action,
        }
    }

    /// Counter hint for a same-day physical claim. Admins may still force a
    /// claim outside the window; the state machine does not check this.
    pub fn claim_hint(&self, slot: &TimeSlot, at: &Moment) -> ClaimHint {
        let reason = if self.status != VoucherStatus::Active {
            Some(format!("Voucher is {}", self.status.as_str()))
        } else if self.scheduled_date != at.today() {
            Some(format!("Voucher is scheduled for {}", self.scheduled_date))
        } else if !slot.contains(at.time_of_day()) {
            Some(format!("Outside the {} pickup window", slot.display_name))
        } else {
            None
        };

        ClaimHint {
            can_claim: reason.is_none(),
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClaimHint {
    pub can_claim: bool,
    pub reason: Option<String>,
}

/// Where the meal behind a new voucher comes from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "unit_id", rename_all = "snake_case")]
pub enum MealSource {
    /// A specific available unit.
    Unit(Uuid),
    /// The oldest available unit in the pool.
    #[default]
    Pool,
    /// A meal managed outside the donation pool.
    Managed,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IssueVoucherRequest {
    pub student_id: Option<Uuid>,
    pub time_slot_id: Uuid,
    pub scheduled_date: NaiveDate,
    #[serde(default)]
    pub meal_source: MealSource,
    #[serde(default)]
    #[validate(nested)]
    pub student: StudentSnapshot,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BulkActionKind {
    Claim,
    Expire,
    Cancel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkVoucherRequest {
    pub voucher_ids: Vec<Uuid>,
    pub action: BulkActionKind,
    pub reason: Option<String>,
}

impl BulkVoucherRequest {
    pub fn to_action(&self, actor_id: Uuid) -> VoucherAction {
        match self.action {
            BulkActionKind::Claim => VoucherAction::Claim { staff_id: actor_id },
            BulkActionKind::Expire => VoucherAction::Expire,
            BulkActionKind::Cancel => VoucherAction::Cancel {
                actor_id,
                reason: self.reason.clone().unwrap_or_default(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BulkOutcome {
    pub success_count: usize,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Clock;
    use chrono::{Duration, NaiveTime, TimeZone};

    fn moment() -> Moment {
        // 2025-03-10 12:00 in Manila
        Clock::new(480).at(Utc.with_ymd_and_hms(2025, 3, 10, 4, 0, 0).unwrap())
    }

    fn voucher(status: VoucherStatus, scheduled_date: NaiveDate, unit: Option<Uuid>) -> Voucher {
        let request = IssueVoucherRequest {
            student_id: Some(Uuid::new_v4()),
            time_slot_id: Uuid::new_v4(),
            scheduled_date,
            meal_source: MealSource::Pool,
            student: StudentSnapshot::default(),
        };
        let mut v = Voucher::issue("BB-250310-AB12".to_string(), &request, unit, &moment());
        v.status = status;
        v
    }

    #[test]
    fn test_claim_active_sets_claim_fields_and_unit() {
        let at = moment();
        let unit = Uuid::new_v4();
        let staff = Uuid::new_v4();
        let v = voucher(VoucherStatus::Active, at.today(), Some(unit));

        let t = v.transition(&VoucherAction::Claim { staff_id: staff }, &at).unwrap();
        assert_eq!(t.after.status, VoucherStatus::Claimed);
        assert_eq!(t.after.claimed_at, Some(at.utc));
        assert_eq!(t.after.claimed_by, Some(staff));
        assert_eq!(
            t.unit_updates().collect::<Vec<_>>(),
            vec![(unit, MealUnitStatus::Claimed)]
        );
        assert!(matches!(t.events()[0], DomainEvent::VoucherClaimed { .. }));
    }

    #[test]
    fn test_claim_rejected_from_every_other_state() {
        let at = moment();
        let action = VoucherAction::Claim { staff_id: Uuid::new_v4() };
        for status in [VoucherStatus::Claimed, VoucherStatus::Expired, VoucherStatus::Cancelled] {
            let v = voucher(status, at.today(), None);
            assert!(v.transition(&action, &at).is_err(), "{:?} should not be claimable", status);
        }
    }

    #[test]
    fn test_expire_requires_past_date() {
        let at = moment();
        let today = voucher(VoucherStatus::Active, at.today(), None);
        assert!(matches!(
            today.transition(&VoucherAction::Expire, &at),
            Err(TransitionError::NotYetOverdue { .. })
        ));

        let unit = Uuid::new_v4();
        let yesterday = voucher(VoucherStatus::Active, at.today() - Duration::days(1), Some(unit));
        let t = yesterday.transition(&VoucherAction::Expire, &at).unwrap();
        assert_eq!(t.after.status, VoucherStatus::Expired);
        assert_eq!(
            t.unit_updates().collect::<Vec<_>>(),
            vec![(unit, MealUnitStatus::Available)]
        );
    }

    #[test]
    fn test_cancel_requires_reason_and_releases_active_unit() {
        let at = moment();
        let unit = Uuid::new_v4();
        let actor = Uuid::new_v4();
        let v = voucher(VoucherStatus::Active, at.today(), Some(unit));

        let blank = VoucherAction::Cancel { actor_id: actor, reason: "   ".to_string() };
        assert_eq!(v.transition(&blank, &at).unwrap_err(), TransitionError::MissingReason);

        let action = VoucherAction::Cancel { actor_id: actor, reason: " Duplicate request ".to_string() };
        let t = v.transition(&action, &at).unwrap();
        assert_eq!(t.after.status, VoucherStatus::Cancelled);
        assert_eq!(t.after.cancel_reason.as_deref(), Some("Duplicate request"));
        assert_eq!(t.after.cancelled_by, Some(actor));
        assert_eq!(
            t.unit_updates().collect::<Vec<_>>(),
            vec![(unit, MealUnitStatus::Available)]
        );
    }

    #[test]
    fn test_cancel_expired_has_nothing_to_release() {
        let at = moment();
        let v = voucher(VoucherStatus::Expired, at.today(), Some(Uuid::new_v4()));
        let action = VoucherAction::Cancel { actor_id: Uuid::new_v4(), reason: "No show".to_string() };

        let t = v.transition(&action, &at).unwrap();
        assert_eq!(t.after.status, VoucherStatus::Cancelled);
        assert_eq!(t.unit_updates().count(), 0);
    }

    #[test]
    fn test_claim_hint_window() {
        let at = moment();
        let v = voucher(VoucherStatus::Active, at.today(), None);
        let mut slot = TimeSlot {
            id: v.time_slot_id,
            display_name: "Lunch".to_string(),
            start_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
            is_active: true,
            created_at: at.utc,
            updated_at: at.utc,
        };
        assert!(v.claim_hint(&slot, &at).can_claim);

        slot.end_time = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        let hint = v.claim_hint(&slot, &at);
        assert!(!hint.can_claim);
        assert!(hint.reason.unwrap().contains("Lunch"));
    }
}
