use serde::Serialize;
use uuid::Uuid;

/// Facts emitted by the ledger and the voucher state machine after a
/// transition commits. Counters and other projections subscribe to these.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    DonationCompleted {
        donation_id: Uuid,
        donor_id: Uuid,
        amount_centavos: i64,
        meal_count: i32,
        first_for_donor: bool,
    },
    VoucherIssued {
        voucher_id: Uuid,
        reference_number: String,
        meal_unit_id: Option<Uuid>,
    },
    VoucherClaimed {
        voucher_id: Uuid,
        reference_number: String,
        claimed_by: Uuid,
        meal_unit_id: Option<Uuid>,
    },
    VoucherExpired {
        voucher_id: Uuid,
        released_meal_unit: Option<Uuid>,
    },
    VoucherCancelled {
        voucher_id: Uuid,
        released_meal_unit: Option<Uuid>,
        reason: String,
    },
    MealUnitsExpired {
        count: i64,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::DonationCompleted { .. } => "donation_completed",
            DomainEvent::VoucherIssued { .. } => "voucher_issued",
            DomainEvent::VoucherClaimed { .. } => "voucher_claimed",
            DomainEvent::VoucherExpired { .. } => "voucher_expired",
            DomainEvent::VoucherCancelled { .. } => "voucher_cancelled",
            DomainEvent::MealUnitsExpired { .. } => "meal_units_expired",
        }
    }
}
