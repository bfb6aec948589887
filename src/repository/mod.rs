use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;
use crate::domain::*;
use crate::error::{AppError, Result};

pub mod donation_repository;
pub mod meal_unit_repository;
pub mod voucher_repository;
pub mod time_slot_repository;
pub mod metric_repository;

pub use donation_repository::SqliteDonationRepository;
pub use meal_unit_repository::SqliteMealUnitRepository;
pub use voucher_repository::SqliteVoucherRepository;
pub use time_slot_repository::SqliteTimeSlotRepository;
pub use metric_repository::SqliteMetricRepository;

/// Result of committing a donation completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionRecord {
    /// False when another caller completed the donation first.
    pub applied: bool,
    pub units_created: i64,
    pub first_for_donor: bool,
}

/// Totals over completed donations, used to rebuild counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DonationTotals {
    pub amount_centavos: i64,
    pub meal_count: i64,
    pub donors: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitCreation {
    pub created: i64,
    /// Units that already existed for the donation, so nothing was created.
    pub existing: i64,
}

#[derive(Debug, Clone)]
pub enum IssueInsert {
    Inserted(Voucher),
    /// Lost a race on the reference number; roll a new one.
    ReferenceTaken,
}

/// What happened to one voucher transition write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionWrite {
    Applied,
    /// The voucher no longer has the status the transition started from.
    Stale,
    /// The voucher's meal unit row is gone; nothing was written.
    MissingUnit(Uuid),
}

#[async_trait]
pub trait DonationRepository: Send + Sync {
    async fn create(&self, donation: Donation) -> Result<Donation>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Donation>>;
    async fn find_by_session_id(&self, session_id: &str) -> Result<Option<Donation>>;
    async fn list_by_donor(&self, donor_id: Uuid) -> Result<Vec<Donation>>;
    /// Store checkout artifacts on a donation that is still pending.
    async fn attach_checkout_session(
        &self,
        id: Uuid,
        session_id: &str,
        metadata: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<Donation>;
    /// Move `pending -> completed` and create the donation's meal units in
    /// one transaction.
    async fn complete(
        &self,
        completed: &Donation,
        unit_expires_at: Option<DateTime<Utc>>,
    ) -> Result<CompletionRecord>;
    /// Move `pending -> failed`. Returns false if the donation had already
    /// left `pending`.
    async fn fail(&self, failed: &Donation) -> Result<bool>;
    async fn completed_totals(&self) -> Result<DonationTotals>;
}

#[async_trait]
pub trait MealUnitRepository: Send + Sync {
    async fn create_units(
        &self,
        donation_id: Uuid,
        count: i32,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<UnitCreation>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<MealUnit>>;
    async fn list_by_donation(&self, donation_id: Uuid) -> Result<Vec<MealUnit>>;
    async fn find_oldest_available(&self, now: DateTime<Utc>) -> Result<Option<MealUnit>>;
    async fn set_status(
        &self,
        id: Uuid,
        status: MealUnitStatus,
        now: DateTime<Utc>,
    ) -> Result<MealUnit>;
    async fn summary(&self) -> Result<InventorySummary>;
    /// Mark available units past their expiry as expired.
    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<i64>;
}

#[async_trait]
pub trait VoucherRepository: Send + Sync {
    async fn reference_exists(&self, reference: &str) -> Result<bool>;
    /// Reserve the voucher's meal unit (if any) and insert the voucher.
    async fn insert_issued(&self, voucher: &Voucher) -> Result<IssueInsert>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Voucher>>;
    async fn find_by_reference(&self, reference: &str) -> Result<Option<Voucher>>;
    async fn list_by_date(&self, date: NaiveDate) -> Result<Vec<Voucher>>;
    async fn list_overdue(&self, today: NaiveDate) -> Result<Vec<Voucher>>;
    /// Apply one transition atomically.
    async fn apply_transition(&self, transition: &VoucherTransition) -> Result<TransitionWrite>;
    /// Apply many transitions inside one transaction, one result per item.
    /// An item that is not `Applied` wrote nothing and does not block the rest.
    async fn apply_batch(&self, transitions: &[VoucherTransition]) -> Result<Vec<TransitionWrite>>;
    async fn count_active_for_slot(&self, time_slot_id: Uuid) -> Result<i64>;
    async fn count_by_status(&self, status: VoucherStatus) -> Result<i64>;
    async fn count_all(&self) -> Result<i64>;
}

#[async_trait]
pub trait TimeSlotRepository: Send + Sync {
    async fn create(&self, slot: TimeSlot) -> Result<TimeSlot>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<TimeSlot>>;
    async fn list(&self, include_inactive: bool) -> Result<Vec<TimeSlot>>;
    async fn update(&self, slot: TimeSlot) -> Result<TimeSlot>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait MetricRepository: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<SystemMetric>>;
    async fn list(&self) -> Result<Vec<SystemMetric>>;
    async fn set(&self, name: &str, value: i64, now: DateTime<Utc>) -> Result<SystemMetric>;
    /// Add `delta` (may be negative); the stored value never drops below zero.
    async fn adjust(&self, name: &str, delta: i64, now: DateTime<Utc>) -> Result<SystemMetric>;
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| AppError::Database(e.to_string()))
}

pub(crate) fn parse_optional_uuid(s: Option<String>) -> Result<Option<Uuid>> {
    s.map(|v| parse_uuid(&v)).transpose()
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
