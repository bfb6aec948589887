use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealUnit {
    pub id: Uuid,
    pub donation_id: Uuid,
    pub status: MealUnitStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MealUnitStatus {
    Available,
    Reserved,
    Claimed,
    Expired,
}

impl MealUnitStatus {
    pub const ALL: [MealUnitStatus; 4] = [
        MealUnitStatus::Available,
        MealUnitStatus::Reserved,
        MealUnitStatus::Claimed,
        MealUnitStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MealUnitStatus::Available => "available",
            MealUnitStatus::Reserved => "reserved",
            MealUnitStatus::Claimed => "claimed",
            MealUnitStatus::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "available" => Some(MealUnitStatus::Available),
            "reserved" => Some(MealUnitStatus::Reserved),
            "claimed" => Some(MealUnitStatus::Claimed),
            "expired" => Some(MealUnitStatus::Expired),
            _ => None,
        }
    }
}

impl MealUnit {
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Counts per status, for the dashboard and for recounts.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct InventorySummary {
    pub available: i64,
    pub reserved: i64,
    pub claimed: i64,
    pub expired: i64,
}

impl InventorySummary {
    pub fn total(&self) -> i64 {
        self.available + self.reserved + self.claimed + self.expired
    }

    pub fn add(&mut self, status: MealUnitStatus, count: i64) {
        match status {
            MealUnitStatus::Available => self.available += count,
            MealUnitStatus::Reserved => self.reserved += count,
            MealUnitStatus::Claimed => self.claimed += count,
            MealUnitStatus::Expired => self.expired += count,
        }
    }
}
