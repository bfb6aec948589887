use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetric {
    pub metric_name: String,
    pub metric_value: i64,
    pub last_updated: DateTime<Utc>,
}

pub const TOTAL_DONATIONS_RECEIVED: &str = "total_donations_received";
pub const TOTAL_DONORS: &str = "total_donors";
pub const TOTAL_MEALS_DONATED: &str = "total_meals_donated";
pub const TOTAL_MEALS_AVAILABLE: &str = "total_meals_available";
pub const TOTAL_VOUCHERS_ISSUED: &str = "total_vouchers_issued";
pub const TOTAL_MEALS_CLAIMED: &str = "total_meals_claimed";

pub const KNOWN_METRICS: [&str; 6] = [
    TOTAL_DONATIONS_RECEIVED,
    TOTAL_DONORS,
    TOTAL_MEALS_DONATED,
    TOTAL_MEALS_AVAILABLE,
    TOTAL_VOUCHERS_ISSUED,
    TOTAL_MEALS_CLAIMED,
];

/// Counter names are snake_case identifiers.
pub fn is_valid_metric_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
