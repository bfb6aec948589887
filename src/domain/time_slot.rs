use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: Uuid,
    pub display_name: String,
    #[serde(with = "clock_time")]
    pub start_time: NaiveTime,
    #[serde(with = "clock_time")]
    pub end_time: NaiveTime,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TimeSlot {
    /// Half-open: a voucher for 11:00–13:00 is claimable at 11:00, not at 13:00.
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start_time <= time && time < self.end_time
    }

    pub fn overlaps(&self, start: NaiveTime, end: NaiveTime) -> bool {
        intervals_overlap(self.start_time, self.end_time, start, end)
    }
}

/// `[a_start, a_end)` and `[b_start, b_end)` share at least one instant.
/// Covers b starting inside a, b ending inside a, b enclosing a and a
/// enclosing b.
pub fn intervals_overlap(
    a_start: NaiveTime,
    a_end: NaiveTime,
    b_start: NaiveTime,
    b_end: NaiveTime,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// First active slot (other than `exclude`) that the window would collide with.
pub fn find_overlap<'a>(
    start: NaiveTime,
    end: NaiveTime,
    slots: &'a [TimeSlot],
    exclude: Option<Uuid>,
) -> Option<&'a TimeSlot> {
    slots
        .iter()
        .filter(|slot| slot.is_active && Some(slot.id) != exclude)
        .find(|slot| slot.overlaps(start, end))
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateTimeSlotRequest {
    #[validate(length(min = 1, max = 100, message = "display name is required"))]
    pub display_name: String,
    #[serde(with = "clock_time")]
    pub start_time: NaiveTime,
    #[serde(with = "clock_time")]
    pub end_time: NaiveTime,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct UpdateTimeSlotRequest {
    #[validate(length(min = 1, max = 100, message = "display name is required"))]
    pub display_name: Option<String>,
    #[serde(default, with = "clock_time::option")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "clock_time::option")]
    pub end_time: Option<NaiveTime>,
    pub is_active: Option<bool>,
}

/// Default lunch windows seeded on a fresh install (name, start, end).
pub fn default_time_slots() -> Vec<(&'static str, (u32, u32), (u32, u32))> {
    vec![
        ("11:00 AM - 12:00 PM", (11, 0), (12, 0)),
        ("12:01 PM - 1:00 PM", (12, 1), (13, 0)),
        ("1:01 PM - 2:00 PM", (13, 1), (14, 0)),
    ]
}

/// `HH:MM` on the wire, `HH:MM:SS` also accepted.
pub mod clock_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(s: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
            .ok()
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid time of day: {}", raw)))
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            time: &Option<NaiveTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match time {
                Some(t) => super::serialize(t, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<NaiveTime>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid time of day: {}", raw))),
                None => Ok(None),
            }
        }
    }
}
