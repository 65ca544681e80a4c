//! Raw meeting-time shapes from the Banner API and their parsed forms.

use bitflags::bitflags;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};

/// Deserialize a string field into a u32.
fn deserialize_string_to_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse::<u32>().map_err(serde::de::Error::custom)
}

/// A faculty member associated with a course.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacultyItem {
    pub banner_id: String, // e.g. "@01647907"
    pub category: Option<String>,
    pub class: String, // upstream decorator class name
    #[serde(deserialize_with = "deserialize_string_to_u32")]
    pub course_reference_number: u32,
    pub display_name: String, // "LastName, FirstName"
    pub email_address: Option<String>,
    pub primary_indicator: bool,
    pub term: String,
}

/// Raw meeting time block as Banner serializes it: MM/DD/YYYY dates, HHMM
/// times, one boolean per weekday.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingTime {
    pub start_date: String,         // MM/DD/YYYY
    pub end_date: String,           // MM/DD/YYYY
    pub begin_time: Option<String>, // HHMM
    pub end_time: Option<String>,   // HHMM
    pub category: Option<String>,
    pub class: String,
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
    pub room: Option<String>,
    pub term: String,
    pub building: Option<String>,
    pub building_description: Option<String>,
    pub campus: Option<String>,
    pub campus_description: Option<String>,
    pub course_reference_number: String,
    pub credit_hour_session: Option<f64>,
    pub hours_week: Option<f64>,
    pub meeting_schedule_type: String, // e.g. AFF
    pub meeting_type: String,          // e.g. HB, OS, OA, ID, FF
    pub meeting_type_description: Option<String>,
}

/// Wrapper object pairing a meeting time with its faculty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingTimeResponse {
    pub category: Option<String>,
    pub class: String,
    pub course_reference_number: String,
    #[serde(default)]
    pub faculty: Vec<FacultyItem>,
    pub meeting_time: MeetingTime,
    pub term: String,
}

bitflags! {
    /// Compact day-of-week set for a meeting pattern.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MeetingDays: u8 {
        const Monday = 1 << 0;
        const Tuesday = 1 << 1;
        const Wednesday = 1 << 2;
        const Thursday = 1 << 3;
        const Friday = 1 << 4;
        const Saturday = 1 << 5;
        const Sunday = 1 << 6;
    }
}

impl MeetingDays {
    /// Collect the per-day booleans of the raw API shape into a set.
    pub fn from_meeting_time(mt: &MeetingTime) -> MeetingDays {
        let mut days = MeetingDays::empty();
        for (active, day) in [
            (mt.monday, MeetingDays::Monday),
            (mt.tuesday, MeetingDays::Tuesday),
            (mt.wednesday, MeetingDays::Wednesday),
            (mt.thursday, MeetingDays::Thursday),
            (mt.friday, MeetingDays::Friday),
            (mt.saturday, MeetingDays::Saturday),
            (mt.sunday, MeetingDays::Sunday),
        ] {
            if active {
                days.insert(day);
            }
        }
        days
    }
}

/// Parse an HHMM string ("0000".."2359") into a `NaiveTime`.
pub fn parse_hhmm(time_str: &str) -> Option<NaiveTime> {
    if time_str.len() != 4 || !time_str.is_ascii() {
        return None;
    }
    let hours = time_str[..2].parse::<u32>().ok()?;
    let minutes = time_str[2..].parse::<u32>().ok()?;
    NaiveTime::from_hms_opt(hours, minutes, 0)
}

/// Date range for meetings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Parse a date range from MM/DD/YYYY format strings.
    pub fn from_mm_dd_yyyy(start: &str, end: &str) -> Option<Self> {
        Some(DateRange {
            start: NaiveDate::parse_from_str(start, "%m/%d/%Y").ok()?,
            end: NaiveDate::parse_from_str(end, "%m/%d/%Y").ok()?,
        })
    }
}

/// Meeting schedule type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeetingType {
    HybridBlended,      // HB, H2, H1
    OnlineSynchronous,  // OS
    OnlineAsynchronous, // OA
    OnlineHybrid,       // OH
    IndependentStudy,   // ID
    FaceToFace,         // FF
    Unknown(String),
}

impl MeetingType {
    pub fn from_code(s: &str) -> Self {
        match s {
            "HB" | "H2" | "H1" => MeetingType::HybridBlended,
            "OS" => MeetingType::OnlineSynchronous,
            "OA" => MeetingType::OnlineAsynchronous,
            "OH" => MeetingType::OnlineHybrid,
            "ID" => MeetingType::IndependentStudy,
            "FF" => MeetingType::FaceToFace,
            other => MeetingType::Unknown(other.to_string()),
        }
    }

    /// OA and ID sections have no physical time slot.
    pub fn is_async(&self) -> bool {
        matches!(
            self,
            MeetingType::OnlineAsynchronous | MeetingType::IndependentStudy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hhmm_valid() {
        assert_eq!(parse_hhmm("0000"), NaiveTime::from_hms_opt(0, 0, 0));
        assert_eq!(parse_hhmm("1200"), NaiveTime::from_hms_opt(12, 0, 0));
        assert_eq!(parse_hhmm("2359"), NaiveTime::from_hms_opt(23, 59, 0));
    }

    #[test]
    fn parse_hhmm_invalid() {
        for input in ["", "900", "24000", "2400", "1260", "ab00"] {
            assert!(parse_hhmm(input).is_none(), "expected None for {input:?}");
        }
    }

    #[test]
    fn date_range_parses_upstream_format() {
        let range = DateRange::from_mm_dd_yyyy("08/18/2025", "12/10/2025").unwrap();
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2025, 8, 18).unwrap());
        assert_eq!(range.end, NaiveDate::from_ymd_opt(2025, 12, 10).unwrap());
        assert!(DateRange::from_mm_dd_yyyy("2025-08-18", "2025-12-10").is_none());
    }

    #[test]
    fn async_meeting_types() {
        assert!(MeetingType::from_code("OA").is_async());
        assert!(MeetingType::from_code("ID").is_async());
        assert!(!MeetingType::from_code("FF").is_async());
        assert!(!MeetingType::from_code("OS").is_async());
    }
}
