use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::scraper::Scraper;

// Shared application state: the scraper seam plus the cap on concurrent
// scrapes. One permit per in-flight child process.
pub struct AppState {
    pub scraper: Arc<dyn Scraper>,
    pub scrape_permits: Semaphore,
}

// The portal emits numbers as quoted strings in several reports, so every
// numeric field below goes through a tolerant scalar.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Num(f64),
    Str(String),
}

impl Scalar {
    // "94.00%" and " 12 " both count; anything unparseable is None.
    fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Num(n) => Some(*n),
            Scalar::Str(s) => {
                let trimmed = s.trim().trim_end_matches('%').trim();
                trimmed.parse::<f64>().ok()
            }
        }
    }

    fn as_hours(&self) -> Option<u32> {
        self.as_f64().filter(|v| *v >= 0.0).map(|v| v as u32)
    }
}

fn scalar_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Scalar>::deserialize(deserializer)?;
    Ok(value.and_then(|s| s.as_f64()).unwrap_or(0.0))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub regno: String,
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub specialization: String,
    #[serde(default)]
    pub semester: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Course {
    #[serde(default)]
    pub course_title: String,
    #[serde(default)]
    pub course_code: String,
    #[serde(default)]
    pub course_type: String,
    #[serde(default)]
    pub reg_type: String,
    #[serde(default)]
    pub category: String,
    // The timetable report says "faculty"; the registration report says
    // "faculty_name". Same for credit/credits.
    #[serde(default, alias = "faculty")]
    pub faculty_name: String,
    #[serde(default)]
    pub slot: String,
    #[serde(default)]
    pub room: String,
    #[serde(default, alias = "credits", deserialize_with = "scalar_f64")]
    pub credit: f64,
    #[serde(default)]
    pub academic_year: String,
}

/// Hour counts for one attendance row. The portal withholds hour-level
/// counts in frozen mode and emits empty strings instead, so the variant is
/// decided once at parse time rather than sniffed during aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AttendanceHours {
    Recorded { conducted: u32, absent: u32 },
    Frozen,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRecord {
    pub course_code: String,
    pub course_title: String,
    pub category: String,
    pub faculty: String,
    pub slot: String,
    pub room: String,
    /// Source-provided percentage; authoritative even when hours are known.
    pub attendance_percent: f64,
    #[serde(flatten)]
    pub hours: AttendanceHours,
}

#[derive(Debug, Default, Deserialize)]
struct RawAttendanceRecord {
    #[serde(default)]
    course_code: String,
    #[serde(default)]
    course_title: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    faculty: String,
    #[serde(default)]
    slot: String,
    #[serde(default)]
    room: String,
    #[serde(default)]
    hours_conducted: Option<Scalar>,
    #[serde(default)]
    hours_absent: Option<Scalar>,
    #[serde(default)]
    attendance_percent: Option<Scalar>,
}

impl<'de> Deserialize<'de> for AttendanceRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawAttendanceRecord::deserialize(deserializer)?;
        let hours = match raw.hours_conducted.as_ref().and_then(Scalar::as_hours) {
            Some(conducted) => AttendanceHours::Recorded {
                conducted,
                absent: raw
                    .hours_absent
                    .as_ref()
                    .and_then(Scalar::as_hours)
                    .unwrap_or(0),
            },
            None => AttendanceHours::Frozen,
        };
        Ok(AttendanceRecord {
            course_code: raw.course_code,
            course_title: raw.course_title,
            category: raw.category,
            faculty: raw.faculty,
            slot: raw.slot,
            room: raw.room,
            attendance_percent: raw
                .attendance_percent
                .as_ref()
                .and_then(Scalar::as_f64)
                .unwrap_or(0.0),
            hours,
        })
    }
}

impl AttendanceRecord {
    pub fn conducted(&self) -> u32 {
        match self.hours {
            AttendanceHours::Recorded { conducted, .. } => conducted,
            AttendanceHours::Frozen => 0,
        }
    }

    pub fn absent(&self) -> u32 {
        match self.hours {
            AttendanceHours::Recorded { absent, .. } => absent,
            AttendanceHours::Frozen => 0,
        }
    }

    pub fn present(&self) -> u32 {
        self.conducted().saturating_sub(self.absent())
    }
}

/// One test cell, e.g. `{ "label": "FT-I/50", "score": "42.5" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestScore {
    #[serde(default)]
    pub label: String,
    #[serde(default, deserialize_with = "scalar_f64")]
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarksRecord {
    #[serde(default)]
    pub course_code: String,
    // The scraper joins these in from the attendance report when it can.
    #[serde(default)]
    pub course_title: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tests: Vec<TestScore>,
}

/// One full scrape of the portal. Rebuilt wholesale on every fetch; nothing
/// here is persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeResult {
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub attendance: Vec<AttendanceRecord>,
    #[serde(default)]
    pub marks: Vec<MarksRecord>,
    #[serde(default, deserialize_with = "scalar_f64")]
    pub total_credits: f64,
}
