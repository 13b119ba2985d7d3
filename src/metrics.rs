use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::model::{AttendanceHours, AttendanceRecord, Course, MarksRecord, ScrapeResult, TestScore};

/// Institutional attendance floor. Fixed policy, not configuration.
pub const ATTENDANCE_THRESHOLD: f64 = 75.0;
/// Weight of one class toward the attendance ratio, per the same policy.
const CLASS_WEIGHT: f64 = 0.25;

/// Canonical display order for test labels; anything else sorts after these.
const TEST_ORDER: [&str; 8] = [
    "FT-I", "FT-II", "FT-III", "FT-IV", "LLT-I", "LLT-II", "FJ-I", "FJ-II",
];

/// Suffixes the portal appends to the same underlying course code across
/// report types.
const CODE_SUFFIX_TOKENS: [&str; 3] = ["Regular", "Practical", "Theory"];

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Removes every occurrence of the known suffix tokens (case-insensitive)
/// and trims the result. "CS101 Regular" and "cs101 THEORY" both reduce to
/// their bare code, which is the join key across reports.
pub fn normalize_course_code(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len());
    let mut i = 0;
    'outer: while i < chars.len() {
        for token in CODE_SUFFIX_TOKENS {
            let len = token.chars().count();
            if i + len <= chars.len()
                && chars[i..i + len]
                    .iter()
                    .zip(token.chars())
                    .all(|(a, b)| a.eq_ignore_ascii_case(&b))
            {
                i += len;
                continue 'outer;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out.trim().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverallAttendance {
    pub percent: f64,
    pub present: u32,
    pub conducted: u32,
    pub frozen: bool,
}

/// Overall attendance across all records. If any record carries real hour
/// counts the figure is hour-weighted; otherwise the portal is in frozen
/// mode and the only honest aggregate is the simple mean of the per-course
/// percentages, with hours reported as 0.
pub fn overall_attendance(records: &[AttendanceRecord]) -> OverallAttendance {
    let has_hours = records.iter().any(
        |r| matches!(r.hours, AttendanceHours::Recorded { conducted, .. } if conducted > 0),
    );

    if has_hours {
        let mut conducted_total = 0u32;
        let mut present_total = 0u32;
        for record in records {
            if let AttendanceHours::Recorded { conducted, .. } = record.hours {
                conducted_total += conducted;
                present_total += record.present();
            }
        }
        let percent = if conducted_total > 0 {
            present_total as f64 / conducted_total as f64 * 100.0
        } else {
            0.0
        };
        return OverallAttendance {
            percent: round2(percent),
            present: present_total,
            conducted: conducted_total,
            frozen: false,
        };
    }

    let percents: Vec<f64> = records
        .iter()
        .map(|r| r.attendance_percent)
        .filter(|p| *p >= 0.0)
        .collect();
    let mean = if percents.is_empty() {
        0.0
    } else {
        percents.iter().sum::<f64>() / percents.len() as f64
    };
    OverallAttendance {
        percent: round2(mean),
        present: 0,
        conducted: 0,
        frozen: true,
    }
}

/// How much slack (or deficit) a course has against the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "classes", rename_all = "snake_case")]
pub enum Margin {
    /// Additional absences that keep the ratio at or above the floor.
    SafeToMiss(u32),
    /// Additional attended classes needed to climb back to the floor.
    Required(u32),
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseStanding {
    pub course_code: String,
    pub course_title: String,
    pub category: String,
    pub faculty: String,
    pub present: u32,
    pub absent: u32,
    pub conducted: u32,
    pub percent: f64,
    pub margin: Margin,
}

fn safe_misses(conducted: u32, present: u32) -> u32 {
    if conducted == 0 {
        return 0;
    }
    // Largest k with present / (conducted + k) >= threshold.
    let safe = present as f64 / (ATTENDANCE_THRESHOLD / 100.0) - conducted as f64;
    safe.max(0.0).floor() as u32
}

fn required_classes(conducted: u32, present: u32) -> u32 {
    if conducted == 0 {
        return 0;
    }
    let deficit = (ATTENDANCE_THRESHOLD / 100.0) * conducted as f64 - present as f64;
    if deficit <= 0.0 {
        return 0;
    }
    (deficit / CLASS_WEIGHT).ceil() as u32
}

/// Per-course standing. The percentage is the source-provided one, never
/// recomputed from hours; frozen records have no hours and so always get a
/// zero margin.
pub fn course_standing(record: &AttendanceRecord) -> CourseStanding {
    let conducted = record.conducted();
    let present = record.present();
    let percent = record.attendance_percent;

    let margin = if percent < ATTENDANCE_THRESHOLD {
        Margin::Required(required_classes(conducted, present))
    } else {
        Margin::SafeToMiss(safe_misses(conducted, present))
    };

    CourseStanding {
        course_code: record.course_code.clone(),
        course_title: record.course_title.clone(),
        category: record.category.clone(),
        faculty: record.faculty.clone(),
        present,
        absent: record.absent(),
        conducted,
        percent,
        margin,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CumulativeMarks {
    pub score: f64,
    pub max: f64,
    pub percent: f64,
}

fn label_name(label: &str) -> &str {
    label.split_once('/').map_or(label, |(name, _)| name).trim()
}

fn label_max(label: &str) -> f64 {
    label
        .split_once('/')
        .and_then(|(_, max)| max.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Sum of every test score and every label-declared maximum across all
/// courses. Pure summation, so ordering of courses or tests is irrelevant.
pub fn cumulative_marks(marks: &[MarksRecord]) -> CumulativeMarks {
    let mut score = 0.0;
    let mut max = 0.0;
    for record in marks {
        for test in &record.tests {
            score += test.score;
            max += label_max(&test.label);
        }
    }
    let percent = if max > 0.0 { score / max * 100.0 } else { 0.0 };
    CumulativeMarks {
        score,
        max,
        percent: round2(percent),
    }
}

/// Orders tests by the canonical label sequence; unknown labels sort after
/// all canonical ones, ties broken lexicographically.
pub fn sort_tests(tests: &mut [TestScore]) {
    tests.sort_by(|a, b| {
        let (a_name, b_name) = (label_name(&a.label), label_name(&b.label));
        let a_idx = TEST_ORDER.iter().position(|t| *t == a_name);
        let b_idx = TEST_ORDER.iter().position(|t| *t == b_name);
        match (a_idx, b_idx) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a_name.cmp(b_name),
        }
    });
}

/// Index from course code to attendance record, keyed by the normalized
/// code and, redundantly, by the raw code. Later records win duplicate keys,
/// matching how the portal's own reports resolve.
pub fn attendance_index(records: &[AttendanceRecord]) -> HashMap<String, &AttendanceRecord> {
    let mut index = HashMap::new();
    for record in records {
        let clean = normalize_course_code(&record.course_code);
        if !clean.is_empty() {
            index.insert(clean, record);
        }
        index.insert(record.course_code.clone(), record);
    }
    index
}

fn lookup<'a>(
    index: &HashMap<String, &'a AttendanceRecord>,
    course_code: &str,
) -> Option<&'a AttendanceRecord> {
    index
        .get(course_code)
        .or_else(|| index.get(normalize_course_code(course_code).as_str()))
        .copied()
}

/// A registered course annotated with its attendance percentage, when one
/// exists. `None` is "no data", deliberately distinct from 0%.
#[derive(Debug, Clone, Serialize)]
pub struct CourseOverview {
    #[serde(flatten)]
    pub course: Course,
    pub attendance_percent: Option<f64>,
}

pub fn annotate_courses(
    courses: &[Course],
    index: &HashMap<String, &AttendanceRecord>,
) -> Vec<CourseOverview> {
    courses
        .iter()
        .map(|course| CourseOverview {
            course: course.clone(),
            attendance_percent: lookup(index, &course.course_code)
                .map(|record| record.attendance_percent),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub label: String,
    pub score: f64,
    pub max: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseMarks {
    pub course_code: String,
    pub course_title: String,
    pub category: String,
    pub tests: Vec<TestResult>,
    pub total_score: f64,
    pub total_max: f64,
    pub percent: f64,
}

/// Per-course marks summary: title/category resolved through the attendance
/// index when the marks report lacks them, tests in canonical order, and
/// score/max/percent rollups.
pub fn course_marks(
    marks: &[MarksRecord],
    index: &HashMap<String, &AttendanceRecord>,
) -> Vec<CourseMarks> {
    marks
        .iter()
        .map(|record| {
            let matched = lookup(index, &record.course_code);
            let course_title = record
                .course_title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .or_else(|| matched.map(|a| a.course_title.clone()))
                .unwrap_or_else(|| "Unnamed Course".to_string());
            let category = record
                .category
                .clone()
                .filter(|c| !c.trim().is_empty())
                .or_else(|| matched.map(|a| a.category.clone()))
                .unwrap_or_else(|| "Theory".to_string());

            let mut ordered = record.tests.clone();
            sort_tests(&mut ordered);

            let tests: Vec<TestResult> = ordered
                .iter()
                .map(|test| {
                    let max = label_max(&test.label);
                    let percent = if max > 0.0 {
                        round2(test.score / max * 100.0)
                    } else {
                        0.0
                    };
                    TestResult {
                        label: label_name(&test.label).to_string(),
                        score: test.score,
                        max,
                        percent,
                    }
                })
                .collect();

            let total_score: f64 = tests.iter().map(|t| t.score).sum();
            let total_max: f64 = tests.iter().map(|t| t.max).sum();
            let percent = if total_max > 0.0 {
                round2(total_score / total_max * 100.0)
            } else {
                0.0
            };

            CourseMarks {
                course_code: record.course_code.clone(),
                course_title,
                category,
                tests,
                total_score,
                total_max,
                percent,
            }
        })
        .collect()
}

/// Everything the dashboard renders, derived in one pass from a scrape.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub overall_attendance: OverallAttendance,
    pub cumulative_marks: CumulativeMarks,
    pub total_credits: f64,
    pub courses: Vec<CourseOverview>,
    pub standings: Vec<CourseStanding>,
    pub marks: Vec<CourseMarks>,
    pub generated_at: DateTime<Utc>,
}

pub fn derive_summary(result: &ScrapeResult) -> DashboardSummary {
    let index = attendance_index(&result.attendance);
    DashboardSummary {
        overall_attendance: overall_attendance(&result.attendance),
        cumulative_marks: cumulative_marks(&result.marks),
        total_credits: result.total_credits,
        courses: annotate_courses(&result.courses, &index),
        standings: result.attendance.iter().map(course_standing).collect(),
        marks: course_marks(&result.marks, &index),
        generated_at: Utc::now(),
    }
}
