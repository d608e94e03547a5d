use crate::calc::{round_off_2_decimal, GradingPolicy};
use crate::parts::{Part, PartScores};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectionStatus {
    Active,
    Deactivated,
    NonRendu,
    Absent,
    /// Stored status text that matches none of the above.
    Unknown,
}

impl CorrectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CorrectionStatus::Active => "ACTIVE",
            CorrectionStatus::Deactivated => "DEACTIVATED",
            CorrectionStatus::NonRendu => "NON_RENDU",
            CorrectionStatus::Absent => "ABSENT",
            CorrectionStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(CorrectionStatus::Active),
            "DEACTIVATED" => Some(CorrectionStatus::Deactivated),
            "NON_RENDU" => Some(CorrectionStatus::NonRendu),
            "ABSENT" => Some(CorrectionStatus::Absent),
            _ => None,
        }
    }
}

/// One already-graded correction as the aggregator sees it.
#[derive(Debug, Clone)]
pub struct CorrectionRecord {
    pub id: String,
    pub student_id: Option<String>,
    pub class_id: Option<String>,
    pub class_name: Option<String>,
    pub sub_class: Option<String>,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub status: CorrectionStatus,
    pub final_grade: Option<f64>,
    pub scores: PartScores,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PartDistribution {
    pub average: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub deactivated: usize,
    pub non_rendu: usize,
    pub absent: usize,
    pub unknown: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    pub total_corrections: usize,
    pub average_grade: f64,
    pub min_grade: f64,
    pub max_grade: f64,
    pub pass_count: usize,
    pub fail_count: usize,
    pub pass_rate: f64,
    pub student_count: usize,
    pub class_count: usize,
    pub status_counts: StatusCounts,
    pub all_points_earned: Vec<Vec<f64>>,
    pub points_distribution: Vec<PartDistribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub group_id: Option<String>,
    pub group_name: String,
    pub class_name: Option<String>,
    pub sub_class: Option<String>,
    pub average_grade: f64,
    pub min_grade: f64,
    pub max_grade: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct GradeSpread {
    average: f64,
    min: f64,
    max: f64,
}

fn grade_spread(grades: &[f64]) -> GradeSpread {
    if grades.is_empty() {
        return GradeSpread {
            average: 0.0,
            min: 0.0,
            max: 0.0,
        };
    }
    let sum: f64 = grades.iter().sum();
    GradeSpread {
        average: round_off_2_decimal(sum / grades.len() as f64),
        min: round_off_2_decimal(grades.iter().copied().fold(f64::INFINITY, f64::min)),
        max: round_off_2_decimal(grades.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
    }
}

/// Included records in id order, so floating sums don't depend on input order.
fn included<'a>(records: &'a [CorrectionRecord], include_inactive: bool) -> Vec<&'a CorrectionRecord> {
    let mut out: Vec<&CorrectionRecord> = records
        .iter()
        .filter(|r| include_inactive || r.status == CorrectionStatus::Active)
        .collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}

fn known_grade(r: &CorrectionRecord) -> Option<f64> {
    r.final_grade.filter(|v| v.is_finite())
}

pub fn compute_activity_stats(
    parts: &[Part],
    records: &[CorrectionRecord],
    include_inactive: bool,
    policy: &GradingPolicy,
) -> ActivityStats {
    let rows = included(records, include_inactive);
    let total_corrections = rows.len();

    let grades: Vec<f64> = rows.iter().filter_map(|r| known_grade(r)).collect();
    let spread = grade_spread(&grades);
    let pass_count = grades
        .iter()
        .filter(|g| **g >= policy.pass_threshold)
        .count();
    let fail_count = grades.len() - pass_count;
    let pass_rate = if total_corrections > 0 {
        round_off_2_decimal(pass_count as f64 / total_corrections as f64 * 100.0)
    } else {
        0.0
    };

    let students: HashSet<&str> = rows.iter().filter_map(|r| r.student_id.as_deref()).collect();
    let classes: HashSet<&str> = rows.iter().filter_map(|r| r.class_id.as_deref()).collect();

    let mut status_counts = StatusCounts::default();
    for r in records {
        match r.status {
            CorrectionStatus::Active => {}
            CorrectionStatus::Deactivated => status_counts.deactivated += 1,
            CorrectionStatus::NonRendu => status_counts.non_rendu += 1,
            CorrectionStatus::Absent => status_counts.absent += 1,
            CorrectionStatus::Unknown => status_counts.unknown += 1,
        }
    }

    let all_points_earned: Vec<Vec<f64>> = rows.iter().map(|r| r.scores.active_row(parts)).collect();

    // sum, min, max per part
    let mut acc: Vec<(f64, f64, f64)> = vec![(0.0, f64::INFINITY, f64::NEG_INFINITY); parts.len()];
    for row in &all_points_earned {
        for (slot, v) in acc.iter_mut().zip(row) {
            slot.0 += *v;
            slot.1 = slot.1.min(*v);
            slot.2 = slot.2.max(*v);
        }
    }
    let n = all_points_earned.len();
    let points_distribution = acc
        .into_iter()
        .map(|(sum, min, max)| PartDistribution {
            average: if n > 0 {
                round_off_2_decimal(sum / n as f64)
            } else {
                0.0
            },
            min: if min.is_finite() { round_off_2_decimal(min) } else { 0.0 },
            max: if max.is_finite() { round_off_2_decimal(max) } else { 0.0 },
        })
        .collect();

    ActivityStats {
        total_corrections,
        average_grade: spread.average,
        min_grade: spread.min,
        max_grade: spread.max,
        pass_count,
        fail_count,
        pass_rate,
        student_count: students.len(),
        class_count: classes.len(),
        status_counts,
        all_points_earned,
        points_distribution,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum GroupKey {
    Explicit(String),
    Class(String, Option<String>),
    Ungrouped,
}

/// Trimmed sub-class; blank reads as none.
fn sub_class_of(r: &CorrectionRecord) -> Option<String> {
    r.sub_class
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn group_key(r: &CorrectionRecord) -> GroupKey {
    if let Some(g) = r.group_id.as_ref().filter(|g| !g.trim().is_empty()) {
        return GroupKey::Explicit(g.clone());
    }
    if let Some(c) = r.class_id.as_ref().filter(|c| !c.trim().is_empty()) {
        return GroupKey::Class(c.clone(), sub_class_of(r));
    }
    GroupKey::Ungrouped
}

fn group_name(key: &GroupKey, first: &CorrectionRecord) -> String {
    match key {
        GroupKey::Explicit(id) => first.group_name.clone().unwrap_or_else(|| id.clone()),
        GroupKey::Class(class_id, sub) => {
            let class = first.class_name.clone().unwrap_or_else(|| class_id.clone());
            match sub {
                Some(s) => format!("{} {}", class, s),
                None => class,
            }
        }
        GroupKey::Ungrouped => "ungrouped".to_string(),
    }
}

pub fn compute_group_stats(records: &[CorrectionRecord], include_inactive: bool) -> Vec<GroupStats> {
    let mut buckets: BTreeMap<GroupKey, Vec<&CorrectionRecord>> = BTreeMap::new();
    for r in included(records, include_inactive) {
        buckets.entry(group_key(r)).or_default().push(r);
    }

    let mut out: Vec<GroupStats> = buckets
        .into_iter()
        .filter_map(|(key, rows)| {
            let first = *rows.first()?;
            let grades: Vec<f64> = rows.iter().filter_map(|r| known_grade(r)).collect();
            let spread = grade_spread(&grades);
            let group_id = match &key {
                GroupKey::Explicit(id) => Some(id.clone()),
                _ => None,
            };
            Some(GroupStats {
                group_name: group_name(&key, first),
                group_id,
                class_name: first.class_name.clone(),
                sub_class: sub_class_of(first),
                average_grade: spread.average,
                min_grade: spread.min,
                max_grade: spread.max,
                count: rows.len(),
            })
        })
        .collect();
    out.sort_by(|a, b| {
        a.group_name
            .cmp(&b.group_name)
            .then_with(|| a.group_id.cmp(&b.group_id))
    });
    out
}
