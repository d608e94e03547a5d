use crate::parts::{Part, PartScores};
use serde::Serialize;

/// Upper bound of every stored grading field.
pub const MAX_FIELD_VALUE: f64 = 99.99;

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Grading thresholds, read from configuration at startup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingPolicy {
    /// Penalties never push a grade below this, and never apply under it.
    pub grade_floor: f64,
    /// `final_grade >= pass_threshold` counts as a pass in statistics.
    pub pass_threshold: f64,
}

impl Default for GradingPolicy {
    fn default() -> Self {
        Self {
            grade_floor: 5.0,
            pass_threshold: 10.0,
        }
    }
}

/// Half-up rounding on the third decimal: `Int(100*x + 0.5) / 100`
pub fn round_off_2_decimal(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Brings any grading field into the storage contract: `[0, 99.99]`, 2 decimals.
pub fn validate_value(value: Option<f64>, field: &str) -> f64 {
    let Some(v) = value else {
        return 0.0;
    };
    if v.is_nan() {
        return 0.0;
    }
    if v < 0.0 {
        tracing::warn!(field, value = v, "negative value clamped to 0");
        return 0.0;
    }
    if v > MAX_FIELD_VALUE {
        tracing::warn!(field, value = v, "value above {} clamped", MAX_FIELD_VALUE);
        return MAX_FIELD_VALUE;
    }
    round_off_2_decimal(v)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeOutcome {
    pub grade: f64,
    pub final_grade: f64,
}

pub fn calculate_grade(
    parts: &[Part],
    scores: &PartScores,
    penalty: Option<f64>,
    bonus: Option<f64>,
    policy: &GradingPolicy,
) -> GradeOutcome {
    let orphans = scores.orphan_count(parts);
    if orphans > 0 {
        tracing::debug!(orphans, "ignoring earned points without a matching part");
    }

    let mut total_earned = 0.0_f64;
    let mut total_possible = 0.0_f64;
    for p in parts {
        if scores.is_disabled(p.id) {
            continue;
        }
        total_earned += scores.earned(p.id);
        if p.max_points.is_finite() {
            total_possible += p.max_points;
        }
    }

    if total_possible == 0.0 {
        return GradeOutcome {
            grade: 0.0,
            final_grade: 0.0,
        };
    }

    let grade = validate_value(Some(total_earned), "grade");
    let p = validate_value(penalty, "penalty");
    let b = validate_value(bonus, "bonus");

    let adjusted = if grade < policy.grade_floor {
        (grade + b).max(grade)
    } else {
        policy.grade_floor.max(grade - p + b)
    };

    GradeOutcome {
        grade,
        final_grade: validate_value(Some(adjusted), "final_grade"),
    }
}

/// `None` means "not computable", which callers must not read as zero.
pub fn calculate_percentage_grade(
    final_grade: Option<f64>,
    parts: &[Part],
    scores: &PartScores,
) -> Option<f64> {
    let final_grade = final_grade.filter(|v| v.is_finite())?;
    if parts.is_empty() {
        return None;
    }

    let total_active: f64 = parts
        .iter()
        .filter(|p| !scores.is_disabled(p.id))
        .map(|p| p.max_points)
        .filter(|v| v.is_finite())
        .sum();
    if total_active <= 0.0 {
        return None;
    }

    let percentage = (final_grade / total_active * 100.0).clamp(0.0, 100.0);
    Some(round_off_2_decimal(percentage))
}

/// Raw, caller-editable fields of one correction.
#[derive(Debug, Clone, Default)]
pub struct CorrectionInput {
    pub scores: PartScores,
    pub penalty: Option<f64>,
    pub bonus: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedGrades {
    pub grade: f64,
    pub final_grade: f64,
    pub percentage_grade: Option<f64>,
}

pub fn derive_grades(
    parts: &[Part],
    input: &CorrectionInput,
    policy: &GradingPolicy,
) -> DerivedGrades {
    let outcome = calculate_grade(parts, &input.scores, input.penalty, input.bonus, policy);
    DerivedGrades {
        grade: outcome.grade,
        final_grade: outcome.final_grade,
        percentage_grade: calculate_percentage_grade(
            Some(outcome.final_grade),
            parts,
            &input.scores,
        ),
    }
}
