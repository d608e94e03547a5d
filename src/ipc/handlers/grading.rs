use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::optional_f64;
use crate::ipc::types::{AppState, Request};
use crate::parts::{self, Part, PartScores, StoredArray};
use serde_json::json;

/// `points` must be present; a malformed value degrades to no parts.
fn activity_parts(req: &Request) -> Result<Vec<Part>, serde_json::Value> {
    let Some(raw) = req.params.get("points") else {
        return Err(err(&req.id, "bad_params", "missing points", None));
    };
    let points = parts::parse_numbers(&StoredArray::from_json(Some(raw)), "points");
    Ok(parts::parts_from_points(&points, &[]))
}

fn part_scores(req: &Request) -> PartScores {
    PartScores::decode(
        &StoredArray::from_json(req.params.get("pointsEarned")),
        &StoredArray::from_json(req.params.get("disabledParts")),
    )
}

fn handle_grading_calculate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let parts = match activity_parts(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let penalty = match optional_f64(req, "penalty") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let bonus = match optional_f64(req, "bonus") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let input = calc::CorrectionInput {
        scores: part_scores(req),
        penalty,
        bonus,
    };
    ok(&req.id, json!(calc::derive_grades(&parts, &input, &state.policy)))
}

fn handle_grading_percentage(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let parts = match activity_parts(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let final_grade = match optional_f64(req, "finalGrade") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let percentage = calc::calculate_percentage_grade(final_grade, &parts, &part_scores(req));
    ok(&req.id, json!({ "percentageGrade": percentage }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.calculate" => Some(handle_grading_calculate(state, req)),
        "grading.percentage" => Some(handle_grading_percentage(state, req)),
        _ => None,
    }
}
