use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{calc_err, db_conn, optional_usize, required_str};
use crate::ipc::types::{AppState, Request};
use crate::recalc;
use serde_json::json;

fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn handle_corrections_recompute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let correction_id = match required_str(req, "correctionId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match recalc::recompute_correction(conn, &correction_id, &state.policy, &now_stamp()) {
        Ok(derived) => ok(
            &req.id,
            json!({
                "correctionId": correction_id,
                "grade": derived.grade,
                "finalGrade": derived.final_grade,
                "percentageGrade": derived.percentage_grade,
            }),
        ),
        Err(e) => calc_err(req, e),
    }
}

fn handle_corrections_recalculate_percentages(
    state: &mut AppState,
    req: &Request,
) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let cursor = match req.params.get("cursor") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_str() {
            Some(s) => Some(s.to_string()),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "cursor must be a string or null",
                    Some(json!({ "cursor": v })),
                )
            }
        },
    };
    let page_size = match optional_usize(req, "pageSize") {
        Ok(v) => v.unwrap_or(recalc::DEFAULT_PAGE_SIZE),
        Err(e) => return e,
    };
    if page_size == 0 || page_size > recalc::MAX_PAGE_SIZE {
        return err(
            &req.id,
            "bad_params",
            format!("pageSize must be between 1 and {}", recalc::MAX_PAGE_SIZE),
            Some(json!({ "pageSize": page_size })),
        );
    }
    let max_records = match optional_usize(req, "maxRecords") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let opts = recalc::RecalcOptions {
        cursor,
        page_size,
        max_records,
    };
    match recalc::recalculate_percentage_grades(conn, &opts, &now_stamp()) {
        Ok(report) => ok(&req.id, json!(report)),
        Err(e) => calc_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "corrections.recompute" => Some(handle_corrections_recompute(state, req)),
        "corrections.recalculatePercentages" => {
            Some(handle_corrections_recalculate_percentages(state, req))
        }
        _ => None,
    }
}
