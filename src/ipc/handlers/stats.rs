use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{calc_err, db_conn, optional_bool, required_str};
use crate::ipc::types::{AppState, Request};
use crate::stats;
use serde_json::json;

fn handle_stats_activity(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let activity_id = match required_str(req, "activityId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let include_inactive = match optional_bool(req, "includeInactive", false) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let parts = match db::load_activity_parts(conn, &activity_id) {
        Ok(Some(v)) => v,
        Ok(None) => {
            tracing::warn!(activity_id = %activity_id, "activity not found, reporting without parts");
            Vec::new()
        }
        Err(e) => return calc_err(req, e),
    };
    let records = match db::load_correction_records(conn, &activity_id) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    let report = stats::compute_activity_stats(&parts, &records, include_inactive, &state.policy);
    let mut payload = json!(report);
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("activityId".to_string(), json!(activity_id));
        obj.insert("includeInactive".to_string(), json!(include_inactive));
        obj.insert("parts".to_string(), json!(parts));
    }
    ok(&req.id, payload)
}

fn handle_stats_groups(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let activity_id = match required_str(req, "activityId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let include_inactive = match optional_bool(req, "includeInactive", false) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match db::load_correction_records(conn, &activity_id) {
        Ok(records) => ok(
            &req.id,
            json!({
                "activityId": activity_id,
                "includeInactive": include_inactive,
                "groups": stats::compute_group_stats(&records, include_inactive),
            }),
        ),
        Err(e) => calc_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "stats.activity" => Some(handle_stats_activity(state, req)),
        "stats.groups" => Some(handle_stats_groups(state, req)),
        _ => None,
    }
}
