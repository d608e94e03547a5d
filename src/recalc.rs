use crate::calc::{calculate_percentage_grade, derive_grades, CalcError, DerivedGrades, GradingPolicy};
use crate::db;
use crate::parts::Part;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;

pub const DEFAULT_PAGE_SIZE: usize = 200;
pub const MAX_PAGE_SIZE: usize = 5000;

#[derive(Debug, Clone)]
pub struct RecalcOptions {
    /// Resume after this correction id.
    pub cursor: Option<String>,
    pub page_size: usize,
    /// Stop after scanning this many records; `None` runs to the end.
    pub max_records: Option<usize>,
}

impl Default for RecalcOptions {
    fn default() -> Self {
        Self {
            cursor: None,
            page_size: DEFAULT_PAGE_SIZE,
            max_records: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalcReport {
    pub scanned: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub missing_activity: usize,
    /// Rows whose stored `final_grade` is not a number; left untouched.
    pub malformed: usize,
    pub next_cursor: Option<String>,
    pub completed: bool,
}

/// Recomputes `percentage_grade` from the stored `final_grade` of every
/// correction, one page at a time. Each write stands alone, so an
/// interrupted run leaves finished rows correct and can resume from
/// `next_cursor`.
pub fn recalculate_percentage_grades(
    conn: &Connection,
    opts: &RecalcOptions,
    updated_at: &str,
) -> Result<RecalcReport, CalcError> {
    let page_size = opts.page_size.clamp(1, MAX_PAGE_SIZE);
    let mut report = RecalcReport::default();
    let mut cursor = opts.cursor.clone();
    let mut parts_by_activity: HashMap<String, Option<Vec<Part>>> = HashMap::new();

    loop {
        let budget = match opts.max_records {
            Some(max) => max.saturating_sub(report.scanned),
            None => page_size,
        };
        if budget == 0 {
            break;
        }
        let limit = page_size.min(budget);

        let page = db::load_percentage_page(conn, cursor.as_deref(), limit)?;
        let page_len = page.len();
        for row in page {
            report.scanned += 1;
            cursor = Some(row.id.clone());

            let final_grade = match &row.final_grade {
                Ok(v) => *v,
                Err(stored) => {
                    tracing::warn!(
                        correction_id = %row.id,
                        stored = %stored,
                        "final_grade is not a number, percentage left untouched"
                    );
                    report.malformed += 1;
                    continue;
                }
            };

            if !parts_by_activity.contains_key(&row.activity_id) {
                let parts = db::load_activity_parts(conn, &row.activity_id)?;
                parts_by_activity.insert(row.activity_id.clone(), parts);
            }
            let Some(Some(parts)) = parts_by_activity.get(&row.activity_id) else {
                tracing::warn!(
                    correction_id = %row.id,
                    activity_id = %row.activity_id,
                    "activity not found, percentage left untouched"
                );
                report.missing_activity += 1;
                continue;
            };

            let percentage = calculate_percentage_grade(final_grade, parts, &row.scores);
            // An unreadable stored percentage is always rewritten.
            if row.percentage_grade.as_ref().ok() == Some(&percentage) {
                report.unchanged += 1;
                continue;
            }
            db::store_percentage_grade(conn, &row.id, percentage, updated_at)?;
            report.updated += 1;
        }

        tracing::info!(
            scanned = report.scanned,
            updated = report.updated,
            cursor = cursor.as_deref().unwrap_or(""),
            "percentage recalculation page done"
        );

        if page_len < limit {
            report.completed = true;
            break;
        }
    }

    report.next_cursor = if report.completed { None } else { cursor };
    Ok(report)
}

/// Recomputes and stores all three derived fields of one correction.
pub fn recompute_correction(
    conn: &Connection,
    correction_id: &str,
    policy: &GradingPolicy,
    updated_at: &str,
) -> Result<DerivedGrades, CalcError> {
    let Some((activity_id, input)) = db::load_correction_input(conn, correction_id)? else {
        return Err(CalcError::new("not_found", "correction not found")
            .with_details(json!({ "correctionId": correction_id })));
    };
    let Some(parts) = db::load_activity_parts(conn, &activity_id)? else {
        return Err(CalcError::new("not_found", "activity not found")
            .with_details(json!({ "activityId": activity_id })));
    };

    let derived = derive_grades(&parts, &input, policy);
    db::store_derived_grades(conn, correction_id, &derived, updated_at)?;
    Ok(derived)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAMP: &str = "2026-01-01T00:00:00+00:00";

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn.execute(
            "INSERT INTO activities(id, name, points) VALUES('act', 'Titration', '[10, 10]')",
            [],
        )
        .expect("activity");
        let rows: [(&str, &str, Option<&str>, Option<f64>); 5] = [
            ("c01", "act", None, Some(12.0)),
            ("c02", "act", Some("[false, true]"), Some(6.0)),
            ("c03", "act", None, None),
            ("c04", "gone", None, Some(8.0)),
            ("c05", "act", Some("garbage"), Some(30.0)),
        ];
        for (id, activity, disabled, final_grade) in rows {
            conn.execute(
                "INSERT INTO corrections(id, activity_id, disabled_parts, final_grade) VALUES(?, ?, ?, ?)",
                (id, activity, disabled, final_grade),
            )
            .expect("correction");
        }
        conn
    }

    fn percentages(conn: &Connection) -> Vec<(String, Option<f64>)> {
        let mut stmt = conn
            .prepare("SELECT id, percentage_grade FROM corrections ORDER BY id")
            .expect("prepare");
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .expect("query")
            .collect::<Result<Vec<_>, _>>()
            .expect("rows");
        rows
    }

    #[test]
    fn full_run_backfills_and_is_idempotent() {
        let conn = seeded();
        let report =
            recalculate_percentage_grades(&conn, &RecalcOptions::default(), STAMP).expect("run");
        assert_eq!(report.scanned, 5);
        assert_eq!(report.updated, 3);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.missing_activity, 1);
        assert!(report.completed);
        assert_eq!(report.next_cursor, None);

        assert_eq!(
            percentages(&conn),
            vec![
                ("c01".to_string(), Some(60.0)),
                ("c02".to_string(), Some(60.0)),
                ("c03".to_string(), None),
                ("c04".to_string(), None),
                ("c05".to_string(), Some(100.0)),
            ]
        );

        let again =
            recalculate_percentage_grades(&conn, &RecalcOptions::default(), STAMP).expect("rerun");
        assert_eq!(again.updated, 0);
        assert_eq!(again.unchanged, 4);
    }

    #[test]
    fn bounded_runs_resume_from_cursor() {
        let conn = seeded();
        let mut opts = RecalcOptions {
            cursor: None,
            page_size: 2,
            max_records: Some(3),
        };
        let first = recalculate_percentage_grades(&conn, &opts, STAMP).expect("first");
        assert_eq!(first.scanned, 3);
        assert!(!first.completed);
        assert_eq!(first.next_cursor.as_deref(), Some("c03"));

        opts.cursor = first.next_cursor.clone();
        let second = recalculate_percentage_grades(&conn, &opts, STAMP).expect("second");
        assert_eq!(second.scanned, 2);
        assert!(second.completed);
        assert_eq!(first.updated + second.updated, 3);

        let full = recalculate_percentage_grades(&conn, &RecalcOptions::default(), STAMP)
            .expect("verify");
        assert_eq!(full.updated, 0);
    }

    #[test]
    fn recompute_correction_writes_all_derived_fields() {
        let conn = seeded();
        conn.execute(
            "UPDATE corrections SET points_earned = '[8, 6]', penalty = 2, bonus = 0 WHERE id = 'c01'",
            [],
        )
        .expect("update");
        let derived =
            recompute_correction(&conn, "c01", &GradingPolicy::default(), STAMP).expect("recompute");
        assert_eq!(
            derived,
            DerivedGrades {
                grade: 14.0,
                final_grade: 12.0,
                percentage_grade: Some(60.0)
            }
        );
        let stored: (f64, f64, Option<f64>, String) = conn
            .query_row(
                "SELECT grade, final_grade, percentage_grade, updated_at FROM corrections WHERE id = 'c01'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .expect("stored");
        assert_eq!(stored, (14.0, 12.0, Some(60.0), STAMP.to_string()));
    }

    #[test]
    fn unreadable_grade_cells_do_not_stall_the_backfill() {
        let conn = seeded();
        conn.execute(
            "INSERT INTO corrections(id, activity_id, final_grade) VALUES('c02x', 'act', 'n/a')",
            [],
        )
        .expect("text grade");
        conn.execute(
            "UPDATE corrections SET percentage_grade = 'stale' WHERE id = 'c01'",
            [],
        )
        .expect("text percentage");

        let opts = RecalcOptions {
            cursor: None,
            page_size: 2,
            max_records: None,
        };
        let report = recalculate_percentage_grades(&conn, &opts, STAMP).expect("run");
        assert_eq!(report.scanned, 6);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.updated, 3);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.missing_activity, 1);
        assert!(report.completed);

        let stored: (String, String) = conn
            .query_row(
                "SELECT typeof(final_grade), final_grade FROM corrections WHERE id = 'c02x'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .expect("untouched");
        assert_eq!(stored, ("text".to_string(), "n/a".to_string()));
        let p = percentages(&conn);
        assert_eq!(p[0], ("c01".to_string(), Some(60.0)));
        assert_eq!(p[2], ("c02x".to_string(), None));

        let again = recalculate_percentage_grades(&conn, &opts, STAMP).expect("rerun");
        assert_eq!(again.updated, 0);
        assert_eq!(again.malformed, 1);
    }

    #[test]
    fn recompute_correction_treats_unreadable_adjustments_as_absent() {
        let conn = seeded();
        conn.execute(
            "UPDATE corrections SET points_earned = '[8, 6]', penalty = 'lots', bonus = X'01' WHERE id = 'c01'",
            [],
        )
        .expect("update");
        let derived =
            recompute_correction(&conn, "c01", &GradingPolicy::default(), STAMP).expect("recompute");
        assert_eq!(
            derived,
            DerivedGrades {
                grade: 14.0,
                final_grade: 14.0,
                percentage_grade: Some(70.0)
            }
        );
    }

    #[test]
    fn recompute_correction_reports_missing_records() {
        let conn = seeded();
        let policy = GradingPolicy::default();
        let err = recompute_correction(&conn, "nope", &policy, STAMP).expect_err("missing");
        assert_eq!(err.code, "not_found");
        let err = recompute_correction(&conn, "c04", &policy, STAMP).expect_err("no activity");
        assert_eq!(err.code, "not_found");
        assert_eq!(err.message, "activity not found");
    }
}
