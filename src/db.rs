use crate::calc::{CalcError, CorrectionInput, DerivedGrades};
use crate::parts::{parse_labels, parse_numbers, parts_from_points, Part, PartScores, StoredArray};
use crate::stats::{CorrectionRecord, CorrectionStatus};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "correctord.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(workspace.join(DB_FILE_NAME))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            sub_class TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS correction_groups(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            class_id TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            points TEXT NOT NULL DEFAULT '[]',
            part_labels TEXT
        )",
        [],
    )?;

    // Activities are owned by the console and may disappear underneath
    // their corrections, so activity_id carries no foreign key.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS corrections(
            id TEXT PRIMARY KEY,
            activity_id TEXT NOT NULL,
            student_id TEXT,
            group_id TEXT,
            points_earned TEXT,
            disabled_parts TEXT,
            penalty REAL,
            bonus REAL,
            grade REAL,
            final_grade REAL,
            status TEXT NOT NULL DEFAULT 'ACTIVE',
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(group_id) REFERENCES correction_groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_corrections_activity ON corrections(activity_id)",
        [],
    )?;

    // Older workspaces predate percentage grades and write stamps.
    // Backfilling percentage_grade is corrections.recalculatePercentages' job.
    ensure_corrections_percentage_grade(conn)?;
    ensure_corrections_updated_at(conn)?;

    Ok(())
}

fn ensure_corrections_percentage_grade(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "corrections", "percentage_grade")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE corrections ADD COLUMN percentage_grade REAL", [])?;
    Ok(())
}

fn ensure_corrections_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "corrections", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE corrections ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn query_err(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_query_failed", e.to_string())
}

fn status_or_unknown(raw: &str, correction_id: &str) -> CorrectionStatus {
    CorrectionStatus::parse(raw).unwrap_or_else(|| {
        tracing::warn!(
            correction_id,
            status = raw,
            "unrecognized correction status, counted as {}",
            CorrectionStatus::Unknown.as_str()
        );
        CorrectionStatus::Unknown
    })
}

/// REAL columns keep whatever was written into them. Numbers pass,
/// numeric text is parsed, NULL and blank text are `None`. `Err` carries
/// the stored value for logging.
fn real_cell(value: Value) -> Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Integer(i) => Ok(Some(i as f64)),
        Value::Real(f) => Ok(Some(f)),
        Value::Text(text) => {
            let t = text.trim();
            if t.is_empty() {
                return Ok(None);
            }
            t.parse::<f64>().map(Some).map_err(|_| text)
        }
        Value::Blob(bytes) => Err(format!("<blob of {} bytes>", bytes.len())),
    }
}

/// Like `real_cell`, but an unreadable value degrades to `None`.
fn lenient_real(value: Value, column: &str, correction_id: &str) -> Option<f64> {
    real_cell(value).unwrap_or_else(|stored| {
        tracing::warn!(correction_id, column, stored = %stored, "unreadable number, treating as null");
        None
    })
}

/// `None` when the activity does not exist.
pub fn load_activity_parts(conn: &Connection, activity_id: &str) -> Result<Option<Vec<Part>>, CalcError> {
    let row: Option<(Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT points, part_labels FROM activities WHERE id = ?",
            [activity_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(query_err)?;
    let Some((points, labels)) = row else {
        return Ok(None);
    };
    let points = parse_numbers(&StoredArray::from_column(points), "points");
    let labels = parse_labels(&StoredArray::from_column(labels));
    Ok(Some(parts_from_points(&points, &labels)))
}

pub fn load_correction_records(
    conn: &Connection,
    activity_id: &str,
) -> Result<Vec<CorrectionRecord>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.student_id, COALESCE(s.class_id, g.class_id), cl.name, s.sub_class,
                    c.group_id, g.name, c.status, c.final_grade, c.points_earned, c.disabled_parts
             FROM corrections c
             LEFT JOIN students s ON s.id = c.student_id
             LEFT JOIN correction_groups g ON g.id = c.group_id
             LEFT JOIN classes cl ON cl.id = COALESCE(s.class_id, g.class_id)
             WHERE c.activity_id = ?
             ORDER BY c.id",
        )
        .map_err(query_err)?;
    let records = stmt
        .query_map([activity_id], |r| {
            let id: String = r.get(0)?;
            let status: String = r.get(7)?;
            let final_grade: Value = r.get(8)?;
            let points_earned: Option<String> = r.get(9)?;
            let disabled_parts: Option<String> = r.get(10)?;
            Ok(CorrectionRecord {
                status: status_or_unknown(&status, &id),
                final_grade: lenient_real(final_grade, "final_grade", &id),
                student_id: r.get(1)?,
                class_id: r.get(2)?,
                class_name: r.get(3)?,
                sub_class: r.get(4)?,
                group_id: r.get(5)?,
                group_name: r.get(6)?,
                scores: PartScores::decode(
                    &StoredArray::from_column(points_earned),
                    &StoredArray::from_column(disabled_parts),
                ),
                id,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(records)
}

/// Returns the owning activity id with the raw inputs, or `None` if absent.
pub fn load_correction_input(
    conn: &Connection,
    correction_id: &str,
) -> Result<Option<(String, CorrectionInput)>, CalcError> {
    conn.query_row(
        "SELECT activity_id, points_earned, disabled_parts, penalty, bonus
         FROM corrections
         WHERE id = ?",
        [correction_id],
        |r| {
            let activity_id: String = r.get(0)?;
            let points_earned: Option<String> = r.get(1)?;
            let disabled_parts: Option<String> = r.get(2)?;
            let penalty: Value = r.get(3)?;
            let bonus: Value = r.get(4)?;
            Ok((
                activity_id,
                CorrectionInput {
                    scores: PartScores::decode(
                        &StoredArray::from_column(points_earned),
                        &StoredArray::from_column(disabled_parts),
                    ),
                    penalty: lenient_real(penalty, "penalty", correction_id),
                    bonus: lenient_real(bonus, "bonus", correction_id),
                },
            ))
        },
    )
    .optional()
    .map_err(query_err)
}

pub fn store_derived_grades(
    conn: &Connection,
    correction_id: &str,
    derived: &DerivedGrades,
    updated_at: &str,
) -> Result<(), CalcError> {
    conn.execute(
        "UPDATE corrections
         SET grade = ?, final_grade = ?, percentage_grade = ?, updated_at = ?
         WHERE id = ?",
        (
            derived.grade,
            derived.final_grade,
            derived.percentage_grade,
            updated_at,
            correction_id,
        ),
    )
    .map_err(|e| CalcError::new("db_update_failed", e.to_string()))?;
    Ok(())
}

/// The slice of a correction the percentage backfill needs. Grade cells
/// are passed through undecided so the backfill can skip or repair them.
#[derive(Debug, Clone)]
pub struct PercentageRow {
    pub id: String,
    pub activity_id: String,
    pub final_grade: Result<Option<f64>, String>,
    pub percentage_grade: Result<Option<f64>, String>,
    pub scores: PartScores,
}

/// Keyset page: rows with `id > after`, ascending, at most `limit`.
pub fn load_percentage_page(
    conn: &Connection,
    after: Option<&str>,
    limit: usize,
) -> Result<Vec<PercentageRow>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, activity_id, final_grade, percentage_grade, disabled_parts
             FROM corrections
             WHERE ?1 IS NULL OR id > ?1
             ORDER BY id
             LIMIT ?2",
        )
        .map_err(query_err)?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt
        .query_map((after, limit), |r| {
            let final_grade: Value = r.get(2)?;
            let percentage_grade: Value = r.get(3)?;
            let disabled_parts: Option<String> = r.get(4)?;
            Ok(PercentageRow {
                id: r.get(0)?,
                activity_id: r.get(1)?,
                final_grade: real_cell(final_grade),
                percentage_grade: real_cell(percentage_grade),
                scores: PartScores::decode(
                    &StoredArray::Missing,
                    &StoredArray::from_column(disabled_parts),
                ),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(rows)
}

pub fn store_percentage_grade(
    conn: &Connection,
    correction_id: &str,
    percentage_grade: Option<f64>,
    updated_at: &str,
) -> Result<(), CalcError> {
    conn.execute(
        "UPDATE corrections SET percentage_grade = ?, updated_at = ? WHERE id = ?",
        (percentage_grade, updated_at, correction_id),
    )
    .map_err(|e| {
        CalcError::new("db_update_failed", e.to_string())
            .with_details(serde_json::json!({ "correctionId": correction_id }))
    })?;
    Ok(())
}
