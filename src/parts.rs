use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Stable identity of an activity part: the ordinal at which it was defined.
/// Parts are append-only, so an id never moves once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartId(pub usize);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub id: PartId,
    pub label: String,
    pub max_points: f64,
}

/// Builds the part list from the stored `points` array and optional labels.
pub fn parts_from_points(points: &[f64], labels: &[String]) -> Vec<Part> {
    points
        .iter()
        .enumerate()
        .map(|(i, p)| Part {
            id: PartId(i),
            label: labels
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("Part {}", i + 1)),
            max_points: if p.is_finite() { *p } else { 0.0 },
        })
        .collect()
}

/// A per-part array as it was found in storage or in a request.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredArray {
    Missing,
    Raw(String),
    Structured(serde_json::Value),
}

impl StoredArray {
    pub fn from_json(raw: Option<&serde_json::Value>) -> Self {
        match raw {
            None | Some(serde_json::Value::Null) => StoredArray::Missing,
            Some(serde_json::Value::String(s)) => StoredArray::Raw(s.clone()),
            Some(v) => StoredArray::Structured(v.clone()),
        }
    }

    pub fn from_column(raw: Option<String>) -> Self {
        match raw {
            None => StoredArray::Missing,
            Some(s) => StoredArray::Raw(s),
        }
    }

    fn decode(&self, field: &str) -> Option<Vec<serde_json::Value>> {
        let value = match self {
            StoredArray::Missing => return None,
            StoredArray::Raw(text) => {
                let t = text.trim();
                if t.is_empty() {
                    return None;
                }
                match serde_json::from_str::<serde_json::Value>(t) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(field, error = %e, "undecodable part array, using fallback");
                        return None;
                    }
                }
            }
            StoredArray::Structured(v) => v.clone(),
        };
        match value {
            serde_json::Value::Array(items) => Some(items),
            other => {
                tracing::warn!(field, kind = json_kind(&other), "part array is not an array, using fallback");
                None
            }
        }
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn earned_entry(v: &serde_json::Value) -> f64 {
    let n = match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|x| x.is_finite()).unwrap_or(0.0)
}

fn disabled_entry(v: &serde_json::Value) -> bool {
    match v {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|x| x != 0.0).unwrap_or(false),
        _ => false,
    }
}

/// Never fails: anything that isn't an array decodes to `[]`.
pub fn parse_numbers(raw: &StoredArray, field: &str) -> Vec<f64> {
    raw.decode(field)
        .map(|items| items.iter().map(earned_entry).collect())
        .unwrap_or_default()
}

pub fn parse_points_earned(raw: &StoredArray) -> Vec<f64> {
    parse_numbers(raw, "points_earned")
}

pub fn parse_labels(raw: &StoredArray) -> Vec<String> {
    raw.decode("part_labels")
        .map(|items| {
            items
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// `None` means every part is active.
pub fn parse_disabled_parts(raw: &StoredArray) -> Option<Vec<bool>> {
    raw.decode("disabled_parts")
        .map(|items| items.iter().map(disabled_entry).collect())
}

/// Canonical per-part result of one correction, keyed by part identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartScores {
    earned: BTreeMap<PartId, f64>,
    disabled: BTreeSet<PartId>,
}

impl PartScores {
    pub fn from_arrays(earned: &[f64], disabled: Option<&[bool]>) -> Self {
        let earned = earned
            .iter()
            .enumerate()
            .map(|(i, v)| (PartId(i), *v))
            .collect();
        let disabled = disabled
            .unwrap_or(&[])
            .iter()
            .enumerate()
            .filter(|(_, d)| **d)
            .map(|(i, _)| PartId(i))
            .collect();
        Self { earned, disabled }
    }

    pub fn decode(points_earned: &StoredArray, disabled_parts: &StoredArray) -> Self {
        let earned = parse_points_earned(points_earned);
        let disabled = parse_disabled_parts(disabled_parts);
        Self::from_arrays(&earned, disabled.as_deref())
    }

    /// Missing entries read as zero.
    pub fn earned(&self, id: PartId) -> f64 {
        self.earned
            .get(&id)
            .copied()
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }

    pub fn is_disabled(&self, id: PartId) -> bool {
        self.disabled.contains(&id)
    }

    /// Earned entries with no matching part.
    pub fn orphan_count(&self, parts: &[Part]) -> usize {
        self.earned
            .keys()
            .filter(|id| !parts.iter().any(|p| p.id == **id))
            .count()
    }

    /// Positional row for the given parts, disabled parts zeroed.
    pub fn active_row(&self, parts: &[Part]) -> Vec<f64> {
        parts
            .iter()
            .map(|p| {
                if self.is_disabled(p.id) {
                    0.0
                } else {
                    self.earned(p.id)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_arrays_pass_through() {
        let raw = StoredArray::from_json(Some(&json!([8, 6.5, "2"])));
        assert_eq!(parse_points_earned(&raw), vec![8.0, 6.5, 2.0]);

        let raw = StoredArray::from_json(Some(&json!([false, true, 1, null])));
        assert_eq!(
            parse_disabled_parts(&raw),
            Some(vec![false, true, true, false])
        );
    }

    #[test]
    fn textual_arrays_are_decoded() {
        let raw = StoredArray::from_column(Some("[1.5, 2, 3]".to_string()));
        assert_eq!(parse_points_earned(&raw), vec![1.5, 2.0, 3.0]);

        let raw = StoredArray::from_column(Some("[true,false]".to_string()));
        assert_eq!(parse_disabled_parts(&raw), Some(vec![true, false]));
    }

    #[test]
    fn malformed_inputs_degrade_to_safe_defaults() {
        for raw in [
            StoredArray::Missing,
            StoredArray::Raw(String::new()),
            StoredArray::Raw("not json".to_string()),
            StoredArray::Raw("{\"a\":1}".to_string()),
            StoredArray::Raw("42".to_string()),
            StoredArray::Structured(json!({ "x": [1, 2] })),
            StoredArray::Structured(json!(true)),
        ] {
            assert!(parse_points_earned(&raw).is_empty(), "{:?}", raw);
            assert_eq!(parse_disabled_parts(&raw), None, "{:?}", raw);
        }
    }

    #[test]
    fn stray_elements_read_as_zero() {
        let raw = StoredArray::from_json(Some(&json!([3, "abc", null, { "k": 1 }, 4])));
        assert_eq!(parse_points_earned(&raw), vec![3.0, 0.0, 0.0, 0.0, 4.0]);
    }

    #[test]
    fn short_rows_are_zero_padded_and_disabled_zeroed() {
        let parts = parts_from_points(&[10.0, 10.0, 5.0], &[]);
        let scores = PartScores::from_arrays(&[7.0, 4.0], Some(&[false, true]));
        assert_eq!(scores.active_row(&parts), vec![7.0, 0.0, 0.0]);
        assert!(scores.is_disabled(PartId(1)));
        assert_eq!(scores.earned(PartId(1)), 4.0);
        assert_eq!(scores.earned(PartId(2)), 0.0);
    }

    #[test]
    fn labels_fall_back_to_ordinals() {
        let labels = parse_labels(&StoredArray::from_column(Some("[\"Exp\", 3]".to_string())));
        assert_eq!(labels, vec!["Exp".to_string(), "3".to_string()]);
        let parts = parts_from_points(&[4.0, 6.0, 10.0], &labels);
        assert_eq!(parts[2].label, "Part 3");
        assert_eq!(parts[1].id, PartId(1));
    }

    #[test]
    fn orphans_are_counted_against_parts() {
        let parts = parts_from_points(&[10.0], &["Theory".to_string()]);
        let scores = PartScores::from_arrays(&[1.0, 2.0, 3.0], None);
        assert_eq!(scores.orphan_count(&parts), 2);
        assert_eq!(parts[0].label, "Theory");
        assert!(!scores.is_disabled(PartId(0)));
    }
}
