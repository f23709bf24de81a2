//! Set and order comparison of injected against retrieved records.

use crate::types::Record;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Id lists longer than this are reported by count only.
pub const MAX_LISTED_IDS: usize = 10;

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub success: bool,
    pub injected_count: usize,
    pub retrieved_count: usize,
    pub missing_events: usize,
    pub duplicate_events: usize,
    pub out_of_order_events: usize,
    pub loss_percentage: f64,
    pub expected_loss_percentage: f64,
    pub loss_within_expected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_event_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_event_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_of_order_event_ids: Option<Vec<String>>,
    pub issues: Vec<String>,
    /// Set when reconciliation could not be computed at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReconciliationResult {
    fn failed(error: &str, injected_count: usize, retrieved_count: usize, expected: f64) -> Self {
        Self {
            success: false,
            injected_count,
            retrieved_count,
            expected_loss_percentage: expected,
            issues: vec![error.to_string()],
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// Field names used to join and order records.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileKeys<'a> {
    pub id_field: &'a str,
    pub timestamp_field: &'a str,
}

fn id_of(record: &Record, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn listed(ids: Vec<String>) -> Option<Vec<String>> {
    (ids.len() <= MAX_LISTED_IDS).then_some(ids)
}

/// Compare two timestamp values: numbers numerically, parseable datetimes
/// chronologically, anything else as text.
fn compare_timestamps(a: &Value, b: &Value) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    let text = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let (a, b) = (text(a), text(b));
    match (parse_datetime(&a), parse_datetime(&b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.cmp(&b),
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
}

/// Reconcile complete snapshots of injected and retrieved records.
///
/// Pure over its inputs: the same snapshots always give the same result.
pub fn reconcile(
    injected: &[Record],
    retrieved: &[Record],
    keys: ReconcileKeys<'_>,
    expected_loss_percentage: f64,
) -> ReconciliationResult {
    if injected.is_empty() {
        return ReconciliationResult::failed(
            "No injected data to validate against",
            0,
            retrieved.len(),
            expected_loss_percentage,
        );
    }
    let mut injected_order = Vec::with_capacity(injected.len());
    let mut injected_by_id: HashMap<String, &Record> = HashMap::with_capacity(injected.len());
    for record in injected {
        if let Some(id) = id_of(record, keys.id_field) {
            if !injected_by_id.contains_key(&id) {
                injected_order.push(id.clone());
                injected_by_id.insert(id, record);
            }
        }
    }

    if retrieved.is_empty() {
        // Nothing reached the secondary: every injected id is lost.
        let mut result = ReconciliationResult::failed(
            "No retrieved data to validate",
            injected.len(),
            0,
            expected_loss_percentage,
        );
        result.missing_events = injected_order.len();
        result.loss_percentage = if injected_order.is_empty() { 0.0 } else { 100.0 };
        result.loss_within_expected = result.loss_percentage <= expected_loss_percentage;
        result.missing_event_ids = listed(injected_order);
        return result;
    }

    let mut seen = HashSet::with_capacity(retrieved.len());
    let mut arrival = Vec::with_capacity(retrieved.len());
    let mut duplicates = Vec::new();
    for record in retrieved {
        let Some(id) = id_of(record, keys.id_field) else {
            continue;
        };
        if seen.insert(id.clone()) {
            arrival.push(id);
        } else {
            duplicates.push(id);
        }
    }

    let missing: Vec<String> = injected_order
        .iter()
        .filter(|id| !seen.contains(*id))
        .cloned()
        .collect();

    let mut out_of_order = Vec::new();
    let mut last_timestamp: Option<&Value> = None;
    for id in &arrival {
        let Some(timestamp) = injected_by_id
            .get(id)
            .and_then(|record| record.get(keys.timestamp_field))
            .filter(|ts| !ts.is_null())
        else {
            continue;
        };
        if let Some(previous) = last_timestamp {
            if compare_timestamps(timestamp, previous) == Ordering::Less {
                out_of_order.push(id.clone());
            }
        }
        last_timestamp = Some(timestamp);
    }

    let loss_percentage = if injected_order.is_empty() {
        0.0
    } else {
        missing.len() as f64 / injected_order.len() as f64 * 100.0
    };
    let loss_within_expected = loss_percentage <= expected_loss_percentage;

    let mut issues = Vec::new();
    if !missing.is_empty() {
        issues.push(format!("{} events missing ({:.2}%)", missing.len(), loss_percentage));
    }
    if !duplicates.is_empty() {
        issues.push(format!("{} duplicate events", duplicates.len()));
    }
    if !out_of_order.is_empty() {
        issues.push(format!("{} events out of order", out_of_order.len()));
    }

    let result = ReconciliationResult {
        success: loss_within_expected && out_of_order.is_empty(),
        injected_count: injected.len(),
        retrieved_count: retrieved.len(),
        missing_events: missing.len(),
        duplicate_events: duplicates.len(),
        out_of_order_events: out_of_order.len(),
        loss_percentage,
        expected_loss_percentage,
        loss_within_expected,
        missing_event_ids: listed(missing),
        duplicate_event_ids: listed(duplicates),
        out_of_order_event_ids: listed(out_of_order),
        issues,
        error: None,
    };

    info!(
        injected = result.injected_count,
        retrieved = result.retrieved_count,
        missing = result.missing_events,
        duplicates = result.duplicate_events,
        out_of_order = result.out_of_order_events,
        loss_percentage = result.loss_percentage,
        success = result.success,
        "Data reconciliation finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEYS: ReconcileKeys<'static> = ReconcileKeys {
        id_field: "event_id",
        timestamp_field: "timestamp",
    };

    fn record(id: &str, ts: i64) -> Record {
        let mut r = Record::new();
        r.insert("event_id".into(), json!(id));
        r.insert("timestamp".into(), json!(ts));
        r
    }

    fn dataset(n: usize) -> Vec<Record> {
        (0..n).map(|i| record(&format!("e{:04}", i), i as i64)).collect()
    }

    #[test]
    fn test_identical_snapshots_reconcile_cleanly() {
        let data = dataset(50);
        let result = reconcile(&data, &data, KEYS, 0.0);

        assert!(result.success);
        assert_eq!(result.missing_events, 0);
        assert_eq!(result.duplicate_events, 0);
        assert_eq!(result.out_of_order_events, 0);
        assert_eq!(result.loss_percentage, 0.0);
        assert!(result.issues.is_empty());
        assert_eq!(result.missing_event_ids, Some(vec![]));
    }

    #[test]
    fn test_partial_loss_within_tolerance() {
        let injected = dataset(1000);
        let retrieved = injected[..990].to_vec();

        let result = reconcile(&injected, &retrieved, KEYS, 2.0);

        assert!(result.success);
        assert_eq!(result.missing_events, 10);
        assert_eq!(result.loss_percentage, 1.0);
        assert!(result.loss_within_expected);
        assert_eq!(result.missing_event_ids.as_ref().map(Vec::len), Some(10));
        assert_eq!(result.issues, vec!["10 events missing (1.00%)".to_string()]);
    }

    #[test]
    fn test_loss_above_tolerance_fails() {
        let injected = dataset(100);
        let retrieved = injected[..80].to_vec();

        let result = reconcile(&injected, &retrieved, KEYS, 5.0);

        assert!(!result.success);
        assert_eq!(result.loss_percentage, 20.0);
        assert!(result.missing_event_ids.is_none());
    }

    #[test]
    fn test_duplicates_reported_but_not_failing() {
        let injected = dataset(3);
        let mut retrieved = injected.clone();
        retrieved.push(injected[1].clone());

        let result = reconcile(&injected, &retrieved, KEYS, 0.0);

        assert!(result.success);
        assert_eq!(result.duplicate_events, 1);
        assert_eq!(result.duplicate_event_ids, Some(vec!["e0001".to_string()]));
        assert_eq!(result.out_of_order_events, 0);
    }

    #[test]
    fn test_reordering_fails() {
        let injected = dataset(3);
        let retrieved = vec![injected[0].clone(), injected[2].clone(), injected[1].clone()];

        let result = reconcile(&injected, &retrieved, KEYS, 100.0);

        assert!(!result.success);
        assert_eq!(result.out_of_order_event_ids, Some(vec!["e0001".to_string()]));
        assert_eq!(result.issues, vec!["1 events out of order".to_string()]);
    }

    #[test]
    fn test_unknown_retrieved_ids_do_not_affect_order() {
        let injected = dataset(2);
        let retrieved = vec![injected[0].clone(), record("stranger", -5), injected[1].clone()];

        let result = reconcile(&injected, &retrieved, KEYS, 0.0);
        assert!(result.success);
        assert_eq!(result.out_of_order_events, 0);
    }

    #[test]
    fn test_iso_timestamps_compared_chronologically() {
        let mk = |id: &str, ts: &str| {
            let mut r = Record::new();
            r.insert("event_id".into(), json!(id));
            r.insert("timestamp".into(), json!(ts));
            r
        };
        let injected = vec![
            mk("a", "2024-01-01T00:00:09.000000"),
            mk("b", "2024-01-01T00:00:10.000000"),
        ];
        let retrieved = vec![injected[1].clone(), injected[0].clone()];

        let result = reconcile(&injected, &retrieved, KEYS, 0.0);
        assert_eq!(result.out_of_order_event_ids, Some(vec!["a".to_string()]));
    }

    #[test]
    fn test_empty_snapshots_fail_explicitly() {
        let data = dataset(5);

        let no_injected = reconcile(&[], &data, KEYS, 0.0);
        assert!(!no_injected.success);
        assert_eq!(no_injected.error.as_deref(), Some("No injected data to validate against"));

        let no_retrieved = reconcile(&data, &[], KEYS, 0.0);
        assert!(!no_retrieved.success);
        assert_eq!(no_retrieved.error.as_deref(), Some("No retrieved data to validate"));
        assert_eq!(no_retrieved.injected_count, 5);
        assert_eq!(no_retrieved.missing_events, 5);
        assert_eq!(no_retrieved.loss_percentage, 100.0);
        assert!(!no_retrieved.loss_within_expected);
        assert_eq!(no_retrieved.missing_event_ids.map(|ids| ids.len()), Some(5));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let injected = dataset(20);
        let mut retrieved = injected[2..].to_vec();
        retrieved.swap(3, 4);
        retrieved.push(injected[5].clone());

        assert_eq!(
            reconcile(&injected, &retrieved, KEYS, 10.0),
            reconcile(&injected, &retrieved, KEYS, 10.0)
        );
    }
}
