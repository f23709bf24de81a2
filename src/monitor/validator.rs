//! Threshold validation of collected metrics.

use crate::config::ExpectedMetric;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::info;

/// Outcome for one expected metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCheck {
    pub success: bool,
    pub expected: ExpectedMetric,
    /// `None` when the metric was not found.
    pub actual: Option<Value>,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsValidation {
    pub success: bool,
    pub metrics_evaluated: usize,
    pub metrics_passed: usize,
    pub results: BTreeMap<String, MetricCheck>,
    pub issues: Vec<String>,
}

/// Find `name` in a possibly nested snapshot.
///
/// Tries the exact top-level key, then a dot-separated path, then every
/// top-level category one level down.
pub fn find_metric<'a>(metrics: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    let usable = |v: &&Value| !v.is_null();

    if let Some(value) = metrics.get(name).filter(usable) {
        return Some(value);
    }

    if name.contains('.') {
        let mut parts = name.split('.');
        let mut current = parts.next().and_then(|p| metrics.get(p));
        for part in parts {
            current = current.and_then(Value::as_object).and_then(|m| m.get(part));
        }
        if let Some(value) = current.filter(usable) {
            return Some(value);
        }
    }

    metrics
        .values()
        .filter_map(Value::as_object)
        .find_map(|category| category.get(name).filter(usable))
}

/// Validate every expected metric against `metrics`.
pub fn validate_metrics(
    metrics: &Map<String, Value>,
    expected: &BTreeMap<String, ExpectedMetric>,
) -> MetricsValidation {
    let mut validation = MetricsValidation {
        success: true,
        ..MetricsValidation::default()
    };

    for (name, condition) in expected {
        validation.metrics_evaluated += 1;
        let check = check_metric(metrics, name, condition);
        if check.success {
            validation.metrics_passed += 1;
        } else {
            validation.success = false;
            validation.issues.extend(check.issues.iter().cloned());
        }
        validation.results.insert(name.clone(), check);
    }

    info!(
        passed = validation.metrics_passed,
        evaluated = validation.metrics_evaluated,
        success = validation.success,
        "Metrics validation finished"
    );
    validation
}

fn check_metric(metrics: &Map<String, Value>, name: &str, expected: &ExpectedMetric) -> MetricCheck {
    let Some(actual) = find_metric(metrics, name) else {
        return MetricCheck {
            success: false,
            expected: expected.clone(),
            actual: None,
            issues: vec![format!("Metric '{}' not found in collected data", name)],
        };
    };

    let mut issues = Vec::new();
    match actual.as_f64() {
        Some(value) => {
            if let Some(min) = expected.min.filter(|min| value < *min) {
                issues.push(format!(
                    "Metric '{}' value {} is below minimum threshold {}",
                    name, value, min
                ));
            }
            if let Some(max) = expected.max.filter(|max| value > *max) {
                issues.push(format!(
                    "Metric '{}' value {} exceeds maximum threshold {}",
                    name, value, max
                ));
            }
        }
        None if expected.min.is_some() || expected.max.is_some() => {
            issues.push(format!("Metric '{}' value {} is not numeric", name, actual));
        }
        None => {}
    }
    if let Some(equals) = expected.equals.as_ref().filter(|equals| !values_equal(actual, equals)) {
        issues.push(format!(
            "Metric '{}' value {} does not equal expected value {}",
            name,
            display(actual),
            display(equals)
        ));
    }

    MetricCheck {
        success: issues.is_empty(),
        expected: expected.clone(),
        actual: Some(actual.clone()),
        issues,
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => actual == expected,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.as_f64().map(|f| f.to_string()).unwrap_or_else(|| n.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn expect(min: Option<f64>, max: Option<f64>, equals: Option<f64>) -> ExpectedMetric {
        ExpectedMetric {
            min,
            max,
            equals: equals.map(Value::from),
            description: None,
        }
    }

    #[test]
    fn test_lookup_order() {
        let metrics = snapshot(json!({
            "health_percentage": 100.0,
            "job": {"health_percentage": 75.0, "nTuplesProcessed": 10},
            "instance": {"jobs_count": 2}
        }));

        assert_eq!(find_metric(&metrics, "health_percentage"), Some(&json!(100.0)));
        assert_eq!(find_metric(&metrics, "job.health_percentage"), Some(&json!(75.0)));
        assert_eq!(find_metric(&metrics, "jobs_count"), Some(&json!(2)));
        assert_eq!(find_metric(&metrics, "job.missing"), None);
        assert_eq!(find_metric(&metrics, "missing"), None);
    }

    #[test]
    fn test_below_minimum_fails() {
        let metrics = snapshot(json!({"job": {"health_percentage": 75.0}}));
        let mut expected = BTreeMap::new();
        expected.insert("job.health_percentage".to_string(), expect(Some(90.0), None, None));

        let result = validate_metrics(&metrics, &expected);

        assert!(!result.success);
        assert_eq!(result.metrics_passed, 0);
        assert_eq!(
            result.issues,
            vec!["Metric 'job.health_percentage' value 75 is below minimum threshold 90".to_string()]
        );
    }

    #[test]
    fn test_metric_can_fail_several_conditions() {
        let metrics = snapshot(json!({"latency": 50}));
        let mut expected = BTreeMap::new();
        expected.insert("latency".to_string(), expect(Some(60.0), Some(40.0), Some(10.0)));

        let result = validate_metrics(&metrics, &expected);
        assert_eq!(result.results["latency"].issues.len(), 3);
        assert_eq!(result.issues.len(), 3);
    }

    #[test]
    fn test_missing_metric_is_a_failure() {
        let mut expected = BTreeMap::new();
        expected.insert("throughput".to_string(), expect(Some(1.0), None, None));
        expected.insert("up".to_string(), expect(None, None, Some(1.0)));

        let result = validate_metrics(&snapshot(json!({"up": 1})), &expected);

        assert!(!result.success);
        assert_eq!(result.metrics_evaluated, 2);
        assert_eq!(result.metrics_passed, 1);
        assert_eq!(result.issues, vec!["Metric 'throughput' not found in collected data".to_string()]);
        assert!(result.results["throughput"].actual.is_none());
    }

    #[test]
    fn test_equals_accepts_non_numeric_values() {
        let metrics = snapshot(json!({
            "job": {"health": "healthy", "state": "running", "nTuplesProcessed": 100}
        }));
        let equals = |value: Value| ExpectedMetric {
            equals: Some(value),
            ..ExpectedMetric::default()
        };
        let mut expected = BTreeMap::new();
        expected.insert("job.health".to_string(), equals(json!("healthy")));
        expected.insert("job.state".to_string(), equals(json!("stopped")));
        expected.insert("nTuplesProcessed".to_string(), equals(json!(100.0)));

        let result = validate_metrics(&metrics, &expected);

        assert!(result.results["job.health"].success);
        assert!(result.results["nTuplesProcessed"].success, "integers and floats compare numerically");
        assert_eq!(
            result.issues,
            vec!["Metric 'job.state' value running does not equal expected value stopped".to_string()]
        );
    }

    #[test]
    fn test_bounds_on_non_numeric_value_fail() {
        let metrics = snapshot(json!({"health": "healthy"}));
        let mut expected = BTreeMap::new();
        expected.insert("health".to_string(), expect(Some(1.0), None, None));

        let result = validate_metrics(&metrics, &expected);
        assert_eq!(result.issues, vec!["Metric 'health' value \"healthy\" is not numeric".to_string()]);
    }

    #[test]
    fn test_string_equals_loads_from_yaml() {
        let parsed: ExpectedMetric = serde_yaml::from_str("equals: \"healthy\"\ndescription: job health").unwrap();
        assert_eq!(parsed.equals, Some(json!("healthy")));

        let numeric: ExpectedMetric = serde_yaml::from_str("equals: 1").unwrap();
        assert_eq!(numeric.equals, Some(json!(1)));
    }
}
