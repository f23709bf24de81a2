//! Data ingress and egress through job ports.

use super::{ApiRequest, ControlPlane};
use crate::config::DataExchangeConfig;
use crate::error::{FailoverError, Result};
use crate::types::{DataFormat, Record, Site};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Polling interval for asynchronous injection operations.
const OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A job port on one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortTarget {
    pub instance_id: String,
    pub job_id: String,
    pub port: String,
}

impl PortTarget {
    pub fn new(
        instance_id: impl Into<String>,
        job_id: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            job_id: job_id.into(),
            port: port.into(),
        }
    }

    fn job_path(&self) -> String {
        format!("instances/{}/jobs/{}", self.instance_id, self.job_id)
    }
}

/// Outcome of an injection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionSummary {
    /// Records accepted by the remote side.
    pub count: usize,
    /// Requests sent.
    pub batches: usize,
}

impl InjectionSummary {
    pub fn merge(&mut self, other: InjectionSummary) {
        self.count += other.count;
        self.batches += other.batches;
    }
}

/// Moves records in and out of a running job.
#[async_trait::async_trait]
pub trait DataExchange: Send + Sync {
    async fn inject(
        &self,
        target: &PortTarget,
        records: &[Record],
        site: Site,
        format: DataFormat,
    ) -> Result<InjectionSummary>;

    async fn retrieve(
        &self,
        target: &PortTarget,
        site: Site,
        format: DataFormat,
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<Record>>;
}

/// [`DataExchange`] over the control-plane port endpoints of both sites.
pub struct DataExchangeClient {
    primary: Arc<dyn ControlPlane>,
    secondary: Arc<dyn ControlPlane>,
    config: DataExchangeConfig,
}

impl DataExchangeClient {
    pub fn new(
        primary: Arc<dyn ControlPlane>,
        secondary: Arc<dyn ControlPlane>,
        config: DataExchangeConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            config,
        }
    }

    fn client(&self, site: Site) -> &Arc<dyn ControlPlane> {
        match site {
            Site::Primary => &self.primary,
            Site::Secondary => &self.secondary,
        }
    }

    async fn inject_batch(
        &self,
        client: &dyn ControlPlane,
        target: &PortTarget,
        batch: &[Record],
        format: DataFormat,
    ) -> Result<usize> {
        let path = format!("{}/ports/input/{}", target.job_path(), target.port);
        let request = match format {
            DataFormat::Json => ApiRequest::new(Method::POST, path).json(json!({ "tuples": batch })),
            DataFormat::Csv => {
                ApiRequest::new(Method::POST, path).text(format.content_type(), to_csv(batch))
            }
        }
        .timeout(self.config.endpoint_timeout());

        let response = client.send(request).await?;

        if let Some(operation_id) = response.get("id").and_then(id_string) {
            let completed = self
                .wait_for_operation(client, target, &operation_id, self.config.endpoint_timeout())
                .await?;
            if !completed {
                return Err(FailoverError::DataExchange(format!(
                    "Injection operation {} did not complete",
                    operation_id
                )));
            }
        }

        Ok(response
            .get("count")
            .and_then(Value::as_u64)
            .map(|c| c as usize)
            .unwrap_or(batch.len()))
    }

    async fn wait_for_operation(
        &self,
        client: &dyn ControlPlane,
        target: &PortTarget,
        operation_id: &str,
        timeout: Duration,
    ) -> Result<bool> {
        let path = format!("{}/operations/{}", target.job_path(), operation_id);
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            let response = client.send(ApiRequest::get(path.as_str())).await?;
            let status = response
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_ascii_lowercase();

            match status.as_str() {
                "completed" => return Ok(true),
                "failed" => {
                    warn!(operation_id = %operation_id, "Injection operation failed");
                    return Ok(false);
                }
                _ => debug!(operation_id = %operation_id, status = %status, "Waiting for operation"),
            }
            sleep(OPERATION_POLL_INTERVAL).await;
        }

        warn!(operation_id = %operation_id, "Timeout waiting for operation");
        Ok(false)
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait::async_trait]
impl DataExchange for DataExchangeClient {
    async fn inject(
        &self,
        target: &PortTarget,
        records: &[Record],
        site: Site,
        format: DataFormat,
    ) -> Result<InjectionSummary> {
        let client = self.client(site).as_ref();
        let batch_size = self.config.max_batch_size.max(1);
        let mut summary = InjectionSummary::default();

        for batch in records.chunks(batch_size) {
            let count = self.inject_batch(client, target, batch, format).await?;
            summary.merge(InjectionSummary { count, batches: 1 });
        }

        info!(
            site = %site,
            port = %target.port,
            count = summary.count,
            batches = summary.batches,
            "Injected records"
        );
        Ok(summary)
    }

    async fn retrieve(
        &self,
        target: &PortTarget,
        site: Site,
        format: DataFormat,
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<Record>> {
        let request = ApiRequest::get(format!(
            "{}/ports/output/{}",
            target.job_path(),
            target.port
        ))
        .query("maxTuples", max_records)
        .query("format", format.as_str())
        .timeout(timeout);

        let mut response = self.client(site).send(request).await?;

        let records = match format {
            DataFormat::Json => match response.get_mut("tuples").map(Value::take) {
                Some(Value::Array(items)) => items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Object(record) => Some(record),
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            },
            DataFormat::Csv => match response.get("raw_response").and_then(Value::as_str) {
                Some(text) => parse_csv(text),
                None => Vec::new(),
            },
        };

        info!(site = %site, port = %target.port, count = records.len(), "Retrieved records");
        Ok(records)
    }
}

// ============================================================================
// CSV
// ============================================================================

/// Render records as CSV with a header taken from the first record.
pub fn to_csv(records: &[Record]) -> String {
    let Some(first) = records.first() else {
        return String::new();
    };
    let header: Vec<&String> = first.keys().collect();

    let mut out = header
        .iter()
        .map(|h| escape_csv(h))
        .collect::<Vec<_>>()
        .join(",");
    out.push('\n');

    for record in records {
        let row: Vec<String> = header
            .iter()
            .map(|key| match record.get(key.as_str()) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => escape_csv(s),
                Some(other) => escape_csv(&other.to_string()),
            })
            .collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

fn escape_csv(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Parse CSV with a header row. Integer and float cells become numbers.
pub fn parse_csv(text: &str) -> Vec<Record> {
    let mut rows = split_csv_rows(text).into_iter();
    let Some(header) = rows.next() else {
        return Vec::new();
    };

    rows.filter(|row| !(row.len() == 1 && row[0].is_empty()))
        .map(|row| {
            header
                .iter()
                .zip(row.into_iter().chain(std::iter::repeat(String::new())))
                .map(|(key, cell)| (key.clone(), coerce_cell(cell)))
                .collect()
        })
        .collect()
}

fn coerce_cell(cell: String) -> Value {
    if let Ok(i) = cell.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = cell.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    Value::String(cell)
}

fn split_csv_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', true) => quoted = false,
            ('"', false) if field.is_empty() => quoted = true,
            (',', false) => row.push(std::mem::take(&mut field)),
            ('\r', false) => {}
            ('\n', false) => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            (c, _) => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        requests: Mutex<Vec<ApiRequest>>,
        response: Value,
    }

    #[async_trait::async_trait]
    impl ControlPlane for Recording {
        async fn send(&self, request: ApiRequest) -> Result<Value> {
            self.requests.lock().push(request);
            Ok(self.response.clone())
        }
    }

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| {
                let mut r = Record::new();
                r.insert("event_id".into(), json!(format!("evt-{}", i)));
                r.insert("value".into(), json!(i));
                r
            })
            .collect()
    }

    fn client(primary: Arc<Recording>, max_batch_size: usize) -> DataExchangeClient {
        DataExchangeClient::new(
            primary,
            Arc::new(Recording::default()),
            DataExchangeConfig {
                max_batch_size,
                ..DataExchangeConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_inject_splits_batches() {
        let primary = Arc::new(Recording::default());
        let exchange = client(primary.clone(), 4);
        let target = PortTarget::new("i1", "j1", "input");

        let summary = exchange
            .inject(&target, &records(10), Site::Primary, DataFormat::Json)
            .await
            .unwrap();

        assert_eq!(summary, InjectionSummary { count: 10, batches: 3 });
        let requests = primary.requests.lock();
        assert_eq!(requests[0].path, "instances/i1/jobs/j1/ports/input/input");
        assert_eq!(requests[0].method, Method::POST);
    }

    #[tokio::test]
    async fn test_inject_uses_reported_count() {
        let primary = Arc::new(Recording {
            response: json!({"count": 2}),
            ..Recording::default()
        });
        let exchange = client(primary, 100);
        let summary = exchange
            .inject(&PortTarget::new("i", "j", "in"), &records(5), Site::Primary, DataFormat::Csv)
            .await
            .unwrap();
        assert_eq!(summary.count, 2);
    }

    #[test]
    fn test_csv_round_trip_coerces_numbers() {
        let mut record = Record::new();
        record.insert("name".into(), json!("a, \"quoted\" value"));
        record.insert("count".into(), json!(3));
        record.insert("ratio".into(), json!(1.5));

        let text = to_csv(&[record]);
        assert!(text.starts_with("count,name,ratio\n"));

        let parsed = parse_csv(&text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["count"], json!(3));
        assert_eq!(parsed[0]["ratio"], json!(1.5));
        assert_eq!(parsed[0]["name"], json!("a, \"quoted\" value"));
    }

    #[test]
    fn test_parse_csv_empty() {
        assert!(parse_csv("").is_empty());
        assert!(parse_csv("a,b\n").is_empty());
    }
}
