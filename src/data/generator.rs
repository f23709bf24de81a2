//! Synthetic dataset generation.

use crate::client::parse_csv;
use crate::config::{FieldType, GeneratorType, PreFailoverData};
use crate::error::{FailoverError, Result};
use crate::types::Record;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Identifier of the `index`-th record of a run.
pub fn event_id(test_id: &str, index: usize) -> String {
    format!("evt-{}-{:08}", test_id, index)
}

/// Whether `field` carries the record identifier.
fn is_id_field(field: &str, id_field: &str) -> bool {
    field == id_field || field.eq_ignore_ascii_case("event_id") || field.eq_ignore_ascii_case("id")
}

/// Produce the dataset described by `spec`.
///
/// Relative input files resolve against `storage_dir`.
pub fn generate(spec: &PreFailoverData, test_id: &str, storage_dir: &Path) -> Result<Vec<Record>> {
    let schema = spec.effective_schema();
    match spec.generator_type {
        GeneratorType::Deterministic => Ok(deterministic(
            spec.event_count,
            &schema,
            test_id,
            &spec.id_field,
            Utc::now(),
        )),
        GeneratorType::Random => Ok(random(
            spec.event_count,
            &schema,
            test_id,
            &spec.id_field,
            &mut rand::thread_rng(),
        )),
        GeneratorType::File => {
            let input = spec.input_file.as_deref().ok_or_else(|| {
                FailoverError::DataGeneration("Input file not specified for file generator".to_string())
            })?;
            load_file(&resolve_input(input, storage_dir))
        }
    }
}

/// Predictable values derived from the record index.
pub fn deterministic(
    count: usize,
    schema: &[(String, FieldType)],
    test_id: &str,
    id_field: &str,
    now: DateTime<Utc>,
) -> Vec<Record> {
    let base_time = now - ChronoDuration::minutes(count as i64);

    (0..count)
        .map(|i| {
            let mut record = Record::new();
            for (field, field_type) in schema {
                let value = match field_type {
                    FieldType::String if is_id_field(field, id_field) => json!(event_id(test_id, i)),
                    FieldType::String => json!(format!("val-{}-{}", field, i)),
                    FieldType::Number => json!(i as f64 * 1.5),
                    FieldType::Integer => json!(i),
                    FieldType::Boolean => json!(i % 2 == 0),
                    FieldType::Timestamp => {
                        let at = base_time + ChronoDuration::seconds(i as i64);
                        json!(at.naive_utc().format(TIMESTAMP_FORMAT).to_string())
                    }
                    FieldType::Object => json!({
                        "id": i,
                        "name": format!("obj-{}", i),
                        "value": i as f64 * 2.5,
                    }),
                    FieldType::Array => {
                        json!((0..(i + 1).min(5)).map(|j| format!("item-{}", j)).collect::<Vec<_>>())
                    }
                    FieldType::Unknown => continue,
                };
                record.insert(field.clone(), value);
            }
            record
        })
        .collect()
}

/// Random values; identifiers stay deterministic.
pub fn random<R: Rng>(
    count: usize,
    schema: &[(String, FieldType)],
    test_id: &str,
    id_field: &str,
    rng: &mut R,
) -> Vec<Record> {
    let now = Utc::now();
    let week = 7 * 24 * 3600;

    (0..count)
        .map(|i| {
            let mut record = Record::new();
            for (field, field_type) in schema {
                let value = match field_type {
                    FieldType::String if is_id_field(field, id_field) => json!(event_id(test_id, i)),
                    FieldType::String => {
                        let len = rng.gen_range(5..=20);
                        json!(random_string(rng, len))
                    }
                    FieldType::Number => json!(rng.gen_range(0.0..1000.0)),
                    FieldType::Integer => json!(rng.gen_range(0..=1000)),
                    FieldType::Boolean => json!(rng.gen_bool(0.5)),
                    FieldType::Timestamp => {
                        let at = now - ChronoDuration::seconds(week) + ChronoDuration::seconds(rng.gen_range(0..=week));
                        json!(at.naive_utc().format(TIMESTAMP_FORMAT).to_string())
                    }
                    FieldType::Object => json!({
                        "id": rng.gen_range(0..=1000),
                        "name": random_string(rng, 8),
                        "value": rng.gen_range(0.0..100.0),
                    }),
                    FieldType::Array => {
                        let len = rng.gen_range(0..=5);
                        json!((0..len).map(|_| random_string(rng, 5)).collect::<Vec<_>>())
                    }
                    FieldType::Unknown => continue,
                };
                record.insert(field.clone(), value);
            }
            record
        })
        .collect()
}

fn random_string<R: Rng>(rng: &mut R, len: usize) -> String {
    rng.sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

fn resolve_input(input: &Path, storage_dir: &Path) -> PathBuf {
    if input.is_absolute() {
        input.to_path_buf()
    } else {
        storage_dir.join(input)
    }
}

/// Load records from a `.json` or `.csv` file.
///
/// JSON may be a list, an object with a `tuples` list, or a single object.
pub fn load_file(path: &Path) -> Result<Vec<Record>> {
    if !path.exists() {
        return Err(FailoverError::DataGeneration(format!(
            "Input file not found: {}",
            path.display()
        )));
    }
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let content = std::fs::read_to_string(path)?;

    match extension.as_str() {
        "json" => {
            let data: Value = serde_json::from_str(&content).map_err(|e| {
                FailoverError::DataGeneration(format!("Failed to load data from file: {}", e))
            })?;
            records_from_json(data, path)
        }
        "csv" => Ok(parse_csv(&content)),
        other => Err(FailoverError::DataGeneration(format!(
            "Unsupported file format: .{}",
            other
        ))),
    }
}

fn records_from_json(data: Value, path: &Path) -> Result<Vec<Record>> {
    let unsupported = || {
        FailoverError::DataGeneration(format!("Unsupported JSON format in {}", path.display()))
    };

    let items = match data {
        Value::Object(mut object) => match object.remove("tuples") {
            Some(Value::Array(items)) => items,
            Some(_) => return Err(unsupported()),
            None => vec![Value::Object(object)],
        },
        Value::Array(items) => items,
        _ => return Err(unsupported()),
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(record) => Ok(record),
            _ => Err(unsupported()),
        })
        .collect()
}
