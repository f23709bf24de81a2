//! Report rendering for finished runs.

use crate::error::{FailoverError, Result};
use crate::orchestrator::TestResult;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

/// Report formats selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Junit,
    Html,
}

pub struct ReportGenerator {
    output_dir: PathBuf,
}

impl ReportGenerator {
    /// Create a generator, creating `output_dir` if needed.
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir).map_err(|e| {
            FailoverError::Report(format!(
                "Failed to create output directory {}: {}",
                output_dir.display(),
                e
            ))
        })?;
        Ok(Self { output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn generate(&self, format: ReportFormat, result: &TestResult) -> Result<PathBuf> {
        match format {
            ReportFormat::Json => self.generate_json(result),
            ReportFormat::Junit => self.generate_junit(result),
            ReportFormat::Html => self.generate_html(result),
        }
    }

    pub fn generate_json(&self, result: &TestResult) -> Result<PathBuf> {
        let report = json!({
            "test_id": result.test_id,
            "description": result.description,
            "success": result.success,
            "start_time": result.start_time,
            "end_time": result.end_time,
            "duration_seconds": result.duration_seconds(),
            "phases_completed": result.phases_completed,
            "rto_seconds": result.rto_seconds,
            "rpo_events": result.rpo_events,
            "metrics": result.metrics,
            "issues": result.issues,
            "validation": result.validation,
        });
        let path = self.output_dir.join(format!("{}_report.json", result.test_id));
        self.write(&path, &serde_json::to_string_pretty(&report)?)?;
        info!(path = %path.display(), "JSON report saved");
        Ok(path)
    }

    pub fn generate_junit(&self, result: &TestResult) -> Result<PathBuf> {
        let path = self.output_dir.join(format!("{}_junit.xml", result.test_id));
        self.write(&path, &render_junit(result))?;
        info!(path = %path.display(), "JUnit report saved");
        Ok(path)
    }

    pub fn generate_html(&self, result: &TestResult) -> Result<PathBuf> {
        let path = self.output_dir.join(format!("{}_report.html", result.test_id));
        self.write(&path, &render_html(result))?;
        info!(path = %path.display(), "HTML report saved");
        Ok(path)
    }

    fn write(&self, path: &Path, content: &str) -> Result<()> {
        std::fs::write(path, content)
            .map_err(|e| FailoverError::Report(format!("Failed to write {}: {}", path.display(), e)))
    }
}

/// Escape text for XML and HTML bodies and attributes.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

pub fn render_junit(result: &TestResult) -> String {
    let failures = usize::from(!result.success);
    let elapsed = result.duration_seconds();
    let name = escape(&result.test_id);

    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    let _ = writeln!(xml, "<testsuites failures=\"{}\" tests=\"1\" time=\"{:.3}\">", failures, elapsed);
    let _ = writeln!(
        xml,
        "  <testsuite name=\"Cross-DC Failover Tests\" tests=\"1\" failures=\"{}\" errors=\"0\" time=\"{:.3}\" timestamp=\"{}\">",
        failures,
        elapsed,
        result.start_time.format("%Y-%m-%dT%H:%M:%S")
    );
    let _ = write!(
        xml,
        "    <testcase name=\"{}\" classname=\"cross_dc_failover\" time=\"{:.3}\"",
        name, elapsed
    );
    if result.success {
        xml.push_str("/>\n");
    } else {
        xml.push_str(">\n");
        let _ = writeln!(
            xml,
            "      <failure type=\"failure\" message=\"Test failed\">{}</failure>",
            escape(&result.issues.join("\n"))
        );
        xml.push_str("    </testcase>\n");
    }
    xml.push_str("  </testsuite>\n</testsuites>\n");
    xml
}

fn or_na<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string())
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn render_html(result: &TestResult) -> String {
    let id = escape(&result.test_id);
    let (class, verdict) = if result.success {
        ("success", "PASSED")
    } else {
        ("failure", "FAILED")
    };
    let phases = result
        .phases_completed
        .iter()
        .map(|p| p.name())
        .collect::<Vec<_>>()
        .join(", ");

    let mut html = String::new();
    let _ = writeln!(html, "<!DOCTYPE html>\n<html>\n<head>");
    let _ = writeln!(html, "<title>Failover Test Report: {}</title>", id);
    html.push_str(
        "<style>\n\
         body { font-family: Arial, sans-serif; margin: 20px; }\n\
         h1 { color: #333; }\n\
         .success { color: green; }\n\
         .failure { color: red; }\n\
         table { border-collapse: collapse; margin: 10px 0; }\n\
         th, td { padding: 8px; text-align: left; border: 1px solid #ccc; }\n\
         th { background-color: #f2f2f2; }\n\
         </style>\n</head>\n<body>\n",
    );
    let _ = writeln!(html, "<h1>Failover Test Report: {}</h1>", id);
    if !result.description.is_empty() {
        let _ = writeln!(html, "<p>{}</p>", escape(&result.description));
    }
    let _ = writeln!(html, "<h2>Overall Result: <span class=\"{}\">{}</span></h2>", class, verdict);

    html.push_str("<h2>Summary</h2>\n<table>\n");
    let rows = [
        ("Start Time", result.start_time.format("%Y-%m-%d %H:%M:%S").to_string()),
        ("End Time", result.end_time.format("%Y-%m-%d %H:%M:%S").to_string()),
        ("Duration", format!("{:.2} seconds", result.duration_seconds())),
        (
            "RTO (Recovery Time)",
            format!("{} seconds", or_na(result.rto_seconds.map(|s| format!("{:.2}", s)))),
        ),
        ("RPO (Data Loss)", format!("{} events", or_na(result.rpo_events))),
        ("Phases Completed", phases),
    ];
    for (label, value) in rows {
        let _ = writeln!(html, "<tr><td>{}</td><td>{}</td></tr>", label, escape(&value));
    }
    html.push_str("</table>\n");

    html.push_str("<h2>Metrics</h2>\n<table>\n<tr><th>Metric</th><th>Value</th></tr>\n");
    for (name, value) in &result.metrics {
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{}</td></tr>",
            escape(name),
            escape(&display_value(value))
        );
    }
    html.push_str("</table>\n");

    html.push_str("<h2>Issues</h2>\n");
    if result.issues.is_empty() {
        html.push_str("<p>No issues reported.</p>\n");
    } else {
        html.push_str("<ul>\n");
        for issue in &result.issues {
            let _ = writeln!(html, "<li>{}</li>", escape(issue));
        }
        html.push_str("</ul>\n");
    }
    html.push_str("</body>\n</html>\n");
    html
}
