//! Core types shared across the failover tester.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single data record exchanged with the stream-processing application.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// One of the two datacenters taking part in a failover test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    Primary,
    Secondary,
}

impl Site {
    pub fn as_str(&self) -> &'static str {
        match self {
            Site::Primary => "primary",
            Site::Secondary => "secondary",
        }
    }
}

impl Default for Site {
    fn default() -> Self {
        Site::Primary
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire format used by the data-exchange endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Json,
    Csv,
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Json => "json",
            DataFormat::Csv => "csv",
        }
    }

    /// MIME type sent with injected payloads.
    pub fn content_type(&self) -> &'static str {
        match self {
            DataFormat::Json => "application/json",
            DataFormat::Csv => "application/csv",
        }
    }
}

impl Default for DataFormat {
    fn default() -> Self {
        DataFormat::Json
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of one datacenter as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Unknown,
    Up,
    Degraded,
    Down,
}

impl SiteStatus {
    pub fn is_up(&self) -> bool {
        matches!(self, SiteStatus::Up)
    }
}

impl Default for SiteStatus {
    fn default() -> Self {
        SiteStatus::Unknown
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SiteStatus::Unknown => "unknown",
            SiteStatus::Up => "up",
            SiteStatus::Degraded => "degraded",
            SiteStatus::Down => "down",
        };
        f.write_str(s)
    }
}
