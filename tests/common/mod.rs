//! Common test utilities for integration tests.

pub mod assertions;
pub mod fixtures;
pub mod mocks;

use failover_tester::config::TesterConfig;
use std::path::PathBuf;
use tempfile::TempDir;

// Re-export common types
pub use assertions::*;
pub use fixtures::*;
pub use mocks::*;

/// Test environment that manages temporary directories and cleanup.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub storage_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage_dir = temp_dir.path().join("data");
        let output_dir = temp_dir.path().join("results");

        std::fs::create_dir_all(&storage_dir).expect("Failed to create storage dir");
        std::fs::create_dir_all(&output_dir).expect("Failed to create output dir");

        Self {
            temp_dir,
            storage_dir,
            output_dir,
        }
    }

    /// Development configuration with data snapshots kept in the temp dir.
    pub fn config(&self) -> TesterConfig {
        let mut config = TesterConfig::development();
        config.data_handler.storage_dir = self.storage_dir.clone();
        config
    }

    /// Write a file under the temp dir and return its path.
    pub fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, content).expect("Failed to write test file");
        path
    }

    /// Snapshot files written by the data handler.
    pub fn snapshots(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.storage_dir)
            .expect("Failed to read storage dir")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
