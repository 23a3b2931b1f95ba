//! Job specification: what to back up and the per-job knobs.
//!
//! A `JobSpec` is a fully resolved, read-only description handed to the
//! pool by the submitting collaborator. Fields left unset fall back to the
//! pool-level `BexConfig` values; unknown keys in a job file are rejected
//! at parse time rather than silently ignored.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::BexConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("job name must not be empty")]
    EmptyName,
    #[error("job has no sources")]
    NoSources,
    #[error("destination must not be empty")]
    EmptyDestination,
    #[error("chunk_size must be greater than zero")]
    ZeroChunkSize,
}

/// Immutable description of one backup job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    /// Human-readable job name (used in logs and progress output).
    pub name: String,
    /// Source files or directories to back up.
    pub sources: Vec<PathBuf>,
    /// Destination directory; the source layout is recreated beneath it.
    pub destination: PathBuf,
    /// Substring patterns; matching source paths are skipped.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Compare source and destination SHA-256 after the copy.
    #[serde(default)]
    pub verify_checksums: bool,
    /// Skip files whose destination already matches in size and is not
    /// older than the source.
    #[serde(default)]
    pub incremental: bool,

    // Per-job overrides of the pool config.
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub min_free_space: Option<u64>,
    #[serde(default)]
    pub retry_attempts: Option<u32>,
    #[serde(default)]
    pub retry_delay_seconds: Option<u64>,
    #[serde(default)]
    pub execution_timeout_seconds: Option<u64>,
}

/// Effective per-execution settings: JobSpec overrides applied on top of
/// the pool config.
#[derive(Debug, Clone, Copy)]
pub struct JobSettings {
    pub chunk_size: usize,
    pub min_free_space: u64,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, sources: Vec<PathBuf>, destination: PathBuf) -> Self {
        Self {
            name: name.into(),
            sources,
            destination,
            exclude: Vec::new(),
            verify_checksums: false,
            incremental: false,
            chunk_size: None,
            min_free_space: None,
            retry_attempts: None,
            retry_delay_seconds: None,
            execution_timeout_seconds: None,
        }
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.trim().is_empty() {
            return Err(SpecError::EmptyName);
        }
        if self.sources.is_empty() {
            return Err(SpecError::NoSources);
        }
        if self.destination.as_os_str().is_empty() {
            return Err(SpecError::EmptyDestination);
        }
        if self.chunk_size == Some(0) {
            return Err(SpecError::ZeroChunkSize);
        }
        Ok(())
    }

    /// Resolve the effective settings against the pool config.
    pub fn settings(&self, cfg: &BexConfig) -> JobSettings {
        JobSettings {
            chunk_size: self.chunk_size.unwrap_or(cfg.chunk_size),
            min_free_space: self.min_free_space.unwrap_or(cfg.min_free_space),
            retry_attempts: self.retry_attempts.unwrap_or(cfg.retry_attempts),
            retry_delay: Duration::from_secs(
                self.retry_delay_seconds.unwrap_or(cfg.retry_delay_seconds),
            ),
            timeout: Duration::from_secs(
                self.execution_timeout_seconds
                    .unwrap_or(cfg.execution_timeout_seconds),
            ),
        }
    }
}

/// Load and validate a job spec from a TOML file.
pub fn load_spec(path: &std::path::Path) -> anyhow::Result<JobSpec> {
    use anyhow::Context;

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read job file {}", path.display()))?;
    let spec: JobSpec = toml::from_str(&text)
        .with_context(|| format!("failed to parse job file {}", path.display()))?;
    spec.validate()
        .with_context(|| format!("invalid job file {}", path.display()))?;
    Ok(spec)
}
