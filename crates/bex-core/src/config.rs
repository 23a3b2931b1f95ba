use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

fn default_chunk_size() -> usize {
    8192
}

fn default_min_free_space() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_max_concurrent_jobs() -> usize {
    3
}

fn default_execution_timeout_seconds() -> u64 {
    3600
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_seconds() -> u64 {
    5
}

/// Global configuration loaded from `~/.config/bex/config.toml`.
///
/// Unknown keys are rejected at parse time so a typo in the config file
/// fails loudly instead of being silently ignored. Per-job overrides live
/// on `JobSpec`; these are the pool-level defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BexConfig {
    /// Transfer chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Minimum free space (bytes) the destination volume must retain after
    /// the job's expected total size is accounted for.
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,
    /// Maximum number of executions running at once.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Wall-clock timeout per execution, measured from first admission.
    #[serde(default = "default_execution_timeout_seconds")]
    pub execution_timeout_seconds: u64,
    /// Maximum number of retries after the first attempt.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Fixed delay between retries, in seconds.
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
}

impl Default for BexConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            min_free_space: default_min_free_space(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            execution_timeout_seconds: default_execution_timeout_seconds(),
            retry_attempts: default_retry_attempts(),
            retry_delay_seconds: default_retry_delay_seconds(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("bex")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<BexConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = BexConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: BexConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = BexConfig::default();
        assert_eq!(cfg.chunk_size, 8192);
        assert_eq!(cfg.min_free_space, 1024 * 1024 * 1024);
        assert_eq!(cfg.max_concurrent_jobs, 3);
        assert_eq!(cfg.execution_timeout_seconds, 3600);
        assert_eq!(cfg.retry_attempts, 3);
        assert_eq!(cfg.retry_delay_seconds, 5);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = BexConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: BexConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.chunk_size, cfg.chunk_size);
        assert_eq!(parsed.max_concurrent_jobs, cfg.max_concurrent_jobs);
        assert_eq!(parsed.retry_attempts, cfg.retry_attempts);
    }

    #[test]
    fn config_toml_partial_uses_defaults() {
        let toml = r#"
            max_concurrent_jobs = 1
            retry_delay_seconds = 0
        "#;
        let cfg: BexConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_concurrent_jobs, 1);
        assert_eq!(cfg.retry_delay_seconds, 0);
        assert_eq!(cfg.chunk_size, 8192);
        assert_eq!(cfg.retry_attempts, 3);
    }

    #[test]
    fn config_toml_unknown_key_rejected() {
        let toml = r#"
            max_concurrent_jobs = 2
            max_concurent_jobs = 4
        "#;
        assert!(toml::from_str::<BexConfig>(toml).is_err());
    }
}
