use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use glam::Vec3;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

pub const WORKER_THREADS_ENV_VAR: &str = "KESTREL_WORKER_THREADS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("config rejects simulation step rate of zero")]
    ZeroStepRate,
    #[error("config field {field} must be positive and finite, got {value}")]
    NonPositive { field: &'static str, value: f64 },
}

/// Engine tunables. Defaults match the shipped runtime; a JSON file can
/// override any subset of fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Fixed simulation steps per second.
    pub steps_per_second: u32,
    /// Wall-delta clamp for the catch-up burst after a stall.
    pub max_frame_delta_seconds: f64,
    pub metrics_log_interval_seconds: f64,
    pub gravity: [f32; 3],
    /// Asset loader worker threads; 0 means one per available core.
    pub loader_threads: usize,
    /// Resident-bytes budget handed to cache trims.
    pub cache_resident_budget_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            steps_per_second: 90,
            max_frame_delta_seconds: 0.25,
            metrics_log_interval_seconds: 1.0,
            gravity: [0.0, -9.81, 0.0],
            loader_threads: 0,
            cache_resident_budget_bytes: 256 * 1024 * 1024,
        }
    }
}

impl EngineConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.steps_per_second == 0 {
            return Err(ConfigError::ZeroStepRate);
        }
        for (field, value) in [
            ("max_frame_delta_seconds", self.max_frame_delta_seconds),
            (
                "metrics_log_interval_seconds",
                self.metrics_log_interval_seconds,
            ),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::NonPositive { field, value });
            }
        }
        Ok(())
    }

    pub fn fixed_step_seconds(&self) -> f64 {
        1.0 / f64::from(self.steps_per_second.max(1))
    }

    pub fn metrics_log_interval(&self) -> Duration {
        Duration::from_secs_f64(self.metrics_log_interval_seconds)
    }

    pub fn gravity_vec(&self) -> Vec3 {
        Vec3::from_array(self.gravity)
    }

    /// Worker count after the env override and the zero-means-auto rule.
    pub fn resolve_loader_threads(&self) -> usize {
        let configured = match env::var(WORKER_THREADS_ENV_VAR) {
            Ok(value) => match value.parse::<usize>() {
                Ok(count) => count,
                Err(_) => {
                    warn!(
                        env_var = WORKER_THREADS_ENV_VAR,
                        value = value.as_str(),
                        "invalid worker-thread env var value; falling back to config"
                    );
                    self.loader_threads
                }
            },
            Err(env::VarError::NotPresent) => self.loader_threads,
            Err(err) => {
                warn!(
                    env_var = WORKER_THREADS_ENV_VAR,
                    error = %err,
                    "unable to read worker-thread env var; falling back to config"
                );
                self.loader_threads
            }
        };
        if configured == 0 {
            std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(1)
        } else {
            configured
        }
    }
}
