//! Job subsystem configuration.
//!
//! Values are layered: built-in defaults, then an optional
//! `config/domain-jobs.{toml,yaml,json}` file, then `DOMAIN_JOBS__*`
//! environment variables (for example `DOMAIN_JOBS__MAX_QUEUED_JOBS=8`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{JobError, JobResult};

const ENV_PREFIX: &str = "DOMAIN_JOBS";
const DEFAULT_CONFIG_FILE: &str = "config/domain-jobs";

/// Limits and storage location for domain jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Maximum callers queued per domain. Zero means unlimited.
    #[serde(default = "default_max_queued_jobs")]
    pub max_queued_jobs: u32,

    /// How long a caller may wait for a job, in milliseconds.
    #[serde(default = "default_job_wait_time_ms")]
    pub job_wait_time_ms: u64,

    /// Directory for persisted status documents. In-memory when unset.
    #[serde(default)]
    pub status_dir: Option<PathBuf>,
}

fn default_max_queued_jobs() -> u32 {
    0
}

fn default_job_wait_time_ms() -> u64 {
    30_000
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_queued_jobs: default_max_queued_jobs(),
            job_wait_time_ms: default_job_wait_time_ms(),
            status_dir: None,
        }
    }
}

impl JobsConfig {
    /// Load configuration from the default file and environment.
    pub fn load() -> JobResult<Self> {
        Self::load_from(None)
    }

    /// Load configuration, reading `path` instead of the default file.
    pub fn load_from(path: Option<&Path>) -> JobResult<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config = config::Config::builder()
            .set_default("max_queued_jobs", i64::from(default_max_queued_jobs()))?
            .set_default("job_wait_time_ms", 30_000_i64)?
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let jobs: JobsConfig = config.try_deserialize()?;
        jobs.validate()?;
        Ok(jobs)
    }

    pub fn validate(&self) -> JobResult<()> {
        if self.job_wait_time_ms == 0 {
            return Err(JobError::config(
                "job_wait_time_ms must be greater than zero. \
                 Set DOMAIN_JOBS__JOB_WAIT_TIME_MS to a positive number of milliseconds",
            ));
        }
        if let Some(dir) = &self.status_dir {
            if dir.as_os_str().is_empty() {
                return Err(JobError::config(
                    "status_dir is empty. Unset DOMAIN_JOBS__STATUS_DIR or point it at a directory",
                ));
            }
        }
        Ok(())
    }

    pub fn wait_budget(&self) -> Duration {
        Duration::from_millis(self.job_wait_time_ms)
    }
}
