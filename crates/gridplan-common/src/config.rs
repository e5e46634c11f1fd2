//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "TOML configuration for the planning tools."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_max_clustering_attempts() -> usize {
    100
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Configuration for the gridplan tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// A [`PlannerConfig`] together with the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedPlannerConfig {
    pub config: PlannerConfig,
    pub source: Option<PathBuf>,
}

impl PlannerConfig {
    pub const ENV_CONFIG_PATH: &str = "GRIDPLAN_CONFIG";

    /// Load the first existing candidate, respecting the `GRIDPLAN_CONFIG`
    /// override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Like [`PlannerConfig::load`] but falls back to the defaults when no
    /// candidate exists. An explicit `GRIDPLAN_CONFIG` must still resolve.
    pub fn load_or_default<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedPlannerConfig> {
        if std::env::var_os(Self::ENV_CONFIG_PATH).is_some()
            || candidates.iter().any(|c| c.as_ref().exists())
        {
            return Self::load_with_source(candidates);
        }
        debug!("no configuration file found, using defaults");
        Ok(LoadedPlannerConfig {
            config: Self::default(),
            source: None,
        })
    }

    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedPlannerConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedPlannerConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedPlannerConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<Self>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        self.optimizer.validate()?;
        self.api.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for PlannerConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: PlannerConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Filter used when neither `GRIDPLAN_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            level: default_log_level(),
        }
    }
}

/// Where the node, link and summary tables and the exported reports live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub nodes_file: Option<PathBuf>,
    #[serde(default)]
    pub links_file: Option<PathBuf>,
    #[serde(default)]
    pub summary_file: Option<PathBuf>,
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            nodes_file: None,
            links_file: None,
            summary_file: None,
            report_dir: default_report_dir(),
        }
    }
}

impl StorageConfig {
    pub fn nodes_path(&self) -> PathBuf {
        self.resolve(&self.nodes_file, "nodes.csv")
    }

    pub fn links_path(&self) -> PathBuf {
        self.resolve(&self.links_file, "links.csv")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.resolve(&self.summary_file, "summary.csv")
    }

    /// Explicit files are taken as given, relative ones against `data_dir`.
    fn resolve(&self, file: &Option<PathBuf>, default_name: &str) -> PathBuf {
        match file {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.data_dir.join(path),
            None => self.data_dir.join(default_name),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(anyhow!("storage.data_dir must not be empty"));
        }
        let paths = [self.nodes_path(), self.links_path(), self.summary_path()];
        for (i, a) in paths.iter().enumerate() {
            if paths[i + 1..].contains(a) {
                return Err(anyhow!(
                    "storage tables must use distinct files, {} is used twice",
                    a.display()
                ));
            }
        }
        Ok(())
    }
}

/// Defaults applied to requests that leave these settings out.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default)]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub default_time_limit: Option<Duration>,
    #[serde(default = "default_max_clustering_attempts")]
    pub max_clustering_attempts: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            default_time_limit: None,
            max_clustering_attempts: default_max_clustering_attempts(),
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_clustering_attempts == 0 {
            return Err(anyhow!("optimizer.max_clustering_attempts must be positive"));
        }
        if self.default_time_limit.is_some_and(|limit| limit.is_zero()) {
            return Err(anyhow!("optimizer.default_time_limit must be positive"));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_api_listen(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl ApiConfig {
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(anyhow!("api.request_timeout must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: PlannerConfig = "".parse().unwrap();
        assert_eq!(config.storage.nodes_path(), PathBuf::from("data/nodes.csv"));
        assert_eq!(config.optimizer.max_clustering_attempts, 100);
        assert_eq!(config.api.request_timeout, Duration::from_secs(60));
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn sections_are_parsed() {
        let config: PlannerConfig = r#"
            [logging]
            format = "structured-json"
            level = "debug"

            [storage]
            data_dir = "/srv/gridplan"
            summary_file = "results.csv"

            [optimizer]
            default_time_limit = 30
            max_clustering_attempts = 20

            [api]
            listen = "0.0.0.0:9000"
            request_timeout = 5
        "#
        .parse()
        .unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.storage.summary_path(),
            PathBuf::from("/srv/gridplan/results.csv")
        );
        assert_eq!(
            config.optimizer.default_time_limit,
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.api.listen.port(), 9000);
    }

    #[test]
    fn rejects_zero_attempts() {
        let result: Result<PlannerConfig> = "[optimizer]\nmax_clustering_attempts = 0".parse();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_shared_table_files() {
        let result: Result<PlannerConfig> =
            "[storage]\nnodes_file = \"t.csv\"\nlinks_file = \"t.csv\"".parse();
        assert!(result.is_err());
    }
}
