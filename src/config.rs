//! Process configuration
//!
//! Settings load from an optional TOML file, then environment variables
//! override individual fields, then the result is validated. Field names in
//! the file mirror the structs below:
//!
//! ```toml
//! source_bucket = "photos"
//! target_bucket = "photos-backup"
//! delete_rule = "DELETE_IF_SOURCE_DELETED"
//! interval_secs = 60
//!
//! [retry]
//! max_attempts = 8
//!
//! [store]
//! type = "s3"
//!
//! [store.s3]
//! region = "eu-west-1"
//! ```

use crate::error::ConfigError;
use crate::observability::LogConfig;
use crate::sync::{
    DeletionPolicy, OverlapPolicy, ReconcilerConfig, RetryPolicy, SchedulerConfig, SyncPair,
    DEFAULT_CONCURRENCY,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_SOURCE_BUCKET: &str = "omnisync-source";
pub const DEFAULT_TARGET_BUCKET: &str = "omnisync-target";
pub const DEFAULT_INTERVAL_SECS: u64 = 30;

/// Which [`ObjectStore`](crate::store::ObjectStore) backend to build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    Memory,
    #[default]
    LocalFs,
    S3,
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreType::Memory => write!(f, "memory"),
            StoreType::LocalFs => write!(f, "localfs"),
            StoreType::S3 => write!(f, "s3"),
        }
    }
}

impl FromStr for StoreType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreType::Memory),
            "localfs" => Ok(StoreType::LocalFs),
            "s3" => Ok(StoreType::S3),
            other => Err(format!(
                "Unknown store type: {}. Use 'memory', 'localfs', or 's3'",
                other
            )),
        }
    }
}

/// S3 connection settings; credentials come from the standard AWS variables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub region: String,
    /// Custom endpoint for MinIO, LocalStack and friends
    pub endpoint: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        S3Config {
            region: "us-east-1".to_string(),
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(rename = "type")]
    pub store_type: StoreType,
    /// Base directory for `localfs`; each bucket is a subdirectory
    pub data_path: PathBuf,
    pub s3: S3Config,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            store_type: StoreType::default(),
            data_path: PathBuf::from("./data"),
            s3: S3Config::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub source_bucket: String,
    pub target_bucket: String,
    pub delete_rule: DeletionPolicy,
    pub interval_secs: u64,
    pub bidirectional: bool,
    pub concurrency: usize,
    pub overlap: OverlapPolicy,
    pub run_timeout_secs: Option<u64>,
    pub retry: RetryPolicy,
    pub store: StoreConfig,
    pub log: LogConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            source_bucket: DEFAULT_SOURCE_BUCKET.to_string(),
            target_bucket: DEFAULT_TARGET_BUCKET.to_string(),
            delete_rule: DeletionPolicy::default(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            bidirectional: false,
            concurrency: DEFAULT_CONCURRENCY,
            overlap: OverlapPolicy::default(),
            run_timeout_secs: None,
            retry: RetryPolicy::default(),
            store: StoreConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl SyncConfig {
    /// File (if any), then process environment, then validation
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml_str(&std::fs::read_to_string(path)?)?,
            None => SyncConfig::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    /// Override fields from `lookup`, keyed by environment variable name
    pub fn apply_vars(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("SOURCE_BUCKET") {
            self.source_bucket = v;
        }
        if let Some(v) = lookup("TARGET_BUCKET") {
            self.target_bucket = v;
        }
        if let Some(v) = lookup("DELETE_RULE") {
            self.delete_rule = v.parse().map_err(ConfigError::Invalid)?;
        }
        if let Some(v) = lookup("JOB_RUN_INTERVAL_SECONDS") {
            self.interval_secs = parse_var("JOB_RUN_INTERVAL_SECONDS", &v)?;
        }
        if let Some(v) = lookup("SYNC_BIDIRECTIONAL") {
            self.bidirectional = parse_bool("SYNC_BIDIRECTIONAL", &v)?;
        }
        if let Some(v) = lookup("SYNC_CONCURRENCY") {
            self.concurrency = parse_var("SYNC_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("SYNC_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_var("SYNC_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("SYNC_BASE_DELAY_MS") {
            self.retry.base_delay = Duration::from_millis(parse_var("SYNC_BASE_DELAY_MS", &v)?);
        }
        if let Some(v) = lookup("SYNC_MAX_DELAY_MS") {
            self.retry.max_delay = Duration::from_millis(parse_var("SYNC_MAX_DELAY_MS", &v)?);
        }
        if let Some(v) = lookup("SYNC_CALL_TIMEOUT_MS") {
            self.retry.call_timeout =
                Duration::from_millis(parse_var("SYNC_CALL_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("SYNC_RUN_TIMEOUT_SECS") {
            self.run_timeout_secs = Some(parse_var("SYNC_RUN_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("SYNC_OVERLAP") {
            self.overlap = v.parse().map_err(ConfigError::Invalid)?;
        }
        if let Some(v) = lookup("SYNC_STORE_TYPE") {
            self.store.store_type = v.parse().map_err(ConfigError::Invalid)?;
        }
        if let Some(v) = lookup("SYNC_DATA_PATH") {
            self.store.data_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("AWS_REGION") {
            self.store.s3.region = v;
        }
        if let Some(v) = lookup("SYNC_S3_ENDPOINT") {
            self.store.s3.endpoint = Some(v);
        }
        self.log.apply_vars(&lookup);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_bucket.trim().is_empty() {
            return Err(ConfigError::Invalid("source bucket is empty".into()));
        }
        if self.target_bucket.trim().is_empty() {
            return Err(ConfigError::Invalid("target bucket is empty".into()));
        }
        if self.source_bucket == self.target_bucket {
            return Err(ConfigError::Invalid(format!(
                "source and target are the same bucket ({})",
                self.source_bucket
            )));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid("interval must be at least 1 second".into()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            concurrency: self.concurrency,
            retry: self.retry,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            pair: SyncPair::new(&self.source_bucket, &self.target_bucket),
            policy: self.delete_rule,
            interval: Duration::from_secs(self.interval_secs),
            overlap: self.overlap,
            bidirectional: self.bidirectional,
            run_timeout: self.run_timeout_secs.map(Duration::from_secs),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} has an invalid value: {:?}", name, value)))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid(format!(
            "{} has an invalid value: {:?}",
            name, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::LogFormat;
    use std::collections::HashMap;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.source_bucket, "omnisync-source");
        assert_eq!(config.target_bucket, "omnisync-target");
        assert_eq!(config.delete_rule, DeletionPolicy::KeepAll);
        assert_eq!(config.interval_secs, 30);
        assert_eq!(config.concurrency, 16);
        assert_eq!(config.store.store_type, StoreType::LocalFs);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SyncConfig::default();
        config
            .apply_vars(vars(&[
                ("SOURCE_BUCKET", "photos"),
                ("TARGET_BUCKET", "backup"),
                ("DELETE_RULE", "delete_if_source_deleted"),
                ("JOB_RUN_INTERVAL_SECONDS", "5"),
                ("SYNC_BIDIRECTIONAL", "true"),
                ("SYNC_MAX_ATTEMPTS", "3"),
                ("SYNC_BASE_DELAY_MS", "50"),
                ("SYNC_RUN_TIMEOUT_SECS", "120"),
                ("SYNC_OVERLAP", "queue"),
                ("SYNC_STORE_TYPE", "memory"),
                ("SYNC_S3_ENDPOINT", "http://localhost:9000"),
                ("SYNC_LOG_FORMAT", "json"),
            ]))
            .unwrap();

        assert_eq!(config.source_bucket, "photos");
        assert_eq!(config.delete_rule, DeletionPolicy::DeleteIfSourceDeleted);
        assert!(config.bidirectional);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(50));
        assert_eq!(config.store.store_type, StoreType::Memory);
        assert_eq!(config.store.s3.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.log.format, LogFormat::Json);

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.interval, Duration::from_secs(5));
        assert_eq!(scheduler.run_timeout, Some(Duration::from_secs(120)));
        assert_eq!(scheduler.overlap, OverlapPolicy::Queue);
        assert_eq!(scheduler.pair, SyncPair::new("photos", "backup"));
    }

    #[test]
    fn test_invalid_env_values() {
        let mut config = SyncConfig::default();
        assert!(config.apply_vars(vars(&[("DELETE_RULE", "SOMETIMES")])).is_err());
        assert!(config.apply_vars(vars(&[("SYNC_CONCURRENCY", "many")])).is_err());
        assert!(config.apply_vars(vars(&[("SYNC_BIDIRECTIONAL", "maybe")])).is_err());
    }

    #[test]
    fn test_validation() {
        let same = SyncConfig {
            target_bucket: DEFAULT_SOURCE_BUCKET.to_string(),
            ..SyncConfig::default()
        };
        assert!(same.validate().is_err());

        let empty = SyncConfig {
            source_bucket: " ".to_string(),
            ..SyncConfig::default()
        };
        assert!(empty.validate().is_err());

        let zero_interval = SyncConfig {
            interval_secs: 0,
            ..SyncConfig::default()
        };
        assert!(zero_interval.validate().is_err());

        let zero_workers = SyncConfig {
            concurrency: 0,
            ..SyncConfig::default()
        };
        assert!(zero_workers.validate().is_err());

        let mut no_attempts = SyncConfig::default();
        no_attempts.retry.max_attempts = 0;
        assert!(no_attempts.validate().is_err());
    }

    #[test]
    fn test_toml_file() {
        let toml = r#"
            source_bucket = "a"
            target_bucket = "b"
            delete_rule = "DELETE_IF_SOURCE_DELETED"
            concurrency = 8

            [retry]
            max_attempts = 7
            call_timeout_ms = 1500

            [store]
            type = "memory"

            [store.s3]
            region = "eu-west-1"
        "#;
        let config = SyncConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.delete_rule, DeletionPolicy::DeleteIfSourceDeleted);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.call_timeout, Duration::from_millis(1500));
        assert_eq!(config.retry.base_delay, RetryPolicy::default().base_delay);
        assert_eq!(config.store.store_type, StoreType::Memory);
        assert_eq!(config.store.s3.region, "eu-west-1");
        assert_eq!(config.interval_secs, DEFAULT_INTERVAL_SECS);
    }

    #[test]
    fn test_load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "source_bucket = \"from-file\"").unwrap();
        writeln!(file, "target_bucket = \"other\"").unwrap();
        let config = SyncConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.target_bucket, "other");
    }

    #[test]
    fn test_dotenv_file_feeds_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# local overrides").unwrap();
        writeln!(file, "SOURCE_BUCKET=dev-source").unwrap();
        writeln!(file, "DELETE_RULE=\"DELETE_IF_SOURCE_DELETED\"").unwrap();
        let entries: HashMap<String, String> = dotenvy::from_path_iter(file.path())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        let mut config = SyncConfig::default();
        config.apply_vars(|name| entries.get(name).cloned()).unwrap();
        assert_eq!(config.source_bucket, "dev-source");
        assert_eq!(config.delete_rule, DeletionPolicy::DeleteIfSourceDeleted);
        assert_eq!(config.target_bucket, DEFAULT_TARGET_BUCKET);
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            SyncConfig::from_toml_str("interval_secs = \"soon\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_store_type_parse() {
        assert_eq!("LocalFs".parse::<StoreType>().unwrap(), StoreType::LocalFs);
        assert_eq!(StoreType::S3.to_string(), "s3");
        assert!("gcs".parse::<StoreType>().is_err());
    }
}
