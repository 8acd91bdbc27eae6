//! Filegrid configuration management.
//!
//! All runtime options are enumerated here as serde structures with explicit
//! defaults, grouped per subsystem. Configuration is loaded from an optional
//! JSON/TOML file plus `FILEGRID_`-prefixed environment overrides, falling
//! back to defaults — the precedence the rest of the platform relies on.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::{StorageMode, StorageType};

/// Root configuration for a filegrid node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FilegridConfig {
    pub node: NodeConfig,
    pub upload: UploadConfig,
    pub selector: SelectorConfig,
    pub tokens: TokenConfig,
    pub rotation: RotationConfig,
    pub lockout: LockoutConfig,
    pub capacity: CapacityMonitorConfig,
    pub finalize: FinalizeConfig,
    pub gc: GcConfig,
    pub query: QueryConfig,
    pub health: HealthConfig,
    pub api: ApiConfig,
    /// Static storage element definitions; also the selector's last-resort
    /// fallback when both the registry and the admin directory are unusable.
    pub elements: Vec<ElementConfig>,
}

impl FilegridConfig {
    /// Load configuration from `path` (JSON or TOML, optional) merged with
    /// `FILEGRID_`-prefixed environment variables over the defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("FILEGRID").separator("__"))
            .build()
            .context("failed to assemble configuration sources")?;
        let cfg: FilegridConfig = settings
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload.max_file_size == 0 {
            anyhow::bail!("upload.max_file_size must be positive");
        }
        if self.selector.safety_margin < 1.0 {
            anyhow::bail!("selector.safety_margin must be >= 1.0");
        }
        if self.rotation.overlap_hours == 0 {
            anyhow::bail!("rotation.overlap_hours must be >= 1 to keep superseded keys valid");
        }
        for element in &self.elements {
            if element.element_id.is_empty() {
                anyhow::bail!("element_id cannot be empty");
            }
        }
        Ok(())
    }
}

/// Node identity and local data placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Human-readable node name, used in logs and the issuer claim.
    pub name: String,
    /// Root directory for node-local state (admin tables, key material).
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "filegrid-node".into(),
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Upload limits and default compression behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Hard ceiling on uploaded body size in bytes.
    pub max_file_size: u64,
    /// Compress uploads by default when the client does not say.
    pub compress: bool,
    pub compression_algorithm: CompressionAlgorithm,
    /// Lifetime granted to temporary files at upload time.
    pub temporary_ttl_hours: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 1024 * 1024 * 1024, // 1 GiB
            compress: false,
            compression_algorithm: CompressionAlgorithm::Gzip,
            temporary_ttl_hours: 72,
        }
    }
}

/// Supported upload compression codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    Gzip,
    Brotli,
}

impl CompressionAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionAlgorithm::Gzip => "gzip",
            CompressionAlgorithm::Brotli => "brotli",
        }
    }
}

/// Storage selector policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Required headroom multiplier: a candidate must have
    /// `available >= file_size * safety_margin`.
    pub safety_margin: f64,
    /// Candidates tried per upload before giving up.
    pub max_retries: u32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            safety_margin: 1.10,
            max_retries: 3,
        }
    }
}

/// Token issuance and validation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub issuer: String,
    /// Access token lifetime in seconds.
    pub access_ttl_secs: i64,
    /// Refresh token lifetime in seconds.
    pub refresh_ttl_secs: i64,
    /// Accepted clock skew when validating `exp`/`iat`.
    pub clock_skew_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: "filegrid-admin".into(),
            access_ttl_secs: 30 * 60,
            refresh_ttl_secs: 7 * 24 * 3600,
            clock_skew_secs: 30,
        }
    }
}

/// Signing key rotation schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub interval_hours: u64,
    /// Superseded keys keep validating tokens for at least this long.
    pub overlap_hours: u64,
    /// TTL of the distributed rotation lock in seconds.
    pub lock_ttl_secs: u64,
    /// Generation attempts per scheduled run.
    pub max_retries: u32,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            interval_hours: 24,
            overlap_hours: 1,
            lock_ttl_secs: 60,
            max_retries: 3,
        }
    }
}

/// Admin-account lockout policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    /// Consecutive failures that trigger a lock.
    pub threshold: u32,
    /// Lock duration in minutes.
    pub duration_minutes: i64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            duration_minutes: 15,
        }
    }
}

/// Capacity monitor schedule and leader lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityMonitorConfig {
    /// Poll interval for elements under 70 % utilization, seconds.
    pub idle_interval_secs: u64,
    /// Poll interval for elements between 70 and 90 %, seconds.
    pub busy_interval_secs: u64,
    /// Poll interval for elements above 90 %, seconds.
    pub critical_interval_secs: u64,
    /// TTL of published capacity records, seconds.
    pub record_ttl_secs: u64,
    /// Leader lease TTL, seconds.
    pub leader_ttl_secs: u64,
    /// Leader heartbeat interval, seconds.
    pub heartbeat_secs: u64,
}

impl Default for CapacityMonitorConfig {
    fn default() -> Self {
        Self {
            idle_interval_secs: 60,
            busy_interval_secs: 15,
            critical_interval_secs: 5,
            record_ttl_secs: 120,
            leader_ttl_secs: 30,
            heartbeat_secs: 10,
        }
    }
}

/// Two-phase finalize tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizeConfig {
    /// Per-phase retry ceiling for transient failures.
    pub max_retries: u32,
    /// Base backoff in seconds, doubled per attempt (1 s, 2 s, 4 s).
    pub backoff_base_secs: u64,
    /// Transactions stuck in a non-terminal state longer than this are
    /// swept to `failed` and rolled back.
    pub timeout_seconds: i64,
    /// Safety margin before the source copy is physically deleted.
    pub cleanup_delay_hours: i64,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_secs: 1,
            timeout_seconds: 300,
            cleanup_delay_hours: 24,
        }
    }
}

/// Garbage collection schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Cleanup queue scan interval in hours.
    pub scan_interval_hours: u64,
    /// Delete retries per entry before giving up.
    pub max_retries: u32,
    /// Orphan sidecar scan interval in hours.
    pub orphan_scan_interval_hours: u64,
    /// Minimum sidecar age before it can be treated as an orphan, days.
    pub orphan_min_age_days: i64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            scan_interval_hours: 6,
            max_retries: 5,
            orphan_scan_interval_hours: 24,
            orphan_min_age_days: 7,
        }
    }
}

/// Query-side cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// In-process LRU capacity (entries).
    pub lru_capacity: usize,
    /// In-process LRU entry TTL, seconds.
    pub lru_ttl_secs: i64,
    /// Shared-registry metadata record TTL, seconds.
    pub registry_ttl_secs: u64,
    /// Download streaming chunk size in bytes.
    pub chunk_size: usize,
    /// Ceiling for subscriber reconnect backoff, seconds.
    pub reconnect_max_backoff_secs: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            lru_capacity: 1000,
            lru_ttl_secs: 300,
            registry_ttl_secs: 1800,
            chunk_size: 64 * 1024,
            reconnect_max_backoff_secs: 30,
        }
    }
}

/// Health aggregator refresh cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub refresh_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 5,
        }
    }
}

/// HTTP binding for the API gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

/// Static definition of a storage element hosted by this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementConfig {
    pub element_id: String,
    pub display_name: String,
    pub api_url: String,
    pub mode: StorageMode,
    pub storage_type: StorageType,
    /// Lower is preferred by the selector.
    pub priority: u32,
    pub capacity_bytes: u64,
    /// Filesystem root for the element's data files.
    pub root: PathBuf,
    /// Per-element upload ceiling; falls back to the global limit when None.
    pub max_file_size: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = FilegridConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.selector.safety_margin, 1.10);
        assert_eq!(cfg.tokens.access_ttl_secs, 1800);
        assert_eq!(cfg.rotation.interval_hours, 24);
        assert_eq!(cfg.gc.max_retries, 5);
        assert_eq!(cfg.lockout.threshold, 5);
    }

    #[test]
    fn rejects_zero_overlap() {
        let mut cfg = FilegridConfig::default();
        cfg.rotation.overlap_hours = 0;
        assert!(cfg.validate().is_err());
    }
}
