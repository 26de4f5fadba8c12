use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the photo storage service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Upload retry configuration
    pub upload: UploadConfig,
    /// Signed URL and metrics cache configuration
    pub cache: CacheConfig,
    /// Stale object cleanup configuration
    pub cleanup: CleanupConfig,
    /// API configuration
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for photo storage
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Retry policy for storage puts
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum attempts per logical upload
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry; subsequent delays double
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

/// Signed URL cache and metrics ledger configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Default presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
    /// Safety margin subtracted from the signature lifetime to form the
    /// local cache TTL
    #[serde(default = "default_url_cache_margin_secs")]
    pub url_cache_margin_secs: u64,
    /// Upload metrics retention window in hours
    #[serde(default = "default_metrics_retention_hours")]
    pub metrics_retention_hours: u64,
}

/// Stale object cleanup configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Run the periodic background sweep
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Delete objects whose last-modified is older than this many days
    #[serde(default = "default_cleanup_retention_days")]
    pub retention_days: u32,
    /// Hours between background sweeps
    #[serde(default = "default_cleanup_interval_hours")]
    pub interval_hours: u64,
    /// Concurrent deletes per sweep
    #[serde(default = "default_cleanup_concurrency")]
    pub concurrency: usize,
}

/// API configuration for the upload and signed URL endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum accepted upload body in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "photo-storage-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_presigned_url_expiry_secs() -> u64 {
    3600
}

fn default_url_cache_margin_secs() -> u64 {
    60
}

fn default_metrics_retention_hours() -> u64 {
    24
}

fn default_cleanup_retention_days() -> u32 {
    30
}

fn default_cleanup_interval_hours() -> u64 {
    24
}

fn default_cleanup_concurrency() -> usize {
    8
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024 // 25MB
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "photo-storage-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/photo-storage").required(false))
            .add_source(config::File::with_name("/etc/storefront/photo-storage").required(false))
            // Override with environment variables
            // PHOTOS__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("PHOTOS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get default presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.cache.presigned_url_expiry_secs)
    }

    /// Get cleanup sweep interval as Duration
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup.interval_hours * 3600)
    }
}

impl UploadConfig {
    /// Get initial retry backoff as Duration
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

impl CacheConfig {
    /// Get URL cache safety margin as Duration
    pub fn url_cache_margin(&self) -> Duration {
        Duration::from_secs(self.url_cache_margin_secs)
    }

    /// Get metrics retention window as Duration
    pub fn metrics_retention(&self) -> Duration {
        Duration::from_secs(self.metrics_retention_hours * 3600)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            presigned_url_expiry_secs: default_presigned_url_expiry_secs(),
            url_cache_margin_secs: default_url_cache_margin_secs(),
            metrics_retention_hours: default_metrics_retention_hours(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            retention_days: default_cleanup_retention_days(),
            interval_hours: default_cleanup_interval_hours(),
            concurrency: default_cleanup_concurrency(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_max_attempts(), 3);
        assert_eq!(default_presigned_url_expiry_secs(), 3600);
        assert_eq!(default_url_cache_margin_secs(), 60);
        assert_eq!(default_cleanup_retention_days(), 30);
        assert_eq!(default_metrics_retention_hours(), 24);
    }

    #[test]
    fn test_duration_helpers() {
        let cache = CacheConfig::default();
        assert_eq!(cache.url_cache_margin(), Duration::from_secs(60));
        assert_eq!(cache.metrics_retention(), Duration::from_secs(24 * 3600));

        let upload = UploadConfig::default();
        assert_eq!(upload.initial_backoff(), Duration::from_millis(500));
    }
}
