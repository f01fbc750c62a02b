//! Configuration types for data-packager

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

const MIB: u64 = 1024 * 1024;

/// Main configuration for [`PackagingService`](crate::PackagingService)
///
/// Every section has defaults, so `Config::default()` is a working single-process setup
/// with an in-memory status cache and no mail transport.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Admission budgets, bundle limits and wait timing
    #[serde(default)]
    pub packaging: PackagingConfig,

    /// Where the reference archiver writes bundles and how they are addressed
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Status cache retention
    #[serde(default)]
    pub status_store: StatusStoreConfig,

    /// Completion email settings
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// REST API settings
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Check cross-field constraints
    ///
    /// Called by [`PackagingService::new`](crate::PackagingService::new); a config that
    /// fails here never starts a service.
    pub fn validate(&self) -> Result<()> {
        let p = &self.packaging;
        if p.max_jobs == 0 {
            return Err(config_error(
                "max_jobs must be at least 1",
                "packaging.max_jobs",
            ));
        }
        if p.max_large_jobs == 0 || p.max_large_jobs > p.max_jobs {
            return Err(config_error(
                format!(
                    "max_large_jobs must be between 1 and max_jobs ({}), got {}",
                    p.max_jobs, p.max_large_jobs
                ),
                "packaging.max_large_jobs",
            ));
        }
        if p.default_max_bundle_bytes == 0 {
            return Err(config_error(
                "default_max_bundle_bytes must be greater than 0",
                "packaging.default_max_bundle_bytes",
            ));
        }
        if self.status_store.max_entries == 0 {
            return Err(config_error(
                "max_entries must be at least 1",
                "status_store.max_entries",
            ));
        }
        url::Url::parse(&self.archive.public_base_url).map_err(|e| {
            config_error(
                format!("invalid public_base_url: {e}"),
                "archive.public_base_url",
            )
        })?;
        if let Some(webhook) = &self.notifications.mail_webhook {
            url::Url::parse(&webhook.url).map_err(|e| {
                config_error(
                    format!("invalid mail webhook url: {e}"),
                    "notifications.mail_webhook.url",
                )
            })?;
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>, key: &str) -> Error {
    Error::Config {
        message: message.into(),
        key: Some(key.to_string()),
    }
}

/// Admission and bundling configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackagingConfig {
    /// Global concurrency budget (default: 5)
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,

    /// Concurrency budget for large jobs, at most `max_jobs` (default: 3)
    #[serde(default = "default_max_large_jobs")]
    pub max_large_jobs: usize,

    /// Estimated size above which a job is large (default: 750 MiB)
    #[serde(default = "default_large_package_bytes")]
    pub large_package_bytes: u64,

    /// Wait-queue length above which the queue counts as long (default: 30)
    #[serde(default = "default_warning_queue_size")]
    pub warning_queue_size: usize,

    /// Bundle size limit when the request does not override it (default: 1 GiB)
    #[serde(default = "default_max_bundle_bytes")]
    pub default_max_bundle_bytes: u64,

    /// Size assumed for remote (URL) files that report 0 bytes (default: 2 MiB)
    #[serde(default = "default_url_file_bytes")]
    pub default_url_file_bytes: u64,

    /// How long `submit` waits for a terminal state before backgrounding (default: 3000 ms)
    #[serde(default = "default_immediate_wait", with = "duration_millis_serde")]
    pub immediate_wait: Duration,

    /// How long shutdown waits for running jobs (default: 30 s)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Packaging time after which the stuck-job monitor logs a warning (default: 1 h)
    #[serde(default = "default_stuck_job_warning", with = "duration_serde")]
    pub stuck_job_warning: Duration,
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            max_jobs: default_max_jobs(),
            max_large_jobs: default_max_large_jobs(),
            large_package_bytes: default_large_package_bytes(),
            warning_queue_size: default_warning_queue_size(),
            default_max_bundle_bytes: default_max_bundle_bytes(),
            default_url_file_bytes: default_url_file_bytes(),
            immediate_wait: default_immediate_wait(),
            shutdown_timeout: default_shutdown_timeout(),
            stuck_job_warning: default_stuck_job_warning(),
        }
    }
}

/// Reference archiver configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Directory bundles are written to (default: "./staging")
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// URL under which `staging_dir` is served (default: "http://127.0.0.1:8642/staging/")
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Time allowed to download one remote (URL) file (default: 300 s)
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub fetch_timeout: Duration,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            public_base_url: default_public_base_url(),
            fetch_timeout: default_fetch_timeout(),
        }
    }
}

/// Status cache retention
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusStoreConfig {
    /// Time a snapshot lives after its last write (default: 7 days)
    #[serde(default = "default_status_ttl", with = "duration_serde")]
    pub ttl: Duration,

    /// Maximum snapshots held by the in-memory cache (default: 10000)
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for StatusStoreConfig {
    fn default() -> Self {
        Self {
            ttl: default_status_ttl(),
            max_entries: default_max_entries(),
        }
    }
}

/// Completion email configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// HTTP mail relay; `None` disables email
    #[serde(default)]
    pub mail_webhook: Option<MailWebhookConfig>,

    /// Sender address (default: "noreply@localhost")
    #[serde(default = "default_from_address")]
    pub from_address: String,

    /// Prefix for every subject line (default: "[Data Packager]")
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,

    /// Contact line appended to failure emails
    #[serde(default)]
    pub support_contact: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            mail_webhook: None,
            from_address: default_from_address(),
            subject_prefix: default_subject_prefix(),
            support_contact: None,
        }
    }
}

/// HTTP mail relay endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MailWebhookConfig {
    /// URL that receives a JSON POST per email
    pub url: String,

    /// Request timeout (default: 10 s)
    #[serde(default = "default_mail_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Value for the `Authorization` header, if the relay wants one
    #[serde(default)]
    pub auth_header: Option<String>,
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:8642)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

fn default_max_jobs() -> usize {
    5
}

fn default_max_large_jobs() -> usize {
    3
}

fn default_large_package_bytes() -> u64 {
    750 * MIB
}

fn default_warning_queue_size() -> usize {
    30
}

fn default_max_bundle_bytes() -> u64 {
    1024 * MIB
}

fn default_url_file_bytes() -> u64 {
    2 * MIB
}

fn default_immediate_wait() -> Duration {
    Duration::from_millis(3000)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_stuck_job_warning() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./staging")
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:8642/staging/".to_string()
}

fn default_status_ttl() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_max_entries() -> usize {
    10_000
}

fn default_from_address() -> String {
    "noreply@localhost".to_string()
}

fn default_subject_prefix() -> String {
    "[Data Packager]".to_string()
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_mail_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8642))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
