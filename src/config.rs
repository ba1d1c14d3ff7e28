use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Environment variables
// ---------------------------------------------------------------------------

pub const ENV_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const ENV_BUCKET: &str = "AWS_BUCKET";
pub const ENV_REPO: &str = "GITHUB_REPO";
pub const ENV_TOKEN: &str = "GITHUB_TOKEN";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default, alias = "github")]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address for the HTTP listener (e.g. `0.0.0.0:8080`).
    #[serde(default = "default_http_listen")]
    pub http_listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_listen: default_http_listen(),
        }
    }
}

fn default_http_listen() -> String {
    "0.0.0.0:8080".to_string()
}

// ---------------------------------------------------------------------------
// Storage (S3)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Bucket holding the release packages.
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Key prefix scanned on every rebuild.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Custom endpoint for S3-compatible stores (MinIO, R2, ...).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    /// Public base URL that direct download links are built from.
    #[serde(default = "default_download_base_url")]
    pub download_base_url: String,
    /// Static credentials.  When either is missing the SDK default provider
    /// chain is used instead.
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            prefix: default_prefix(),
            endpoint_url: None,
            force_path_style: false,
            download_base_url: default_download_base_url(),
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_prefix() -> String {
    "packages/".to_string()
}

fn default_download_base_url() -> String {
    "http://files.vagrantup.com".to_string()
}

// ---------------------------------------------------------------------------
// Upstream tag source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Full URL to the API root (e.g. `https://api.github.com`).
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Repository in `owner/name` form whose tags are listed.
    #[serde(default)]
    pub repo: String,
    /// Access token sent as a bearer token.  Optional for public repos.
    #[serde(default)]
    pub token: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            repo: String::new(),
            token: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Refresh schedule
// ---------------------------------------------------------------------------

/// How rebuilds are triggered after the initial load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshMode {
    /// The first request after the interval has elapsed kicks off a
    /// background rebuild.
    #[default]
    OnRequest,
    /// A dedicated task rebuilds on a fixed tick.
    Interval,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Minimum seconds between rebuild attempts.
    #[serde(default = "default_refresh_interval")]
    pub interval_secs: u64,
    #[serde(default)]
    pub mode: RefreshMode,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_refresh_interval(),
            mode: RefreshMode::default(),
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_refresh_interval() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load a [`Config`] from an optional YAML file, apply the recognised
/// environment variables on top, and validate the result.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config)?;
    Ok(config)
}

/// Parse a YAML config file without applying overrides or validation.
pub fn read_config_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    Ok(config)
}

/// Overlay non-empty environment values onto `config`.
///
/// `lookup` is injected so tests do not have to mutate the process
/// environment.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get(ENV_ACCESS_KEY_ID) {
        config.storage.access_key_id = Some(v);
    }
    if let Some(v) = get(ENV_SECRET_ACCESS_KEY) {
        config.storage.secret_access_key = Some(v);
    }
    if let Some(v) = get(ENV_BUCKET) {
        config.storage.bucket = v;
    }
    if let Some(v) = get(ENV_REPO) {
        config.upstream.repo = v;
    }
    if let Some(v) = get(ENV_TOKEN) {
        config.upstream.token = Some(v);
    }
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        !config.storage.bucket.is_empty(),
        "storage bucket is not set (config `storage.bucket` or {ENV_BUCKET})"
    );
    anyhow::ensure!(
        !config.upstream.repo.is_empty(),
        "tag source repository is not set (config `upstream.repo` or {ENV_REPO})"
    );
    anyhow::ensure!(
        matches!(config.upstream.repo.split_once('/'), Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/')),
        "upstream repo must be of the form owner/name, got {:?}",
        config.upstream.repo
    );
    anyhow::ensure!(
        config.refresh.interval_secs > 0,
        "refresh interval_secs must be greater than zero"
    );
    anyhow::ensure!(
        config.storage.prefix.ends_with('/'),
        "storage prefix must end with '/'"
    );
    Ok(())
}
