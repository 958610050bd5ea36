use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally reachable base URL, used when building presigned links
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    #[serde(default = "default_jwt_secret")]
    pub secret: String,
    #[serde(default)]
    pub previous_secrets: Vec<String>,
}

/// Which `BlobStore` implementation backs physical objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    Memory,
}

impl StorageBackend {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Some(StorageBackend::Local),
            "memory" => Some(StorageBackend::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_local_path")]
    pub local_path: String,
    #[serde(default = "default_presign_secret")]
    pub presign_secret: String,
    #[serde(default = "default_presign_ttl")]
    pub presign_ttl_seconds: u64,
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_quota_bytes")]
    pub default_quota_bytes: i64,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1309
}

fn default_public_url() -> String {
    "http://localhost:1309".to_string()
}

fn default_db_path() -> String {
    "data/blobvault.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    5000
}

fn default_jwt_secret() -> String {
    "your-super-secret-key-change-it".to_string()
}

fn default_backend() -> StorageBackend {
    StorageBackend::Local
}

fn default_local_path() -> String {
    "data/blobs".to_string()
}

fn default_presign_secret() -> String {
    "your-presign-secret-change-it".to_string()
}

fn default_presign_ttl() -> u64 {
    15 * 60
}

fn default_max_upload() -> u64 {
    100 * 1024 * 1024 // 100 MB
}

fn default_quota_bytes() -> i64 {
    10 * 1024 * 1024 * 1024 // 10 GB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: default_jwt_secret(),
            previous_secrets: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            local_path: default_local_path(),
            presign_secret: default_presign_secret(),
            presign_ttl_seconds: default_presign_ttl(),
            max_upload_bytes: default_max_upload(),
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_quota_bytes: default_quota_bytes(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.ensure_directories()?;
        config.jwt.secret =
            Self::ensure_secret(&config.jwt.secret, &default_jwt_secret(), "data/.jwt_secret")?;
        config.storage.presign_secret = Self::ensure_secret(
            &config.storage.presign_secret,
            &default_presign_secret(),
            "data/.presign_secret",
        )?;
        tracing::info!(
            "Storage config: backend={:?}, local_path={}, max_upload_bytes={}",
            config.storage.backend,
            config.storage.local_path,
            config.storage.max_upload_bytes
        );
        Ok(config)
    }

    /// Replace a placeholder secret with one persisted under `data/`
    fn ensure_secret(current: &str, placeholder: &str, path: &str) -> anyhow::Result<String> {
        if current != placeholder && !current.is_empty() {
            return Ok(current.to_string());
        }

        let secret_path = Path::new(path);
        if secret_path.exists() {
            let secret = fs::read_to_string(secret_path)?;
            tracing::info!("Loaded persisted secret from {}", path);
            return Ok(secret.trim().to_string());
        }

        let secret = format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple());
        if let Some(parent) = secret_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(secret_path, &secret)?;
        tracing::info!("Generated and persisted new secret to {}", path);
        Ok(secret)
    }

    /// Load configuration from config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["config.toml", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: BV_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        // Server overrides
        if let Ok(val) = env::var("BV_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = env::var("BV_CONF_SERVER_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = env::var("BV_CONF_SERVER_PUBLIC_URL") {
            self.server.public_url = val.trim_end_matches('/').to_string();
        }

        // Database overrides
        if let Ok(val) = env::var("BV_CONF_DATABASE_PATH") {
            self.database.path = val;
        }
        if let Ok(val) = env::var("BV_CONF_DATABASE_MAX_CONNECTIONS") {
            if let Ok(n) = val.parse() {
                self.database.max_connections = n;
            }
        }

        // JWT overrides
        if let Ok(val) = env::var("BV_CONF_JWT_SECRET") {
            self.jwt.secret = val;
        }
        if let Ok(val) = env::var("BV_CONF_JWT_PREVIOUS_SECRETS") {
            self.jwt.previous_secrets = val
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect();
        }

        // Storage overrides
        if let Ok(val) = env::var("BV_CONF_STORAGE_BACKEND") {
            match StorageBackend::from_str(&val) {
                Some(backend) => self.storage.backend = backend,
                None => tracing::warn!("Ignoring unknown storage backend {:?}", val),
            }
        }
        if let Ok(val) = env::var("BV_CONF_STORAGE_LOCAL_PATH") {
            self.storage.local_path = val;
        }
        if let Ok(val) = env::var("BV_CONF_STORAGE_PRESIGN_SECRET") {
            self.storage.presign_secret = val;
        }
        if let Ok(val) = env::var("BV_CONF_STORAGE_PRESIGN_TTL") {
            if let Ok(secs) = val.parse() {
                self.storage.presign_ttl_seconds = secs;
            }
        }
        if let Ok(val) = env::var("BV_CONF_STORAGE_MAX_UPLOAD") {
            if let Ok(bytes) = val.parse() {
                self.storage.max_upload_bytes = bytes;
            }
        }

        // Quota overrides
        if let Ok(val) = env::var("BV_CONF_QUOTA_DEFAULT_BYTES") {
            if let Ok(bytes) = val.parse() {
                self.quota.default_quota_bytes = bytes;
            }
        }
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }

        if self.storage.backend == StorageBackend::Local {
            fs::create_dir_all(&self.storage.local_path)?;
        }

        Ok(())
    }
}
