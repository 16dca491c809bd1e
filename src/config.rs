//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub query: QueryConfig,
    pub export: ExportConfig,
    pub storage: StorageConfig,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Environment (development, production)
    pub environment: String,
    /// Prefix for partner routes
    pub route_prefix: String,
    pub request_timeout_secs: u64,
    /// Take the caller IP from the first `x-forwarded-for` entry
    pub trust_proxy_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            environment: "development".to_string(),
            route_prefix: "/api/v1".to_string(),
            request_timeout_secs: 30,
            trust_proxy_headers: false,
        }
    }
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 5,
        }
    }
}

// The URL carries credentials
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"***MASKED***")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Accepted clock skew for `x-timestamp`
    pub timestamp_tolerance_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { timestamp_tolerance_secs: 300 }
    }
}

/// One sliding window: at most `max_requests` per `window_secs`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl WindowConfig {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self { max_requests, window_secs }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub global: WindowConfig,
    pub export: WindowConfig,
    pub webhook: WindowConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global: WindowConfig::new(100, 60),
            export: WindowConfig::new(10, 3600),
            webhook: WindowConfig::new(1000, 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub default_page_size: i64,
    pub max_page_size: i64,
    pub max_range_days: i64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 100,
            max_range_days: 90,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Jobs a partner may create per UTC day
    pub daily_limit: i64,
    pub poll_interval_secs: u64,
    pub batch_size: i64,
    /// A `processing` job older than this is failed by maintenance
    pub stale_after_secs: i64,
    /// Scratch directory; the system temp dir when unset
    pub temp_dir: Option<PathBuf>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            daily_limit: 20,
            poll_interval_secs: 10,
            batch_size: 1000,
            stale_after_secs: 900,
            temp_dir: None,
        }
    }
}

#[derive(Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub bucket: String,
    /// Base of issued download URLs
    pub public_url: String,
    pub signed_url_secret: String,
    pub signed_url_ttl_secs: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./storage"),
            bucket: "pos-exports".to_string(),
            public_url: "http://localhost:3000".to_string(),
            signed_url_secret: String::new(),
            signed_url_ttl_secs: 900,
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("root", &self.root)
            .field("bucket", &self.bucket)
            .field("public_url", &self.public_url)
            .field("signed_url_secret", &"***MASKED***")
            .field("signed_url_ttl_secs", &self.signed_url_ttl_secs)
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct WebhookConfig {
    /// Verifies `x-razorpay-signature` when set
    pub razorpay_secret: Option<String>,
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("razorpay_secret", &self.razorpay_secret.as_ref().map(|_| "***MASKED***"))
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let d = Config::default();

        let server = ServerConfig {
            host: vars.string("HOST", &d.server.host),
            port: vars.parse("PORT", d.server.port)?,
            environment: vars.string("ENVIRONMENT", &d.server.environment),
            route_prefix: normalize_prefix(&vars.string("ROUTE_PREFIX", &d.server.route_prefix)),
            request_timeout_secs: vars.parse("REQUEST_TIMEOUT_SECS", d.server.request_timeout_secs)?,
            trust_proxy_headers: vars.parse("TRUST_PROXY_HEADERS", d.server.trust_proxy_headers)?,
        };

        let database = DatabaseConfig {
            url: vars.required("DATABASE_URL")?,
            max_connections: vars.parse("DATABASE_MAX_CONNECTIONS", d.database.max_connections)?,
            min_connections: vars.parse("DATABASE_MIN_CONNECTIONS", d.database.min_connections)?,
            acquire_timeout_secs: vars
                .parse("DATABASE_ACQUIRE_TIMEOUT_SECS", d.database.acquire_timeout_secs)?,
        };

        let auth = AuthConfig {
            timestamp_tolerance_secs: vars
                .parse("AUTH_TIMESTAMP_TOLERANCE_SECS", d.auth.timestamp_tolerance_secs)?,
        };

        let rate_limit = RateLimitConfig {
            global: WindowConfig::new(
                vars.parse("RATE_LIMIT_GLOBAL_MAX", d.rate_limit.global.max_requests)?,
                vars.parse("RATE_LIMIT_GLOBAL_WINDOW_SECS", d.rate_limit.global.window_secs)?,
            ),
            export: WindowConfig::new(
                vars.parse("RATE_LIMIT_EXPORT_MAX", d.rate_limit.export.max_requests)?,
                vars.parse("RATE_LIMIT_EXPORT_WINDOW_SECS", d.rate_limit.export.window_secs)?,
            ),
            webhook: WindowConfig::new(
                vars.parse("RATE_LIMIT_WEBHOOK_MAX", d.rate_limit.webhook.max_requests)?,
                vars.parse("RATE_LIMIT_WEBHOOK_WINDOW_SECS", d.rate_limit.webhook.window_secs)?,
            ),
        };

        let query = QueryConfig {
            default_page_size: vars.parse("QUERY_DEFAULT_PAGE_SIZE", d.query.default_page_size)?,
            max_page_size: vars.parse("QUERY_MAX_PAGE_SIZE", d.query.max_page_size)?,
            max_range_days: vars.parse("QUERY_MAX_RANGE_DAYS", d.query.max_range_days)?,
        };

        let export = ExportConfig {
            daily_limit: vars.parse("EXPORT_DAILY_LIMIT", d.export.daily_limit)?,
            poll_interval_secs: vars.parse("EXPORT_POLL_INTERVAL_SECS", d.export.poll_interval_secs)?,
            batch_size: vars.parse("EXPORT_BATCH_SIZE", d.export.batch_size)?,
            stale_after_secs: vars.parse("EXPORT_STALE_AFTER_SECS", d.export.stale_after_secs)?,
            temp_dir: vars.optional("EXPORT_TEMP_DIR").map(PathBuf::from),
        };

        let storage = StorageConfig {
            root: vars
                .optional("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(d.storage.root),
            bucket: vars.string("STORAGE_BUCKET", &d.storage.bucket),
            public_url: vars
                .string("STORAGE_PUBLIC_URL", &d.storage.public_url)
                .trim_end_matches('/')
                .to_string(),
            signed_url_secret: vars.required("SIGNED_URL_SECRET")?,
            signed_url_ttl_secs: vars.parse("SIGNED_URL_TTL_SECS", d.storage.signed_url_ttl_secs)?,
        };

        let webhook = WebhookConfig {
            razorpay_secret: vars.optional("RAZORPAY_WEBHOOK_SECRET"),
        };

        if query.max_page_size < 1 || query.default_page_size < 1 {
            return Err(ConfigError::InvalidValue("QUERY_MAX_PAGE_SIZE"));
        }
        if export.batch_size < 1 {
            return Err(ConfigError::InvalidValue("EXPORT_BATCH_SIZE"));
        }

        Ok(Self {
            server,
            database,
            auth,
            rate_limit,
            query,
            export,
            storage,
            webhook,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.server.environment == "production"
    }
}

/// `/api/v1/` and `api/v1` both become `/api/v1`
fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::MissingEnv(key))
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.optional(key) {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
            None => Ok(default),
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://localhost/pos"),
        ("SIGNED_URL_SECRET", "s3cr3t"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(&REQUIRED).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.route_prefix, "/api/v1");
        assert_eq!(config.auth.timestamp_tolerance_secs, 300);
        assert_eq!(config.rate_limit.export, WindowConfig::new(10, 3600));
        assert_eq!(config.query.max_page_size, 100);
        assert_eq!(config.export.daily_limit, 20);
        assert_eq!(config.storage.signed_url_ttl_secs, 900);
        assert!(config.webhook.razorpay_secret.is_none());
        assert!(!config.is_production());
    }

    #[test]
    fn test_missing_required() {
        let err = load(&[("SIGNED_URL_SECRET", "x")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv("DATABASE_URL")));

        let err = load(&[("DATABASE_URL", "postgres://x")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv("SIGNED_URL_SECRET")));
    }

    #[test]
    fn test_invalid_value() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PORT", "eighty"));
        let err = load(&pairs).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("PORT")));
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("ROUTE_PREFIX", "partner-api/"),
            ("TRUST_PROXY_HEADERS", "true"),
            ("STORAGE_PUBLIC_URL", "https://files.example.com/"),
            ("RATE_LIMIT_GLOBAL_MAX", "5"),
        ]);
        let config = load(&pairs).unwrap();
        assert_eq!(config.server.route_prefix, "/partner-api");
        assert!(config.server.trust_proxy_headers);
        assert_eq!(config.storage.public_url, "https://files.example.com");
        assert_eq!(config.rate_limit.global.max_requests, 5);
    }

    #[test]
    fn test_debug_masks_secrets() {
        let config = load(&REQUIRED).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("s3cr3t"));
        assert!(!debug.contains("postgres://localhost"));
    }
}
