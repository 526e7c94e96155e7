//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Gate Configuration
//!
//! - `APP_ENV`: `development` (default) or `production`; production adds HSTS
//! - `RATE_LIMIT_WINDOW_SECS` / `RATE_LIMIT_MAX_REQUESTS`: fixed window (default 60s / 100)
//! - `IDENTITY_TIMEOUT_MS`: upper bound on identity resolution (default 2000)
//! - `IDENTITY_TOKENS`: static bearer token table, see [`crate::identity::StaticTokenProvider`]
//! - `SIGN_IN_URL`, `UNAUTHORIZED_URL`, `ADMIN_ROLES`: access gate redirects and roles
//! - `ROUTES_PUBLIC`, `ROUTES_WEBHOOK`, `ROUTES_ADMIN`, `ROUTES_PROTECTED`: comma-separated
//!   route patterns overriding the built-in table
//! - `STATIC_ASSET_PASSTHROUGH`: skip the gate for static files on public routes (default true)
//! - `TRUSTED_PROXIES`: comma-separated CIDR ranges whose `X-Forwarded-For` /
//!   `X-Real-IP` headers are believed (default: none, key by peer address)
//! - `CSP_DEFAULT_SRC`, `CSP_SCRIPT_SRC`, ...: whitespace-separated sources per
//!   Content-Security-Policy directive; an empty value drops the directive
//!
//! # Observability
//!
//! - `RUST_LOG`: log filter (default: `info`)
//! - `LOG_FORMAT`: `json`, `pretty` or `compact` (default: json in production, pretty otherwise)
//! - `METRICS_PORT`: Prometheus listener port (default: 9090, 0 = disabled)

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::gate::access::{DEFAULT_ADMIN_ROLES, DEFAULT_SIGN_IN_URL, DEFAULT_UNAUTHORIZED_URL};
use crate::gate::classifier::RouteGroups;
use crate::gate::headers::{CspDirective, CspPolicy};
use crate::middleware::ip::CidrRange;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!(
                "unknown environment '{other}', expected development or production"
            )),
        }
    }
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

impl LogFormat {
    fn default_for(environment: Environment) -> Self {
        if environment.is_production() {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    pub environment: Environment,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Fixed window length (default: 60 seconds)
    pub rate_limit_window: Duration,

    /// Requests admitted per identifier per window (default: 100)
    pub rate_limit_max_requests: u32,

    // =========================================================================
    // Identity & Access Configuration
    // =========================================================================
    /// Upper bound on a single identity resolution (default: 2 seconds)
    pub identity_timeout: Duration,

    /// Raw `IDENTITY_TOKENS` table. Empty means every request is anonymous.
    pub identity_tokens: String,

    /// Sign-in page that unauthenticated requests are redirected to
    pub sign_in_url: String,

    /// Redirect target for signed-in users lacking an admin role
    pub unauthorized_url: String,

    /// Roles that unlock admin routes (default: admin, super_admin)
    pub admin_roles: Vec<String>,

    // =========================================================================
    // Routing & Headers
    // =========================================================================
    pub routes: RouteGroups,

    /// Skip the gate entirely for static asset paths (default: true)
    pub static_asset_passthrough: bool,

    pub csp: CspPolicy,

    /// Reverse proxy CIDR ranges allowed to name the client IP
    pub trusted_proxies: Vec<String>,

    /// Comma-separated list of allowed CORS origins
    /// Use "*" to allow all origins (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment: Environment = Self::parse_env("APP_ENV", Environment::Development)?;

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            environment,

            // Rate limiting
            rate_limit_window: Duration::from_secs(Self::parse_env("RATE_LIMIT_WINDOW_SECS", 60)?),
            rate_limit_max_requests: Self::parse_env("RATE_LIMIT_MAX_REQUESTS", 100)?,

            // Identity & access
            identity_timeout: Duration::from_millis(Self::parse_env("IDENTITY_TIMEOUT_MS", 2000)?),
            identity_tokens: env::var("IDENTITY_TOKENS").unwrap_or_default(),
            sign_in_url: env::var("SIGN_IN_URL")
                .unwrap_or_else(|_| DEFAULT_SIGN_IN_URL.to_string()),
            unauthorized_url: env::var("UNAUTHORIZED_URL")
                .unwrap_or_else(|_| DEFAULT_UNAUTHORIZED_URL.to_string()),
            admin_roles: Self::parse_list("ADMIN_ROLES")
                .unwrap_or_else(|| DEFAULT_ADMIN_ROLES.iter().map(|r| (*r).to_string()).collect()),

            // Routing & headers
            routes: Self::parse_route_groups(),
            static_asset_passthrough: Self::parse_env("STATIC_ASSET_PASSTHROUGH", true)?,
            csp: Self::parse_csp(),
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES").unwrap_or_default(),
            cors_allowed_origins: Self::parse_cors_origins(),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: Self::parse_env("LOG_FORMAT", LogFormat::default_for(environment))?,
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.rate_limit_window.as_secs() == 0 {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_max_requests == 0 {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_MAX_REQUESTS must be greater than 0".to_string(),
            ));
        }

        if self.identity_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "IDENTITY_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        // Redirect targets must stay on this origin
        for (name, url) in [
            ("SIGN_IN_URL", &self.sign_in_url),
            ("UNAUTHORIZED_URL", &self.unauthorized_url),
        ] {
            // Browsers read `\` as `/`, so `/\host` is protocol-relative too
            if !url.starts_with('/') || url.starts_with("//") || url.contains('\\') {
                return Err(AppError::ConfigError(format!(
                    "{name} must be a same-origin path starting with '/', got '{url}'"
                )));
            }
        }

        if let Some(invalid) = self
            .trusted_proxies
            .iter()
            .find(|cidr| CidrRange::parse(cidr).is_none())
        {
            return Err(AppError::ConfigError(format!(
                "TRUSTED_PROXIES entry '{invalid}' is not an IP address or CIDR range"
            )));
        }

        if self.admin_roles.is_empty() {
            return Err(AppError::ConfigError(
                "ADMIN_ROLES must name at least one role".to_string(),
            ));
        }

        let csp = self.csp.render();
        if csp.chars().any(|c| c.is_control()) {
            return Err(AppError::ConfigError(
                "CSP_* sources must not contain control characters".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Comma-separated list, `None` when the variable is unset.
    fn parse_list(name: &str) -> Option<Vec<String>> {
        env::var(name).ok().map(|raw| split_list(&raw))
    }

    /// Route groups, each overridable independently.
    fn parse_route_groups() -> RouteGroups {
        let defaults = RouteGroups::default();
        RouteGroups {
            public: Self::parse_list("ROUTES_PUBLIC").unwrap_or(defaults.public),
            webhook: Self::parse_list("ROUTES_WEBHOOK").unwrap_or(defaults.webhook),
            admin: Self::parse_list("ROUTES_ADMIN").unwrap_or(defaults.admin),
            protected: Self::parse_list("ROUTES_PROTECTED").unwrap_or(defaults.protected),
        }
    }

    /// Start from the default policy and apply any `CSP_*` overrides.
    fn parse_csp() -> CspPolicy {
        let mut policy = CspPolicy::default();
        for directive in CspDirective::ORDER {
            if let Ok(raw) = env::var(directive.env_key()) {
                policy.set_sources(directive, raw.split_whitespace());
            }
        }
        policy
    }

    /// Parse CORS allowed origins from environment variable.
    fn parse_cors_origins() -> Vec<String> {
        split_list(&env::var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|_| "*".to_string()))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: Environment::Development,
            // Rate limiting
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max_requests: 100,
            // Identity & access
            identity_timeout: Duration::from_millis(2000),
            identity_tokens: String::new(),
            sign_in_url: DEFAULT_SIGN_IN_URL.to_string(),
            unauthorized_url: DEFAULT_UNAUTHORIZED_URL.to_string(),
            admin_roles: DEFAULT_ADMIN_ROLES.iter().map(|r| (*r).to_string()).collect(),
            // Routing & headers
            routes: RouteGroups::default(),
            static_asset_passthrough: true,
            csp: CspPolicy::default(),
            trusted_proxies: Vec::new(),
            cors_allowed_origins: vec!["*".to_string()],
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_port: 9090,
        }
    }
}
