//! Server configuration for `shiblink`.
//!
//! Loads configuration from environment variables. Everything except the
//! encryption key and the trust-authority host has a default, and every
//! setting can be overridden via `SHIBLINK_*` environment variables.

use std::net::SocketAddr;

/// Default identity-provider endpoint used to introspect bearer tokens.
pub const DEFAULT_TOKENINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/tokeninfo";

/// Default per-environment path of the trust authority's public key.
pub const DEFAULT_PUBLIC_KEY_PATH: &str = "/{env}/public-key.pem";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    #[error("missing required configuration variable {var}")]
    Missing { var: &'static str },

    /// A variable is set but cannot be used.
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Record store backend.
    pub storage_backend: StorageBackendType,
    /// Base64 AES-256 key for attribute values.
    pub encryption_key: String,
    /// Static API key. `None` disables `Key` authentication.
    pub api_key: Option<String>,
    /// Host serving the trust authority's public keys.
    pub trust_host: String,
    /// Deployment environment, substituted into `public_key_path`.
    pub environment: String,
    /// Public key path template containing `{env}`.
    pub public_key_path: String,
    /// Bearer-token introspection endpoint.
    pub tokeninfo_url: String,
    /// Timeout for outbound HTTP calls in seconds.
    pub http_timeout_secs: u64,
    /// Whether development-only routes are mounted.
    pub dev_mode: bool,
}

/// Supported record store backends.
#[derive(Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// `PostgreSQL` persistent storage.
    Postgres { url: String },
}

impl std::fmt::Debug for StorageBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("Memory"),
            Self::Postgres { .. } => f
                .debug_struct("Postgres")
                .field("url", &"[REDACTED]")
                .finish(),
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("storage_backend", &self.storage_backend)
            .field("encryption_key", &"[REDACTED]")
            .field("api_key_configured", &self.api_key.is_some())
            .field("trust_host", &self.trust_host)
            .field("environment", &self.environment)
            .field("public_key_path", &self.public_key_path)
            .field("tokeninfo_url", &self.tokeninfo_url)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("dev_mode", &self.dev_mode)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT`: port to bind on (binds to `0.0.0.0`)
    /// - `SHIBLINK_BIND_ADDR`: full bind address (overrides `PORT`, default: `127.0.0.1:8300`)
    /// - `SHIBLINK_LOG_LEVEL`: log filter (default: `info`)
    /// - `SHIBLINK_ENCRYPTION_KEY`: base64 32-byte key (required)
    /// - `SHIBLINK_API_KEY`: static API key (optional)
    /// - `SHIBLINK_STORAGE`: `memory` or `postgres` (default: `memory`)
    /// - `DATABASE_URL`: `PostgreSQL` connection string (required when `SHIBLINK_STORAGE=postgres`)
    /// - `SHIBLINK_TRUST_HOST`: trust authority host (required)
    /// - `SHIBLINK_ENVIRONMENT`: environment name (default: `dev`)
    /// - `SHIBLINK_PUBLIC_KEY_PATH`: key path template (default: `/{env}/public-key.pem`)
    /// - `SHIBLINK_TOKENINFO_URL`: introspection endpoint
    /// - `SHIBLINK_HTTP_TIMEOUT_SECS`: outbound HTTP timeout (default: `10`)
    /// - `SHIBLINK_DEV_MODE`: mount development routes (default: `false`)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or a value
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        // Priority: SHIBLINK_BIND_ADDR > PORT > default 127.0.0.1:8300
        let bind_addr = if let Some(addr) = get("SHIBLINK_BIND_ADDR") {
            addr.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
                var: "SHIBLINK_BIND_ADDR",
                reason: format!("{e}"),
            })?
        } else if let Some(port) = get("PORT") {
            let port = port.parse::<u16>().map_err(|e| ConfigError::Invalid {
                var: "PORT",
                reason: format!("{e}"),
            })?;
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 8300))
        };

        let log_level = get("SHIBLINK_LOG_LEVEL").unwrap_or_else(|| "info".to_owned());

        let storage_backend = match get("SHIBLINK_STORAGE")
            .unwrap_or_else(|| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "memory" => StorageBackendType::Memory,
            "postgres" | "postgresql" => StorageBackendType::Postgres {
                url: get("DATABASE_URL").ok_or(ConfigError::Missing {
                    var: "DATABASE_URL",
                })?,
            },
            other => {
                return Err(ConfigError::Invalid {
                    var: "SHIBLINK_STORAGE",
                    reason: format!("unknown backend '{other}', expected memory or postgres"),
                });
            }
        };

        let encryption_key = get("SHIBLINK_ENCRYPTION_KEY").ok_or(ConfigError::Missing {
            var: "SHIBLINK_ENCRYPTION_KEY",
        })?;
        let trust_host = get("SHIBLINK_TRUST_HOST").ok_or(ConfigError::Missing {
            var: "SHIBLINK_TRUST_HOST",
        })?;

        let public_key_path =
            get("SHIBLINK_PUBLIC_KEY_PATH").unwrap_or_else(|| DEFAULT_PUBLIC_KEY_PATH.to_owned());
        if !public_key_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                var: "SHIBLINK_PUBLIC_KEY_PATH",
                reason: "must start with '/'".to_owned(),
            });
        }

        let http_timeout_secs = match get("SHIBLINK_HTTP_TIMEOUT_SECS") {
            Some(v) => v.parse::<u64>().map_err(|e| ConfigError::Invalid {
                var: "SHIBLINK_HTTP_TIMEOUT_SECS",
                reason: format!("{e}"),
            })?,
            None => 10,
        };

        let dev_mode = get("SHIBLINK_DEV_MODE").is_some_and(|v| v == "true" || v == "1");

        Ok(Self {
            bind_addr,
            log_level,
            storage_backend,
            encryption_key,
            api_key: get("SHIBLINK_API_KEY"),
            trust_host,
            environment: get("SHIBLINK_ENVIRONMENT").unwrap_or_else(|| "dev".to_owned()),
            public_key_path,
            tokeninfo_url: get("SHIBLINK_TOKENINFO_URL")
                .unwrap_or_else(|| DEFAULT_TOKENINFO_URL.to_owned()),
            http_timeout_secs,
            dev_mode,
        })
    }
}
