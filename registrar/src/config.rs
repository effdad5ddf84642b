//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `REGISTRAR_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `REGISTRAR_` override YAML values
//! 3. **DATABASE_URL** - Special case: overrides `database.url` if set
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `REGISTRAR_AUTH__LOCKOUT_THRESHOLD=3` sets the `auth.lockout_threshold` field.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "REGISTRAR_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines to catch config errors before deployment.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have sensible defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Set by the DATABASE_URL environment variable; folded into
    /// `database.url` during load.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// PostgreSQL connection settings
    pub database: DatabaseConfig,
    /// Username for the initial admin account (created on first startup)
    pub admin_username: String,
    /// Password for the initial admin account (optional, can be set via environment)
    pub admin_password: Option<String>,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Connection string (override with DATABASE_URL)
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Maximum time to wait for a connection from the pool
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    /// Server-side statement timeout. Bounds every store call so a slow
    /// database fails the request instead of hanging it.
    #[serde(with = "humantime_serde")]
    pub statement_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/registrar".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            statement_timeout: Duration::from_secs(5),
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Session token configuration
    pub session: SessionConfig,
    /// Password validation rules and hashing cost
    pub password: PasswordConfig,
    /// Failed attempts before an account is blocked. Fixed at startup;
    /// per-account and permanent until reset.
    pub lockout_threshold: i32,
    /// SSO token exchange configuration
    pub sso: SsoConfig,
}

/// Session token and cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Secret key for signing session tokens (required)
    pub secret: Option<String>,
    /// Session timeout duration. The single expiry policy for every
    /// issuance path, password login and SSO exchange alike.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Cookie name for the session token
    pub cookie_name: String,
    /// Set Secure flag on cookies (HTTPS only)
    pub cookie_secure: bool,
    /// SameSite cookie attribute ("strict", "lax", or "none")
    pub cookie_same_site: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: None,
            timeout: Duration::from_secs(24 * 60 * 60), // 24 hours
            cookie_name: "registrar_session".to_string(),
            cookie_secure: true,
            cookie_same_site: "strict".to_string(),
        }
    }
}

/// Password validation rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PasswordConfig {
    /// Minimum password length
    pub min_length: usize,
    /// Maximum password length
    pub max_length: usize,
    /// Argon2 memory cost in KiB (default: 19456 KiB = 19 MB, secure for production)
    pub argon2_memory_kib: u32,
    /// Argon2 iterations (default: 2, secure for production)
    pub argon2_iterations: u32,
    /// Argon2 parallelism (default: 1)
    pub argon2_parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 64,
            // Secure defaults for production (Argon2id RFC recommendations)
            argon2_memory_kib: 19456, // 19 MB
            argon2_iterations: 2,
            argon2_parallelism: 1,
        }
    }
}

/// SSO token exchange configuration.
///
/// Tokens minted by a trusted identity provider are exchanged for local
/// sessions. The SSO secret is a separate trust root from the session secret.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SsoConfig {
    /// Enable the SSO token exchange endpoint
    pub enabled: bool,
    /// Shared secret the identity provider signs tokens with (required when enabled)
    pub secret: Option<String>,
    /// Expected `iss` claim; validated when set
    pub issuer: Option<String>,
    /// Create local accounts for unknown SSO subjects
    pub auto_provision: bool,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret: None,
            issuer: None,
            auto_provision: false,
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allow any origin (cannot be combined with credentials; development only)
    pub permissive: bool,
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            permissive: false,
            allowed_origins: vec!["http://localhost:5173".to_string()],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            database_url: None,
            database: DatabaseConfig::default(),
            admin_username: "admin".to_string(),
            admin_password: None,
            auth: AuthConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: true,
            enable_otel_export: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            password: PasswordConfig::default(),
            lockout_threshold: crate::auth::lockout::DEFAULT_LOCKOUT_THRESHOLD,
            sso: SsoConfig::default(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        // if database_url is set, use it
        if let Some(url) = config.database_url.take() {
            config.database.url = url;
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("REGISTRAR_").split("__"))
            // Common DATABASE_URL pattern
            .merge(Env::raw().only(&["DATABASE_URL"]))
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        match &self.auth.session.secret {
            None => {
                return Err(Error::Internal {
                    operation: "Config validation: auth.session.secret is not configured. \
                     Please set REGISTRAR_AUTH__SESSION__SECRET or add it to the config file."
                        .to_string(),
                });
            }
            Some(secret) if secret.is_empty() => {
                return Err(Error::Internal {
                    operation: "Config validation: auth.session.secret cannot be empty".to_string(),
                });
            }
            Some(_) => {}
        }

        // Validate session timeout is reasonable
        if self.auth.session.timeout.as_secs() < 300 {
            // Less than 5 minutes
            return Err(Error::Internal {
                operation: "Config validation: session timeout is too short (minimum 5 minutes)".to_string(),
            });
        }

        if self.auth.session.timeout.as_secs() > 86400 * 30 {
            // More than 30 days
            return Err(Error::Internal {
                operation: "Config validation: session timeout is too long (maximum 30 days)".to_string(),
            });
        }

        // Cookie names are HTTP tokens; anything else corrupts the Set-Cookie header
        if self.auth.session.cookie_name.is_empty()
            || !self
                .auth
                .session
                .cookie_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: auth.session.cookie_name ({:?}) must be non-empty and contain only ASCII letters, digits, '-' or '_'",
                    self.auth.session.cookie_name
                ),
            });
        }

        // Validate password requirements
        if self.auth.password.min_length < 4 {
            return Err(Error::Internal {
                operation: "Config validation: Invalid password configuration: min_length must be at least 4".to_string(),
            });
        }

        if self.auth.password.min_length > self.auth.password.max_length {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: Invalid password configuration: min_length ({}) cannot be greater than max_length ({})",
                    self.auth.password.min_length, self.auth.password.max_length
                ),
            });
        }

        if self.auth.lockout_threshold < 1 {
            return Err(Error::Internal {
                operation: "Config validation: lockout_threshold must be at least 1".to_string(),
            });
        }

        // SSO requires its own trust root
        if self.auth.sso.enabled {
            match &self.auth.sso.secret {
                None => {
                    return Err(Error::Internal {
                        operation: "Config validation: SSO is enabled but auth.sso.secret is not configured".to_string(),
                    });
                }
                Some(secret) if secret.is_empty() => {
                    return Err(Error::Internal {
                        operation: "Config validation: auth.sso.secret cannot be empty".to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        // Validate CORS configuration
        if !self.cors.permissive && self.cors.allowed_origins.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: CORS allowed_origins cannot be empty. Add at least one allowed origin or set cors.permissive."
                    .to_string(),
            });
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_yaml_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
auth:
  session:
    secret: hello
    timeout: 2h
    cookie_name: custom_session
  lockout_threshold: 3
"#,
            )?;

            let args = Args {
                config: "test.yaml".to_string(),
                validate: false,
            };

            let config = Config::load(&args)?;

            assert_eq!(config.auth.session.secret.as_deref(), Some("hello"));
            assert_eq!(config.auth.session.timeout, Duration::from_secs(2 * 60 * 60));
            assert_eq!(config.auth.session.cookie_name, "custom_session");
            assert_eq!(config.auth.lockout_threshold, 3);
            // Untouched values keep their defaults
            assert_eq!(config.auth.password.min_length, 8);
            assert_eq!(config.port, 3001);

            Ok(())
        });
    }

    #[test]
    #[serial_test::serial]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
auth:
  session:
    secret: hello
"#,
            )?;

            jail.set_env("REGISTRAR_HOST", "127.0.0.1");
            jail.set_env("REGISTRAR_PORT", "8080");
            jail.set_env("REGISTRAR_AUTH__LOCKOUT_THRESHOLD", "7");

            let args = Args {
                config: "test.yaml".to_string(),
                validate: false,
            };

            let config = Config::load(&args)?;

            // Env vars should override
            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.port, 8080);
            assert_eq!(config.auth.lockout_threshold, 7);

            Ok(())
        });
    }

    #[test]
    #[serial_test::serial]
    fn test_database_url_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
auth:
  session:
    secret: hello
database:
  url: postgres://yaml-host/registrar
"#,
            )?;

            jail.set_env("DATABASE_URL", "postgres://env-host/registrar");

            let args = Args {
                config: "test.yaml".to_string(),
                validate: false,
            };

            let config = Config::load(&args)?;
            assert_eq!(config.database.url, "postgres://env-host/registrar");

            Ok(())
        });
    }

    #[test]
    fn test_validation_missing_secret() {
        let config = Config::default();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("secret is not configured"));
    }

    #[test]
    fn test_validation_session_timeout_bounds() {
        let mut config = Config::default();
        config.auth.session.secret = Some("test-secret".to_string());

        config.auth.session.timeout = Duration::from_secs(60);
        assert!(config.validate().is_err());

        config.auth.session.timeout = Duration::from_secs(86400 * 31);
        assert!(config.validate().is_err());

        config.auth.session.timeout = Duration::from_secs(3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_password_length() {
        let mut config = Config::default();
        config.auth.session.secret = Some("test-secret".to_string());
        config.auth.password.min_length = 10;
        config.auth.password.max_length = 5;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("min_length"));
    }

    #[test]
    fn test_validation_sso_requires_secret() {
        let mut config = Config::default();
        config.auth.session.secret = Some("test-secret".to_string());
        config.auth.sso.enabled = true;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("auth.sso.secret"));

        config.auth.sso.secret = Some("sso-secret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_cookie_name() {
        let mut config = Config::default();
        config.auth.session.secret = Some("test-secret".to_string());

        // Would corrupt the Set-Cookie header
        config.auth.session.cookie_name = "bad name\n".to_string();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("cookie_name"));

        config.auth.session.cookie_name = String::new();
        assert!(config.validate().is_err());

        config.auth.session.cookie_name = "registrar_session-2".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_lockout_threshold() {
        let mut config = Config::default();
        config.auth.session.secret = Some("test-secret".to_string());
        config.auth.lockout_threshold = 0;

        assert!(config.validate().is_err());
    }
}
