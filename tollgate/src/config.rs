//! Service configuration.
//!
//! Loaded from environment variables. Every variable except
//! `TOLLGATE_SECRET` has a default.
//!
//! # Environment Variables
//!
//! - `TOLLGATE_SECRET`: shared secret required on every request (required)
//! - `TOLLGATE_LISTEN_ADDR`: socket address (default: `0.0.0.0:8080`)
//! - `TOLLGATE_SHUTDOWN_TIMEOUT`: graceful drain seconds (default: `5`)
//! - `TOLLGATE_STORE`: `etcd` or `memory` (default: `etcd`)
//! - `TOLLGATE_KEY_PREFIX`: store key prefix (default: `/tollgate`)
//! - `TOLLGATE_ETCD_ENDPOINTS`: comma separated (default: `http://127.0.0.1:2379`)
//! - `TOLLGATE_ETCD_USERNAME` / `TOLLGATE_ETCD_PASSWORD`: both or neither
//! - `TOLLGATE_ETCD_DIAL_TIMEOUT`: seconds (default: `5`)
//! - `TOLLGATE_STORE_TIMEOUT`: seconds per store call (default: `5`)
//! - `TOLLGATE_WATCH_MAX_RETRIES`: consecutive watch failures tolerated (default: `5`)
//! - `TOLLGATE_STRICT_REFRESH_BINDING`: `true` or `false` (default: `true`)
//! - `TOLLGATE_LOG_FORMAT`: `console` or `json` (default: `console`)
//!
//! # Invariants
//!
//! - `secret` is never empty.
//! - `key_prefix` has no trailing `/`.
//! - Every duration is at least one second.

use std::net::SocketAddr;
use std::time::Duration;

use crate::store::EtcdOptions;
use crate::telemetry::LogFormat;

/// Which backend holds the rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    Etcd(EtcdOptions),
    /// In-process only. Rules do not survive a restart and are not shared.
    Memory,
}

/// Service configuration.
///
/// # Post-conditions
///
/// When constructed via `from_env()` the invariants of this module hold.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Shared secret expected in the `SECRET` header.
    pub secret: String,
    pub listen_addr: SocketAddr,
    /// How long in-flight requests may take to finish after a shutdown signal.
    pub shutdown_timeout: Duration,
    pub store: StoreKind,
    pub key_prefix: String,
    /// Bound on every individual store call.
    pub store_timeout: Duration,
    pub watch_max_retries: u32,
    pub strict_refresh_binding: bool,
    pub log_format: LogFormat,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable is missing.
    MissingEnvVar(String),
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnvVar(name) => {
                write!(f, "missing required environment variable: {name}")
            }
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl ServiceConfig {
    pub const DEFAULT_LISTEN_ADDR: &'static str = "0.0.0.0:8080";
    pub const DEFAULT_KEY_PREFIX: &'static str = "/tollgate";
    pub const DEFAULT_ETCD_ENDPOINTS: &'static str = "http://127.0.0.1:2379";
    pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
    pub const DEFAULT_WATCH_MAX_RETRIES: u32 = 5;

    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `TOLLGATE_SECRET` is missing or empty, or if any
    /// variable is set to a value that cannot be used.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a
    /// variable if it is set.
    ///
    /// # Errors
    ///
    /// As [`ServiceConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(lookup);

        let secret = env
            .get("TOLLGATE_SECRET")
            .ok_or_else(|| ConfigError::MissingEnvVar("TOLLGATE_SECRET".to_string()))?;
        if secret.is_empty() {
            return Err(invalid("TOLLGATE_SECRET", "must not be empty"));
        }

        let listen_addr = env.parse("TOLLGATE_LISTEN_ADDR", Self::DEFAULT_LISTEN_ADDR)?;
        let shutdown_timeout = env.seconds("TOLLGATE_SHUTDOWN_TIMEOUT")?;
        let store_timeout = env.seconds("TOLLGATE_STORE_TIMEOUT")?;
        let watch_max_retries = env.parse(
            "TOLLGATE_WATCH_MAX_RETRIES",
            &Self::DEFAULT_WATCH_MAX_RETRIES.to_string(),
        )?;
        let strict_refresh_binding = env.parse("TOLLGATE_STRICT_REFRESH_BINDING", "true")?;
        let log_format = env.parse("TOLLGATE_LOG_FORMAT", "console")?;

        let key_prefix = env
            .get("TOLLGATE_KEY_PREFIX")
            .unwrap_or_else(|| Self::DEFAULT_KEY_PREFIX.to_string())
            .trim_end_matches('/')
            .to_string();

        let store = match env.get("TOLLGATE_STORE").as_deref().unwrap_or("etcd") {
            "etcd" => StoreKind::Etcd(Self::load_etcd(&env)?),
            "memory" => StoreKind::Memory,
            other => {
                return Err(invalid(
                    "TOLLGATE_STORE",
                    format!("'{other}' is not one of etcd, memory"),
                ));
            }
        };

        Ok(Self {
            secret,
            listen_addr,
            shutdown_timeout,
            store,
            key_prefix,
            store_timeout,
            watch_max_retries,
            strict_refresh_binding,
            log_format,
        })
    }

    fn load_etcd<F: Fn(&str) -> Option<String>>(env: &Env<F>) -> Result<EtcdOptions, ConfigError> {
        let endpoints: Vec<String> = env
            .get("TOLLGATE_ETCD_ENDPOINTS")
            .unwrap_or_else(|| Self::DEFAULT_ETCD_ENDPOINTS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .map(ToString::to_string)
            .collect();
        if endpoints.is_empty() {
            return Err(invalid("TOLLGATE_ETCD_ENDPOINTS", "no endpoint given"));
        }

        let mut options = EtcdOptions::new(endpoints, env.seconds("TOLLGATE_ETCD_DIAL_TIMEOUT")?);
        options.credentials = match (
            env.get("TOLLGATE_ETCD_USERNAME"),
            env.get("TOLLGATE_ETCD_PASSWORD"),
        ) {
            (None, None) => None,
            (Some(user), Some(password)) => Some((user, password)),
            _ => {
                return Err(invalid(
                    "TOLLGATE_ETCD_USERNAME",
                    "username and password must be set together",
                ));
            }
        };
        Ok(options)
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
    }

    fn parse<T>(&self, name: &str, default: &str) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let value = self.get(name).unwrap_or_else(|| default.to_string());
        value
            .trim()
            .parse()
            .map_err(|e| invalid(name, format!("'{value}': {e}")))
    }

    fn seconds(&self, name: &str) -> Result<Duration, ConfigError> {
        let secs: u64 = self.parse(name, &ServiceConfig::DEFAULT_TIMEOUT_SECS.to_string())?;
        if secs == 0 {
            return Err(invalid(name, "must be at least 1 second"));
        }
        Ok(Duration::from_secs(secs))
    }
}

fn invalid(name: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServiceConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("TOLLGATE_SECRET", "s")]).expect("config");
        assert_eq!(config.secret, "s");
        assert_eq!(config.listen_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.store_timeout, Duration::from_secs(5));
        assert_eq!(config.key_prefix, "/tollgate");
        assert_eq!(config.watch_max_retries, 5);
        assert!(config.strict_refresh_binding);
        assert_eq!(config.log_format, LogFormat::Console);

        let StoreKind::Etcd(etcd) = config.store else {
            panic!("expected etcd store");
        };
        assert_eq!(etcd.endpoints, ["http://127.0.0.1:2379"]);
        assert!(etcd.credentials.is_none());
        assert_eq!(etcd.dial_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_secret() {
        assert_eq!(
            load(&[]).expect_err("missing"),
            ConfigError::MissingEnvVar("TOLLGATE_SECRET".to_string())
        );
        assert!(matches!(
            load(&[("TOLLGATE_SECRET", "")]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("TOLLGATE_SECRET", "s"),
            ("TOLLGATE_LISTEN_ADDR", "127.0.0.1:9000"),
            ("TOLLGATE_STORE", "memory"),
            ("TOLLGATE_KEY_PREFIX", "/auth/"),
            ("TOLLGATE_STRICT_REFRESH_BINDING", "false"),
            ("TOLLGATE_LOG_FORMAT", "json"),
            ("TOLLGATE_WATCH_MAX_RETRIES", "0"),
        ])
        .expect("config");
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.key_prefix, "/auth");
        assert!(!config.strict_refresh_binding);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.watch_max_retries, 0);
    }

    #[test]
    fn test_etcd_endpoints_and_credentials() {
        let config = load(&[
            ("TOLLGATE_SECRET", "s"),
            ("TOLLGATE_ETCD_ENDPOINTS", "http://a:2379, http://b:2379,"),
            ("TOLLGATE_ETCD_USERNAME", "root"),
            ("TOLLGATE_ETCD_PASSWORD", "pw"),
        ])
        .expect("config");
        let StoreKind::Etcd(etcd) = config.store else {
            panic!("expected etcd store");
        };
        assert_eq!(etcd.endpoints, ["http://a:2379", "http://b:2379"]);
        assert_eq!(
            etcd.credentials,
            Some(("root".to_string(), "pw".to_string()))
        );
    }

    #[test]
    fn test_half_credentials_rejected() {
        let result = load(&[("TOLLGATE_SECRET", "s"), ("TOLLGATE_ETCD_USERNAME", "root")]);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_invalid_values() {
        for (name, value) in [
            ("TOLLGATE_LISTEN_ADDR", "nowhere"),
            ("TOLLGATE_SHUTDOWN_TIMEOUT", "0"),
            ("TOLLGATE_STORE_TIMEOUT", "soon"),
            ("TOLLGATE_STORE", "redis"),
            ("TOLLGATE_STRICT_REFRESH_BINDING", "yes"),
            ("TOLLGATE_LOG_FORMAT", "xml"),
        ] {
            let error = load(&[("TOLLGATE_SECRET", "s"), (name, value)]).expect_err(name);
            let ConfigError::InvalidValue { name: reported, .. } = error else {
                panic!("expected InvalidValue for {name}");
            };
            assert_eq!(reported, name);
        }
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
        assert_eq!(
            ConfigError::MissingEnvVar("TEST_VAR".to_string()).to_string(),
            "missing required environment variable: TEST_VAR"
        );
    }
}
