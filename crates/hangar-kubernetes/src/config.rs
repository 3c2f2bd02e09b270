// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

pub use hangar_core::config::ConfigError;

/// Default domain appended to generated route hosts.
pub const DEFAULT_ROUTE_DOMAIN_SUFFIX: &str = "apps.local";

/// Routing configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Domain appended to route names to form their host
    pub route_domain_suffix: String,
    /// Whether routes terminate TLS (https/wss urls)
    pub route_tls: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            route_domain_suffix: DEFAULT_ROUTE_DOMAIN_SUFFIX.to_string(),
            route_tls: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `HANGAR_ROUTE_DOMAIN_SUFFIX`: Route host domain (default: apps.local)
    /// - `HANGAR_ROUTE_TLS`: Serve routes over TLS (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let route_domain_suffix = match std::env::var("HANGAR_ROUTE_DOMAIN_SUFFIX") {
            Ok(value) => {
                let value = value.trim().trim_start_matches('.').to_string();
                if value.is_empty() {
                    return Err(ConfigError::Invalid(
                        "HANGAR_ROUTE_DOMAIN_SUFFIX",
                        "must not be empty",
                    ));
                }
                value
            }
            Err(_) => DEFAULT_ROUTE_DOMAIN_SUFFIX.to_string(),
        };

        let route_tls = match std::env::var("HANGAR_ROUTE_TLS") {
            Ok(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(ConfigError::Invalid(
                        "HANGAR_ROUTE_TLS",
                        "must be true or false",
                    ));
                }
            },
            Err(_) => false,
        };

        Ok(Self {
            route_domain_suffix,
            route_tls,
        })
    }

    /// Load a `.env` file if one is present, then read the environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.remove("HANGAR_ROUTE_DOMAIN_SUFFIX");
        guard.remove("HANGAR_ROUTE_TLS");

        assert_eq!(Config::from_env().unwrap(), Config::default());
    }

    #[test]
    fn test_config_custom_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("HANGAR_ROUTE_DOMAIN_SUFFIX", ".apps.example.com");
        guard.set("HANGAR_ROUTE_TLS", "TRUE");

        let config = Config::from_env().unwrap();
        assert_eq!(config.route_domain_suffix, "apps.example.com");
        assert!(config.route_tls);
    }

    #[test]
    fn test_config_invalid_tls_flag() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.remove("HANGAR_ROUTE_DOMAIN_SUFFIX");
        guard.set("HANGAR_ROUTE_TLS", "maybe");

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("HANGAR_ROUTE_TLS", _))
        ));
    }
}
