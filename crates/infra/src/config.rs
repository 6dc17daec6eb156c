//! Runtime configuration.
//!
//! Loaded in layers, later layers winning:
//! 1. defaults in code
//! 2. `config/{environment}` file (optional, any format the `config` crate reads)
//! 3. `INVRECON__*` environment variables, `__` separating nested keys
//!    (e.g. `INVRECON__STORAGE__BACKEND=postgres`)
//!
//! A `.env` file in the working directory is read first.

use config::{ConfigError, Environment, File};
use serde::Deserialize;

use invrecon_observability::LogSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub environment: String,
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub ledger: LedgerSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

/// Ledger policy knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LedgerSettings {
    /// Let outgoing movements drive a balance below zero.
    pub allow_negative_balances: bool,
    /// Let inbound movements be recorded as drafts (no balance effect until confirmed).
    pub allow_draft_inbound: bool,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            allow_negative_balances: false,
            allow_draft_inbound: true,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let environment = std::env::var("INVRECON__ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let settings: Settings = config::Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("storage.backend", "memory")?
            .set_default("storage.max_connections", 10)?
            .set_default("ledger.allow_negative_balances", false)?
            .set_default("ledger.allow_draft_inbound", true)?
            .set_default("log.filter", "info")?
            .set_default("log.format", "json")?
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(
                Environment::with_prefix("INVRECON")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.backend == StorageBackend::Postgres && self.storage.database_url.is_none() {
            return Err(ConfigError::Message(
                "storage.database_url is required for the postgres backend".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invrecon_observability::LogFormat;

    fn settings(backend: StorageBackend, database_url: Option<&str>) -> Settings {
        Settings {
            environment: "test".to_string(),
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            storage: StorageSettings {
                backend,
                database_url: database_url.map(str::to_string),
                max_connections: 1,
            },
            ledger: LedgerSettings::default(),
            log: LogSettings {
                filter: "info".to_string(),
                format: LogFormat::Pretty,
            },
        }
    }

    #[test]
    fn postgres_needs_a_url() {
        assert!(settings(StorageBackend::Postgres, None).validate().is_err());
        assert!(settings(StorageBackend::Postgres, Some("postgres://localhost/ledger")).validate().is_ok());
        assert!(settings(StorageBackend::Memory, None).validate().is_ok());
    }

    #[test]
    fn ledger_defaults_reject_negative_balances() {
        let ledger = LedgerSettings::default();
        assert!(!ledger.allow_negative_balances);
        assert!(ledger.allow_draft_inbound);
    }
}
