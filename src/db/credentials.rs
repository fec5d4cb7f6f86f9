use crate::config::DatabaseConfig;
use crate::db::{DbError, Result};
use config::{Config, File};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_PORT: u16 = 5432;

/// Connection parameters for one relational store.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.user)
            .password(&self.password)
            .application_name("sql-reporter");
        pg_config
    }

    /// `host:port/database`, safe to log.
    pub fn target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

pub trait CredentialProvider: Send + Sync {
    fn get_credentials(&self) -> Result<Credentials>;
}

/// Fixed local defaults, for development against a throwaway Postgres.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials;

impl CredentialProvider for StaticCredentials {
    fn get_credentials(&self) -> Result<Credentials> {
        Ok(Credentials {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialCredentials {
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

impl PartialCredentials {
    fn complete(self, source: &str) -> Result<Credentials> {
        let mut missing = Vec::new();
        if self.host.is_none() {
            missing.push("host");
        }
        if self.database.is_none() {
            missing.push("database");
        }
        if self.user.is_none() {
            missing.push("user");
        }
        if self.password.is_none() {
            missing.push("password");
        }
        if !missing.is_empty() {
            return Err(DbError::Configuration(format!(
                "{} is missing {}",
                source,
                missing.join(", ")
            )));
        }

        Ok(Credentials {
            host: self.host.unwrap_or_default(),
            port: self.port.unwrap_or(DEFAULT_PORT),
            database: self.database.unwrap_or_default(),
            user: self.user.unwrap_or_default(),
            password: self.password.unwrap_or_default(),
        })
    }
}

/// Credentials from the `[database]` section of the application config.
#[derive(Debug, Clone)]
pub struct ConfigCredentials {
    config: DatabaseConfig,
}

impl ConfigCredentials {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }
}

impl CredentialProvider for ConfigCredentials {
    fn get_credentials(&self) -> Result<Credentials> {
        PartialCredentials {
            host: self.config.host.clone(),
            port: self.config.port,
            database: self.config.database.clone(),
            user: self.config.user.clone(),
            password: self.config.password.clone(),
        }
        .complete("[database] configuration")
    }
}

/// Credentials from the `postgres` section of a secrets file. The file is
/// read on every call so rotated secrets are picked up without a restart.
#[derive(Debug, Clone)]
pub struct SecretsFileCredentials {
    path: PathBuf,
}

impl SecretsFileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialProvider for SecretsFileCredentials {
    fn get_credentials(&self) -> Result<Credentials> {
        debug!("Loading database secrets from {}", self.path.display());
        let secrets = Config::builder()
            .add_source(File::from(self.path.as_path()))
            .build()
            .map_err(|e| {
                DbError::Configuration(format!(
                    "cannot read secrets file {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

        let partial: PartialCredentials = secrets.get("postgres").map_err(|e| {
            DbError::Configuration(format!(
                "secrets file {} has no usable postgres section: {}",
                self.path.display(),
                e
            ))
        })?;

        partial.complete(&format!("postgres section of {}", self.path.display()))
    }
}

/// Picks the credential source the configuration asks for.
pub fn provider_from_config(config: &DatabaseConfig) -> Box<dyn CredentialProvider> {
    match &config.secrets_file {
        Some(path) => Box::new(SecretsFileCredentials::new(Path::new(path))),
        None => Box::new(ConfigCredentials::new(config.clone())),
    }
}
