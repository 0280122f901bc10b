//! Task Store connection settings.
//!
//! The store URL is the only configuration this crate owns; the Source and
//! Target data planes are configured as rows in `server_configs` and turned
//! into connections elsewhere. Because the bootstrap path has to splice the
//! database name into `CREATE DATABASE` (it cannot be bound), the name is
//! validated here, where the URL is taken apart.

use std::env;

use anyhow::{Result, bail};

/// Environment variable holding the Task Store URL.
pub const ENV_DATABASE_URL: &str = "SLUICE_DATABASE_URL";

/// Task Store database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
}

impl DbConfig {
    /// Connection URL used when nothing is configured.
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/sluice";

    /// Read the URL from [`ENV_DATABASE_URL`], falling back to the default.
    pub fn from_env() -> Self {
        Self {
            database_url: env::var(ENV_DATABASE_URL)
                .unwrap_or_else(|_| Self::DEFAULT_URL.to_owned()),
        }
    }

    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Split the URL into `(server part, database name)`.
    ///
    /// `postgresql://host:5432/sluice` -> `("postgresql://host:5432", "sluice")`.
    fn split_database(&self) -> Option<(&str, &str)> {
        let (server, name) = self.database_url.rsplit_once('/')?;
        // Reject the scheme separator itself (`postgresql://host` has no
        // database component).
        if name.is_empty() || server.ends_with(':') || server.ends_with('/') {
            return None;
        }
        Some((server, name))
    }

    /// The database name, vetted for use as a bare SQL identifier.
    ///
    /// The bootstrap path interpolates this into `CREATE DATABASE`, so
    /// anything outside `[A-Za-z0-9_]` is refused rather than quoted.
    pub fn database_name(&self) -> Result<&str> {
        let Some((_, name)) = self.split_database() else {
            bail!(
                "database URL {:?} does not name a database",
                self.database_url
            );
        };
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            bail!("database name {name:?} is not a safe identifier");
        }
        Ok(name)
    }

    /// URL of the `postgres` maintenance database on the same server.
    ///
    /// `CREATE DATABASE` has to be issued from a session on a database that
    /// already exists; the maintenance database is the one safe bet.
    pub fn maintenance_url(&self) -> String {
        match self.split_database() {
            Some((server, _)) => format!("{server}/postgres"),
            None => self.database_url.clone(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
