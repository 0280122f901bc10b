//! Database query functions for the `server_configs` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::ServerConfig;

/// Field values for inserting or replacing a server configuration.
#[derive(Debug, Clone)]
pub struct UpsertServerConfig<'a> {
    pub name: &'a str,
    pub host: &'a str,
    pub port: Option<i32>,
    pub username: &'a str,
    pub password: &'a str,
    pub database_name: &'a str,
    pub encrypt: Option<bool>,
    pub trust_cert: bool,
}

/// Insert a server config or replace an existing one with the same name.
pub async fn upsert_server_config(
    pool: &PgPool,
    config: &UpsertServerConfig<'_>,
) -> Result<ServerConfig> {
    let row = sqlx::query_as::<_, ServerConfig>(
        "INSERT INTO server_configs (name, host, port, username, password, database_name, \
                                     encrypt, trust_cert) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (name) DO UPDATE SET \
             host = EXCLUDED.host, \
             port = EXCLUDED.port, \
             username = EXCLUDED.username, \
             password = EXCLUDED.password, \
             database_name = EXCLUDED.database_name, \
             encrypt = EXCLUDED.encrypt, \
             trust_cert = EXCLUDED.trust_cert \
         RETURNING *",
    )
    .bind(config.name)
    .bind(config.host)
    .bind(config.port)
    .bind(config.username)
    .bind(config.password)
    .bind(config.database_name)
    .bind(config.encrypt)
    .bind(config.trust_cert)
    .fetch_one(pool)
    .await
    .context("failed to upsert server config")?;

    Ok(row)
}

/// Fetch a server config by name.
pub async fn get_server_config(pool: &PgPool, name: &str) -> Result<Option<ServerConfig>> {
    let config = sqlx::query_as::<_, ServerConfig>("SELECT * FROM server_configs WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("failed to fetch server config")?;

    Ok(config)
}

/// List all server configs, ordered by name.
pub async fn list_server_configs(pool: &PgPool) -> Result<Vec<ServerConfig>> {
    let configs =
        sqlx::query_as::<_, ServerConfig>("SELECT * FROM server_configs ORDER BY name ASC")
            .fetch_all(pool)
            .await
            .context("failed to list server configs")?;

    Ok(configs)
}
