//! `sluice server ...` commands: register and list data-plane servers.

use anyhow::Result;
use sqlx::PgPool;

use sluice_db::queries::servers::{self, UpsertServerConfig};

#[allow(clippy::too_many_arguments)]
pub async fn run_upsert(
    pool: &PgPool,
    name: &str,
    host: &str,
    port: Option<i32>,
    username: &str,
    password: &str,
    database: &str,
    encrypt: Option<bool>,
    trust_cert: bool,
) -> Result<()> {
    let config = servers::upsert_server_config(
        pool,
        &UpsertServerConfig {
            name,
            host,
            port,
            username,
            password,
            database_name: database,
            encrypt,
            trust_cert,
        },
    )
    .await?;

    println!(
        "Server {:?} registered: {}@{}:{}/{}",
        config.name,
        config.username,
        config.host,
        config.port.unwrap_or(5432),
        config.database_name
    );
    if config.encrypt.is_none() {
        println!("  TLS: automatic (disabled for bare IPv4 hosts)");
    }
    Ok(())
}

pub async fn run_list(pool: &PgPool) -> Result<()> {
    let configs = servers::list_server_configs(pool).await?;
    if configs.is_empty() {
        println!("No servers registered. Add one with `sluice server upsert`.");
        return Ok(());
    }

    println!(
        "{:<16} {:<24} {:>6} {:<16} {:<20} {:<6}",
        "NAME", "HOST", "PORT", "USER", "DATABASE", "TLS"
    );
    for config in &configs {
        let tls = match config.encrypt {
            Some(true) => "on",
            Some(false) => "off",
            None => "auto",
        };
        println!(
            "{:<16} {:<24} {:>6} {:<16} {:<20} {:<6}",
            config.name,
            config.host,
            config.port.unwrap_or(5432),
            config.username,
            config.database_name,
            tls
        );
    }
    Ok(())
}
