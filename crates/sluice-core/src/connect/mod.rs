//! Connection manager: owns one bounded pool per configured server, issues
//! probed leases, and recycles pools that have gone bad.
//!
//! A lease is an exclusive pooled session confirmed live by a `SELECT 1`
//! probe issued within the last second. Server settings come from the Task
//! Store's `server_configs` table; the manager is the only place they are
//! turned into driver options.

pub mod diagnose;

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgConnection, PgPool, Postgres};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use sluice_db::models::ServerConfig;
use sluice_db::queries::servers;

use crate::error::{TransferError, classify_sqlx};

/// Pool bounds and probe windows.
const POOL_MAX_CONNECTIONS: u32 = 10;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
/// A probe result is trusted for this long before re-probing.
const PROBE_FRESHNESS: Duration = Duration::from_secs(1);
/// A probe slower than this marks the session dead.
const PROBE_TIMEOUT: Duration = Duration::from_secs(20);
/// Transparent reconnect attempts inside one `lease` call.
const INNER_RETRY_BUDGET: u32 = 2;

/// An exclusive handle to a live database session.
///
/// The session returns to its pool when the lease is dropped, whether the
/// task succeeded or not.
pub struct Lease {
    /// Key of the server this session belongs to.
    pub server: String,
    conn: PoolConnection<Postgres>,
}

impl Lease {
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.conn
    }
}

struct PoolEntry {
    pool: PgPool,
    last_probe: Mutex<Option<Instant>>,
}

/// Registry of per-server connection pools.
pub struct ConnectionManager {
    /// Task Store pool, used to fetch server configurations.
    store: PgPool,
    pools: RwLock<HashMap<String, PoolEntry>>,
}

impl ConnectionManager {
    pub fn new(store: PgPool) -> Self {
        Self {
            store,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// The Task Store pool this manager reads configurations from.
    pub fn store(&self) -> &PgPool {
        &self.store
    }

    /// Obtain a probed lease on the named server.
    ///
    /// Dead sessions are evicted and replaced transparently up to the inner
    /// retry budget; after that the failure surfaces as connection-class.
    /// Unknown servers surface as [`TransferError::Unavailable`].
    pub async fn lease(&self, server: &str) -> Result<Lease, TransferError> {
        self.ensure_pool(server).await?;

        let mut last_err: Option<TransferError> = None;
        for attempt in 0..=INNER_RETRY_BUDGET {
            let (conn, probe_needed) = {
                let pools = self.pools.read().await;
                let entry = pools
                    .get(server)
                    .ok_or_else(|| TransferError::Unavailable(server.to_owned()))?;

                let conn = match entry.pool.acquire().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        last_err = Some(classify_sqlx(e, ""));
                        continue;
                    }
                };
                let probe_needed = !entry.probe_is_fresh();
                (conn, probe_needed)
            };

            let mut lease = Lease {
                server: server.to_owned(),
                conn,
            };

            if !probe_needed {
                return Ok(lease);
            }

            match self.probe_lease(&mut lease).await {
                Ok(()) => {
                    let pools = self.pools.read().await;
                    if let Some(entry) = pools.get(server) {
                        entry.mark_probed();
                    }
                    return Ok(lease);
                }
                Err(e) => {
                    debug!(
                        server,
                        attempt,
                        error = %e,
                        "liveness probe failed, evicting session"
                    );
                    // Detaching drops the dead session instead of returning
                    // it to the pool.
                    let _ = lease.conn.detach();
                    last_err = Some(e);
                }
            }
        }

        // Auth and configuration failures surface as-is; everything that
        // reaches here after the budget is connection-class.
        Err(last_err.unwrap_or_else(|| TransferError::Unavailable(server.to_owned())))
    }

    async fn probe_lease(&self, lease: &mut Lease) -> Result<(), TransferError> {
        let probe = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(lease.connection());
        match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(classify_sqlx(e, "")),
            Err(_) => Err(TransferError::Timeout(format!(
                "liveness probe exceeded {PROBE_TIMEOUT:?}"
            ))),
        }
    }

    /// Create the pool for `server` if it does not exist yet.
    async fn ensure_pool(&self, server: &str) -> Result<(), TransferError> {
        {
            let pools = self.pools.read().await;
            if pools.contains_key(server) {
                return Ok(());
            }
        }

        let config = self.fetch_config(server).await?;
        let options = connect_options(&config);
        let pool = PgPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .min_connections(0)
            .idle_timeout(POOL_IDLE_TIMEOUT)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect_lazy_with(options);

        let mut pools = self.pools.write().await;
        pools.entry(server.to_owned()).or_insert_with(|| {
            info!(server, "created connection pool");
            PoolEntry {
                pool,
                last_probe: Mutex::new(None),
            }
        });
        Ok(())
    }

    /// Fetch a server configuration from the Task Store.
    ///
    /// A disconnected store gets a single reconnection attempt before the
    /// failure surfaces as `Unavailable`.
    pub async fn fetch_config(&self, server: &str) -> Result<ServerConfig, TransferError> {
        let config = match servers::get_server_config(&self.store, server).await {
            Ok(config) => config,
            Err(first) => {
                warn!(server, error = %first, "task store lookup failed, retrying once");
                servers::get_server_config(&self.store, server)
                    .await
                    .map_err(|_| TransferError::Unavailable("task store".to_owned()))?
            }
        };
        config.ok_or_else(|| TransferError::Unavailable(server.to_owned()))
    }

    /// Close and drop the pool of one server. Existing leases stay valid
    /// until released; the next `lease` call builds a fresh pool.
    pub async fn recycle(&self, server: &str) {
        let entry = self.pools.write().await.remove(server);
        if let Some(entry) = entry {
            info!(server, "recycling connection pool");
            entry.pool.close().await;
        }
    }

    /// Close every pool. Used by the health monitor's recovery path and at
    /// shutdown.
    pub async fn close_pools(&self) {
        let entries: Vec<(String, PoolEntry)> =
            self.pools.write().await.drain().collect();
        for (server, entry) in entries {
            debug!(server, "closing connection pool");
            entry.pool.close().await;
        }
    }

    /// Whether a pool currently exists for `server`.
    pub async fn has_pool(&self, server: &str) -> bool {
        self.pools.read().await.contains_key(server)
    }

    /// Acquire-and-release a probed lease; the cheap reachability check
    /// used by the health monitor and the retry queue.
    pub async fn probe(&self, server: &str) -> Result<(), TransferError> {
        self.lease(server).await.map(drop)
    }
}

impl PoolEntry {
    fn probe_is_fresh(&self) -> bool {
        self.last_probe
            .lock()
            .expect("probe timestamp poisoned")
            .is_some_and(|at| at.elapsed() < PROBE_FRESHNESS)
    }

    fn mark_probed(&self) {
        *self.last_probe.lock().expect("probe timestamp poisoned") = Some(Instant::now());
    }
}

/// Build driver options from a server configuration.
///
/// TLS is disabled when the host is a bare IPv4 literal (certificate names
/// never match raw addresses) unless `encrypt` is set explicitly.
pub fn connect_options(config: &ServerConfig) -> PgConnectOptions {
    let ssl_mode = match config.encrypt {
        Some(true) => PgSslMode::Require,
        Some(false) => PgSslMode::Disable,
        None => {
            if config.host.parse::<Ipv4Addr>().is_ok() {
                PgSslMode::Disable
            } else {
                PgSslMode::Prefer
            }
        }
    };

    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port.unwrap_or(5432) as u16)
        .username(&config.username)
        .password(&config.password)
        .database(&config.database_name)
        .ssl_mode(ssl_mode)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn server(host: &str, encrypt: Option<bool>) -> ServerConfig {
        ServerConfig {
            name: "erp".to_owned(),
            host: host.to_owned(),
            port: None,
            username: "replicator".to_owned(),
            password: "secret".to_owned(),
            database_name: "erp_main".to_owned(),
            encrypt,
            trust_cert: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn tls_disabled_for_bare_ipv4() {
        let options = connect_options(&server("10.1.2.3", None));
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Disable));
    }

    #[test]
    fn tls_preferred_for_hostnames() {
        let options = connect_options(&server("erp.internal", None));
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Prefer));
    }

    #[test]
    fn explicit_encrypt_overrides_ip_rule() {
        let options = connect_options(&server("10.1.2.3", Some(true)));
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Require));

        let options = connect_options(&server("erp.internal", Some(false)));
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Disable));
    }

    #[test]
    fn default_port_applied() {
        let options = connect_options(&server("erp.internal", None));
        assert_eq!(options.get_port(), 5432);
    }
}
