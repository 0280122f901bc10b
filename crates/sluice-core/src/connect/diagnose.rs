//! Full diagnostic pass for one server: each connectivity layer is probed
//! in order and reported as a step with a pass/fail outcome and, on
//! failure, a remediation hint keyed to the error class.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use serde::Serialize;
use sqlx::Connection;
use sqlx::PgConnection;

use super::{ConnectionManager, connect_options};

/// Cap for the bypass connect and each probe query.
const STEP_TIMEOUT: Duration = Duration::from_secs(20);

/// Outcome of one diagnostic step.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticStep {
    pub name: String,
    pub passed: bool,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Structured result of a full diagnostic pass.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub server: String,
    pub steps: Vec<DiagnosticStep>,
    /// True when every step passed.
    pub healthy: bool,
}

impl DiagnosticReport {
    fn push_ok(&mut self, name: &str, detail: impl Into<String>) {
        self.steps.push(DiagnosticStep {
            name: name.to_owned(),
            passed: true,
            detail: detail.into(),
            hint: None,
        });
    }

    fn push_failed(&mut self, name: &str, detail: impl Into<String>, hint: Option<String>) {
        self.healthy = false;
        self.steps.push(DiagnosticStep {
            name: name.to_owned(),
            passed: false,
            detail: detail.into(),
            hint,
        });
    }
}

impl ConnectionManager {
    /// Run the full diagnostic sequence for one server.
    ///
    /// Steps: pool lookup, Task Store reachability, configuration fetch,
    /// direct connect bypassing the pool, identity query, and a timed
    /// single-table probe. Later steps are skipped once a prerequisite
    /// fails.
    pub async fn diagnose(&self, server: &str) -> DiagnosticReport {
        let mut report = DiagnosticReport {
            server: server.to_owned(),
            steps: Vec::new(),
            healthy: true,
        };

        // 1. Pool lookup. Informational: a missing pool just means the
        // server has not been leased yet.
        if self.has_pool(server).await {
            report.push_ok("pool", "connection pool present");
        } else {
            report.push_ok("pool", "no pool yet (created on first lease)");
        }

        // 2. Task Store reachability.
        match sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(self.store())
            .await
        {
            Ok(_) => report.push_ok("task-store", "task store reachable"),
            Err(e) => {
                report.push_failed(
                    "task-store",
                    format!("task store unreachable: {e}"),
                    Some("check the sluice database URL and that PostgreSQL is running".into()),
                );
                return report;
            }
        }

        // 3. Configuration fetch.
        let config = match self.fetch_config(server).await {
            Ok(config) => {
                report.push_ok(
                    "config",
                    format!(
                        "configuration found: {}@{}:{}/{}",
                        config.username,
                        config.host,
                        config.port.unwrap_or(5432),
                        config.database_name
                    ),
                );
                config
            }
            Err(e) => {
                report.push_failed(
                    "config",
                    format!("no configuration for {server:?}: {e}"),
                    Some(format!("register the server with `sluice server upsert {server}`")),
                );
                return report;
            }
        };

        // 4. Direct connect, bypassing the pool.
        let options = connect_options(&config);
        let connect = PgConnection::connect_with(&options);
        let mut conn = match tokio::time::timeout(STEP_TIMEOUT, connect).await {
            Ok(Ok(conn)) => {
                report.push_ok("connect", "direct connection established");
                conn
            }
            Ok(Err(e)) => {
                let detail = e.to_string();
                let hint = connect_hint(&detail, &config.host, config.encrypt);
                report.push_failed("connect", format!("direct connect failed: {detail}"), hint);
                return report;
            }
            Err(_) => {
                report.push_failed(
                    "connect",
                    format!("direct connect exceeded {STEP_TIMEOUT:?}"),
                    Some("check network routing and firewall rules between sluice and the server".into()),
                );
                return report;
            }
        };

        // 5. Identity query.
        let identity = sqlx::query_as::<_, (String, String)>(
            "SELECT current_database()::text, version()::text",
        )
        .fetch_one(&mut conn)
        .await;
        match identity {
            Ok((database, version)) => {
                let version = version.split(' ').take(2).collect::<Vec<_>>().join(" ");
                report.push_ok("identity", format!("{database} on {version}"));
            }
            Err(e) => {
                report.push_failed(
                    "identity",
                    format!("identity query failed: {e}"),
                    Some("the session connected but cannot run queries; check role permissions".into()),
                );
                return report;
            }
        }

        // 6. Single-table probe with response-time measurement.
        let started = Instant::now();
        let probe = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = 'public'",
        )
        .fetch_one(&mut conn)
        .await;
        match probe {
            Ok(tables) => {
                let elapsed = started.elapsed();
                report.push_ok(
                    "probe",
                    format!("{tables} public tables, responded in {} ms", elapsed.as_millis()),
                );
            }
            Err(e) => {
                report.push_failed(
                    "probe",
                    format!("table probe failed: {e}"),
                    Some("the catalog is not readable; check the user's schema grants".into()),
                );
            }
        }

        report
    }
}

/// Map a connect failure to a remediation hint.
fn connect_hint(detail: &str, host: &str, encrypt: Option<bool>) -> Option<String> {
    let lowered = detail.to_lowercase();
    if lowered.contains("password") || lowered.contains("authentication") {
        return Some("authentication failed; check the stored username and password".into());
    }
    if lowered.contains("refused") {
        return Some("connection refused; check that the server is running and the port is correct".into());
    }
    if lowered.contains("timed out") || lowered.contains("timeout") {
        return Some("connect timed out; check network routing and firewall rules".into());
    }
    if (lowered.contains("tls") || lowered.contains("certificate") || lowered.contains("ssl"))
        && host.parse::<Ipv4Addr>().is_ok()
        && encrypt == Some(true)
    {
        return Some(
            "TLS is forced on for a bare IP address; certificate names cannot match, \
             consider clearing the encrypt override"
                .into(),
        );
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_hint_at_credentials() {
        let hint = connect_hint("password authentication failed for user", "db.internal", None);
        assert!(hint.unwrap().contains("username and password"));
    }

    #[test]
    fn refused_hints_at_server_down() {
        let hint = connect_hint("connection refused", "db.internal", None);
        assert!(hint.unwrap().contains("refused"));
    }

    #[test]
    fn tls_on_ip_gets_specific_hint() {
        let hint = connect_hint("error performing TLS handshake", "10.0.0.5", Some(true));
        assert!(hint.unwrap().contains("bare IP"));

        // Hostname with TLS trouble gets no special hint.
        let hint = connect_hint("error performing TLS handshake", "db.internal", Some(true));
        assert!(hint.is_none());
    }

    #[test]
    fn unknown_errors_get_no_hint() {
        assert!(connect_hint("weird driver failure", "db.internal", None).is_none());
    }
}
