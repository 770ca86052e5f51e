//! Durable authorization store backed by SQLite.
//!
//! One logical mutex guards the connection; every public method takes the
//! lock, runs its statements, and releases it. Multi-statement operations run
//! inside a transaction so a crash never leaves a half-written grant.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::errors::GatewayError;

/// Gateway-side client registration for one plugin service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRecord {
    pub id: i64,
    /// Qualified service id (or bare plugin id for service-less requests).
    pub service_id: String,
    pub client_id: String,
}

/// Token issued to an external caller.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    /// Unix seconds; zero means the token never expires.
    pub expires_at: u64,
}

/// Stored caller grant looked up during token validation.
#[derive(Debug, Clone)]
pub struct CallerToken {
    pub client_id: String,
    pub origin: String,
    pub scopes: Vec<String>,
    /// Unix seconds; zero means the token never expires.
    pub expires_at: u64,
}

impl CallerToken {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at != 0 && self.expires_at < now
    }

    pub fn covers_profile(&self, profile: &str) -> bool {
        self.scopes.iter().any(|s| s.eq_ignore_ascii_case(profile))
    }
}

/// SQLite-backed store for plugin auth records and caller grants.
pub struct LocalAuthStore {
    conn: Mutex<Connection>,
}

impl LocalAuthStore {
    /// Open the store at `path`, or in memory when `path` is `None`.
    pub fn open(path: Option<&Path>) -> Result<Self, GatewayError> {
        let conn = match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        GatewayError::Internal(format!(
                            "cannot create store directory {}: {e}",
                            parent.display()
                        ))
                    })?;
                }
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS auth_records (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                service_id TEXT NOT NULL UNIQUE,
                client_id  TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS auth_tokens (
                record_id    INTEGER PRIMARY KEY
                             REFERENCES auth_records(id) ON DELETE CASCADE,
                access_token TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS oauth_clients (
                client_id  TEXT PRIMARY KEY,
                origin     TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS oauth_tokens (
                access_token TEXT PRIMARY KEY,
                client_id    TEXT NOT NULL
                             REFERENCES oauth_clients(client_id) ON DELETE CASCADE,
                scopes       TEXT NOT NULL,
                expires_at   INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ----- gateway-side records (gateway acting as a client of plugins) -----

    /// Record the client id a plugin issued for `service_id`, replacing any
    /// previous registration (and its token, via cascade).
    pub fn put_client(&self, service_id: &str, client_id: &str) -> Result<(), GatewayError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM auth_records WHERE service_id = ?1",
            params![service_id],
        )?;
        conn.execute(
            "INSERT INTO auth_records (service_id, client_id, created_at) VALUES (?1, ?2, ?3)",
            params![service_id, client_id, now()],
        )?;
        Ok(())
    }

    pub fn get_client(&self, service_id: &str) -> Result<Option<AuthRecord>, GatewayError> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT id, service_id, client_id FROM auth_records WHERE service_id = ?1",
                params![service_id],
                |row| {
                    Ok(AuthRecord {
                        id: row.get(0)?,
                        service_id: row.get(1)?,
                        client_id: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Drop the record (and token) for one service id.
    pub fn delete(&self, service_id: &str) -> Result<(), GatewayError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM auth_records WHERE service_id = ?1",
            params![service_id],
        )?;
        Ok(())
    }

    /// Drop every record belonging to `plugin_id` in one transaction: rows
    /// whose service id is the bare plugin id or is qualified with it.
    pub fn delete_all_for_plugin(&self, plugin_id: &str) -> Result<usize, GatewayError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let suffix = format!("%.{plugin_id}");
        let deleted = tx.execute(
            "DELETE FROM auth_records WHERE service_id = ?1 OR service_id LIKE ?2",
            params![plugin_id, suffix],
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Store the plugin-issued access token for `service_id`. The record must
    /// already exist.
    pub fn set_token(&self, service_id: &str, access_token: &str) -> Result<(), GatewayError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let record_id: Option<i64> = tx
            .query_row(
                "SELECT id FROM auth_records WHERE service_id = ?1",
                params![service_id],
                |row| row.get(0),
            )
            .optional()?;
        let record_id = record_id.ok_or_else(|| {
            GatewayError::Internal(format!("no auth record for service {service_id}"))
        })?;
        tx.execute(
            "INSERT OR REPLACE INTO auth_tokens (record_id, access_token) VALUES (?1, ?2)",
            params![record_id, access_token],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_token(&self, service_id: &str) -> Result<Option<String>, GatewayError> {
        let conn = self.conn.lock();
        let token = conn
            .query_row(
                "SELECT t.access_token FROM auth_tokens t \
                 JOIN auth_records r ON r.id = t.record_id \
                 WHERE r.service_id = ?1",
                params![service_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(token)
    }

    pub fn delete_token(&self, service_id: &str) -> Result<(), GatewayError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM auth_tokens WHERE record_id IN \
             (SELECT id FROM auth_records WHERE service_id = ?1)",
            params![service_id],
        )?;
        Ok(())
    }

    // ----- caller-side grants (external apps calling the gateway) -----

    /// Register a caller client for `origin`, replacing any previous client
    /// for the same origin (and its tokens, via cascade).
    pub fn grant_client(&self, origin: &str) -> Result<String, GatewayError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM oauth_clients WHERE origin = ?1",
            params![origin],
        )?;
        let client_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO oauth_clients (client_id, origin, created_at) VALUES (?1, ?2, ?3)",
            params![client_id, origin, now()],
        )?;
        tx.commit()?;
        Ok(client_id)
    }

    /// Origin the given caller client was registered for.
    pub fn client_origin(&self, client_id: &str) -> Result<Option<String>, GatewayError> {
        let conn = self.conn.lock();
        let origin = conn
            .query_row(
                "SELECT origin FROM oauth_clients WHERE client_id = ?1",
                params![client_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(origin)
    }

    /// Issue an access token for `client_id` covering `scopes`. A TTL of
    /// zero produces a token that never expires.
    pub fn issue_token(
        &self,
        client_id: &str,
        scopes: &[String],
        ttl_seconds: u64,
    ) -> Result<IssuedToken, GatewayError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let known: Option<String> = tx
            .query_row(
                "SELECT client_id FROM oauth_clients WHERE client_id = ?1",
                params![client_id],
                |row| row.get(0),
            )
            .optional()?;
        if known.is_none() {
            return Err(GatewayError::NotFoundClientId);
        }
        // One live token per client.
        tx.execute(
            "DELETE FROM oauth_tokens WHERE client_id = ?1",
            params![client_id],
        )?;
        let access_token = Uuid::new_v4().to_string();
        let expires_at = if ttl_seconds == 0 {
            0
        } else {
            now() + ttl_seconds
        };
        tx.execute(
            "INSERT INTO oauth_tokens (access_token, client_id, scopes, expires_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![access_token, client_id, scopes.join(","), expires_at],
        )?;
        tx.commit()?;
        Ok(IssuedToken {
            access_token,
            expires_at,
        })
    }

    pub fn lookup_token(&self, access_token: &str) -> Result<Option<CallerToken>, GatewayError> {
        let conn = self.conn.lock();
        let token = conn
            .query_row(
                "SELECT t.client_id, c.origin, t.scopes, t.expires_at \
                 FROM oauth_tokens t \
                 JOIN oauth_clients c ON c.client_id = t.client_id \
                 WHERE t.access_token = ?1",
                params![access_token],
                |row| {
                    let scopes: String = row.get(2)?;
                    Ok(CallerToken {
                        client_id: row.get(0)?,
                        origin: row.get(1)?,
                        scopes: scopes
                            .split(',')
                            .filter(|s| !s.is_empty())
                            .map(str::to_string)
                            .collect(),
                        expires_at: row.get::<_, i64>(3)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(token)
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
