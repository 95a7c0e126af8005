//! Encrypted storage of saved connections.
//!
//! Callers only ever hand in and receive plaintext [`OperationData`]. The
//! password inside the URI and any private key contents are sealed before
//! they reach the `saved_connections` table, and opened again on `get`.
//! Rows written by older releases are re-sealed in the current format the
//! first time they are read.

use std::sync::Arc;

use keyseal::CryptoError;
use rusqlite::{params, Connection, OptionalExtension};

use crate::database::{now_unix, Database};
use crate::error::{Result, StoreError, VaultError};
use crate::fingerprint::Fingerprint;
use crate::model::{ConnectionFilter, OperationData, OperationType, SavedConnection};
use crate::uri::{redact, ConnectionId, UriGuard};

/// A `saved_connections` row as stored.
struct StoredRow {
    id: String,
    operation_type: String,
    path: String,
    name: String,
    hostkey: Option<String>,
    ssh_key_name: Option<String>,
    ssh_key_contents: Option<String>,
    created_at: i64,
    updated_at: i64,
}

const SELECT_COLUMNS: &str = "id, operation_type, path, name, hostkey, ssh_key_name, \
                              ssh_key_contents, created_at, updated_at";

impl StoredRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            operation_type: row.get(1)?,
            path: row.get(2)?,
            name: row.get(3)?,
            hostkey: row.get(4)?,
            ssh_key_name: row.get(5)?,
            ssh_key_contents: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn operation_type(&self) -> std::result::Result<OperationType, StoreError> {
        OperationType::from_scheme(&self.operation_type).ok_or_else(|| {
            StoreError::IoFailure(format!(
                "unknown operation type {:?} for {}",
                self.operation_type, self.id
            ))
        })
    }
}

/// Sealed column values ready to be written.
struct SealedRecord {
    path: String,
    ssh_key_contents: Option<String>,
}

fn find_row(conn: &Connection, id: &str) -> rusqlite::Result<Option<StoredRow>> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM saved_connections WHERE id = ?1"),
        params![id],
        StoredRow::from_row,
    )
    .optional()
}

fn pinned_hostkey(conn: &Connection, id: &str) -> rusqlite::Result<Option<Option<String>>> {
    conn.query_row(
        "SELECT hostkey FROM saved_connections WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )
    .optional()
}

/// Fails when `record` would change or clear a pinned host key.
fn check_pin(
    id: &ConnectionId,
    pinned: Option<&str>,
    record: &OperationData,
) -> std::result::Result<(), StoreError> {
    match pinned {
        Some(pinned) if record.host_key.as_ref().map(Fingerprint::as_str) != Some(pinned) => {
            Err(StoreError::Conflict(format!(
                "host key for {} is pinned; use the trust update action to change it",
                id
            )))
        }
        _ => Ok(()),
    }
}

/// Saved connections with sealed secrets.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    db: Arc<Database>,
    guard: UriGuard,
}

impl CredentialStore {
    /// Creates a store over `db`, sealing secrets through `guard`.
    pub fn new(db: Arc<Database>, guard: UriGuard) -> Self {
        Self { db, guard }
    }

    /// The guard used to seal and open secrets.
    pub fn guard(&self) -> &UriGuard {
        &self.guard
    }

    fn seal(&self, record: &OperationData) -> Result<SealedRecord> {
        let path = self.guard.sanitize_for_storage(&record.uri)?;
        let ssh_key_contents = record
            .ssh_key_contents
            .as_ref()
            .map(|contents| self.guard.seal_secret(contents))
            .transpose()?;
        Ok(SealedRecord {
            path,
            ssh_key_contents,
        })
    }

    /// Saves `record`, overwriting any connection with the same identifier.
    ///
    /// Fails with [`StoreError::Conflict`] if the existing row has a pinned
    /// host key that `record` would change or clear.
    pub fn save(&self, record: &OperationData) -> Result<ConnectionId> {
        let id = record.check_operation_type()?;
        let sealed = self.seal(record)?;

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            if let Some(pinned) = pinned_hostkey(&tx, id.as_str())? {
                check_pin(&id, pinned.as_deref(), record)?;
            }
            let now = now_unix();
            tx.execute(
                r#"
                INSERT INTO saved_connections
                    (id, operation_type, path, name, hostkey, ssh_key_name, ssh_key_contents,
                     created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                ON CONFLICT(id) DO UPDATE SET
                    operation_type = excluded.operation_type,
                    path = excluded.path,
                    name = excluded.name,
                    hostkey = excluded.hostkey,
                    ssh_key_name = excluded.ssh_key_name,
                    ssh_key_contents = excluded.ssh_key_contents,
                    updated_at = excluded.updated_at
                "#,
                params![
                    id.as_str(),
                    record.operation_type.scheme(),
                    sealed.path,
                    record.name,
                    record.host_key.as_ref().map(Fingerprint::as_str),
                    record.ssh_key_name,
                    sealed.ssh_key_contents,
                    now
                ],
            )?;
            tx.commit()?;
            Ok::<_, VaultError>(())
        })?;

        tracing::info!("Saved connection {} ({})", id, redact(&sealed.path));
        Ok(id)
    }

    /// Loads and decrypts the connection `id`.
    ///
    /// Fails with [`StoreError::NotFound`] when absent and
    /// [`VaultError::Undecryptable`] when the stored secrets are corrupt or
    /// sealed under another key. Key store failures surface unchanged as
    /// [`VaultError::Crypto`].
    pub fn get(&self, id: &ConnectionId) -> Result<OperationData> {
        let row = self
            .db
            .with_conn(|conn| Ok::<_, StoreError>(find_row(conn, id.as_str())?))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        // a key store outage is not a property of the row
        let undecryptable = |err: VaultError| match err {
            VaultError::Crypto(source @ CryptoError::KeyUnavailable(_)) => {
                VaultError::Crypto(source)
            }
            VaultError::Crypto(source) => VaultError::Undecryptable {
                identifier: id.to_string(),
                source,
            },
            other => other,
        };

        let revealed = self.guard.reveal(&row.path).map_err(undecryptable)?;
        let key = row
            .ssh_key_contents
            .as_deref()
            .map(|sealed| self.guard.open_secret(sealed))
            .transpose()
            .map_err(undecryptable)?;

        let key_needs_migration = key.as_ref().is_some_and(|k| k.needs_migration());
        let record = OperationData {
            operation_type: row.operation_type()?,
            uri: revealed.uri,
            name: row.name.clone(),
            host_key: row.hostkey.clone().map(Fingerprint::from_stored),
            ssh_key_name: row.ssh_key_name.clone(),
            ssh_key_contents: key.map(|k| k.into_plaintext()),
        };

        if revealed.needs_migration || key_needs_migration {
            if let Err(e) = self.migrate(&row, &record) {
                tracing::warn!("Failed to migrate legacy credential {}: {}", id, e);
            }
        }
        Ok(record)
    }

    /// Re-seals a row read in the legacy format. The update only applies if
    /// the row is still the one that was read.
    fn migrate(&self, row: &StoredRow, record: &OperationData) -> Result<()> {
        let sealed = self.seal(record)?;
        let updated = self.db.with_conn(|conn| {
            let rows = conn.execute(
                r#"
                UPDATE saved_connections
                SET path = ?1, ssh_key_contents = ?2
                WHERE id = ?3 AND path = ?4 AND ssh_key_contents IS ?5
                "#,
                params![
                    sealed.path,
                    sealed.ssh_key_contents,
                    row.id,
                    row.path,
                    row.ssh_key_contents
                ],
            )?;
            Ok::<_, StoreError>(rows > 0)
        })?;
        if updated {
            tracing::info!("Migrated legacy credential {} to the current format", row.id);
        }
        Ok(())
    }

    /// Like [`get`](Self::get), but a missing connection is `None`.
    pub fn find(&self, id: &ConnectionId) -> Result<Option<OperationData>> {
        match self.get(id) {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Deletes the connection `id`. Returns whether a row was removed.
    pub fn delete(&self, id: &ConnectionId) -> Result<bool> {
        let removed = self.db.with_conn(|conn| {
            let rows = conn.execute(
                "DELETE FROM saved_connections WHERE id = ?1",
                params![id.as_str()],
            )?;
            Ok::<_, StoreError>(rows > 0)
        })?;
        if removed {
            tracing::info!("Deleted connection {}", id);
        }
        Ok(removed)
    }

    /// Replaces the connection `previous` with `record`, which may live
    /// under a different identifier.
    ///
    /// Fails with [`StoreError::NotFound`] if `previous` does not exist and
    /// [`StoreError::Conflict`] if the new identifier belongs to another
    /// connection. When the identifier is unchanged, a pinned host key may
    /// not change.
    pub fn update(&self, previous: &ConnectionId, record: &OperationData) -> Result<ConnectionId> {
        let id = record.check_operation_type()?;
        let sealed = self.seal(record)?;

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let existing = find_row(&tx, previous.as_str())?
                .ok_or_else(|| StoreError::NotFound(previous.to_string()))?;

            if id == *previous {
                check_pin(&id, existing.hostkey.as_deref(), record)?;
            } else if pinned_hostkey(&tx, id.as_str())?.is_some() {
                return Err(VaultError::from(StoreError::Conflict(format!(
                    "{} is already saved as another connection",
                    id
                ))));
            }

            tx.execute(
                "DELETE FROM saved_connections WHERE id = ?1",
                params![previous.as_str()],
            )?;
            tx.execute(
                r#"
                INSERT INTO saved_connections
                    (id, operation_type, path, name, hostkey, ssh_key_name, ssh_key_contents,
                     created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    id.as_str(),
                    record.operation_type.scheme(),
                    sealed.path,
                    record.name,
                    record.host_key.as_ref().map(Fingerprint::as_str),
                    record.ssh_key_name,
                    sealed.ssh_key_contents,
                    existing.created_at,
                    now_unix()
                ],
            )?;
            tx.commit()?;
            Ok::<_, VaultError>(())
        })?;

        if id != *previous {
            tracing::info!("Moved connection {} to {}", previous, id);
        } else {
            tracing::info!("Updated connection {}", id);
        }
        Ok(id)
    }

    /// Changes the display name of `id`.
    pub fn rename(&self, id: &ConnectionId, name: &str) -> Result<()> {
        let rows = self.db.with_conn(|conn| {
            Ok::<_, StoreError>(conn.execute(
                "UPDATE saved_connections SET name = ?1, updated_at = ?2 WHERE id = ?3",
                params![name, now_unix(), id.as_str()],
            )?)
        })?;
        if rows == 0 {
            return Err(StoreError::NotFound(id.to_string()).into());
        }
        Ok(())
    }

    /// Lists saved connections without decrypting anything, ordered by name.
    pub fn list(&self, filter: &ConnectionFilter) -> Result<Vec<SavedConnection>> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM saved_connections ORDER BY name COLLATE NOCASE, id"
            ))?;
            let rows = stmt
                .query_map([], StoredRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok::<_, StoreError>(rows)
        })?;

        let mut connections = Vec::with_capacity(rows.len());
        for row in rows {
            let id = ConnectionId::parse(&row.id).map_err(|e| {
                StoreError::IoFailure(format!("corrupt connection id {}: {}", row.id, e))
            })?;
            let connection = SavedConnection {
                operation_type: row.operation_type()?,
                id,
                display_uri: redact(&row.path),
                name: row.name,
                host_key: row.hostkey.map(Fingerprint::from_stored),
                ssh_key_name: row.ssh_key_name,
                has_ssh_key: row.ssh_key_contents.is_some(),
                created_at: row.created_at,
                updated_at: row.updated_at,
            };
            if filter.matches(&connection) {
                connections.push(connection);
            }
        }
        Ok(connections)
    }

    /// The host key pinned on the saved connection matching `uri`.
    ///
    /// Any password in `uri` is ignored, so a freshly re-sealed URI finds
    /// the same record.
    pub fn remote_host_key(&self, uri: &str) -> Result<Option<Fingerprint>> {
        let id = ConnectionId::parse(uri)?;
        let hostkey = self.db.with_conn(|conn| {
            Ok::<_, StoreError>(pinned_hostkey(conn, id.as_str())?)
        })?;
        Ok(hostkey.flatten().map(Fingerprint::from_stored))
    }

    /// Pins `fingerprint` on the connection if it has none yet. Returns
    /// whether the row changed.
    pub(crate) fn pin_host_key_if_absent(
        &self,
        id: &ConnectionId,
        fingerprint: &Fingerprint,
    ) -> Result<bool> {
        let rows = self.db.with_conn(|conn| {
            Ok::<_, StoreError>(conn.execute(
                "UPDATE saved_connections SET hostkey = ?1, updated_at = ?2 \
                 WHERE id = ?3 AND hostkey IS NULL",
                params![fingerprint.as_str(), now_unix(), id.as_str()],
            )?)
        })?;
        Ok(rows > 0)
    }

    /// Overwrites the pinned key on the connection. Returns whether a saved
    /// connection exists for `id`.
    pub(crate) fn replace_host_key(
        &self,
        id: &ConnectionId,
        fingerprint: &Fingerprint,
    ) -> Result<bool> {
        let rows = self.db.with_conn(|conn| {
            Ok::<_, StoreError>(conn.execute(
                "UPDATE saved_connections SET hostkey = ?1, updated_at = ?2 WHERE id = ?3",
                params![fingerprint.as_str(), now_unix(), id.as_str()],
            )?)
        })?;
        Ok(rows > 0)
    }
}
