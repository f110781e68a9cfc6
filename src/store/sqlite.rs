//! SQLite-backed `TransferStore`.
//!
//! Schema migrations are version-gated exactly like the rest of this
//! codebase: a `schema_version` row is read on open, and any version
//! below [`schema::SCHEMA_VERSION`] triggers the pending migrations. Only
//! version 1 exists today, so `init_schema` just creates the tables if
//! they're missing and stamps the version row.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::store::{schema, PersistedChunk, PersistedSession, SessionDirection, TransferStatus};
use crate::store::TransferStore;

/// A `TransferStore` backed by a SQLite database file (or an in-memory
/// database, for tests).
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (creating if necessary) a SQLite database at `path` and
    /// ensures its schema is current.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens a private in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(schema::CREATE_TABLES)?;
        let version: Option<i64> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        if version.is_none() {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![schema::SCHEMA_VERSION],
            )?;
        }
        Ok(())
    }

    fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<PersistedSession> {
        let direction: String = row.get("direction")?;
        let status: String = row.get("status")?;
        Ok(PersistedSession {
            session_key: row.get("session_key")?,
            direction: SessionDirection::parse(&direction).unwrap_or(SessionDirection::Outgoing),
            status: TransferStatus::parse(&status).unwrap_or(TransferStatus::Active),
            upload_id: row.get("upload_id")?,
            protocol_version: row.get("protocol_version")?,
            name: row.get("name")?,
            size: row.get::<_, i64>("size")? as u64,
            mime_type: row.get("mime_type")?,
            chunk_size: row.get::<_, i64>("chunk_size")? as u64,
            total_chunks: row.get::<_, i64>("total_chunks")? as u64,
            next_chunk_index: row.get::<_, i64>("next_chunk_index")? as u64,
            bytes_transferred: row.get::<_, i64>("bytes_transferred")? as u64,
            remote_peer_id: row.get("remote_peer_id")?,
            fingerprint: row.get("fingerprint")?,
            file_checksum: row.get("file_checksum")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[async_trait]
impl TransferStore for SqliteStore {
    async fn put_session(&self, session: &PersistedSession) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (
                session_key, direction, status, upload_id, protocol_version, name, size,
                mime_type, chunk_size, total_chunks, next_chunk_index, bytes_transferred,
                remote_peer_id, fingerprint, file_checksum, created_at, updated_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)
            ON CONFLICT(session_key) DO UPDATE SET
                direction=excluded.direction,
                status=excluded.status,
                protocol_version=excluded.protocol_version,
                name=excluded.name,
                size=excluded.size,
                mime_type=excluded.mime_type,
                chunk_size=excluded.chunk_size,
                total_chunks=excluded.total_chunks,
                next_chunk_index=excluded.next_chunk_index,
                bytes_transferred=excluded.bytes_transferred,
                remote_peer_id=excluded.remote_peer_id,
                fingerprint=excluded.fingerprint,
                file_checksum=excluded.file_checksum,
                updated_at=excluded.updated_at",
            params![
                session.session_key,
                session.direction.as_str(),
                session.status.as_str(),
                session.upload_id,
                session.protocol_version,
                session.name,
                session.size as i64,
                session.mime_type,
                session.chunk_size as i64,
                session.total_chunks as i64,
                session.next_chunk_index as i64,
                session.bytes_transferred as i64,
                session.remote_peer_id,
                session.fingerprint,
                session.file_checksum,
                session.created_at,
                session.updated_at,
            ],
        )?;
        Ok(())
    }

    async fn get_session(&self, session_key: &str) -> Result<Option<PersistedSession>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM sessions WHERE session_key = ?1",
            params![session_key],
            Self::row_to_session,
        )
        .optional()
        .map_err(Error::from)
    }

    async fn find_outgoing_session_by_fingerprint(
        &self,
        fingerprint: &str,
        remote_peer_id: Option<&str>,
    ) -> Result<Option<PersistedSession>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM sessions
             WHERE direction = 'outgoing' AND status != 'completed' AND fingerprint = ?1
             ORDER BY (remote_peer_id IS NOT NULL AND remote_peer_id = ?2) DESC, updated_at DESC
             LIMIT 1",
        )?;
        stmt.query_row(params![fingerprint, remote_peer_id], Self::row_to_session)
            .optional()
            .map_err(Error::from)
    }

    async fn put_chunk(&self, chunk: &PersistedChunk) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO chunks (upload_id, chunk_index, data, checksum, updated_at)
             VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(upload_id, chunk_index) DO UPDATE SET
                data=excluded.data, checksum=excluded.checksum, updated_at=excluded.updated_at",
            params![
                chunk.upload_id,
                chunk.chunk_index as i64,
                chunk.data,
                chunk.checksum,
                chunk.updated_at,
            ],
        )?;
        Ok(())
    }

    async fn get_chunk(&self, upload_id: &str, chunk_index: u64) -> Result<Option<PersistedChunk>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT upload_id, chunk_index, data, checksum, updated_at FROM chunks
             WHERE upload_id = ?1 AND chunk_index = ?2",
            params![upload_id, chunk_index as i64],
            |row| {
                Ok(PersistedChunk {
                    upload_id: row.get(0)?,
                    chunk_index: row.get::<_, i64>(1)? as u64,
                    data: row.get(2)?,
                    checksum: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    async fn get_chunk_count(&self, upload_id: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE upload_id = ?1",
            params![upload_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    async fn get_contiguous_chunk_count(
        &self,
        upload_id: &str,
        total_chunks: u64,
    ) -> Result<u64> {
        let conn = self.conn.lock();
        let mut count = 0u64;
        while count < total_chunks {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM chunks WHERE upload_id = ?1 AND chunk_index = ?2",
                    params![upload_id, count as i64],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            if !exists {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    async fn delete_chunks_from(&self, upload_id: &str, from_chunk: u64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM chunks WHERE upload_id = ?1 AND chunk_index >= ?2",
            params![upload_id, from_chunk as i64],
        )?;
        Ok(())
    }

    async fn delete_upload(&self, upload_id: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chunks WHERE upload_id = ?1", params![upload_id])?;
        tx.execute(
            "DELETE FROM sessions WHERE upload_id = ?1",
            params![upload_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn prune_stale_sessions(&self, now_millis: i64, max_age_millis: i64) -> Result<u64> {
        let cutoff = now_millis - max_age_millis;
        let mut conn = self.conn.lock();
        let stale_ids: Vec<String> = {
            let mut stmt =
                conn.prepare("SELECT upload_id FROM sessions WHERE updated_at < ?1")?;
            let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        let tx = conn.transaction()?;
        for upload_id in &stale_ids {
            tx.execute("DELETE FROM chunks WHERE upload_id = ?1", params![upload_id])?;
            tx.execute(
                "DELETE FROM sessions WHERE upload_id = ?1",
                params![upload_id],
            )?;
        }
        tx.commit()?;
        Ok(stale_ids.len() as u64)
    }
}
