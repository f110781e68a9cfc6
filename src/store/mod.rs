//! Persistent transfer store (C3).
//!
//! Durable key-value service backing resumable transfers: one `sessions`
//! row per `(direction, uploadId)` and one `chunks` row per
//! `(uploadId, chunkIndex)`. [`sqlite::SqliteStore`] is the production
//! backend; [`memory::MemoryStore`] is an in-memory fake for tests and
//! any host that doesn't need durability across restarts.

pub mod memory;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which side of a transfer a persisted session represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionDirection {
    /// This endpoint is receiving the file.
    Incoming,
    /// This endpoint is sending the file.
    Outgoing,
}

impl SessionDirection {
    /// The `sessionKey` prefix for this direction.
    pub fn prefix(self) -> &'static str {
        match self {
            SessionDirection::Incoming => "incoming",
            SessionDirection::Outgoing => "outgoing",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            SessionDirection::Incoming => "incoming",
            SessionDirection::Outgoing => "outgoing",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "incoming" => Some(Self::Incoming),
            "outgoing" => Some(Self::Outgoing),
            _ => None,
        }
    }
}

/// Lifecycle status persisted for a session. Runtime-only states
/// (`Negotiating`, `Paused`) never reach the store — resume is keyed off
/// `next_chunk_index`, not a state label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// The transfer is in progress or paused mid-stream but resumable.
    Active,
    /// The transfer finished and its checksum verified.
    Completed,
    /// The transfer failed and will not resume under this `uploadId`.
    Failed,
}

impl TransferStatus {
    fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Active => "active",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A durable per-(direction, uploadId) transfer record.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedSession {
    /// `"incoming:"` or `"outgoing:"` followed by `upload_id`.
    pub session_key: String,
    pub direction: SessionDirection,
    pub status: TransferStatus,
    pub upload_id: String,
    pub protocol_version: u32,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub chunk_size: u64,
    pub total_chunks: u64,
    /// Next chunk index to send/expect. Never decreases for an `Active`
    /// session except on an explicit retransmit reset.
    pub next_chunk_index: u64,
    pub bytes_transferred: u64,
    pub remote_peer_id: Option<String>,
    pub fingerprint: Option<String>,
    pub file_checksum: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PersistedSession {
    /// Builds the `sessionKey` for a direction and upload id.
    pub fn session_key_for(direction: SessionDirection, upload_id: &str) -> String {
        format!("{}:{}", direction.prefix(), upload_id)
    }
}

/// A durable record of one received/sent chunk's bytes and checksum.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedChunk {
    pub upload_id: String,
    pub chunk_index: u64,
    pub data: Vec<u8>,
    pub checksum: String,
    pub updated_at: i64,
}

/// Durable key-value service for sessions and chunks.
///
/// Implementations must serialize chunk writes for a single `upload_id`
/// in the order the engine issues them — the engine's per-file write
/// queue already guarantees single-writer-per-file, so the store itself
/// needs no internal locking beyond what its backend requires for
/// concurrent `upload_id`s.
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Inserts or replaces a session record.
    async fn put_session(&self, session: &PersistedSession) -> Result<()>;

    /// Fetches a session by its `sessionKey`.
    async fn get_session(&self, session_key: &str) -> Result<Option<PersistedSession>>;

    /// Finds the most-recently-updated non-completed outgoing session
    /// with the given fingerprint, preferring one with a matching
    /// `remote_peer_id` when more than one candidate exists.
    async fn find_outgoing_session_by_fingerprint(
        &self,
        fingerprint: &str,
        remote_peer_id: Option<&str>,
    ) -> Result<Option<PersistedSession>>;

    /// Inserts or replaces a chunk record.
    async fn put_chunk(&self, chunk: &PersistedChunk) -> Result<()>;

    /// Fetches a chunk by `(upload_id, chunk_index)`.
    async fn get_chunk(&self, upload_id: &str, chunk_index: u64) -> Result<Option<PersistedChunk>>;

    /// Number of chunks stored for `upload_id`, contiguous or not.
    async fn get_chunk_count(&self, upload_id: &str) -> Result<u64>;

    /// Length of the longest gap-free `0..n` prefix of stored chunk
    /// indices, capped at `total_chunks`.
    async fn get_contiguous_chunk_count(&self, upload_id: &str, total_chunks: u64)
        -> Result<u64>;

    /// Deletes every stored chunk with index `>= from_chunk`.
    async fn delete_chunks_from(&self, upload_id: &str, from_chunk: u64) -> Result<()>;

    /// Atomically deletes a session and all of its chunks.
    async fn delete_upload(&self, upload_id: &str) -> Result<()>;

    /// Deletes every session (and its chunks) whose `updated_at` is older
    /// than `now_millis - max_age_millis`.
    async fn prune_stale_sessions(&self, now_millis: i64, max_age_millis: i64) -> Result<u64>;
}

/// Default session TTL: 24 hours, in milliseconds.
pub const SESSION_TTL_MILLIS: i64 = 24 * 60 * 60 * 1000;

#[cfg(test)]
mod contract_tests {
    //! Shared behavioral contract exercised against every `TransferStore`
    //! implementation, so `sqlite::SqliteStore` and `memory::MemoryStore`
    //! cannot silently diverge.
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::sqlite::SqliteStore;

    fn sample_session(upload_id: &str, next_chunk_index: u64) -> PersistedSession {
        PersistedSession {
            session_key: PersistedSession::session_key_for(SessionDirection::Outgoing, upload_id),
            direction: SessionDirection::Outgoing,
            status: TransferStatus::Active,
            upload_id: upload_id.to_string(),
            protocol_version: 2,
            name: "file.bin".to_string(),
            size: 1000,
            mime_type: "application/octet-stream".to_string(),
            chunk_size: 100,
            total_chunks: 10,
            next_chunk_index,
            bytes_transferred: next_chunk_index * 100,
            remote_peer_id: Some("peer-1".to_string()),
            fingerprint: Some("file.bin::1000::application/octet-stream::0".to_string()),
            file_checksum: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    async fn run_put_and_get_session_round_trips(store: &dyn TransferStore) {
        let session = sample_session("upload-1", 3);
        store.put_session(&session).await.unwrap();
        let fetched = store.get_session(&session.session_key).await.unwrap();
        assert_eq!(fetched, Some(session));
    }

    async fn run_contiguous_chunk_count_stops_at_gap(store: &dyn TransferStore) {
        for i in [0u64, 1, 2, 4] {
            store
                .put_chunk(&PersistedChunk {
                    upload_id: "upload-2".to_string(),
                    chunk_index: i,
                    data: vec![i as u8],
                    checksum: format!("checksum-{i}"),
                    updated_at: 0,
                })
                .await
                .unwrap();
        }
        let contiguous = store
            .get_contiguous_chunk_count("upload-2", 10)
            .await
            .unwrap();
        assert_eq!(contiguous, 3);
        assert_eq!(store.get_chunk_count("upload-2").await.unwrap(), 4);
    }

    async fn run_delete_upload_removes_session_and_chunks(store: &dyn TransferStore) {
        let session = sample_session("upload-3", 1);
        store.put_session(&session).await.unwrap();
        store
            .put_chunk(&PersistedChunk {
                upload_id: "upload-3".to_string(),
                chunk_index: 0,
                data: vec![1],
                checksum: "c0".to_string(),
                updated_at: 0,
            })
            .await
            .unwrap();

        store.delete_upload("upload-3").await.unwrap();

        assert_eq!(store.get_session(&session.session_key).await.unwrap(), None);
        assert_eq!(store.get_chunk_count("upload-3").await.unwrap(), 0);
    }

    async fn run_find_outgoing_session_by_fingerprint_skips_completed(store: &dyn TransferStore) {
        let mut completed = sample_session("upload-4", 10);
        completed.status = TransferStatus::Completed;
        completed.fingerprint = Some("fp-shared".to_string());
        store.put_session(&completed).await.unwrap();

        let mut active = sample_session("upload-5", 2);
        active.fingerprint = Some("fp-shared".to_string());
        active.updated_at = 5;
        store.put_session(&active).await.unwrap();

        let found = store
            .find_outgoing_session_by_fingerprint("fp-shared", None)
            .await
            .unwrap();
        assert_eq!(found.map(|s| s.upload_id), Some("upload-5".to_string()));
    }

    async fn run_prune_stale_sessions_deletes_only_expired(store: &dyn TransferStore) {
        let mut old = sample_session("upload-6", 1);
        old.updated_at = 0;
        store.put_session(&old).await.unwrap();

        let mut fresh = sample_session("upload-7", 1);
        fresh.updated_at = 100_000;
        store.put_session(&fresh).await.unwrap();

        let pruned = store.prune_stale_sessions(100_000, 1_000).await.unwrap();
        assert_eq!(pruned, 1);
        assert!(store.get_session(&old.session_key).await.unwrap().is_none());
        assert!(store
            .get_session(&fresh.session_key)
            .await
            .unwrap()
            .is_some());
    }

    macro_rules! contract_suite {
        ($backend:ident, $make:expr) => {
            mod $backend {
                use super::*;

                #[tokio::test]
                async fn put_and_get_session_round_trips() {
                    run_put_and_get_session_round_trips(&$make).await;
                }

                #[tokio::test]
                async fn contiguous_chunk_count_stops_at_gap() {
                    run_contiguous_chunk_count_stops_at_gap(&$make).await;
                }

                #[tokio::test]
                async fn delete_upload_removes_session_and_chunks() {
                    run_delete_upload_removes_session_and_chunks(&$make).await;
                }

                #[tokio::test]
                async fn find_outgoing_session_by_fingerprint_skips_completed() {
                    run_find_outgoing_session_by_fingerprint_skips_completed(&$make).await;
                }

                #[tokio::test]
                async fn prune_stale_sessions_deletes_only_expired() {
                    run_prune_stale_sessions_deletes_only_expired(&$make).await;
                }
            }
        };
    }

    contract_suite!(memory, MemoryStore::new());
    contract_suite!(sqlite, SqliteStore::open_in_memory().unwrap());
}
