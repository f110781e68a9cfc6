//! In-memory `TransferStore` fake, used by tests and any host that does
//! not need durability across process restarts.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::store::{PersistedChunk, PersistedSession, TransferStore};

#[derive(Default)]
struct Inner {
    sessions: BTreeMap<String, PersistedSession>,
    chunks: BTreeMap<(String, u64), PersistedChunk>,
}

/// An in-memory `TransferStore`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransferStore for MemoryStore {
    async fn put_session(&self, session: &PersistedSession) -> Result<()> {
        self.inner
            .lock()
            .sessions
            .insert(session.session_key.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, session_key: &str) -> Result<Option<PersistedSession>> {
        Ok(self.inner.lock().sessions.get(session_key).cloned())
    }

    async fn find_outgoing_session_by_fingerprint(
        &self,
        fingerprint: &str,
        remote_peer_id: Option<&str>,
    ) -> Result<Option<PersistedSession>> {
        use crate::store::{SessionDirection, TransferStatus};

        let inner = self.inner.lock();
        let mut candidates: Vec<&PersistedSession> = inner
            .sessions
            .values()
            .filter(|s| {
                s.direction == SessionDirection::Outgoing
                    && s.status != TransferStatus::Completed
                    && s.fingerprint.as_deref() == Some(fingerprint)
            })
            .collect();

        candidates.sort_by(|a, b| {
            let a_peer_match = a.remote_peer_id.as_deref() == remote_peer_id;
            let b_peer_match = b.remote_peer_id.as_deref() == remote_peer_id;
            b_peer_match
                .cmp(&a_peer_match)
                .then(b.updated_at.cmp(&a.updated_at))
        });

        Ok(candidates.first().map(|s| (*s).clone()))
    }

    async fn put_chunk(&self, chunk: &PersistedChunk) -> Result<()> {
        self.inner.lock().chunks.insert(
            (chunk.upload_id.clone(), chunk.chunk_index),
            chunk.clone(),
        );
        Ok(())
    }

    async fn get_chunk(&self, upload_id: &str, chunk_index: u64) -> Result<Option<PersistedChunk>> {
        Ok(self
            .inner
            .lock()
            .chunks
            .get(&(upload_id.to_string(), chunk_index))
            .cloned())
    }

    async fn get_chunk_count(&self, upload_id: &str) -> Result<u64> {
        Ok(self
            .inner
            .lock()
            .chunks
            .keys()
            .filter(|(id, _)| id == upload_id)
            .count() as u64)
    }

    async fn get_contiguous_chunk_count(
        &self,
        upload_id: &str,
        total_chunks: u64,
    ) -> Result<u64> {
        let inner = self.inner.lock();
        let mut count = 0u64;
        while count < total_chunks
            && inner
                .chunks
                .contains_key(&(upload_id.to_string(), count))
        {
            count += 1;
        }
        Ok(count)
    }

    async fn delete_chunks_from(&self, upload_id: &str, from_chunk: u64) -> Result<()> {
        self.inner
            .lock()
            .chunks
            .retain(|(id, index), _| !(id == upload_id && *index >= from_chunk));
        Ok(())
    }

    async fn delete_upload(&self, upload_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.sessions.retain(|_, s| s.upload_id != upload_id);
        inner.chunks.retain(|(id, _), _| id != upload_id);
        Ok(())
    }

    async fn prune_stale_sessions(&self, now_millis: i64, max_age_millis: i64) -> Result<u64> {
        let cutoff = now_millis - max_age_millis;
        let stale_upload_ids: Vec<String> = {
            let inner = self.inner.lock();
            inner
                .sessions
                .values()
                .filter(|s| s.updated_at < cutoff)
                .map(|s| s.upload_id.clone())
                .collect()
        };
        for upload_id in &stale_upload_ids {
            self.delete_upload(upload_id).await?;
        }
        Ok(stale_upload_ids.len() as u64)
    }
}
