//! Streaming finalizer (C4): reassembles a file from its persisted
//! chunks, preferring an incremental disk sink over buffering the whole
//! file in memory.

use std::io::Write;

use tempfile::NamedTempFile;

use crate::integrity::derive_file_checksum;
use crate::store::TransferStore;

/// Where finalization wrote the reconstructed bytes.
#[derive(Debug)]
pub enum FinalizedFile {
    /// Bytes held entirely in memory.
    Memory(Vec<u8>),
    /// Bytes written incrementally to a closed temp file, whose path
    /// remains valid until the returned handle is dropped.
    Disk(NamedTempFile),
}

impl FinalizedFile {
    /// Reads the finalized bytes back into memory. Intended for tests and
    /// small files; a production receiver should stream `Disk` variants
    /// rather than calling this.
    pub fn read_to_vec(&self) -> std::io::Result<Vec<u8>> {
        match self {
            FinalizedFile::Memory(bytes) => Ok(bytes.clone()),
            FinalizedFile::Disk(file) => std::fs::read(file.path()),
        }
    }
}

/// Successful finalize result.
#[derive(Debug)]
pub struct FinalizeOutcome {
    pub file: FinalizedFile,
    pub file_checksum: String,
}

/// Why finalize could not complete.
#[derive(Debug, PartialEq, Eq)]
pub enum FinalizeError {
    /// The store was missing the chunk at this index.
    MissingChunk(u64),
    /// The reassembled file's checksum didn't match `expected_checksum`.
    ChecksumMismatch { computed: String },
    /// The store or sink returned an I/O-level failure.
    Io(String),
}

/// A destination for reassembled bytes, written to incrementally as
/// chunks arrive in order.
///
/// Both implementations guarantee: on [`ChunkSink::abort`], any temp
/// resources are released; the sink never retains chunk bytes after
/// [`ChunkSink::close`] or [`ChunkSink::abort`].
pub trait ChunkSink {
    /// Appends the next chunk's bytes, in order.
    fn write_chunk(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Finalizes the sink and returns the assembled file.
    fn close(self: Box<Self>) -> std::io::Result<FinalizedFile>;

    /// Releases any resources without producing a file.
    fn abort(self: Box<Self>);
}

/// Concatenates chunk buffers in memory. Used when the host offers no
/// streaming disk sink.
#[derive(Default)]
pub struct MemorySink {
    buffer: Vec<u8>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkSink for MemorySink {
    fn write_chunk(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    fn close(self: Box<Self>) -> std::io::Result<FinalizedFile> {
        Ok(FinalizedFile::Memory(self.buffer))
    }

    fn abort(self: Box<Self>) {}
}

/// Writes chunks incrementally to a temp file, avoiding O(size) peak
/// memory. Preferred whenever the host runtime can offer one.
pub struct StreamingDiskSink {
    file: NamedTempFile,
}

impl StreamingDiskSink {
    /// Creates a new sink backed by a fresh temp file.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            file: NamedTempFile::new()?,
        })
    }
}

impl ChunkSink for StreamingDiskSink {
    fn write_chunk(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.file.write_all(bytes)
    }

    fn close(self: Box<Self>) -> std::io::Result<FinalizedFile> {
        Ok(FinalizedFile::Disk(self.file))
    }

    fn abort(self: Box<Self>) {
        // NamedTempFile's Drop removes the underlying file.
    }
}

/// Reassembles `upload_id`'s chunks (`0..total_chunks`) from `store` into
/// `sink`, verifying the file checksum against `expected_checksum` when
/// provided.
///
/// On any missing chunk or checksum mismatch the sink is aborted and no
/// partial file is returned — the receiver's caller is expected to issue
/// a `request-retransmit` in response.
pub async fn finalize(
    store: &dyn TransferStore,
    upload_id: &str,
    total_chunks: u64,
    expected_checksum: Option<&str>,
    mut sink: Box<dyn ChunkSink + Send>,
) -> Result<FinalizeOutcome, FinalizeError> {
    let mut chunk_checksums = Vec::with_capacity(total_chunks as usize);

    for index in 0..total_chunks {
        let chunk = store
            .get_chunk(upload_id, index)
            .await
            .map_err(|e| FinalizeError::Io(e.to_string()))?;
        let Some(chunk) = chunk else {
            sink.abort();
            return Err(FinalizeError::MissingChunk(index));
        };
        if let Err(e) = sink.write_chunk(&chunk.data) {
            sink.abort();
            return Err(FinalizeError::Io(e.to_string()));
        }
        chunk_checksums.push(chunk.checksum);
    }

    let file_checksum = derive_file_checksum(&chunk_checksums);
    if let Some(expected) = expected_checksum {
        if expected != file_checksum {
            sink.abort();
            return Err(FinalizeError::ChecksumMismatch {
                computed: file_checksum,
            });
        }
    }

    let file = sink
        .close()
        .map_err(|e| FinalizeError::Io(e.to_string()))?;

    Ok(FinalizeOutcome {
        file,
        file_checksum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::hash_bytes;
    use crate::store::memory::MemoryStore;
    use crate::store::PersistedChunk;

    async fn seed_chunks(store: &MemoryStore, upload_id: &str, chunks: &[&[u8]]) -> Vec<String> {
        let mut checksums = Vec::new();
        for (index, data) in chunks.iter().enumerate() {
            let checksum = hash_bytes(data);
            store
                .put_chunk(&PersistedChunk {
                    upload_id: upload_id.to_string(),
                    chunk_index: index as u64,
                    data: data.to_vec(),
                    checksum: checksum.clone(),
                    updated_at: 0,
                })
                .await
                .unwrap();
            checksums.push(checksum);
        }
        checksums
    }

    #[tokio::test]
    async fn finalize_with_memory_sink_reassembles_bytes_in_order() {
        let store = MemoryStore::new();
        seed_chunks(&store, "u1", &[b"hello ", b"world"]).await;

        let outcome = finalize(&store, "u1", 2, None, Box::new(MemorySink::new()))
            .await
            .unwrap();
        assert_eq!(outcome.file.read_to_vec().unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn finalize_with_disk_sink_reassembles_bytes_in_order() {
        let store = MemoryStore::new();
        seed_chunks(&store, "u2", &[b"abc", b"def"]).await;

        let sink = Box::new(StreamingDiskSink::new().unwrap());
        let outcome = finalize(&store, "u2", 2, None, sink).await.unwrap();
        assert_eq!(outcome.file.read_to_vec().unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn finalize_detects_missing_chunk() {
        let store = MemoryStore::new();
        seed_chunks(&store, "u3", &[b"only-one"]).await;

        let err = finalize(&store, "u3", 2, None, Box::new(MemorySink::new()))
            .await
            .unwrap_err();
        assert_eq!(err, FinalizeError::MissingChunk(1));
    }

    #[tokio::test]
    async fn finalize_detects_checksum_mismatch() {
        let store = MemoryStore::new();
        seed_chunks(&store, "u4", &[b"abc"]).await;

        let err = finalize(
            &store,
            "u4",
            1,
            Some("not-the-real-checksum"),
            Box::new(MemorySink::new()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FinalizeError::ChecksumMismatch { .. }));
    }
}
