//! Chunk/file hashing, fingerprints, and chunk-index math.
//!
//! Hash selection is a build-time constant, not a runtime negotiation: both
//! endpoints must agree on the same algorithm or checksums will never
//! match, and SHA-256 is available through `sha2` on every target this
//! crate builds for, so there is no fallback path to negotiate.

use sha2::{Digest, Sha256};

/// The hash algorithm used for every chunk and file checksum in this
/// crate. Exposed only for diagnostics/logging; there is no runtime
/// negotiation of this value.
pub const CHUNK_HASH_ALGORITHM: &str = "sha256";

/// Hashes a byte slice and returns its lowercase hex digest.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

/// Derives a file-level checksum from the ordered list of per-chunk
/// checksums, without re-reading the file.
///
/// Deterministic and order-sensitive: the checksums are joined with `\n`
/// before hashing, so both endpoints agree on the file checksum as long as
/// they agree on chunk order, which the transport guarantees.
pub fn derive_file_checksum(chunk_checksums: &[String]) -> String {
    let joined = chunk_checksums.join("\n");
    hash_bytes(joined.as_bytes())
}

/// Sender-local identity of a file, derived from metadata never sent on
/// the wire. Used only for local resume matching.
pub fn fingerprint(name: &str, size: u64, mime_type: &str, last_modified_millis: i64) -> String {
    let mime_type = if mime_type.is_empty() {
        "application/octet-stream"
    } else {
        mime_type
    };
    format!("{name}::{size}::{mime_type}::{last_modified_millis}")
}

/// Number of chunks needed to cover a file of `size` bytes at `chunk_size`
/// bytes per chunk. Zero-byte files need zero chunks.
pub fn calculate_total_chunks(size: u64, chunk_size: u64) -> u64 {
    if size == 0 || chunk_size == 0 {
        return 0;
    }
    size.div_ceil(chunk_size)
}

/// Number of bytes that make up chunk `index`, saturating at the file's
/// total `size` for the final (possibly short) chunk.
pub fn bytes_for_chunk_index(index: u64, chunk_size: u64, size: u64) -> u64 {
    let start = index.saturating_mul(chunk_size);
    if start >= size {
        return 0;
    }
    let end = start.saturating_add(chunk_size).min(size);
    end - start
}

/// Clamps a (possibly out-of-range or fractional-origin) chunk index into
/// `[0, total_chunks]`, flooring non-integral inputs.
///
/// Accepts `f64` because resume negotiation values can arrive from
/// untrusted or loosely-typed peers before being validated.
pub fn normalize_chunk_index(value: f64, total_chunks: u64) -> u64 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    let floored = value.floor();
    if floored >= total_chunks as f64 {
        return total_chunks;
    }
    floored as u64
}
