//! SQL schema for the persistent transfer store.

/// Current schema version. A future incompatible change bumps this and
/// adds a `MIGRATE_V1_TO_V2` constant; there is nothing to migrate from
/// yet, so this crate ships only `CREATE_TABLES`.
pub const SCHEMA_VERSION: i64 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    session_key        TEXT PRIMARY KEY,
    direction          TEXT NOT NULL,
    status             TEXT NOT NULL,
    upload_id          TEXT NOT NULL,
    protocol_version   INTEGER NOT NULL,
    name               TEXT NOT NULL,
    size               INTEGER NOT NULL,
    mime_type          TEXT NOT NULL,
    chunk_size         INTEGER NOT NULL,
    total_chunks       INTEGER NOT NULL,
    next_chunk_index   INTEGER NOT NULL,
    bytes_transferred  INTEGER NOT NULL,
    remote_peer_id     TEXT,
    fingerprint        TEXT,
    file_checksum      TEXT,
    created_at         INTEGER NOT NULL,
    updated_at         INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_upload_id ON sessions(upload_id);
CREATE INDEX IF NOT EXISTS idx_sessions_fingerprint ON sessions(fingerprint);
CREATE INDEX IF NOT EXISTS idx_sessions_updated_at ON sessions(updated_at);

CREATE TABLE IF NOT EXISTS chunks (
    upload_id    TEXT NOT NULL,
    chunk_index  INTEGER NOT NULL,
    data         BLOB NOT NULL,
    checksum     TEXT NOT NULL,
    updated_at   INTEGER NOT NULL,
    PRIMARY KEY (upload_id, chunk_index)
);
"#;
