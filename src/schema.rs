// Legacy tables (`images`, `documents`) belong to the host application and are
// never created or altered here. Only the unified table and the ledger are.

pub const UNIFIED_TABLE: &str = "media";
pub const IMAGE_TABLE: &str = "images";
pub const DOCUMENT_TABLE: &str = "documents";
pub const LEDGER_TABLE: &str = "migrations";

pub const UNIFIED_UNIQUE_INDEX: &str = "idx_media_file_name_type";

pub const CREATE_LEDGER_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,          -- e.g. 'media_unification_2024'
    completed BOOLEAN NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,        -- UTC unix seconds
    updated_at INTEGER NOT NULL
);
"#;

// The unique index is created separately, after duplicate resolution.
pub const CREATE_UNIFIED_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS media (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_name TEXT NOT NULL,
    checksum TEXT NOT NULL,
    media_type TEXT NOT NULL,           -- 'image' or 'document'
    width INTEGER DEFAULT NULL,         -- images only, set once measured
    height INTEGER DEFAULT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER DEFAULT NULL
);

CREATE INDEX IF NOT EXISTS idx_media_type ON media (media_type);
"#;

pub const CREATE_UNIFIED_UNIQUE_INDEX_SQL: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_media_file_name_type ON media (file_name, media_type)";

pub const DROP_UNIFIED_TABLE_SQL: &str = "DROP TABLE IF EXISTS media";

/// Shape of the host application's legacy tables. Used to build fixtures.
#[cfg(test)]
pub const LEGACY_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_name TEXT NOT NULL UNIQUE,
    checksum TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER DEFAULT NULL
);

CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_name TEXT NOT NULL UNIQUE,
    checksum TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER DEFAULT NULL
);
"#;
