//! Fixtures shared by the unit tests: a temporary database with the host
//! application's legacy tables, and temporary upload directories.

use std::fs;
use std::path::Path;

use rusqlite::params;
use tempfile::TempDir;

use crate::database::Database;
use crate::files::FileLayout;
use crate::media::MediaType;
use crate::schema::LEGACY_SCHEMA_SQL;

pub fn checksum_for(file_name: &str) -> String {
    format!("sha256:{}", file_name)
}

pub fn file_body(file_name: &str) -> Vec<u8> {
    format!("contents of {}", file_name).into_bytes()
}

/// A fresh database file in its own temp dir, legacy tables created and seeded.
pub fn seeded_db(images: &[&str], documents: &[&str]) -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("app.db")).unwrap();
    create_legacy_tables(&db);
    insert_legacy(&db, MediaType::Image, images);
    insert_legacy(&db, MediaType::Document, documents);
    (dir, db)
}

pub fn create_legacy_tables(db: &Database) {
    db.conn().execute_batch(LEGACY_SCHEMA_SQL).unwrap();
}

pub fn insert_legacy(db: &Database, media_type: MediaType, names: &[&str]) {
    let sql = format!(
        "INSERT INTO {} (file_name, checksum, created_at, updated_at) VALUES (?, ?, ?, ?)",
        media_type.legacy_table()
    );
    for (i, name) in names.iter().enumerate() {
        let ts = 1_700_000_000 + i as i64;
        db.conn()
            .execute(&sql, params![name, checksum_for(name), ts, ts])
            .unwrap();
    }
}

/// All rows of a legacy table as `(id, file_name, checksum, created_at, updated_at, deleted_at)`.
pub fn legacy_rows(
    db: &Database,
    media_type: MediaType,
) -> Vec<(i64, String, String, i64, i64, Option<i64>)> {
    let mut stmt = db
        .conn()
        .prepare(&format!(
            "SELECT id, file_name, checksum, created_at, updated_at, deleted_at FROM {} ORDER BY id",
            media_type.legacy_table()
        ))
        .unwrap();
    stmt.query_map([], |row| {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    })
    .unwrap()
    .collect::<Result<Vec<_>, _>>()
    .unwrap()
}

pub fn layout(root: &Path) -> FileLayout {
    let uploads = root.join("uploads");
    FileLayout {
        image_dir: uploads.join("images"),
        document_dir: uploads.join("documents"),
        unified_dir: uploads.join("media"),
    }
}

pub fn write_files(dir: &Path, names: &[&str]) {
    fs::create_dir_all(dir).unwrap();
    for name in names {
        fs::write(dir.join(name), file_body(name)).unwrap();
    }
}

/// Sorted names of the regular files in `dir`; empty if it does not exist.
pub fn file_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().unwrap().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
