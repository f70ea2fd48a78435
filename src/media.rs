use rusqlite::{params, Connection, Row};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::MediaMergeError;
use crate::schema::{DOCUMENT_TABLE, IMAGE_TABLE};

#[derive(AsRefStr, EnumIter, EnumString, Debug, Display, PartialEq, Eq, Hash, Copy, Clone)]
pub enum MediaType {
    #[strum(serialize = "image")]
    Image,
    #[strum(serialize = "document")]
    Document,
}

impl MediaType {
    /// The legacy table that holds records of this type.
    pub fn legacy_table(&self) -> &'static str {
        match self {
            MediaType::Image => IMAGE_TABLE,
            MediaType::Document => DOCUMENT_TABLE,
        }
    }
}

/// A row from one of the two legacy tables. Read-only as far as this crate is concerned.
#[derive(Clone, Debug, PartialEq)]
pub struct LegacyRecord {
    #[allow(dead_code)]
    pub id: i64,
    pub file_name: String,
    pub checksum: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl LegacyRecord {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(LegacyRecord {
            id: row.get(0)?,
            file_name: row.get(1)?,
            checksum: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            deleted_at: row.get(5)?,
        })
    }

    /// Stream every legacy record of `media_type`, soft-deleted rows included, in id order.
    pub fn for_each<F>(
        conn: &Connection,
        media_type: MediaType,
        mut func: F,
    ) -> Result<(), MediaMergeError>
    where
        F: FnMut(LegacyRecord) -> Result<(), MediaMergeError>,
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, file_name, checksum, created_at, updated_at, deleted_at
            FROM {}
            ORDER BY id ASC",
            media_type.legacy_table()
        ))?;

        let rows = stmt.query_map([], LegacyRecord::from_row)?;

        for row in rows {
            func(row?)?;
        }

        Ok(())
    }
}

/// A row of the unified `media` table.
#[derive(Clone, Debug, PartialEq)]
pub struct UnifiedRecord {
    #[allow(dead_code)]
    pub id: i64,
    pub file_name: String,
    pub checksum: String,
    pub media_type: MediaType,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl UnifiedRecord {
    /// Build the unified counterpart of a legacy record. Dimensions are left unset;
    /// they are only filled in when an image is measured elsewhere.
    pub fn from_legacy(legacy: &LegacyRecord, media_type: MediaType) -> Self {
        UnifiedRecord {
            id: 0,
            file_name: legacy.file_name.clone(),
            checksum: legacy.checksum.clone(),
            media_type,
            width: None,
            height: None,
            created_at: legacy.created_at,
            updated_at: legacy.updated_at,
            deleted_at: legacy.deleted_at,
        }
    }

    /// Insert and return the new row id. The `id` field is ignored.
    pub fn insert(&self, conn: &Connection) -> Result<i64, rusqlite::Error> {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO media (file_name, checksum, media_type, width, height, created_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id",
        )?;

        stmt.query_row(
            params![
                self.file_name,
                self.checksum,
                self.media_type.as_ref(),
                self.width,
                self.height,
                self.created_at,
                self.updated_at,
                self.deleted_at,
            ],
            |row| row.get(0),
        )
    }

    /// Per-type row counts of the unified table, as `(images, documents)`.
    pub fn count_by_type(conn: &Connection) -> Result<(i64, i64), MediaMergeError> {
        let counts = conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN media_type = 'image' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN media_type = 'document' THEN 1 ELSE 0 END), 0)
            FROM media",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(counts)
    }

    #[cfg(test)]
    pub fn load_all(conn: &Connection) -> Result<Vec<UnifiedRecord>, MediaMergeError> {
        use std::str::FromStr;

        let mut stmt = conn.prepare(
            "SELECT id, file_name, checksum, media_type, width, height, created_at, updated_at, deleted_at
            FROM media
            ORDER BY media_type, file_name",
        )?;
        let rows = stmt.query_map([], |row| {
            let media_type: String = row.get(3)?;
            Ok(UnifiedRecord {
                id: row.get(0)?,
                file_name: row.get(1)?,
                checksum: row.get(2)?,
                media_type: MediaType::from_str(&media_type).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
                })?,
                width: row.get(4)?,
                height: row.get(5)?,
                created_at: row.get(6)?,
                updated_at: row.get(7)?,
                deleted_at: row.get(8)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(MediaMergeError::DatabaseError)
    }
}
