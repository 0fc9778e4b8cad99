use std::path::{Path, PathBuf};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::error::{AssetError, AssetResult};
use crate::id::{AssetId, AssetType};
use crate::metadata::AssetRecord;

use super::{matches_filter, sort_and_paginate, PersistenceBackend, QueryFilter};

const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Embedded SQLite store. Records are kept as a small set of indexed columns
/// (for filtering) plus the full `AssetRecord` serialized as JSON (for
/// retrieval), mirroring the registry's own split between hot fields and
/// opaque payload.
pub struct SqlitePersistence {
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
}

impl SqlitePersistence {
    pub fn open(path: impl Into<PathBuf>) -> AssetResult<Self> {
        let path = path.into();
        let manager = SqliteConnectionManager::file(&path);
        let pool = Pool::new(manager)
            .map_err(|e| AssetError::Internal(format!("failed to open persistence db: {}", e)))?;
        let backend = SqlitePersistence { pool, path };
        backend.run_migrations()?;
        Ok(backend)
    }

    pub fn open_in_memory() -> AssetResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::new(manager)
            .map_err(|e| AssetError::Internal(format!("failed to open persistence db: {}", e)))?;
        let backend = SqlitePersistence { pool, path: PathBuf::new() };
        backend.run_migrations()?;
        Ok(backend)
    }

    fn run_migrations(&self) -> AssetResult<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (id INTEGER PRIMARY KEY CHECK (id = 1), version INTEGER NOT NULL);
             CREATE TABLE IF NOT EXISTS asset_records (
                 id INTEGER PRIMARY KEY,
                 path TEXT NOT NULL UNIQUE,
                 asset_type TEXT NOT NULL,
                 size_bytes INTEGER NOT NULL,
                 last_modified TEXT NOT NULL,
                 data TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_asset_records_type ON asset_records(asset_type);
             CREATE INDEX IF NOT EXISTS idx_asset_records_size ON asset_records(size_bytes);
             CREATE TABLE IF NOT EXISTS asset_tags (
                 asset_id INTEGER NOT NULL,
                 tag TEXT NOT NULL,
                 PRIMARY KEY (asset_id, tag)
             );
             CREATE TABLE IF NOT EXISTS asset_dependencies (
                 asset_id INTEGER NOT NULL,
                 dependency_id INTEGER NOT NULL,
                 PRIMARY KEY (asset_id, dependency_id)
             );",
        )?;
        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| row.get(0))
            .optional()?;
        match version {
            None => {
                conn.execute(
                    "INSERT INTO schema_version (id, version) VALUES (1, ?1)",
                    params![CURRENT_SCHEMA_VERSION],
                )?;
            }
            Some(v) if v < CURRENT_SCHEMA_VERSION => {
                conn.execute(
                    "UPDATE schema_version SET version = ?1 WHERE id = 1",
                    params![CURRENT_SCHEMA_VERSION],
                )?;
            }
            _ => {}
        }
        Ok(())
    }

    fn row_to_record(data: String) -> AssetResult<AssetRecord> {
        serde_json::from_str(&data).map_err(AssetError::from)
    }
}

impl PersistenceBackend for SqlitePersistence {
    fn insert(&self, record: AssetRecord) -> AssetResult<()> {
        self.update(record)
    }

    fn update(&self, record: AssetRecord) -> AssetResult<()> {
        let conn = self.pool.get()?;
        let data = serde_json::to_string(&record)?;
        conn.execute(
            "INSERT INTO asset_records (id, path, asset_type, size_bytes, last_modified, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 path = excluded.path,
                 asset_type = excluded.asset_type,
                 size_bytes = excluded.size_bytes,
                 last_modified = excluded.last_modified,
                 data = excluded.data",
            params![
                record.metadata.id.0 as i64,
                record.metadata.path,
                record.metadata.asset_type.as_str(),
                record.metadata.size_bytes as i64,
                record.metadata.last_modified.to_rfc3339(),
                data,
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: AssetId) -> AssetResult<bool> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM asset_tags WHERE asset_id = ?1", params![id.0 as i64])?;
        conn.execute(
            "DELETE FROM asset_dependencies WHERE asset_id = ?1 OR dependency_id = ?1",
            params![id.0 as i64],
        )?;
        let affected = conn.execute("DELETE FROM asset_records WHERE id = ?1", params![id.0 as i64])?;
        Ok(affected > 0)
    }

    fn get(&self, id: AssetId) -> AssetResult<Option<AssetRecord>> {
        let conn = self.pool.get()?;
        let data: Option<String> = conn
            .query_row("SELECT data FROM asset_records WHERE id = ?1", params![id.0 as i64], |row| row.get(0))
            .optional()?;
        data.map(Self::row_to_record).transpose()
    }

    fn get_by_path(&self, path: &str) -> AssetResult<Option<AssetRecord>> {
        let conn = self.pool.get()?;
        let data: Option<String> = conn
            .query_row("SELECT data FROM asset_records WHERE path = ?1", params![path], |row| row.get(0))
            .optional()?;
        data.map(Self::row_to_record).transpose()
    }

    fn query(&self, filter: &QueryFilter) -> AssetResult<Vec<AssetRecord>> {
        let conn = self.pool.get()?;
        let mut sql = String::from("SELECT id, data FROM asset_records WHERE 1 = 1");
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(t) = filter.asset_type {
            sql.push_str(" AND asset_type = ?");
            bound.push(Box::new(t.as_str().to_string()));
        }
        if let Some(min) = filter.min_size {
            sql.push_str(" AND size_bytes >= ?");
            bound.push(Box::new(min as i64));
        }
        if let Some(max) = filter.max_size {
            sql.push_str(" AND size_bytes <= ?");
            bound.push(Box::new(max as i64));
        }
        if let Some(after) = filter.modified_after {
            sql.push_str(" AND last_modified >= ?");
            bound.push(Box::new(after.to_rfc3339()));
        }
        if let Some(before) = filter.modified_before {
            sql.push_str(" AND last_modified <= ?");
            bound.push(Box::new(before.to_rfc3339()));
        }

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            let id: i64 = row.get(0)?;
            let data: String = row.get(1)?;
            Ok((id, data))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, data) = row?;
            let record = Self::row_to_record(data)?;
            if let Some(dep) = filter.depends_on {
                if !record.metadata.dependencies.contains(&dep) {
                    continue;
                }
            }
            let tags = self.tags(AssetId(id as u64))?;
            if matches_filter(&record, filter, &tags) {
                records.push(record);
            }
        }
        Ok(sort_and_paginate(records, filter))
    }

    fn add_tag(&self, id: AssetId, tag: &str) -> AssetResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR IGNORE INTO asset_tags (asset_id, tag) VALUES (?1, ?2)",
            params![id.0 as i64, tag],
        )?;
        Ok(())
    }

    fn remove_tag(&self, id: AssetId, tag: &str) -> AssetResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "DELETE FROM asset_tags WHERE asset_id = ?1 AND tag = ?2",
            params![id.0 as i64, tag],
        )?;
        Ok(())
    }

    fn tags(&self, id: AssetId) -> AssetResult<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT tag FROM asset_tags WHERE asset_id = ?1")?;
        let rows = stmt.query_map(params![id.0 as i64], |row| row.get::<_, String>(0))?;
        let mut tags = Vec::new();
        for row in rows {
            tags.push(row?);
        }
        Ok(tags)
    }

    fn add_dependency(&self, asset: AssetId, dependency: AssetId) -> AssetResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR IGNORE INTO asset_dependencies (asset_id, dependency_id) VALUES (?1, ?2)",
            params![asset.0 as i64, dependency.0 as i64],
        )?;
        Ok(())
    }

    fn remove_dependency(&self, asset: AssetId, dependency: AssetId) -> AssetResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "DELETE FROM asset_dependencies WHERE asset_id = ?1 AND dependency_id = ?2",
            params![asset.0 as i64, dependency.0 as i64],
        )?;
        Ok(())
    }

    fn dependencies(&self, asset: AssetId) -> AssetResult<Vec<AssetId>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT dependency_id FROM asset_dependencies WHERE asset_id = ?1")?;
        let rows = stmt.query_map(params![asset.0 as i64], |row| row.get::<_, i64>(0))?;
        let mut deps = Vec::new();
        for row in rows {
            deps.push(AssetId(row? as u64));
        }
        Ok(deps)
    }

    fn optimize(&self) -> AssetResult<()> {
        let conn = self.pool.get()?;
        conn.execute_batch("PRAGMA optimize;")?;
        Ok(())
    }

    fn vacuum(&self) -> AssetResult<()> {
        let conn = self.pool.get()?;
        conn.execute_batch("VACUUM;")?;
        Ok(())
    }

    fn backup(&self, destination: &Path) -> AssetResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(AssetError::Internal("cannot back up an in-memory persistence store".into()));
        }
        let conn = self.pool.get()?;
        conn.execute_batch("PRAGMA wal_checkpoint(FULL);")?;
        std::fs::copy(&self.path, destination)?;
        Ok(())
    }

    fn restore(&self, source: &Path) -> AssetResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(AssetError::Internal("cannot restore into an in-memory persistence store".into()));
        }
        std::fs::copy(source, &self.path)?;
        Ok(())
    }

    fn integrity_check(&self) -> AssetResult<bool> {
        let conn = self.pool.get()?;
        let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    fn schema_version(&self) -> AssetResult<i32> {
        let conn = self.pool.get()?;
        let version: i32 = conn.query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| row.get(0))?;
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::AssetType;
    use crate::metadata::AssetMetadata;

    fn sample(id: u64, path: &str) -> AssetRecord {
        AssetRecord::new(AssetMetadata::new(AssetId(id), AssetType::Texture, path))
    }

    #[test]
    fn insert_and_get_round_trip() {
        let db = SqlitePersistence::open_in_memory().unwrap();
        db.insert(sample(1, "a.png")).unwrap();
        let fetched = db.get(AssetId(1)).unwrap().unwrap();
        assert_eq!(fetched.metadata.path, "a.png");
    }

    #[test]
    fn update_overwrites_existing_row() {
        let db = SqlitePersistence::open_in_memory().unwrap();
        db.insert(sample(1, "a.png")).unwrap();
        let mut updated = sample(1, "a.png");
        updated.metadata.size_bytes = 4096;
        db.update(updated).unwrap();
        let fetched = db.get(AssetId(1)).unwrap().unwrap();
        assert_eq!(fetched.metadata.size_bytes, 4096);
    }

    #[test]
    fn delete_removes_record_and_tags() {
        let db = SqlitePersistence::open_in_memory().unwrap();
        db.insert(sample(1, "a.png")).unwrap();
        db.add_tag(AssetId(1), "ui").unwrap();
        assert!(db.delete(AssetId(1)).unwrap());
        assert!(db.get(AssetId(1)).unwrap().is_none());
        assert!(db.tags(AssetId(1)).unwrap().is_empty());
    }

    #[test]
    fn query_filters_by_type_and_tag() {
        let db = SqlitePersistence::open_in_memory().unwrap();
        db.insert(sample(1, "a.png")).unwrap();
        db.insert(AssetRecord::new(AssetMetadata::new(AssetId(2), AssetType::Audio, "b.wav"))).unwrap();
        db.add_tag(AssetId(1), "ui").unwrap();

        let by_type = db
            .query(&QueryFilter { asset_type: Some(AssetType::Audio), ..QueryFilter::default() })
            .unwrap();
        assert_eq!(by_type.len(), 1);
        assert_eq!(by_type[0].metadata.id, AssetId(2));

        let by_tag = db
            .query(&QueryFilter { tag: Some("ui".into()), ..QueryFilter::default() })
            .unwrap();
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].metadata.id, AssetId(1));
    }

    #[test]
    fn dependency_mirror_round_trips() {
        let db = SqlitePersistence::open_in_memory().unwrap();
        db.insert(sample(1, "a.png")).unwrap();
        db.insert(sample(2, "b.png")).unwrap();
        db.add_dependency(AssetId(1), AssetId(2)).unwrap();
        assert_eq!(db.dependencies(AssetId(1)).unwrap(), vec![AssetId(2)]);
        db.remove_dependency(AssetId(1), AssetId(2)).unwrap();
        assert!(db.dependencies(AssetId(1)).unwrap().is_empty());
    }

    #[test]
    fn migrations_stamp_current_schema_version() {
        let db = SqlitePersistence::open_in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn integrity_check_passes_on_fresh_db() {
        let db = SqlitePersistence::open_in_memory().unwrap();
        assert!(db.integrity_check().unwrap());
    }
}
