//! SQLite persistence for project and worktree status flags.
//!
//! Two independent keyspaces: project-level rows keyed by project path and
//! worktree-level rows keyed by (project path, worktree id). Saves are
//! upserts, so writing the same key twice overwrites the row rather than
//! duplicating it, and clears are idempotent. A connection is opened per
//! operation with a busy timeout; writers that still collide surface
//! `CoreError::StorageBusy`, which callers treat as transient.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{CoreError, Result};
use crate::types::{ProjectStatus, StatusRecord};

pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    pub fn save_project_status(&self, project_path: &str, status: ProjectStatus) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO project_status (project_path, status, updated_at) \
                 VALUES (?1, ?2, ?3) \
                 ON CONFLICT(project_path) DO UPDATE SET \
                    status = excluded.status, \
                    updated_at = excluded.updated_at",
                params![project_path, status.as_str(), Utc::now().to_rfc3339()],
            )
            .map_err(|err| CoreError::storage("save project status", err))?;
            Ok(())
        })
    }

    /// Returns `Normal` when no row exists; an absent key is not an error.
    pub fn load_project_status(&self, project_path: &str) -> Result<ProjectStatus> {
        self.with_connection(|conn| {
            let status: Option<String> = conn
                .query_row(
                    "SELECT status FROM project_status WHERE project_path = ?1",
                    params![project_path],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| CoreError::storage("load project status", err))?;
            Ok(decode_status(status))
        })
    }

    /// Bulk read for startup hydration. An empty store yields an empty map.
    pub fn load_all_project_statuses(&self) -> Result<HashMap<String, ProjectStatus>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT project_path, status FROM project_status")
                .map_err(|err| CoreError::storage("prepare project status query", err))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(|err| CoreError::storage("query project statuses", err))?;

            let mut statuses = HashMap::new();
            for row in rows {
                let (path, status) =
                    row.map_err(|err| CoreError::storage("decode project status row", err))?;
                statuses.insert(path, decode_status(Some(status)));
            }
            Ok(statuses)
        })
    }

    /// Idempotent delete; clearing an absent key is not an error.
    pub fn clear_project_status(&self, project_path: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM project_status WHERE project_path = ?1",
                params![project_path],
            )
            .map_err(|err| CoreError::storage("clear project status", err))?;
            Ok(())
        })
    }

    pub fn save_worktree_status(
        &self,
        project_path: &str,
        worktree_id: &str,
        status: ProjectStatus,
    ) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO worktree_status (project_path, worktree_id, status, updated_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(project_path, worktree_id) DO UPDATE SET \
                    status = excluded.status, \
                    updated_at = excluded.updated_at",
                params![
                    project_path,
                    worktree_id,
                    status.as_str(),
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(|err| CoreError::storage("save worktree status", err))?;
            Ok(())
        })
    }

    pub fn load_worktree_status(
        &self,
        project_path: &str,
        worktree_id: &str,
    ) -> Result<ProjectStatus> {
        self.with_connection(|conn| {
            let status: Option<String> = conn
                .query_row(
                    "SELECT status FROM worktree_status \
                     WHERE project_path = ?1 AND worktree_id = ?2",
                    params![project_path, worktree_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| CoreError::storage("load worktree status", err))?;
            Ok(decode_status(status))
        })
    }

    /// Bulk read: project path -> worktree id -> status.
    pub fn load_all_worktree_statuses(
        &self,
    ) -> Result<HashMap<String, HashMap<String, ProjectStatus>>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT project_path, worktree_id, status FROM worktree_status")
                .map_err(|err| CoreError::storage("prepare worktree status query", err))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(|err| CoreError::storage("query worktree statuses", err))?;

            let mut statuses: HashMap<String, HashMap<String, ProjectStatus>> = HashMap::new();
            for row in rows {
                let (project_path, worktree_id, status) =
                    row.map_err(|err| CoreError::storage("decode worktree status row", err))?;
                statuses
                    .entry(project_path)
                    .or_default()
                    .insert(worktree_id, decode_status(Some(status)));
            }
            Ok(statuses)
        })
    }

    pub fn clear_worktree_status(&self, project_path: &str, worktree_id: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM worktree_status WHERE project_path = ?1 AND worktree_id = ?2",
                params![project_path, worktree_id],
            )
            .map_err(|err| CoreError::storage("clear worktree status", err))?;
            Ok(())
        })
    }

    /// Project rows with their last-write timestamps, ordered by path, for
    /// staleness reporting in the CLI. A row whose timestamp no longer
    /// parses is logged and skipped.
    pub fn load_project_records(&self) -> Result<Vec<StatusRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT project_path, status, updated_at FROM project_status \
                     ORDER BY project_path",
                )
                .map_err(|err| CoreError::storage("prepare project record query", err))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(|err| CoreError::storage("query project records", err))?;

            let mut records = Vec::new();
            for row in rows {
                let (project_path, status, updated_at) =
                    row.map_err(|err| CoreError::storage("decode project record row", err))?;
                let Ok(updated_at) = DateTime::parse_from_rfc3339(&updated_at) else {
                    tracing::warn!(project = %project_path, raw = %updated_at, "Unparseable update timestamp; skipping row");
                    continue;
                };
                records.push(StatusRecord {
                    project_path,
                    worktree_id: None,
                    status: decode_status(Some(status)),
                    updated_at: updated_at.with_timezone(&Utc),
                });
            }
            Ok(records)
        })
    }

    fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS project_status (
                    project_path TEXT PRIMARY KEY,
                    status TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_project_status_status
                    ON project_status(status);
                 CREATE TABLE IF NOT EXISTS worktree_status (
                    project_path TEXT NOT NULL,
                    worktree_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (project_path, worktree_id)
                 );
                 CREATE INDEX IF NOT EXISTS idx_worktree_status_status
                    ON worktree_status(status);
                 COMMIT;",
            )
            .map_err(|err| CoreError::storage("initialize schema", err))?;
            Ok(())
        })
    }

    fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| CoreError::Io {
                context: format!("create store dir {}", parent.display()),
                source: err,
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| CoreError::storage("open status db", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| CoreError::storage("enable WAL", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| CoreError::storage("set synchronous", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| CoreError::storage("set busy_timeout", err))?;

        Ok(conn)
    }
}

fn decode_status(raw: Option<String>) -> ProjectStatus {
    match raw {
        Some(value) => ProjectStatus::from_str(&value).unwrap_or_else(|| {
            tracing::warn!(status = %value, "Unknown persisted status; treating as normal");
            ProjectStatus::Normal
        }),
        None => ProjectStatus::Normal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn temp_store() -> (tempfile::TempDir, StatusStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = StatusStore::new(dir.path().join("status.db")).expect("store init");
        (dir, store)
    }

    #[test]
    fn save_is_an_upsert_with_one_row_per_key() {
        let (_dir, store) = temp_store();

        store
            .save_project_status("/repo/a", ProjectStatus::Blocked)
            .expect("first save");
        store
            .save_project_status("/repo/a", ProjectStatus::Testing)
            .expect("second save");

        assert_eq!(
            store.load_project_status("/repo/a").expect("load"),
            ProjectStatus::Testing
        );
        let all = store.load_all_project_statuses().expect("load all");
        assert_eq!(all.len(), 1);
        assert_eq!(all.get("/repo/a"), Some(&ProjectStatus::Testing));
    }

    #[test]
    fn load_on_unseen_key_returns_normal_without_error() {
        let (_dir, store) = temp_store();
        assert_eq!(
            store.load_project_status("/never-saved").expect("load"),
            ProjectStatus::Normal
        );
    }

    #[test]
    fn load_all_on_empty_store_returns_empty_map() {
        let (_dir, store) = temp_store();
        assert!(store.load_all_project_statuses().expect("load all").is_empty());
        assert!(store
            .load_all_worktree_statuses()
            .expect("load all worktrees")
            .is_empty());
    }

    #[test]
    fn clear_on_unseen_key_is_not_an_error() {
        let (_dir, store) = temp_store();
        store.clear_project_status("/never-saved").expect("clear");
        store
            .clear_worktree_status("/never-saved", "feature-x")
            .expect("clear worktree");
    }

    #[test]
    fn save_then_clear_reads_back_as_normal() {
        let (_dir, store) = temp_store();
        store
            .save_project_status("/repo/a", ProjectStatus::Blocked)
            .expect("save");
        store.clear_project_status("/repo/a").expect("clear");
        assert_eq!(
            store.load_project_status("/repo/a").expect("load"),
            ProjectStatus::Normal
        );
    }

    #[test]
    fn worktree_keyspace_is_independent_of_project_keyspace() {
        let (_dir, store) = temp_store();

        store
            .save_project_status("/repo/a", ProjectStatus::Active)
            .expect("save project");
        store
            .save_worktree_status("/repo/a", "feature-x", ProjectStatus::Blocked)
            .expect("save worktree");

        store.clear_project_status("/repo/a").expect("clear project");
        assert_eq!(
            store
                .load_worktree_status("/repo/a", "feature-x")
                .expect("load worktree"),
            ProjectStatus::Blocked
        );
    }

    #[test]
    fn bulk_load_reflects_update_with_single_entry() {
        let (_dir, store) = temp_store();

        store
            .save_project_status("/repo/a", ProjectStatus::Blocked)
            .expect("save blocked");
        let all = store.load_all_project_statuses().expect("load all");
        assert_eq!(all.len(), 1);
        assert_eq!(all.get("/repo/a"), Some(&ProjectStatus::Blocked));

        store
            .save_project_status("/repo/a", ProjectStatus::Testing)
            .expect("save testing");
        let all = store.load_all_project_statuses().expect("load all");
        assert_eq!(all.len(), 1);
        assert_eq!(all.get("/repo/a"), Some(&ProjectStatus::Testing));
    }

    #[test]
    fn worktree_bulk_load_nests_by_project() {
        let (_dir, store) = temp_store();

        store
            .save_worktree_status("/repo/a", "feature-x", ProjectStatus::Testing)
            .expect("save");
        store
            .save_worktree_status("/repo/a", "feature-y", ProjectStatus::Idle)
            .expect("save");
        store
            .save_worktree_status("/repo/b", "feature-x", ProjectStatus::Blocked)
            .expect("save");

        let all = store.load_all_worktree_statuses().expect("load all");
        assert_eq!(all.len(), 2);
        assert_eq!(all["/repo/a"].len(), 2);
        assert_eq!(all["/repo/b"]["feature-x"], ProjectStatus::Blocked);
    }

    #[test]
    fn project_records_carry_timestamps_in_path_order() {
        let (_dir, store) = temp_store();
        let before = Utc::now();

        store
            .save_project_status("/repo/b", ProjectStatus::Active)
            .expect("save b");
        store
            .save_project_status("/repo/a", ProjectStatus::Blocked)
            .expect("save a");

        let records = store.load_project_records().expect("records");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].project_path, "/repo/a");
        assert_eq!(records[0].status, ProjectStatus::Blocked);
        assert!(records[0].worktree_id.is_none());
        assert!(records[0].updated_at >= before);
        assert_eq!(records[1].project_path, "/repo/b");
        assert_eq!(records[1].status, ProjectStatus::Active);
    }

    #[test]
    fn concurrent_writers_do_not_crash_and_every_key_lands() {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("status.db");
        let store = Arc::new(StatusStore::new(db_path).expect("store init"));

        let mut handles = Vec::new();
        for writer in 0..10 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                let key = format!("/repo/{}", writer);
                let mut succeeded = 0u32;
                for _ in 0..10 {
                    match store.save_project_status(&key, ProjectStatus::Active) {
                        Ok(()) => succeeded += 1,
                        // Busy is the expected transient collision mode.
                        Err(err) if err.is_transient() => {}
                        Err(err) => panic!("unexpected storage failure: {}", err),
                    }
                }
                succeeded
            }));
        }

        for handle in handles {
            let succeeded = handle.join().expect("writer thread");
            assert!(succeeded > 0, "at least one write per key must succeed");
        }

        let all = store.load_all_project_statuses().expect("load all");
        assert_eq!(all.len(), 10);
        for writer in 0..10 {
            assert_eq!(
                all.get(&format!("/repo/{}", writer)),
                Some(&ProjectStatus::Active)
            );
        }
    }
}
