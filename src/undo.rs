//! Persistent undo log for reverting executed pipeline runs.
//!
//! Every committed batch of file mutations is stored as one operation in a
//! small SQLite database. An operation can later be reversed as a unit: its
//! changes are replayed backwards, moving each file from its recorded new
//! location back to where it came from. Each call opens its own connection
//! and runs in its own transaction; nothing is held between calls.

use crate::executor::move_file;
use crate::item::{Action, Context};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";
const MAX_PRUNE_LEVELS: usize = 6;

/// Errors raised by the undo store itself. Per-change reversal failures are
/// reported in [`UndoReport`] instead.
#[derive(Debug, Error)]
pub enum UndoError {
    #[error("undo database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("undo database file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("operation '{0}' is already recorded")]
    DuplicateOperation(String),
}

pub type UndoResult<T> = Result<T, UndoError>;

/// One reversible file mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    #[serde(rename = "original")]
    pub original_path: PathBuf,
    #[serde(rename = "new")]
    pub new_path: PathBuf,
    pub action: Action,
}

impl ChangeRecord {
    pub fn new(original_path: PathBuf, new_path: PathBuf, action: Action) -> Self {
        Self {
            original_path,
            new_path,
            action,
        }
    }
}

/// A stored operation with its changes in insertion order.
#[derive(Debug, Clone, Serialize)]
pub struct OperationRecord {
    pub operation_id: String,
    pub timestamp: String,
    pub changes: Vec<ChangeRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UndoStats {
    pub operation_count: usize,
    pub change_count: usize,
    pub db_path: PathBuf,
    pub db_size_bytes: u64,
}

/// Outcome of reversing one operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UndoReport {
    /// True when at least one change was restored.
    pub success: bool,
    pub message: String,
    pub operation_id: Option<String>,
    pub restored_files: usize,
    /// Changes that could not be reversed, with the reason.
    pub failed_restores: Vec<(PathBuf, String)>,
    /// Files moved aside because they occupied a restore location.
    pub backups: Vec<PathBuf>,
}

impl UndoReport {
    fn rejected(message: &str, operation_id: Option<&str>) -> Self {
        Self {
            message: message.to_string(),
            operation_id: operation_id.map(str::to_string),
            ..Self::default()
        }
    }

    /// Returns true if every change of the operation was reversed.
    pub fn is_complete_success(&self) -> bool {
        self.success && self.failed_restores.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.failed_restores.len()
    }
}

/// Handle on the undo database.
#[derive(Debug, Clone)]
pub struct UndoStore {
    db_path: PathBuf,
    max_history: usize,
}

impl UndoStore {
    /// Opens (creating if needed) the database at `db_path`.
    ///
    /// A zero-byte file is discarded and a file that is not an SQLite
    /// database is renamed to `<file>.bak` before the schema is created.
    ///
    /// # Errors
    ///
    /// Returns an [`UndoError`] if the file cannot be quarantined or the
    /// schema cannot be created.
    pub fn open(db_path: impl Into<PathBuf>, max_history: usize) -> UndoResult<Self> {
        let store = Self {
            db_path: db_path.into(),
            max_history: max_history.max(1),
        };
        if let Some(parent) = store.db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| UndoError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        store.quarantine_invalid_file()?;
        store.init_schema()?;
        debug!(db = %store.db_path.display(), "undo database ready");
        Ok(store)
    }

    /// Opens the store configured for a run.
    pub fn for_context(ctx: &Context) -> UndoResult<Self> {
        Self::open(ctx.undo_database_path(), ctx.config.undo.max_history)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> UndoResult<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    fn io_error(&self, source: io::Error) -> UndoError {
        UndoError::Io {
            path: self.db_path.clone(),
            source,
        }
    }

    fn quarantine_invalid_file(&self) -> UndoResult<()> {
        let metadata = match fs::metadata(&self.db_path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(self.io_error(e)),
        };
        if metadata.len() == 0 {
            warn!(db = %self.db_path.display(), "empty undo database removed");
            return fs::remove_file(&self.db_path).map_err(|e| self.io_error(e));
        }

        let mut header = [0u8; 16];
        let read = fs::File::open(&self.db_path).and_then(|mut file| file.read_exact(&mut header));
        let valid = read.is_ok() && &header == SQLITE_HEADER;
        if !valid {
            let mut backup = self.db_path.clone().into_os_string();
            backup.push(".bak");
            let backup = PathBuf::from(backup);
            fs::rename(&self.db_path, &backup).map_err(|e| self.io_error(e))?;
            warn!(
                db = %self.db_path.display(),
                backup = %backup.display(),
                "invalid undo database moved aside; starting fresh"
            );
        }
        Ok(())
    }

    fn init_schema(&self) -> UndoResult<()> {
        self.connect()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS operations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                operation_id TEXT UNIQUE NOT NULL,
                timestamp TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS changes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                operation_id TEXT NOT NULL,
                original_path TEXT NOT NULL,
                new_path TEXT NOT NULL,
                action TEXT NOT NULL,
                FOREIGN KEY (operation_id) REFERENCES operations(operation_id)
            );
            CREATE INDEX IF NOT EXISTS idx_operation_id ON changes(operation_id);
            "#,
        )?;
        Ok(())
    }

    /// Records one operation, then evicts the oldest operations beyond the
    /// retention limit.
    ///
    /// # Errors
    ///
    /// Returns [`UndoError::DuplicateOperation`] if `operation_id` is already
    /// stored; nothing is written in that case.
    pub fn save_operation(&self, operation_id: &str, changes: &[ChangeRecord]) -> UndoResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM operations WHERE operation_id = ?1)",
            params![operation_id],
            |row| row.get(0),
        )?;
        if exists {
            return Err(UndoError::DuplicateOperation(operation_id.to_string()));
        }

        tx.execute(
            "INSERT INTO operations (operation_id, timestamp) VALUES (?1, ?2)",
            params![operation_id, chrono::Local::now().to_rfc3339()],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO changes (operation_id, original_path, new_path, action)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for change in changes {
                insert.execute(params![
                    operation_id,
                    change.original_path.to_string_lossy(),
                    change.new_path.to_string_lossy(),
                    change.action.as_str(),
                ])?;
            }
        }

        let evicted = tx.execute(
            "DELETE FROM changes WHERE operation_id IN (
                 SELECT operation_id FROM operations ORDER BY id DESC LIMIT -1 OFFSET ?1
             )",
            params![self.max_history as i64],
        )?;
        let evicted_ops = tx.execute(
            "DELETE FROM operations WHERE id IN (
                 SELECT id FROM operations ORDER BY id DESC LIMIT -1 OFFSET ?1
             )",
            params![self.max_history as i64],
        )?;
        tx.commit()?;

        if evicted_ops > 0 {
            debug!(operations = evicted_ops, changes = evicted, "evicted old undo history");
        }
        info!(operation = operation_id, changes = changes.len(), "undo operation saved");
        Ok(())
    }

    fn latest_operation_id(conn: &Connection) -> UndoResult<Option<String>> {
        Ok(conn
            .query_row(
                "SELECT operation_id FROM operations ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn load_changes(conn: &Connection, operation_id: &str, newest_first: bool) -> UndoResult<Vec<ChangeRecord>> {
        let sql = if newest_first {
            "SELECT original_path, new_path, action FROM changes WHERE operation_id = ?1 ORDER BY id DESC"
        } else {
            "SELECT original_path, new_path, action FROM changes WHERE operation_id = ?1 ORDER BY id ASC"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![operation_id], |row| {
            let original: String = row.get(0)?;
            let new: String = row.get(1)?;
            let action: String = row.get(2)?;
            let action = action.parse::<Action>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into())
            })?;
            Ok(ChangeRecord::new(PathBuf::from(original), PathBuf::from(new), action))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Reverses the most recent operation.
    pub fn undo_last_operation(&self) -> UndoResult<UndoReport> {
        let conn = self.connect()?;
        match Self::latest_operation_id(&conn)? {
            Some(id) => self.reverse(conn, &id),
            None => Ok(UndoReport::rejected("No operations to undo", None)),
        }
    }

    /// Reverses the named operation.
    ///
    /// With `require_latest`, an operation that is no longer the most recent
    /// is refused without touching the filesystem.
    pub fn undo_operation(&self, operation_id: &str, require_latest: bool) -> UndoResult<UndoReport> {
        let conn = self.connect()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM operations WHERE operation_id = ?1)",
            params![operation_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(UndoReport::rejected("Operation not found", Some(operation_id)));
        }
        if require_latest
            && Self::latest_operation_id(&conn)?.as_deref() != Some(operation_id)
        {
            return Ok(UndoReport::rejected(
                "Only the latest operation can be undone",
                Some(operation_id),
            ));
        }
        self.reverse(conn, operation_id)
    }

    fn reverse(&self, mut conn: Connection, operation_id: &str) -> UndoResult<UndoReport> {
        let changes = Self::load_changes(&conn, operation_id, true)?;
        let mut report = UndoReport {
            operation_id: Some(operation_id.to_string()),
            ..UndoReport::default()
        };

        for change in &changes {
            match self.restore_change(change) {
                Ok(backup) => {
                    report.restored_files += 1;
                    report.backups.extend(backup);
                }
                Err(reason) => {
                    warn!(path = %change.new_path.display(), reason = %reason, "could not undo change");
                    report.failed_restores.push((change.new_path.clone(), reason));
                }
            }
        }

        // The operation is consumed even when some changes failed.
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM changes WHERE operation_id = ?1", params![operation_id])?;
        tx.execute("DELETE FROM operations WHERE operation_id = ?1", params![operation_id])?;
        tx.commit()?;

        let failed = report.failed_count();
        report.success = report.restored_files > 0;
        report.message = if failed > 0 {
            format!("Undone {} changes, {} failed", report.restored_files, failed)
        } else {
            format!("Undone {} changes", report.restored_files)
        };
        info!(operation = operation_id, restored = report.restored_files, failed, "undo finished");
        Ok(report)
    }

    /// Moves one file back. Returns the backup path if an occupant of the
    /// original location had to be moved aside.
    fn restore_change(&self, change: &ChangeRecord) -> Result<Option<PathBuf>, String> {
        if !change.new_path.exists() {
            return Err("File not found at expected location".to_string());
        }

        let mut backup = None;
        if change.original_path.exists() {
            let backup_path = generate_backup_path(&change.original_path);
            fs::rename(&change.original_path, &backup_path)
                .map_err(|e| format!("Could not backup conflicting file: {}", e))?;
            backup = Some(backup_path);
        }

        move_file(&change.new_path, &change.original_path, false)
            .map_err(|e| format!("Failed to restore file: {}", e))?;
        debug!(from = %change.new_path.display(), to = %change.original_path.display(), "restored");

        self.prune_empty_parents(&change.new_path);
        Ok(backup)
    }

    /// Removes directories emptied by a restore, walking up from `vacated`.
    /// Stops at the first non-empty directory and never removes the
    /// directory holding the database.
    fn prune_empty_parents(&self, vacated: &Path) {
        let stop = self.db_path.parent();
        for dir in vacated.ancestors().skip(1).take(MAX_PRUNE_LEVELS) {
            if Some(dir) == stop || dir.parent().is_none() {
                break;
            }
            let empty = fs::read_dir(dir)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if !empty || fs::remove_dir(dir).is_err() {
                break;
            }
        }
    }

    /// All stored operations, newest first, each with its changes.
    pub fn get_history(&self) -> UndoResult<Vec<OperationRecord>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT operation_id, timestamp FROM operations ORDER BY id DESC")?;
        let headers = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        headers
            .into_iter()
            .map(|(operation_id, timestamp)| {
                let changes = Self::load_changes(&conn, &operation_id, false)?;
                Ok(OperationRecord {
                    operation_id,
                    timestamp,
                    changes,
                })
            })
            .collect()
    }

    /// Drops every stored operation. Returns how many were removed.
    pub fn clear_history(&self) -> UndoResult<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM changes", [])?;
        let removed = tx.execute("DELETE FROM operations", [])?;
        tx.commit()?;
        info!(removed, "undo history cleared");
        Ok(removed)
    }

    pub fn get_stats(&self) -> UndoResult<UndoStats> {
        let conn = self.connect()?;
        let operation_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM operations", [], |row| row.get(0))?;
        let change_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM changes", [], |row| row.get(0))?;
        let db_size_bytes = fs::metadata(&self.db_path)
            .map(|m| m.len())
            .map_err(|e| self.io_error(e))?;
        Ok(UndoStats {
            operation_count: usize::try_from(operation_count).unwrap_or(0),
            change_count: usize::try_from(change_count).unwrap_or(0),
            db_path: self.db_path.clone(),
            db_size_bytes,
        })
    }
}

/// Generates a backup path for a file by appending a timestamp.
///
/// Example: `file.txt` becomes `file.txt.bak.20251109-143052`
fn generate_backup_path(original_path: &Path) -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let filename = original_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    original_path.with_file_name(format!("{}.bak.{}", filename, timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &Path, max_history: usize) -> UndoStore {
        UndoStore::open(dir.join(".phototidy_undo.db"), max_history).expect("store opens")
    }

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create dirs");
        }
        fs::write(path, content).expect("Failed to write");
    }

    /// Performs the move on disk and returns the matching record.
    fn moved(from: PathBuf, to: PathBuf, action: Action) -> ChangeRecord {
        move_file(&from, &to, false).expect("Failed to move file");
        ChangeRecord::new(from, to, action)
    }

    #[test]
    fn test_undo_no_history() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let report = store(temp_dir.path(), 10)
            .undo_last_operation()
            .expect("query succeeds");
        assert!(!report.success);
        assert_eq!(report.message, "No operations to undo");
    }

    #[test]
    fn test_undo_reverses_in_reverse_order() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        let store = store(base, 10);
        write(&base.join("a.jpg"), "a");

        // a.jpg -> b.jpg -> 2020/b.jpg
        let first = moved(base.join("a.jpg"), base.join("b.jpg"), Action::Rename);
        let second = moved(base.join("b.jpg"), base.join("2020").join("b.jpg"), Action::Move);
        store
            .save_operation("summary_1", &[first, second])
            .expect("save succeeds");

        let report = store.undo_last_operation().expect("undo runs");
        assert!(report.is_complete_success());
        assert_eq!(report.restored_files, 2);
        assert_eq!(report.message, "Undone 2 changes");
        assert!(base.join("a.jpg").exists());
        assert!(!base.join("b.jpg").exists());
        assert!(!base.join("2020").exists());
        assert!(store.get_history().expect("history").is_empty());
    }

    #[test]
    fn test_undo_restores_from_trash() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        let store = store(base, 10);
        write(&base.join("dup.jpg"), "x");
        let change = moved(
            base.join("dup.jpg"),
            base.join(".undo_trash").join("dup.jpg"),
            Action::Delete,
        );
        store.save_operation("deduplicate_1", &[change]).expect("save");

        let report = store.undo_operation("deduplicate_1", true).expect("undo runs");
        assert!(report.success);
        assert_eq!(fs::read_to_string(base.join("dup.jpg")).unwrap(), "x");
    }

    #[test]
    fn test_out_of_order_undo_is_refused() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        let store = store(base, 10);
        write(&base.join("a.jpg"), "a");
        write(&base.join("c.jpg"), "c");
        let first = moved(base.join("a.jpg"), base.join("b.jpg"), Action::Rename);
        let second = moved(base.join("c.jpg"), base.join("d.jpg"), Action::Rename);
        store.save_operation("op_1", &[first]).expect("save");
        store.save_operation("op_2", &[second]).expect("save");

        let report = store.undo_operation("op_1", true).expect("query succeeds");
        assert!(!report.success);
        assert_eq!(report.message, "Only the latest operation can be undone");
        assert!(base.join("b.jpg").exists());
        assert!(base.join("d.jpg").exists());
        assert_eq!(store.get_history().expect("history").len(), 2);

        let report = store.undo_operation("op_1", false).expect("undo runs");
        assert!(report.success);
        assert!(base.join("a.jpg").exists());
    }

    #[test]
    fn test_unknown_operation() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let report = store(temp_dir.path(), 10)
            .undo_operation("nope", false)
            .expect("query succeeds");
        assert_eq!(report.message, "Operation not found");
    }

    #[test]
    fn test_partial_failure_still_consumes_operation() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        let store = store(base, 10);
        write(&base.join("a.jpg"), "a");
        let good = moved(base.join("a.jpg"), base.join("b.jpg"), Action::Rename);
        let gone = ChangeRecord::new(base.join("x.jpg"), base.join("y.jpg"), Action::Rename);
        store.save_operation("op", &[good, gone]).expect("save");

        let report = store.undo_last_operation().expect("undo runs");
        assert!(report.success);
        assert!(!report.is_complete_success());
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.message, "Undone 1 changes, 1 failed");
        assert!(base.join("a.jpg").exists());
        assert_eq!(store.get_stats().expect("stats").operation_count, 0);
    }

    #[test]
    fn test_conflicting_original_is_backed_up() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        let store = store(base, 10);
        write(&base.join("a.jpg"), "original");
        let change = moved(base.join("a.jpg"), base.join("b.jpg"), Action::Rename);
        store.save_operation("op", &[change]).expect("save");
        write(&base.join("a.jpg"), "newcomer");

        let report = store.undo_last_operation().expect("undo runs");
        assert_eq!(report.restored_files, 1);
        assert_eq!(report.backups.len(), 1);
        assert_eq!(fs::read_to_string(base.join("a.jpg")).unwrap(), "original");
        assert_eq!(fs::read_to_string(&report.backups[0]).unwrap(), "newcomer");
    }

    #[test]
    fn test_history_is_capped_oldest_first() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = store(temp_dir.path(), 2);
        for id in ["op_1", "op_2", "op_3"] {
            let change = ChangeRecord::new(
                PathBuf::from(format!("/a/{id}")),
                PathBuf::from(format!("/b/{id}")),
                Action::Move,
            );
            store.save_operation(id, &[change]).expect("save");
        }

        let history = store.get_history().expect("history");
        let ids: Vec<_> = history.iter().map(|op| op.operation_id.as_str()).collect();
        assert_eq!(ids, ["op_3", "op_2"]);
        let stats = store.get_stats().expect("stats");
        assert_eq!(stats.operation_count, 2);
        assert_eq!(stats.change_count, 2);
        assert!(stats.db_size_bytes > 0);
    }

    #[test]
    fn test_duplicate_operation_id_rejected() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = store(temp_dir.path(), 10);
        store.save_operation("op", &[]).expect("save");
        assert!(matches!(
            store.save_operation("op", &[]),
            Err(UndoError::DuplicateOperation(_))
        ));
        assert_eq!(store.get_stats().expect("stats").operation_count, 1);
    }

    #[test]
    fn test_corrupt_database_is_quarantined() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = temp_dir.path().join(".phototidy_undo.db");
        fs::write(&db, "definitely not sqlite").expect("Failed to write");

        let store = UndoStore::open(&db, 10).expect("store reinitialises");
        assert!(temp_dir.path().join(".phototidy_undo.db.bak").exists());
        assert_eq!(store.get_stats().expect("stats").operation_count, 0);

        fs::write(&db, "").expect("Failed to truncate");
        let store = UndoStore::open(&db, 10).expect("store reinitialises");
        assert_eq!(store.clear_history().expect("clear"), 0);
    }

    #[test]
    fn test_clear_history() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = store(temp_dir.path(), 10);
        store.save_operation("a", &[]).expect("save");
        store.save_operation("b", &[]).expect("save");
        assert_eq!(store.clear_history().expect("clear"), 2);
        assert!(store.get_history().expect("history").is_empty());
    }
}
