//! Results storage with SQLite
//!
//! - Schema initialisation and procedure type seeding
//! - Connection registry (target SQL Server instances)
//! - Procedure calls and their ordered result rows
//! - Chat turns and recommendations attached to result rows

mod connections;
mod recommendations;
mod results;
mod schema;

pub use connections::{DatabaseConnection, NewConnection};
pub use recommendations::Recommendation;
pub use results::{ChatEntry, ChatRole, StoredCall};
pub use schema::{SCHEMA, SEED};

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{DaoError, DaoResult};
use crate::procedure::ProcedureKind;

pub struct ResultStore {
    conn: Connection,
}

impl ResultStore {
    pub fn open(path: &Path) -> DaoResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        info!("opened results store at {}", path.display());
        Ok(store)
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> DaoResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> DaoResult<()> {
        // Cascades between calls, results and chats rely on this
        self.conn.pragma_update(None, "foreign_keys", true)?;
        self.conn.execute_batch(SCHEMA)?;
        self.conn.execute_batch(SEED)?;
        debug!("schema applied");
        Ok(())
    }

    // ============================================
    // PROCEDURE TYPES
    // ============================================

    pub fn list_procedure_types(&self) -> DaoResult<Vec<ProcedureTypeRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT p_id, display_name, procedure_name FROM Procedure_type ORDER BY p_id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(ProcedureTypeRow {
                p_id: row.get(0)?,
                display_name: row.get(1)?,
                procedure_name: row.get(2)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Resolve a `Procedure_type.p_id` to the procedure it stands for
    fn procedure_kind(&self, p_id: i64) -> DaoResult<ProcedureKind> {
        let name: Option<String> = self
            .conn
            .query_row(
                "SELECT procedure_name FROM Procedure_type WHERE p_id = ?",
                params![p_id],
                |row| row.get(0),
            )
            .optional()?;

        let name = name
            .ok_or_else(|| DaoError::integrity(format!("Unknown procedure type: {}", p_id)))?;
        ProcedureKind::from_procedure_name(&name).ok_or_else(|| {
            DaoError::integrity(format!("Procedure type {} has no result table: {}", p_id, name))
        })
    }

    // ============================================
    // CALLS
    // ============================================

    /// Get a call by id, failing with `NotFound` when it does not exist
    pub fn get_call(&self, call_id: i64) -> DaoResult<CallRow> {
        self.query_calls("WHERE c.pc_id = ?1", params![call_id])?
            .into_iter()
            .next()
            .ok_or_else(|| DaoError::not_found(format!("procedure call {}", call_id)))
    }

    /// List calls, newest first, optionally for one connection only
    pub fn list_calls(&self, db_id: Option<i64>) -> DaoResult<Vec<CallRow>> {
        match db_id {
            Some(id) => self.query_calls("WHERE c.db_id = ?1", params![id]),
            None => self.query_calls("", params![]),
        }
    }

    /// Most recent call of `kind` against a connection
    pub fn latest_call(&self, kind: ProcedureKind, db_id: i64) -> DaoResult<Option<i64>> {
        self.conn
            .query_row(
                "SELECT MAX(pc_id) FROM Procedure_call WHERE p_id = ?1 AND db_id = ?2",
                params![kind.type_id(), db_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    fn query_calls(&self, filter: &str, args: &[&dyn rusqlite::ToSql]) -> DaoResult<Vec<CallRow>> {
        let sql = format!(
            r#"SELECT c.pc_id, c.run_at, c.p_id, c.db_id, d.db_name,
                      (SELECT COUNT(*) FROM Procedure_blitz r WHERE r.pc_id = c.pc_id)
                    + (SELECT COUNT(*) FROM Procedure_blitzindex r WHERE r.pc_id = c.pc_id)
                    + (SELECT COUNT(*) FROM Procedure_blitzcache r WHERE r.pc_id = c.pc_id)
               FROM Procedure_call c
               JOIN Database_connection d ON d.db_id = c.db_id
               {}
               ORDER BY c.pc_id DESC"#,
            filter
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(args, |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut calls = Vec::new();
        for row in rows {
            let (pc_id, run_at, p_id, db_id, db_name, row_count) = row?;
            calls.push(CallRow {
                pc_id,
                run_at,
                kind: self.procedure_kind(p_id)?,
                db_id,
                db_name,
                row_count,
            });
        }
        Ok(calls)
    }

    /// Delete every call of `kind` against a connection. Returns the number
    /// of calls removed; results and chats go with them.
    pub fn delete_results(&self, kind: ProcedureKind, db_id: i64) -> DaoResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM Procedure_call WHERE p_id = ?1 AND db_id = ?2",
            params![kind.type_id(), db_id],
        )?;
        info!(procedure = %kind, db_id, removed, "deleted procedure results");
        Ok(removed)
    }

    /// Delete every call made against one connection
    pub fn clear_connection(&self, db_id: i64) -> DaoResult<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM Procedure_call WHERE db_id = ?1", params![db_id])?;
        info!(db_id, removed, "cleared connection results");
        Ok(removed)
    }

    /// Delete all calls, results, chats and recommendations.
    ///
    /// Children are deleted explicitly before parents, so the outcome does
    /// not depend on the store enforcing cascades. Safe to call repeatedly.
    pub fn clear_all(&self) -> DaoResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(
            r#"DELETE FROM Recommendation;
               DELETE FROM Chat_blitz;
               DELETE FROM Chat_blitzindex;
               DELETE FROM Chat_blitzcache;
               DELETE FROM Procedure_blitz;
               DELETE FROM Procedure_blitzindex;
               DELETE FROM Procedure_blitzcache;
               DELETE FROM Procedure_call;"#,
        )?;
        tx.commit()?;
        info!("cleared all stored results");
        Ok(())
    }
}

// ============================================
// ROW TYPES
// ============================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureTypeRow {
    pub p_id: i64,
    pub display_name: String,
    pub procedure_name: String,
}

/// Identifies the procedure and connection a new call runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    /// `Procedure_type.p_id`
    pub procedure_type_id: i64,
    /// `Database_connection.db_id`
    pub db_id: i64,
}

impl CallContext {
    pub fn new(kind: ProcedureKind, db_id: i64) -> Self {
        Self {
            procedure_type_id: kind.type_id(),
            db_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallRow {
    pub pc_id: i64,
    pub run_at: String,
    pub kind: ProcedureKind,
    pub db_id: i64,
    pub db_name: String,
    pub row_count: i64,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Store with one registered connection; returns its id
    pub(crate) fn store_with_connection() -> (ResultStore, i64) {
        let store = ResultStore::open_in_memory().unwrap();
        let db_id = store
            .insert_connection(&NewConnection {
                db_name: "Shop".into(),
                db_user: "sa".into(),
                db_password: "secret".into(),
                db_host: "localhost".into(),
                db_port: 1433,
                version: None,
                instance_memory_mb: None,
            })
            .unwrap();
        (store, db_id)
    }

    #[test]
    fn test_unopenable_paths_are_connectivity_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ResultStore::open(dir.path()),
            Err(DaoError::Connectivity(_))
        ));

        // Parent "directory" is a regular file
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(
            ResultStore::open(&file.join("results.db")),
            Err(DaoError::Connectivity(_))
        ));
    }

    #[test]
    fn test_procedure_types_are_seeded_once() {
        let store = ResultStore::open_in_memory().unwrap();
        store.init_schema().unwrap();

        let types = store.list_procedure_types().unwrap();
        assert_eq!(types.len(), 3);
        for (row, kind) in types.iter().zip(ProcedureKind::ALL) {
            assert_eq!(row.p_id, kind.type_id());
            assert_eq!(row.procedure_name, kind.procedure_name());
            assert_eq!(row.display_name, kind.display_name());
        }
    }

    #[test]
    fn test_get_call_missing_is_not_found() {
        let store = ResultStore::open_in_memory().unwrap();
        assert!(store.get_call(99).unwrap_err().is_not_found());
    }

    #[test]
    fn test_list_and_latest_calls() {
        let (store, db_id) = store_with_connection();
        let first = store
            .store_records(&CallContext::new(ProcedureKind::Blitz, db_id), &[])
            .unwrap();
        let second = store
            .store_records(&CallContext::new(ProcedureKind::Blitz, db_id), &[])
            .unwrap();
        store
            .store_records(&CallContext::new(ProcedureKind::BlitzCache, db_id), &[])
            .unwrap();

        let calls = store.list_calls(Some(db_id)).unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].kind, ProcedureKind::BlitzCache);
        assert_eq!(calls[2].pc_id, first.call_id);
        assert_eq!(
            store.latest_call(ProcedureKind::Blitz, db_id).unwrap(),
            Some(second.call_id)
        );
        assert_eq!(store.latest_call(ProcedureKind::BlitzIndex, db_id).unwrap(), None);
    }

    #[test]
    fn test_delete_results_only_touches_one_procedure() {
        let (store, db_id) = store_with_connection();
        store
            .store_records(&CallContext::new(ProcedureKind::Blitz, db_id), &[])
            .unwrap();
        let cache = store
            .store_records(&CallContext::new(ProcedureKind::BlitzCache, db_id), &[])
            .unwrap();

        assert_eq!(store.delete_results(ProcedureKind::Blitz, db_id).unwrap(), 1);
        let calls = store.list_calls(None).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].pc_id, cache.call_id);
    }

    #[test]
    fn test_clear_all_is_idempotent() {
        let (store, db_id) = store_with_connection();
        store
            .store_records(&CallContext::new(ProcedureKind::Blitz, db_id), &[])
            .unwrap();

        store.clear_all().unwrap();
        store.clear_all().unwrap();
        assert!(store.list_calls(None).unwrap().is_empty());
        // Connections survive a clear
        assert_eq!(store.list_connections().unwrap().len(), 1);
    }
}
