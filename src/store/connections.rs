//! Registry of target SQL Server instances

use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

use super::ResultStore;
use crate::error::{DaoError, DaoResult};

/// Longest accepted name, user, password or host
const MAX_FIELD_LEN: usize = 100;

/// A registered SQL Server instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConnection {
    pub db_id: i64,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    pub db_host: String,
    pub db_port: u16,
    /// `@@VERSION` as last reported by the server
    pub version: Option<String>,
    pub instance_memory_mb: Option<i64>,
}

/// Connection details supplied when registering an instance
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    pub db_host: String,
    pub db_port: u16,
    pub version: Option<String>,
    pub instance_memory_mb: Option<i64>,
}

impl NewConnection {
    /// Reject empty or oversized text fields and port 0
    pub fn validate(&self) -> DaoResult<()> {
        for (field, value) in [
            ("db_name", &self.db_name),
            ("db_user", &self.db_user),
            ("db_password", &self.db_password),
            ("db_host", &self.db_host),
        ] {
            if value.trim().is_empty() {
                return Err(DaoError::integrity(format!("{} must not be empty", field)));
            }
            if value.chars().count() > MAX_FIELD_LEN {
                return Err(DaoError::integrity(format!(
                    "{} must be at most {} characters",
                    field, MAX_FIELD_LEN
                )));
            }
        }
        if self.db_port == 0 {
            return Err(DaoError::integrity("db_port must be between 1 and 65535"));
        }
        Ok(())
    }
}

const SELECT_CONNECTION: &str = "SELECT db_id, db_name, db_user, db_password, db_host, db_port, \
     version, instance_memory_mb FROM Database_connection";

fn connection_from_row(row: &Row<'_>) -> rusqlite::Result<DatabaseConnection> {
    Ok(DatabaseConnection {
        db_id: row.get(0)?,
        db_name: row.get(1)?,
        db_user: row.get(2)?,
        db_password: row.get(3)?,
        db_host: row.get(4)?,
        db_port: row.get(5)?,
        version: row.get(6)?,
        instance_memory_mb: row.get(7)?,
    })
}

impl ResultStore {
    // ============================================
    // CONNECTIONS
    // ============================================

    /// Register an instance and return its `db_id`
    pub fn insert_connection(&self, new: &NewConnection) -> DaoResult<i64> {
        new.validate()?;
        self.conn.execute(
            r#"INSERT INTO Database_connection
               (db_name, db_user, db_password, db_host, db_port, version, instance_memory_mb)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                new.db_name.trim(),
                new.db_user.trim(),
                new.db_password,
                new.db_host.trim(),
                new.db_port,
                new.version,
                new.instance_memory_mb,
            ],
        )?;
        let db_id = self.conn.last_insert_rowid();
        info!(db_id, host = %new.db_host, port = new.db_port, "registered connection");
        Ok(db_id)
    }

    pub fn get_connection(&self, db_id: i64) -> DaoResult<DatabaseConnection> {
        self.conn
            .query_row(
                &format!("{} WHERE db_id = ?1", SELECT_CONNECTION),
                params![db_id],
                connection_from_row,
            )
            .optional()?
            .ok_or_else(|| DaoError::not_found(format!("database connection {}", db_id)))
    }

    /// Look up an instance by where it lives and who logs in
    pub fn find_connection(
        &self,
        host: &str,
        port: u16,
        user: &str,
    ) -> DaoResult<Option<DatabaseConnection>> {
        self.conn
            .query_row(
                &format!(
                    "{} WHERE db_host = ?1 AND db_port = ?2 AND db_user = ?3 ORDER BY db_id LIMIT 1",
                    SELECT_CONNECTION
                ),
                params![host, port, user],
                connection_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_connections(&self) -> DaoResult<Vec<DatabaseConnection>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY db_id", SELECT_CONNECTION))?;
        let rows = stmt.query_map([], connection_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Record the server version and memory last reported by an instance
    pub fn update_server_metadata(
        &self,
        db_id: i64,
        version: Option<&str>,
        instance_memory_mb: Option<i64>,
    ) -> DaoResult<()> {
        let updated = self.conn.execute(
            "UPDATE Database_connection SET version = ?1, instance_memory_mb = ?2 WHERE db_id = ?3",
            params![version, instance_memory_mb, db_id],
        )?;
        if updated == 0 {
            return Err(DaoError::not_found(format!("database connection {}", db_id)));
        }
        Ok(())
    }

    /// Remove an instance together with every call made against it.
    /// Returns false when no such connection exists.
    pub fn delete_connection(&self, db_id: i64) -> DaoResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM Database_connection WHERE db_id = ?1",
            params![db_id],
        )?;
        if removed > 0 {
            info!(db_id, "removed connection");
        }
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::ProcedureKind;
    use crate::store::tests::store_with_connection;
    use crate::store::CallContext;

    fn new_connection() -> NewConnection {
        NewConnection {
            db_name: "Inventory".into(),
            db_user: "monitor".into(),
            db_password: "pw".into(),
            db_host: "sql01.local".into(),
            db_port: 1433,
            version: None,
            instance_memory_mb: None,
        }
    }

    #[test]
    fn test_insert_and_find_connection() {
        let store = ResultStore::open_in_memory().unwrap();
        let db_id = store.insert_connection(&new_connection()).unwrap();

        let found = store
            .find_connection("sql01.local", 1433, "monitor")
            .unwrap()
            .unwrap();
        assert_eq!(found.db_id, db_id);
        assert_eq!(found.db_name, "Inventory");
        assert!(store.find_connection("sql01.local", 1434, "monitor").unwrap().is_none());
    }

    #[test]
    fn test_validation_rejects_bad_input() {
        let store = ResultStore::open_in_memory().unwrap();

        let mut empty_host = new_connection();
        empty_host.db_host = "  ".into();
        assert!(store.insert_connection(&empty_host).unwrap_err().is_integrity());

        let mut long_name = new_connection();
        long_name.db_name = "x".repeat(101);
        assert!(store.insert_connection(&long_name).unwrap_err().is_integrity());

        let mut port_zero = new_connection();
        port_zero.db_port = 0;
        assert!(store.insert_connection(&port_zero).unwrap_err().is_integrity());

        assert!(store.list_connections().unwrap().is_empty());
    }

    #[test]
    fn test_update_server_metadata() {
        let (store, db_id) = store_with_connection();
        store
            .update_server_metadata(db_id, Some("Microsoft SQL Server 2019"), Some(16384))
            .unwrap();

        let conn = store.get_connection(db_id).unwrap();
        assert_eq!(conn.version.as_deref(), Some("Microsoft SQL Server 2019"));
        assert_eq!(conn.instance_memory_mb, Some(16384));
        assert!(store
            .update_server_metadata(db_id + 1, None, None)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_delete_connection_cascades_to_calls() {
        let (store, db_id) = store_with_connection();
        store
            .store_records(&CallContext::new(ProcedureKind::Blitz, db_id), &[])
            .unwrap();

        assert!(store.delete_connection(db_id).unwrap());
        assert!(!store.delete_connection(db_id).unwrap());
        assert!(store.list_calls(None).unwrap().is_empty());
        assert!(store.get_connection(db_id).unwrap_err().is_not_found());
    }
}
