//! Recommendations attached to result rows

use rusqlite::{params, ToSql};
use serde::Serialize;
use tracing::info;

use super::ResultStore;
use crate::error::{DaoError, DaoResult};
use crate::procedure::{ProcedureKind, ResultRef};

/// A remediation suggested for one result row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub id_recom: i64,
    pub description: String,
    pub sql_command: Option<String>,
    pub target: ResultRef,
    pub created_at: Option<String>,
}

impl ResultRef {
    /// Build a reference from the three nullable recommendation columns.
    /// Exactly one of them must be set.
    pub fn from_exclusive(
        pb_id: Option<i64>,
        pbi_id: Option<i64>,
        pbc_id: Option<i64>,
    ) -> DaoResult<Self> {
        match (pb_id, pbi_id, pbc_id) {
            (Some(id), None, None) => Ok(ResultRef::Blitz(id)),
            (None, Some(id), None) => Ok(ResultRef::BlitzIndex(id)),
            (None, None, Some(id)) => Ok(ResultRef::BlitzCache(id)),
            _ => Err(DaoError::integrity(
                "Exactly one of pb_id, pbi_id, or pbc_id must be provided",
            )),
        }
    }

    /// The `(pb_id, pbi_id, pbc_id)` column triple
    fn columns(self) -> (Option<i64>, Option<i64>, Option<i64>) {
        match self {
            ResultRef::Blitz(id) => (Some(id), None, None),
            ResultRef::BlitzIndex(id) => (None, Some(id), None),
            ResultRef::BlitzCache(id) => (None, None, Some(id)),
        }
    }
}

const SELECT_RECOMMENDATION: &str = "SELECT r.id_recom, r.description, r.sql_command, \
     r.pb_id, r.pbi_id, r.pbc_id, r.created_at FROM Recommendation r";

impl ResultStore {
    // ============================================
    // RECOMMENDATIONS
    // ============================================

    /// Attach a recommendation to an existing result row
    pub fn insert_recommendation(
        &self,
        description: &str,
        sql_command: Option<&str>,
        target: ResultRef,
    ) -> DaoResult<i64> {
        if description.trim().is_empty() {
            return Err(DaoError::integrity("Recommendation description must not be empty"));
        }
        if !self.result_exists(target)? {
            return Err(DaoError::not_found(format!("result row {}", target)));
        }

        let (pb_id, pbi_id, pbc_id) = target.columns();
        self.conn.execute(
            r#"INSERT INTO Recommendation (description, sql_command, pb_id, pbi_id, pbc_id)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![description, sql_command, pb_id, pbi_id, pbc_id],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(id_recom = id, %target, "stored recommendation");
        Ok(id)
    }

    pub fn get_recommendation(&self, id_recom: i64) -> DaoResult<Option<Recommendation>> {
        Ok(self
            .query_recommendations("WHERE r.id_recom = ?1", params![id_recom])?
            .into_iter()
            .next())
    }

    /// Recommendations for one result row, oldest first
    pub fn recommendations_for_record(&self, target: ResultRef) -> DaoResult<Vec<Recommendation>> {
        let filter = format!(
            "WHERE r.{} = ?1 ORDER BY r.id_recom",
            target.kind().id_column()
        );
        self.query_recommendations(&filter, params![target.id()])
    }

    /// Recommendations for every result row produced against a connection,
    /// optionally limited to one procedure
    pub fn recommendations_for_connection(
        &self,
        db_id: i64,
        kind: Option<ProcedureKind>,
    ) -> DaoResult<Vec<Recommendation>> {
        let joins = r#"
            LEFT JOIN Procedure_blitz b ON b.pb_id = r.pb_id
            LEFT JOIN Procedure_blitzindex bi ON bi.pbi_id = r.pbi_id
            LEFT JOIN Procedure_blitzcache bc ON bc.pbc_id = r.pbc_id
            JOIN Procedure_call c ON c.pc_id = COALESCE(b.pc_id, bi.pc_id, bc.pc_id)"#;

        match kind {
            Some(kind) => self.query_recommendations(
                &format!("{} WHERE c.db_id = ?1 AND c.p_id = ?2 ORDER BY r.id_recom", joins),
                params![db_id, kind.type_id()],
            ),
            None => self.query_recommendations(
                &format!("{} WHERE c.db_id = ?1 ORDER BY r.id_recom", joins),
                params![db_id],
            ),
        }
    }

    /// Returns false when no such recommendation exists
    pub fn delete_recommendation(&self, id_recom: i64) -> DaoResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM Recommendation WHERE id_recom = ?1",
            params![id_recom],
        )?;
        Ok(removed > 0)
    }

    fn query_recommendations(
        &self,
        filter: &str,
        args: &[&dyn ToSql],
    ) -> DaoResult<Vec<Recommendation>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} {}", SELECT_RECOMMENDATION, filter))?;
        let rows = stmt.query_map(args, |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut recommendations = Vec::new();
        for row in rows {
            let (id_recom, description, sql_command, pb_id, pbi_id, pbc_id, created_at) = row?;
            recommendations.push(Recommendation {
                id_recom,
                description,
                sql_command,
                target: ResultRef::from_exclusive(pb_id, pbi_id, pbc_id)?,
                created_at,
            });
        }
        Ok(recommendations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::store_with_connection;
    use crate::store::CallContext;
    use serde_json::json;

    fn stored_rows(store: &ResultStore, db_id: i64, kind: ProcedureKind) -> Vec<i64> {
        let rows = vec![
            json!({"Finding": "A", "Query Text": "SELECT 1"}).as_object().cloned().unwrap(),
            json!({"Finding": "B", "Query Text": "SELECT 2"}).as_object().cloned().unwrap(),
        ];
        store
            .store_records(&CallContext::new(kind, db_id), &rows)
            .unwrap()
            .result_ids
    }

    #[test]
    fn test_exactly_one_target_column() {
        assert_eq!(
            ResultRef::from_exclusive(None, Some(4), None).unwrap(),
            ResultRef::BlitzIndex(4)
        );
        let err = ResultRef::from_exclusive(Some(1), None, Some(2)).unwrap_err();
        assert!(err.is_integrity());
        assert!(err
            .to_string()
            .contains("Exactly one of pb_id, pbi_id, or pbc_id must be provided"));
        assert!(ResultRef::from_exclusive(Some(1), Some(1), None).unwrap_err().is_integrity());
        assert!(ResultRef::from_exclusive(None, None, None).unwrap_err().is_integrity());
    }

    #[test]
    fn test_schema_rejects_two_targets() {
        let (store, db_id) = store_with_connection();
        let blitz = stored_rows(&store, db_id, ProcedureKind::Blitz);
        let cache = stored_rows(&store, db_id, ProcedureKind::BlitzCache);

        let err = store
            .conn
            .execute(
                "INSERT INTO Recommendation (description, pb_id, pbc_id) VALUES ('x', ?1, ?2)",
                params![blitz[0], cache[0]],
            )
            .unwrap_err();
        assert!(DaoError::from(err).is_integrity());
    }

    #[test]
    fn test_insert_and_query_recommendations() {
        let (store, db_id) = store_with_connection();
        let blitz = stored_rows(&store, db_id, ProcedureKind::Blitz);
        let cache = stored_rows(&store, db_id, ProcedureKind::BlitzCache);

        let first = store
            .insert_recommendation("Enable backups", None, ResultRef::Blitz(blitz[0]))
            .unwrap();
        store
            .insert_recommendation(
                "Add covering index",
                Some("CREATE INDEX IX_Orders_Date ON dbo.Orders(OrderDate)"),
                ResultRef::BlitzCache(cache[1]),
            )
            .unwrap();

        let rec = store.get_recommendation(first).unwrap().unwrap();
        assert_eq!(rec.target, ResultRef::Blitz(blitz[0]));
        assert_eq!(rec.description, "Enable backups");

        assert_eq!(store.recommendations_for_connection(db_id, None).unwrap().len(), 2);
        let cache_only = store
            .recommendations_for_connection(db_id, Some(ProcedureKind::BlitzCache))
            .unwrap();
        assert_eq!(cache_only.len(), 1);
        assert!(cache_only[0].sql_command.as_deref().unwrap().starts_with("CREATE INDEX"));

        assert_eq!(
            store
                .recommendations_for_record(ResultRef::BlitzCache(cache[1]))
                .unwrap()
                .len(),
            1
        );
        assert!(store
            .recommendations_for_record(ResultRef::BlitzCache(cache[0]))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_insert_rejects_missing_row_and_empty_text() {
        let (store, db_id) = store_with_connection();
        let blitz = stored_rows(&store, db_id, ProcedureKind::Blitz);

        assert!(store
            .insert_recommendation("x", None, ResultRef::BlitzIndex(blitz[0]))
            .unwrap_err()
            .is_not_found());
        assert!(store
            .insert_recommendation("  ", None, ResultRef::Blitz(blitz[0]))
            .unwrap_err()
            .is_integrity());
    }

    #[test]
    fn test_recommendations_follow_their_rows() {
        let (store, db_id) = store_with_connection();
        let blitz = stored_rows(&store, db_id, ProcedureKind::Blitz);
        let id = store
            .insert_recommendation("Enable backups", None, ResultRef::Blitz(blitz[0]))
            .unwrap();

        store.delete_results(ProcedureKind::Blitz, db_id).unwrap();
        assert!(store.get_recommendation(id).unwrap().is_none());
        assert!(!store.delete_recommendation(id).unwrap());
    }
}
