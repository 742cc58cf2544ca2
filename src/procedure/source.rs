//! Sources of procedure output
//!
//! The procedures themselves run on the target SQL Server; this crate only
//! consumes their result sets. A `ResultSource` hands back those rows in
//! output order.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::PathBuf;
use tracing::info;

use super::{ProcedureKind, RawRecord};
use crate::store::DatabaseConnection;

/// Produces the ordered result set of one procedure run
pub trait ResultSource {
    /// Human-readable description of where rows come from
    fn describe(&self) -> String;

    /// Fetch the rows `kind` produced against `connection`
    fn fetch(&self, kind: ProcedureKind, connection: &DatabaseConnection)
        -> Result<Vec<RawRecord>>;
}

/// Reads a result set exported as a JSON array of row objects
pub struct JsonExportSource {
    path: PathBuf,
}

impl JsonExportSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ResultSource for JsonExportSource {
    fn describe(&self) -> String {
        format!("JSON export {}", self.path.display())
    }

    fn fetch(
        &self,
        kind: ProcedureKind,
        connection: &DatabaseConnection,
    ) -> Result<Vec<RawRecord>> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", self.path.display()))?;

        let rows = match value {
            Value::Array(rows) => rows,
            _ => bail!("{} must contain a JSON array of rows", self.path.display()),
        };

        let mut records = Vec::with_capacity(rows.len());
        for (i, row) in rows.into_iter().enumerate() {
            match row {
                Value::Object(map) => records.push(map),
                other => bail!(
                    "Row {} of {} is not an object: {}",
                    i,
                    self.path.display(),
                    other
                ),
            }
        }

        info!(
            procedure = %kind,
            database = %connection.db_name,
            rows = records.len(),
            "loaded procedure output from {}",
            self.path.display()
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn connection() -> DatabaseConnection {
        DatabaseConnection {
            db_id: 1,
            db_name: "Shop".into(),
            db_user: "sa".into(),
            db_password: "secret".into(),
            db_host: "localhost".into(),
            db_port: 1433,
            version: None,
            instance_memory_mb: None,
        }
    }

    #[test]
    fn test_reads_rows_in_file_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"Finding": "A"}}, {{"Finding": "B"}}, {{"Finding": "C"}}]"#
        )
        .unwrap();

        let source = JsonExportSource::new(file.path());
        let rows = source.fetch(ProcedureKind::Blitz, &connection()).unwrap();
        let findings: Vec<_> = rows.iter().map(|r| r["Finding"].as_str().unwrap()).collect();
        assert_eq!(findings, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_rejects_non_object_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"Finding": "A"}}, 7]"#).unwrap();

        let source = JsonExportSource::new(file.path());
        let err = source.fetch(ProcedureKind::Blitz, &connection()).unwrap_err();
        assert!(err.to_string().contains("Row 1"));
    }
}
