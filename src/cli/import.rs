//! Import command implementation

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::procedure::{JsonExportSource, ProcedureKind, ResultSource};
use crate::store::{CallContext, ResultStore};

pub fn run(store: &ResultStore, kind: ProcedureKind, file: PathBuf, db_id: i64) -> Result<()> {
    let connection = store.get_connection(db_id)?;
    let source = JsonExportSource::new(file);

    let records = source
        .fetch(kind, &connection)
        .with_context(|| format!("Failed to load {}", source.describe()))?;

    let stored = store
        .store_records(&CallContext::new(kind, db_id), &records)
        .with_context(|| format!("Failed to store {} results", kind))?;

    println!(
        "Stored {} {} rows for '{}' as call {}",
        stored.result_ids.len(),
        kind,
        connection.db_name,
        stored.call_id
    );
    Ok(())
}
