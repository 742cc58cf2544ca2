//! Recommendation commands

use anyhow::{Context, Result};

use crate::procedure::ProcedureKind;
use crate::store::ResultStore;

/// Attach a recommendation to row `index` of a call
pub fn add(
    store: &ResultStore,
    call_id: i64,
    index: i64,
    description: String,
    sql_command: Option<String>,
) -> Result<()> {
    let record = store.get_record(call_id, index)?;
    let id = store
        .insert_recommendation(&description, sql_command.as_deref(), record.result_ref())
        .context("Failed to store recommendation")?;
    println!("Recommendation {} added to {}", id, record.result_ref());
    Ok(())
}

pub fn list(store: &ResultStore, db_id: i64, kind: Option<ProcedureKind>) -> Result<()> {
    let recommendations = store.recommendations_for_connection(db_id, kind)?;
    if recommendations.is_empty() {
        println!("No recommendations found.");
        return Ok(());
    }

    println!("{:<6} {:<12} {:<45} {}", "ID", "Row", "Description", "SQL");
    println!("{}", "-".repeat(100));
    for rec in recommendations {
        println!(
            "{:<6} {:<12} {:<45} {}",
            rec.id_recom,
            rec.target.to_string(),
            super::truncate(&rec.description, 45),
            rec.sql_command
                .as_deref()
                .map(|s| super::truncate(s, 40))
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

pub fn remove(store: &ResultStore, id_recom: i64) -> Result<()> {
    if store.delete_recommendation(id_recom)? {
        println!("Removed recommendation {}", id_recom);
    } else {
        println!("No recommendation with ID {}", id_recom);
    }
    Ok(())
}
