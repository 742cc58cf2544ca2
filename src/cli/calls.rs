//! Calls command implementation

use anyhow::Result;

use crate::store::ResultStore;

pub fn run(store: &ResultStore, db_id: Option<i64>) -> Result<()> {
    let calls = store.list_calls(db_id)?;

    if calls.is_empty() {
        println!("No procedure calls found. Run 'blitzscope import' first.");
        return Ok(());
    }

    println!(
        "{:<8} {:<20} {:<15} {:<20} {}",
        "Call", "Run at", "Procedure", "Database", "Rows"
    );
    println!("{}", "-".repeat(75));

    for call in calls {
        println!(
            "{:<8} {:<20} {:<15} {:<20} {}",
            call.pc_id,
            call.run_at,
            call.kind.procedure_name(),
            super::truncate(&call.db_name, 20),
            call.row_count,
        );
    }

    Ok(())
}
