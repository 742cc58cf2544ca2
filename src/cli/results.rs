//! Results and show commands

use anyhow::{bail, Result};

use crate::procedure::filter::{self, CacheThresholds, SortKey};
use crate::procedure::{ProcedureKind, ProcedureRecord};
use crate::store::ResultStore;

/// Display options for `results`
#[derive(Debug, Default)]
pub struct ResultsQuery {
    pub max_priority: Option<i64>,
    pub groups: Vec<String>,
    pub list_groups: bool,
    pub thresholds: CacheThresholds,
    pub sort_by: Option<String>,
    /// Largest values first; the CLI default
    pub descending: bool,
    /// Inclusive `(start, end)` hours for plan cache rows
    pub hours: Option<(u32, u32)>,
}

/// Parse an hour window such as `22-6`
pub fn parse_hours(window: &str) -> Result<(u32, u32)> {
    let Some((start, end)) = window.split_once('-') else {
        bail!("Hour window must look like START-END, got '{}'", window);
    };
    let start: u32 = start.trim().parse()?;
    let end: u32 = end.trim().parse()?;
    if start > 23 || end > 23 {
        bail!("Hours must be between 0 and 23");
    }
    Ok((start, end))
}

/// Apply the query's filters and ordering to a call's rows
pub fn select(records: Vec<ProcedureRecord>, kind: ProcedureKind, query: &ResultsQuery) -> Vec<ProcedureRecord> {
    let mut records = records;

    // Rows without a usable priority are never listed for findings
    if kind != ProcedureKind::BlitzCache {
        records = filter::filter_priority(records, query.max_priority);
        records = filter::filter_groups(records, &query.groups);
    } else if !query.groups.is_empty() {
        tracing::warn!("plan cache rows have no finding groups, ignoring --group");
    }
    records = filter::filter_cache(records, &query.thresholds);
    if let Some((start, end)) = query.hours {
        records = filter::filter_by_hour(records, start, end);
    }
    if let Some(key) = query.sort_by.as_deref().and_then(SortKey::parse) {
        records = filter::sort_records(records, key, query.descending);
    }
    records
}

pub fn list(store: &ResultStore, call_id: i64, query: &ResultsQuery) -> Result<()> {
    let call = store.get_call(call_id)?;
    let records = store.get_all_records(call_id)?;

    if query.list_groups {
        for group in filter::finding_groups(&records) {
            println!("{}", group);
        }
        return Ok(());
    }

    if let Some(key) = query.sort_by.as_deref() {
        if SortKey::parse(key).is_none() {
            tracing::warn!("unknown sort key '{}', keeping stored order", key);
        }
    }

    let total = records.len();
    let records = select(records, call.kind, query);

    println!(
        "Call {} | {} | {} | {} | showing {} of {} rows",
        call.pc_id,
        call.kind.display_name(),
        call.db_name,
        call.run_at,
        records.len(),
        total
    );
    println!("{}", "-".repeat(100));

    if records.is_empty() {
        println!("No rows match.");
        return Ok(());
    }

    match call.kind {
        ProcedureKind::BlitzCache => {
            println!(
                "{:<5} {:<3} {:>12} {:>12} {:>10} {:>12}  {}",
                "#", "AI", "Avg CPU ms", "Total CPU ms", "Execs", "Reads", "Query"
            );
            for record in &records {
                let ProcedureRecord::BlitzCache(r) = record else {
                    continue;
                };
                println!(
                    "{:<5} {:<3} {:>12} {:>12} {:>10} {:>12}  {}",
                    r.procedure_order,
                    marker(record),
                    number(r.avg_cpu_ms),
                    number(r.total_cpu_ms),
                    number(r.executions),
                    number(r.total_reads),
                    super::truncate(r.query_text.as_deref().unwrap_or("-"), 50),
                );
            }
        }
        _ => {
            println!("{:<5} {:<3} {:<8} {:<40} {}", "#", "AI", "Priority", "Finding", "Details");
            for record in &records {
                println!(
                    "{:<5} {:<3} {:<8} {:<40} {}",
                    record.procedure_order(),
                    marker(record),
                    number(record.priority()),
                    super::truncate(record.headline().unwrap_or("-"), 40),
                    super::truncate(record.detail().unwrap_or("-"), 50),
                );
            }
        }
    }

    Ok(())
}

pub fn show(store: &ResultStore, call_id: i64, index: i64) -> Result<()> {
    let record = store.get_record(call_id, index)?;
    let target = record.result_ref();

    println!("{} row {} of call {} ({})", record.kind(), index, call_id, target);
    println!("{}", "-".repeat(80));
    match &record {
        ProcedureRecord::Blitz(r) => {
            field("Priority", number(r.priority));
            field("Finding", text(&r.finding));
            field("Details", text(&r.details));
        }
        ProcedureRecord::BlitzIndex(r) => {
            field("Priority", number(r.priority));
            field("Finding", text(&r.finding));
            field("Details", text(&r.details_schema_table_index_indexid));
            field("More Info", text(&r.more_info));
        }
        ProcedureRecord::BlitzCache(r) => {
            field("Avg CPU (ms)", number(r.avg_cpu_ms));
            field("Total CPU (ms)", number(r.total_cpu_ms));
            field("Executions", number(r.executions));
            field("Total Reads", number(r.total_reads));
            field("Last Execution", text(&r.last_execution));
            field("Warnings", text(&r.warnings));
            println!("\nQuery Text:\n{}", text(&r.query_text));
        }
    }

    let history = store.get_chat_history(target)?;
    if !history.is_empty() {
        println!("\n=== Conversation ({} turns) ===", history.len());
        for entry in history {
            println!("\n[{}] {}", entry.role, entry.response);
        }
    }

    let recommendations = store.recommendations_for_record(target)?;
    if !recommendations.is_empty() {
        println!("\n=== Recommendations ===");
        for rec in recommendations {
            println!("\n#{} {}", rec.id_recom, rec.description);
            if let Some(sql) = rec.sql_command {
                println!("{}", sql);
            }
        }
    }

    Ok(())
}

fn marker(record: &ProcedureRecord) -> &'static str {
    if record.analyzed() {
        "*"
    } else {
        ""
    }
}

fn number<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn text(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("-")
}

fn field(name: &str, value: impl std::fmt::Display) {
    println!("{:<16} {}", format!("{}:", name), value);
}
