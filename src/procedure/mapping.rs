//! Raw procedure rows to storable column values

use serde_json::Value;
use tracing::debug;

use super::{ProcedureKind, RawRecord};

/// Column values extracted from one raw row, ready for insertion.
///
/// Fields a procedure does not produce stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRecord {
    pub finding: Option<String>,
    pub details: Option<String>,
    pub priority: Option<i64>,
    pub more_info: Option<String>,
    pub query_text: Option<String>,
    pub avg_cpu_ms: Option<f64>,
    pub total_cpu_ms: Option<f64>,
    pub executions: Option<i64>,
    pub total_reads: Option<i64>,
    pub last_execution: Option<String>,
    pub warnings: Option<String>,
    /// The untouched source row as JSON
    pub raw_record: String,
}

const BLITZ_DETAILS: &str = "Details";
const BLITZINDEX_DETAILS: &str = "Details: schema.table.index(indexid)";

/// Map one raw row of `kind`'s output onto its result-table columns
pub fn map_record(kind: ProcedureKind, raw: &RawRecord) -> MappedRecord {
    let mut mapped = MappedRecord {
        raw_record: Value::Object(raw.clone()).to_string(),
        ..Default::default()
    };

    match kind {
        ProcedureKind::Blitz => {
            mapped.finding = text(raw, "Finding");
            mapped.details = text(raw, BLITZ_DETAILS);
            mapped.priority = integer(raw, "Priority");
        }
        ProcedureKind::BlitzIndex => {
            mapped.finding = text(raw, "Finding");
            // Older kit versions label the column without the schema hint
            mapped.details = text(raw, BLITZINDEX_DETAILS).or_else(|| text(raw, BLITZ_DETAILS));
            mapped.priority = integer(raw, "Priority");
            mapped.more_info = text(raw, "More Info");
        }
        ProcedureKind::BlitzCache => {
            mapped.query_text = text(raw, "Query Text");
            mapped.avg_cpu_ms = float(raw, "Avg CPU (ms)");
            mapped.total_cpu_ms = float(raw, "Total CPU (ms)");
            mapped.executions = integer(raw, "# Executions");
            mapped.total_reads = integer(raw, "Total Reads");
            mapped.last_execution = text(raw, "Last Execution");
            mapped.warnings = text(raw, "Warnings");
        }
    }

    debug!(procedure = %kind, columns = raw.len(), "mapped raw record");
    mapped
}

fn text(raw: &RawRecord, column: &str) -> Option<String> {
    match raw.get(column)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn integer(raw: &RawRecord, column: &str) -> Option<i64> {
    match raw.get(column)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

fn float(raw: &RawRecord, column: &str) -> Option<f64> {
    match raw.get(column)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
