//! Diagnostic procedure kinds and their result records
//!
//! Each First Responder Kit procedure returns a tabular result set with its
//! own column names. This module maps those raw rows onto typed records:
//! - sp_Blitz: server-wide health findings
//! - sp_BlitzIndex: index design findings
//! - sp_BlitzCache: expensive queries from the plan cache

pub mod filter;
mod mapping;
mod source;

pub use mapping::{map_record, MappedRecord};
pub use source::{JsonExportSource, ResultSource};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// One raw output row of a procedure, keyed by the procedure's column names
pub type RawRecord = Map<String, Value>;

/// The diagnostic procedures whose output is stored locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcedureKind {
    Blitz,
    BlitzIndex,
    BlitzCache,
}

impl ProcedureKind {
    pub const ALL: [ProcedureKind; 3] = [
        ProcedureKind::Blitz,
        ProcedureKind::BlitzIndex,
        ProcedureKind::BlitzCache,
    ];

    /// Seeded `Procedure_type.p_id`
    pub fn type_id(self) -> i64 {
        match self {
            ProcedureKind::Blitz => 1,
            ProcedureKind::BlitzIndex => 2,
            ProcedureKind::BlitzCache => 3,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProcedureKind::Blitz => "Blitz",
            ProcedureKind::BlitzIndex => "Blitz Index",
            ProcedureKind::BlitzCache => "Blitz Cache",
        }
    }

    pub fn procedure_name(self) -> &'static str {
        match self {
            ProcedureKind::Blitz => "sp_Blitz",
            ProcedureKind::BlitzIndex => "sp_BlitzIndex",
            ProcedureKind::BlitzCache => "sp_BlitzCache",
        }
    }

    pub fn result_table(self) -> &'static str {
        match self {
            ProcedureKind::Blitz => "Procedure_blitz",
            ProcedureKind::BlitzIndex => "Procedure_blitzindex",
            ProcedureKind::BlitzCache => "Procedure_blitzcache",
        }
    }

    pub fn chat_table(self) -> &'static str {
        match self {
            ProcedureKind::Blitz => "Chat_blitz",
            ProcedureKind::BlitzIndex => "Chat_blitzindex",
            ProcedureKind::BlitzCache => "Chat_blitzcache",
        }
    }

    /// Primary key column of the result table, also the FK column in chats
    /// and recommendations
    pub fn id_column(self) -> &'static str {
        match self {
            ProcedureKind::Blitz => "pb_id",
            ProcedureKind::BlitzIndex => "pbi_id",
            ProcedureKind::BlitzCache => "pbc_id",
        }
    }

    pub fn from_procedure_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.procedure_name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.procedure_name())
    }
}

impl FromStr for ProcedureKind {
    type Err = String;

    /// Accepts the procedure name (`sp_BlitzIndex`), the display name
    /// (`Blitz Index`) or a compact alias (`blitzindex`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        let compact: String = wanted
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();

        ProcedureKind::ALL
            .into_iter()
            .find(|k| {
                k.procedure_name().eq_ignore_ascii_case(wanted)
                    || k.display_name().eq_ignore_ascii_case(wanted)
                    || compact == k.procedure_name()[3..].to_ascii_lowercase()
                    || compact == k.procedure_name().replace('_', "").to_ascii_lowercase()
            })
            .ok_or_else(|| format!("Unknown procedure: {}", s))
    }
}

/// Reference to one stored result row.
///
/// Result rows live in one table per procedure, so a bare id is ambiguous;
/// the variant names the table. Chats and recommendations attach to rows
/// through this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultRef {
    Blitz(i64),
    BlitzIndex(i64),
    BlitzCache(i64),
}

impl ResultRef {
    pub fn new(kind: ProcedureKind, id: i64) -> Self {
        match kind {
            ProcedureKind::Blitz => ResultRef::Blitz(id),
            ProcedureKind::BlitzIndex => ResultRef::BlitzIndex(id),
            ProcedureKind::BlitzCache => ResultRef::BlitzCache(id),
        }
    }

    pub fn kind(self) -> ProcedureKind {
        match self {
            ResultRef::Blitz(_) => ProcedureKind::Blitz,
            ResultRef::BlitzIndex(_) => ProcedureKind::BlitzIndex,
            ResultRef::BlitzCache(_) => ProcedureKind::BlitzCache,
        }
    }

    pub fn id(self) -> i64 {
        match self {
            ResultRef::Blitz(id) | ResultRef::BlitzIndex(id) | ResultRef::BlitzCache(id) => id,
        }
    }
}

impl fmt::Display for ResultRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.kind().id_column(), self.id())
    }
}

// ============================================
// RECORD TYPES
// ============================================

/// One stored sp_Blitz row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlitzRecord {
    pub pb_id: i64,
    pub finding: Option<String>,
    pub details: Option<String>,
    pub priority: Option<i64>,
    pub raw_record: Option<String>,
    pub procedure_order: i64,
    pub pc_id: i64,
    pub analyzed: bool,
}

/// One stored sp_BlitzIndex row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlitzIndexRecord {
    pub pbi_id: i64,
    pub finding: Option<String>,
    pub details_schema_table_index_indexid: Option<String>,
    pub priority: Option<i64>,
    pub more_info: Option<String>,
    pub raw_record: Option<String>,
    pub procedure_order: i64,
    pub pc_id: i64,
    pub analyzed: bool,
}

/// One stored sp_BlitzCache row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlitzCacheRecord {
    pub pbc_id: i64,
    pub query_text: Option<String>,
    pub avg_cpu_ms: Option<f64>,
    pub total_cpu_ms: Option<f64>,
    pub executions: Option<i64>,
    pub total_reads: Option<i64>,
    pub last_execution: Option<String>,
    pub warnings: Option<String>,
    pub raw_record: Option<String>,
    pub procedure_order: i64,
    pub pc_id: i64,
    pub analyzed: bool,
}

/// A stored result row of any procedure
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "procedure")]
pub enum ProcedureRecord {
    Blitz(BlitzRecord),
    BlitzIndex(BlitzIndexRecord),
    BlitzCache(BlitzCacheRecord),
}

impl ProcedureRecord {
    pub fn kind(&self) -> ProcedureKind {
        match self {
            ProcedureRecord::Blitz(_) => ProcedureKind::Blitz,
            ProcedureRecord::BlitzIndex(_) => ProcedureKind::BlitzIndex,
            ProcedureRecord::BlitzCache(_) => ProcedureKind::BlitzCache,
        }
    }

    pub fn result_ref(&self) -> ResultRef {
        match self {
            ProcedureRecord::Blitz(r) => ResultRef::Blitz(r.pb_id),
            ProcedureRecord::BlitzIndex(r) => ResultRef::BlitzIndex(r.pbi_id),
            ProcedureRecord::BlitzCache(r) => ResultRef::BlitzCache(r.pbc_id),
        }
    }

    pub fn procedure_order(&self) -> i64 {
        match self {
            ProcedureRecord::Blitz(r) => r.procedure_order,
            ProcedureRecord::BlitzIndex(r) => r.procedure_order,
            ProcedureRecord::BlitzCache(r) => r.procedure_order,
        }
    }

    pub fn call_id(&self) -> i64 {
        match self {
            ProcedureRecord::Blitz(r) => r.pc_id,
            ProcedureRecord::BlitzIndex(r) => r.pc_id,
            ProcedureRecord::BlitzCache(r) => r.pc_id,
        }
    }

    pub fn analyzed(&self) -> bool {
        match self {
            ProcedureRecord::Blitz(r) => r.analyzed,
            ProcedureRecord::BlitzIndex(r) => r.analyzed,
            ProcedureRecord::BlitzCache(r) => r.analyzed,
        }
    }

    pub fn priority(&self) -> Option<i64> {
        match self {
            ProcedureRecord::Blitz(r) => r.priority,
            ProcedureRecord::BlitzIndex(r) => r.priority,
            ProcedureRecord::BlitzCache(_) => None,
        }
    }

    /// The finding text, or the query text for plan cache rows
    pub fn headline(&self) -> Option<&str> {
        match self {
            ProcedureRecord::Blitz(r) => r.finding.as_deref(),
            ProcedureRecord::BlitzIndex(r) => r.finding.as_deref(),
            ProcedureRecord::BlitzCache(r) => r.query_text.as_deref(),
        }
    }

    /// Secondary text shown next to the headline
    pub fn detail(&self) -> Option<&str> {
        match self {
            ProcedureRecord::Blitz(r) => r.details.as_deref(),
            ProcedureRecord::BlitzIndex(r) => r.details_schema_table_index_indexid.as_deref(),
            ProcedureRecord::BlitzCache(r) => r.warnings.as_deref(),
        }
    }

    /// Text handed to the analysis prompt as the `{finding}` placeholder
    pub fn prompt_subject(&self) -> String {
        match self {
            ProcedureRecord::Blitz(r) => join_present(&[
                r.finding.as_deref(),
                r.details.as_deref(),
            ]),
            ProcedureRecord::BlitzIndex(r) => join_present(&[
                r.finding.as_deref(),
                r.details_schema_table_index_indexid.as_deref(),
                r.more_info.as_deref(),
            ]),
            ProcedureRecord::BlitzCache(r) => {
                let mut parts = Vec::new();
                if let Some(q) = &r.query_text {
                    parts.push(q.clone());
                }
                if let Some(avg) = r.avg_cpu_ms {
                    parts.push(format!("Avg CPU (ms): {}", avg));
                }
                if let Some(total) = r.total_cpu_ms {
                    parts.push(format!("Total CPU (ms): {}", total));
                }
                if let Some(w) = &r.warnings {
                    parts.push(format!("Warnings: {}", w));
                }
                parts.join("\n")
            }
        }
    }
}

fn join_present(parts: &[Option<&str>]) -> String {
    parts
        .iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
}
