//! Procedure result rows and the chat turns attached to them

use rusqlite::{params, OptionalExtension, Row, ToSql};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::{CallContext, ResultStore};
use crate::error::{DaoError, DaoResult};
use crate::procedure::{
    map_record, BlitzCacheRecord, BlitzIndexRecord, BlitzRecord, ProcedureKind, ProcedureRecord,
    RawRecord, ResultRef,
};

/// Outcome of persisting one procedure run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCall {
    pub call_id: i64,
    /// Result row ids in `procedure_order`
    pub result_ids: Vec<i64>,
}

/// Who produced a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::System => "system",
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" | "human" => Ok(ChatRole::User),
            // Older databases label model turns "ai"
            "assistant" | "ai" => Ok(ChatRole::Assistant),
            "system" => Ok(ChatRole::System),
            other => Err(format!("Unknown chat role: {}", other)),
        }
    }
}

/// One turn of the conversation about a result row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatEntry {
    pub ch_id: i64,
    pub response: String,
    pub role: ChatRole,
    pub chat_order: i64,
    pub result: ResultRef,
}

/// Columns selected for each result table, in `row_to_record` order.
/// The trailing EXISTS reports whether any chat references the row.
fn select_records(kind: ProcedureKind, filter: &str) -> String {
    let columns = match kind {
        ProcedureKind::Blitz => "r.pb_id, r.finding, r.details, r.priority",
        ProcedureKind::BlitzIndex => {
            "r.pbi_id, r.finding, r.details_schema_table_index_indexid, r.priority, r.more_info"
        }
        ProcedureKind::BlitzCache => {
            "r.pbc_id, r.query_text, r.avg_cpu_ms, r.total_cpu_ms, r.executions, \
             r.total_reads, r.last_execution, r.warnings"
        }
    };
    let id = kind.id_column();
    format!(
        "SELECT {columns}, r.raw_record, r.procedure_order, r.pc_id, \
         EXISTS(SELECT 1 FROM {chat} c WHERE c.{id} = r.{id}) \
         FROM {table} r {filter}",
        columns = columns,
        chat = kind.chat_table(),
        id = id,
        table = kind.result_table(),
        filter = filter,
    )
}

fn row_to_record(kind: ProcedureKind, row: &Row<'_>) -> rusqlite::Result<ProcedureRecord> {
    Ok(match kind {
        ProcedureKind::Blitz => ProcedureRecord::Blitz(BlitzRecord {
            pb_id: row.get(0)?,
            finding: row.get(1)?,
            details: row.get(2)?,
            priority: row.get(3)?,
            raw_record: row.get(4)?,
            procedure_order: row.get(5)?,
            pc_id: row.get(6)?,
            analyzed: row.get(7)?,
        }),
        ProcedureKind::BlitzIndex => ProcedureRecord::BlitzIndex(BlitzIndexRecord {
            pbi_id: row.get(0)?,
            finding: row.get(1)?,
            details_schema_table_index_indexid: row.get(2)?,
            priority: row.get(3)?,
            more_info: row.get(4)?,
            raw_record: row.get(5)?,
            procedure_order: row.get(6)?,
            pc_id: row.get(7)?,
            analyzed: row.get(8)?,
        }),
        ProcedureKind::BlitzCache => ProcedureRecord::BlitzCache(BlitzCacheRecord {
            pbc_id: row.get(0)?,
            query_text: row.get(1)?,
            avg_cpu_ms: row.get(2)?,
            total_cpu_ms: row.get(3)?,
            executions: row.get(4)?,
            total_reads: row.get(5)?,
            last_execution: row.get(6)?,
            warnings: row.get(7)?,
            raw_record: row.get(8)?,
            procedure_order: row.get(9)?,
            pc_id: row.get(10)?,
            analyzed: row.get(11)?,
        }),
    })
}

impl ResultStore {
    // ============================================
    // RESULTS
    // ============================================

    /// Persist one procedure run: a new call plus one result row per raw
    /// record, with `procedure_order` equal to the record's position.
    ///
    /// Runs in a single transaction; on any failure nothing is kept.
    pub fn store_records(&self, ctx: &CallContext, records: &[RawRecord]) -> DaoResult<StoredCall> {
        let kind = self.procedure_kind(ctx.procedure_type_id)?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO Procedure_call (run_at, p_id, db_id) VALUES (?1, ?2, ?3)",
            params![
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                ctx.procedure_type_id,
                ctx.db_id
            ],
        )
        .map_err(|e| match DaoError::from(e) {
            DaoError::Integrity(msg) => DaoError::integrity(format!(
                "Cannot create call for connection {}: {}",
                ctx.db_id, msg
            )),
            other => other,
        })?;
        let call_id = tx.last_insert_rowid();

        let mut result_ids = Vec::with_capacity(records.len());
        for (order, raw) in records.iter().enumerate() {
            let mapped = map_record(kind, raw);
            let inserted = match kind {
                ProcedureKind::Blitz => tx.execute(
                    r#"INSERT INTO Procedure_blitz
                       (finding, details, priority, raw_record, procedure_order, pc_id)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                    params![
                        mapped.finding,
                        mapped.details,
                        mapped.priority,
                        mapped.raw_record,
                        order as i64,
                        call_id
                    ],
                ),
                ProcedureKind::BlitzIndex => tx.execute(
                    r#"INSERT INTO Procedure_blitzindex
                       (finding, details_schema_table_index_indexid, priority, more_info,
                        raw_record, procedure_order, pc_id)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                    params![
                        mapped.finding,
                        mapped.details,
                        mapped.priority,
                        mapped.more_info,
                        mapped.raw_record,
                        order as i64,
                        call_id
                    ],
                ),
                ProcedureKind::BlitzCache => tx.execute(
                    r#"INSERT INTO Procedure_blitzcache
                       (query_text, avg_cpu_ms, total_cpu_ms, executions, total_reads,
                        last_execution, warnings, raw_record, procedure_order, pc_id)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
                    params![
                        mapped.query_text,
                        mapped.avg_cpu_ms,
                        mapped.total_cpu_ms,
                        mapped.executions,
                        mapped.total_reads,
                        mapped.last_execution,
                        mapped.warnings,
                        mapped.raw_record,
                        order as i64,
                        call_id
                    ],
                ),
            };

            if let Err(e) = inserted {
                warn!(procedure = %kind, row = order, "failed to store result row: {}", e);
                return Err(e.into());
            }
            result_ids.push(tx.last_insert_rowid());
        }

        tx.commit()?;
        info!(
            procedure = %kind,
            db_id = ctx.db_id,
            call_id,
            rows = result_ids.len(),
            "stored procedure results"
        );
        Ok(StoredCall { call_id, result_ids })
    }

    /// Procedure of an existing call, `None` when the call is absent
    fn call_kind(&self, call_id: i64) -> DaoResult<Option<ProcedureKind>> {
        let p_id: Option<i64> = self
            .conn
            .query_row(
                "SELECT p_id FROM Procedure_call WHERE pc_id = ?1",
                params![call_id],
                |row| row.get(0),
            )
            .optional()?;
        p_id.map(|id| self.procedure_kind(id)).transpose()
    }

    fn query_records(
        &self,
        kind: ProcedureKind,
        filter: &str,
        args: &[&dyn ToSql],
    ) -> DaoResult<Vec<ProcedureRecord>> {
        let mut stmt = self.conn.prepare(&select_records(kind, filter))?;
        let rows = stmt.query_map(args, |row| row_to_record(kind, row))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// All result rows of a call in `procedure_order`.
    ///
    /// An unknown call has no rows, so this returns an empty list rather
    /// than an error; use `get_call` to tell the two apart.
    pub fn get_all_records(&self, call_id: i64) -> DaoResult<Vec<ProcedureRecord>> {
        let Some(kind) = self.call_kind(call_id)? else {
            debug!(call_id, "no such call");
            return Ok(Vec::new());
        };
        self.query_records(
            kind,
            "WHERE r.pc_id = ?1 ORDER BY r.procedure_order",
            params![call_id],
        )
    }

    /// The row at position `index` of a call's output
    pub fn get_record(&self, call_id: i64, index: i64) -> DaoResult<ProcedureRecord> {
        let kind = self
            .call_kind(call_id)?
            .ok_or_else(|| DaoError::not_found(format!("procedure call {}", call_id)))?;
        if index < 0 {
            return Err(DaoError::not_found(format!(
                "record {} of call {}",
                index, call_id
            )));
        }
        self.query_records(
            kind,
            "WHERE r.pc_id = ?1 ORDER BY r.procedure_order LIMIT 1 OFFSET ?2",
            params![call_id, index],
        )?
        .into_iter()
        .next()
        .ok_or_else(|| DaoError::not_found(format!("record {} of call {}", index, call_id)))
    }

    /// Fetch one result row by reference
    pub fn get_result(&self, result: ResultRef) -> DaoResult<ProcedureRecord> {
        let filter = format!("WHERE r.{} = ?1", result.kind().id_column());
        self.query_records(result.kind(), &filter, params![result.id()])?
            .into_iter()
            .next()
            .ok_or_else(|| DaoError::not_found(format!("result row {}", result)))
    }

    pub(super) fn result_exists(&self, result: ResultRef) -> DaoResult<bool> {
        let kind = result.kind();
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)",
            kind.result_table(),
            kind.id_column()
        );
        self.conn
            .query_row(&sql, params![result.id()], |row| row.get(0))
            .map_err(Into::into)
    }

    // ============================================
    // CHATS
    // ============================================

    /// Append a chat turn to a result row and return its `ch_id`
    pub fn store_chat_entry(
        &self,
        result: ResultRef,
        role: ChatRole,
        text: &str,
        chat_order: i64,
    ) -> DaoResult<i64> {
        if !self.result_exists(result)? {
            return Err(DaoError::not_found(format!("result row {}", result)));
        }

        let kind = result.kind();
        let sql = format!(
            "INSERT INTO {} (response, type, chat_order, {}) VALUES (?1, ?2, ?3, ?4)",
            kind.chat_table(),
            kind.id_column()
        );
        self.conn
            .execute(&sql, params![text, role.as_str(), chat_order, result.id()])?;
        let ch_id = self.conn.last_insert_rowid();
        debug!(%result, ch_id, %role, chat_order, "stored chat entry");
        Ok(ch_id)
    }

    /// Store a question and its answer as consecutive turns starting at
    /// `chat_order`. Both rows are written or neither is.
    pub fn store_chat_exchange(
        &self,
        result: ResultRef,
        question: &str,
        answer: &str,
        chat_order: i64,
    ) -> DaoResult<(i64, i64)> {
        if !self.result_exists(result)? {
            return Err(DaoError::not_found(format!("result row {}", result)));
        }

        let kind = result.kind();
        let sql = format!(
            "INSERT INTO {} (response, type, chat_order, {}) VALUES (?1, ?2, ?3, ?4)",
            kind.chat_table(),
            kind.id_column()
        );

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            &sql,
            params![question, ChatRole::User.as_str(), chat_order, result.id()],
        )?;
        let question_id = tx.last_insert_rowid();
        tx.execute(
            &sql,
            params![answer, ChatRole::Assistant.as_str(), chat_order + 1, result.id()],
        )?;
        let answer_id = tx.last_insert_rowid();
        tx.commit()?;

        debug!(%result, question_id, answer_id, chat_order, "stored chat exchange");
        Ok((question_id, answer_id))
    }

    /// Chat turns of a result row, ascending by `chat_order`.
    /// Turns sharing an order keep insertion order.
    pub fn get_chat_history(&self, result: ResultRef) -> DaoResult<Vec<ChatEntry>> {
        let kind = result.kind();
        let sql = format!(
            "SELECT ch_id, response, type, chat_order FROM {} WHERE {} = ?1 \
             ORDER BY chat_order, ch_id",
            kind.chat_table(),
            kind.id_column()
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![result.id()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut history = Vec::new();
        for row in rows {
            let (ch_id, response, role, chat_order) = row?;
            let role = role.parse::<ChatRole>().map_err(DaoError::Integrity)?;
            history.push(ChatEntry {
                ch_id,
                response,
                role,
                chat_order,
                result,
            });
        }
        Ok(history)
    }

    /// Order value that places a new turn after every existing one
    pub fn next_chat_order(&self, result: ResultRef) -> DaoResult<i64> {
        let kind = result.kind();
        let sql = format!(
            "SELECT COALESCE(MAX(chat_order) + 1, 0) FROM {} WHERE {} = ?1",
            kind.chat_table(),
            kind.id_column()
        );
        self.conn
            .query_row(&sql, params![result.id()], |row| row.get(0))
            .map_err(Into::into)
    }
}
