//! LLM analysis of stored result rows
//!
//! Each result row carries its own conversation. The first turn asks the
//! model about the finding using a prompt template; later turns are the
//! caller's follow-up questions. Every turn is persisted through the store.

mod openai;
mod prompt;

pub use openai::OpenAiChatModel;
pub use prompt::{fill, PromptLibrary, GENERAL_TEMPLATE_FILE, SYSTEM_PROMPT};

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::DaoError;
use crate::procedure::ResultRef;
use crate::store::{ChatRole, ResultStore};

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Store(#[from] DaoError),

    /// The model endpoint could not be reached
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// The model answered with an error or an unusable reply
    #[error("Model error: {0}")]
    Model(String),

    #[error("Failed to read prompt template {path}: {source}")]
    Prompt {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Missing API key: set {0}")]
    MissingApiKey(String),

    #[error("A follow-up question is required once a conversation has started")]
    MissingQuestion,
}

/// One role-tagged message sent to the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A chat completion backend
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier, for logging
    fn name(&self) -> &str;

    /// Complete the conversation and return the assistant's reply
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AnalysisError>;
}

/// Result of one analysis turn
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisTurn {
    pub question: String,
    pub answer: String,
    /// `chat_order` of the stored question; the answer follows it
    pub chat_order: i64,
}

/// Outcome of running first turns over several rows
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub processed: usize,
    /// Rows that already had a conversation
    pub skipped: usize,
    /// Recommendations attached to the processed rows
    pub recommendations: usize,
    pub failures: Vec<(ResultRef, AnalysisError)>,
    pub elapsed: Duration,
}

/// Runs analysis conversations against a store
pub struct Analyst<'a, M: ChatModel> {
    store: &'a ResultStore,
    model: M,
    prompts: PromptLibrary,
}

impl<'a, M: ChatModel> Analyst<'a, M> {
    pub fn new(store: &'a ResultStore, model: M, prompts: PromptLibrary) -> Self {
        Self {
            store,
            model,
            prompts,
        }
    }

    /// Run one turn of the conversation about `target`.
    ///
    /// The first turn renders the prompt template for the row, appending
    /// `question` when one is given. Later turns require `question`. Both
    /// the question and the reply are stored; nothing is stored when the
    /// model call fails.
    pub async fn analyze(
        &self,
        target: ResultRef,
        question: Option<&str>,
    ) -> Result<AnalysisTurn, AnalysisError> {
        let record = self.store.get_result(target)?;
        let history = self.store.get_chat_history(target)?;
        let question = question.map(str::trim).filter(|q| !q.is_empty());

        let user_text = if history.is_empty() {
            let call = self.store.get_call(record.call_id())?;
            let prompt =
                self.prompts
                    .render(record.kind(), &record.prompt_subject(), &call.db_name)?;
            match question {
                Some(q) => format!("{}\n\n{}", prompt, q),
                None => prompt,
            }
        } else {
            question.ok_or(AnalysisError::MissingQuestion)?.to_string()
        };

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::new(ChatRole::System, SYSTEM_PROMPT));
        messages.extend(
            history
                .iter()
                .map(|entry| ChatMessage::new(entry.role, entry.response.clone())),
        );
        messages.push(ChatMessage::new(ChatRole::User, user_text.clone()));

        let answer = self.model.complete(&messages).await?;

        let chat_order = self.store.next_chat_order(target)?;
        self.store
            .store_chat_exchange(target, &user_text, &answer, chat_order)?;

        info!(
            %target,
            model = self.model.name(),
            turn = history.len() / 2 + 1,
            "stored analysis turn"
        );
        Ok(AnalysisTurn {
            question: user_text,
            answer,
            chat_order,
        })
    }

    /// Run the first turn for each row in turn. A failing row is recorded
    /// and the rest are still processed.
    pub async fn analyze_many(&self, targets: &[ResultRef]) -> BatchSummary {
        let started = Instant::now();
        let mut summary = BatchSummary {
            total: targets.len(),
            ..Default::default()
        };

        for &target in targets {
            match self.first_turn(target).await {
                Ok(true) => {
                    summary.processed += 1;
                    match self.store.recommendations_for_record(target) {
                        Ok(recs) => summary.recommendations += recs.len(),
                        Err(e) => warn!(%target, error = %e, "could not count recommendations"),
                    }
                }
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    warn!(%target, error = %e, "analysis failed");
                    summary.failures.push((target, e));
                }
            }
        }

        summary.elapsed = started.elapsed();
        info!(
            total = summary.total,
            processed = summary.processed,
            failed = summary.failures.len(),
            "batch analysis finished"
        );
        summary
    }

    /// Returns false when the row already has a conversation
    async fn first_turn(&self, target: ResultRef) -> Result<bool, AnalysisError> {
        if !self.store.get_chat_history(target)?.is_empty() {
            return Ok(false);
        }
        self.analyze(target, None).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::{ProcedureKind, RawRecord};
    use crate::store::{CallContext, NewConnection};
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every request and replies with a canned answer
    #[derive(Default)]
    struct FakeModel {
        requests: Mutex<Vec<Vec<ChatMessage>>>,
        fail: bool,
        /// Fail only when the user message mentions this text
        fail_on: Option<String>,
    }

    #[async_trait]
    impl ChatModel for FakeModel {
        fn name(&self) -> &str {
            "fake"
        }

        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AnalysisError> {
            if self.fail {
                return Err(AnalysisError::Connectivity("connection refused".into()));
            }
            if let (Some(text), Some(last)) = (&self.fail_on, messages.last()) {
                if last.content.contains(text.as_str()) {
                    return Err(AnalysisError::Model("rate limited".into()));
                }
            }
            let mut requests = self.requests.lock().unwrap();
            requests.push(messages.to_vec());
            Ok(format!("answer {}", requests.len()))
        }
    }

    fn seeded_store() -> (ResultStore, ResultRef) {
        let (store, targets) = seeded_rows(&["Backups Not Performed Recently"]);
        (store, targets[0])
    }

    fn seeded_rows(findings: &[&str]) -> (ResultStore, Vec<ResultRef>) {
        let store = ResultStore::open_in_memory().unwrap();
        let db_id = store
            .insert_connection(&NewConnection {
                db_name: "Shop".into(),
                db_user: "sa".into(),
                db_password: "pw".into(),
                db_host: "localhost".into(),
                db_port: 1433,
                version: None,
                instance_memory_mb: None,
            })
            .unwrap();
        let rows: Vec<RawRecord> = findings
            .iter()
            .map(|f| json!({"Priority": 1, "Finding": f}).as_object().cloned().unwrap())
            .collect();
        let stored = store
            .store_records(&CallContext::new(ProcedureKind::Blitz, db_id), &rows)
            .unwrap();
        let targets = stored.result_ids.into_iter().map(ResultRef::Blitz).collect();
        (store, targets)
    }

    #[tokio::test]
    async fn test_first_turn_uses_template() {
        let (store, target) = seeded_store();
        let analyst = Analyst::new(&store, FakeModel::default(), PromptLibrary::default());

        let turn = analyst.analyze(target, None).await.unwrap();
        assert!(turn.question.contains("Backups Not Performed Recently"));
        assert!(turn.question.contains("Shop"));
        assert_eq!(turn.answer, "answer 1");
        assert_eq!(turn.chat_order, 0);

        let requests = analyst.model.requests.lock().unwrap();
        assert_eq!(requests[0].len(), 2);
        assert_eq!(requests[0][0].role, ChatRole::System);
        assert_eq!(requests[0][1].role, ChatRole::User);

        let history = store.get_chat_history(target).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, ChatRole::Assistant);
        assert!(store.get_result(target).unwrap().analyzed());
    }

    #[tokio::test]
    async fn test_follow_up_sends_history() {
        let (store, target) = seeded_store();
        let analyst = Analyst::new(&store, FakeModel::default(), PromptLibrary::default());

        analyst.analyze(target, None).await.unwrap();
        let turn = analyst
            .analyze(target, Some("How do I schedule them?"))
            .await
            .unwrap();
        assert_eq!(turn.question, "How do I schedule them?");
        assert_eq!(turn.chat_order, 2);

        let requests = analyst.model.requests.lock().unwrap();
        let second = &requests[1];
        assert_eq!(second.len(), 4);
        assert_eq!(second[2].content, "answer 1");
        assert_eq!(second[3].content, "How do I schedule them?");

        let orders: Vec<_> = store
            .get_chat_history(target)
            .unwrap()
            .iter()
            .map(|e| e.chat_order)
            .collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_follow_up_without_question_is_rejected() {
        let (store, target) = seeded_store();
        let analyst = Analyst::new(&store, FakeModel::default(), PromptLibrary::default());

        analyst.analyze(target, None).await.unwrap();
        let err = analyst.analyze(target, Some("  ")).await.unwrap_err();
        assert!(matches!(err, AnalysisError::MissingQuestion));
    }

    #[tokio::test]
    async fn test_failed_model_call_stores_nothing() {
        let (store, target) = seeded_store();
        let model = FakeModel {
            fail: true,
            ..Default::default()
        };
        let analyst = Analyst::new(&store, model, PromptLibrary::default());

        let err = analyst.analyze(target, None).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Connectivity(_)));
        assert!(store.get_chat_history(target).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_row_is_not_found() {
        let (store, _) = seeded_store();
        let analyst = Analyst::new(&store, FakeModel::default(), PromptLibrary::default());

        let err = analyst.analyze(ResultRef::BlitzCache(1), None).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Store(e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn test_batch_continues_past_failing_row() {
        let (store, targets) = seeded_rows(&[
            "Backups Not Performed Recently",
            "Max Memory Set Too High",
            "Auto-Shrink Enabled",
        ]);
        store
            .insert_recommendation("Schedule full backups", None, targets[0])
            .unwrap();
        let model = FakeModel {
            fail_on: Some("Max Memory".into()),
            ..Default::default()
        };
        let analyst = Analyst::new(&store, model, PromptLibrary::default());

        let summary = analyst.analyze_many(&targets).await;
        assert_eq!(summary.total, 3);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.recommendations, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].0, targets[1]);
        assert!(matches!(summary.failures[0].1, AnalysisError::Model(_)));

        assert!(store.get_result(targets[0]).unwrap().analyzed());
        assert!(!store.get_result(targets[1]).unwrap().analyzed());
        assert!(store.get_result(targets[2]).unwrap().analyzed());

        // Rows with a conversation are left alone on a second pass
        let again = analyst.analyze_many(&targets).await;
        assert_eq!(again.skipped, 2);
        assert_eq!(again.failures.len(), 1);
        assert_eq!(analyst.model.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_batch_reports_missing_rows() {
        let (store, targets) = seeded_rows(&["Backups Not Performed Recently"]);
        let analyst = Analyst::new(&store, FakeModel::default(), PromptLibrary::default());

        let summary = analyst
            .analyze_many(&[ResultRef::BlitzIndex(targets[0].id()), targets[0]])
            .await;
        assert_eq!(summary.processed, 1);
        assert!(matches!(&summary.failures[0].1, AnalysisError::Store(e) if e.is_not_found()));
    }
}
