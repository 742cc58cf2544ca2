//! Analyze command implementation

use anyhow::{bail, Context, Result};

use crate::analysis::{AnalysisError, Analyst, OpenAiChatModel, PromptLibrary};
use crate::config::Config;
use crate::store::ResultStore;

pub async fn run(
    store: &ResultStore,
    config: &Config,
    call_id: i64,
    indexes: &[i64],
    question: Option<String>,
) -> Result<()> {
    if indexes.len() > 1 && question.is_some() {
        bail!("--question applies to a single row; pass one index");
    }

    let api_key = config
        .api_key()
        .ok_or_else(|| AnalysisError::MissingApiKey(config.llm.api_key_env.clone()))?;
    let model = OpenAiChatModel::new(&config.llm, &api_key)?;
    let analyst = Analyst::new(store, model, PromptLibrary::from_config(config));

    if let [index] = indexes {
        let target = store.get_record(call_id, *index)?.result_ref();
        let turn = analyst
            .analyze(target, question.as_deref())
            .await
            .with_context(|| format!("Analysis of {} failed", target))?;

        println!("=== Question ===\n{}\n", turn.question);
        println!("=== Answer ===\n{}", turn.answer);
        return Ok(());
    }

    let mut targets = Vec::with_capacity(indexes.len());
    let mut unresolved = Vec::new();
    for &index in indexes {
        match store.get_record(call_id, index) {
            Ok(record) => targets.push(record.result_ref()),
            Err(e) => unresolved.push(format!("Row {}: {}", index, e)),
        }
    }

    let summary = analyst.analyze_many(&targets).await;

    println!(
        "Processed {} of {} rows, {} recommendations, {:.1}s",
        summary.processed,
        indexes.len(),
        summary.recommendations,
        summary.elapsed.as_secs_f64()
    );
    if summary.skipped > 0 {
        println!("Skipped {} rows that already have a conversation", summary.skipped);
    }

    let errors: Vec<String> = unresolved
        .into_iter()
        .chain(
            summary
                .failures
                .iter()
                .map(|(target, e)| format!("{}: {}", target, e)),
        )
        .collect();
    if !errors.is_empty() {
        println!("\n{} errors:", errors.len());
        for error in &errors {
            println!("  {}", error);
        }
    }
    Ok(())
}
