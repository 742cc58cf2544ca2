//! Prompt templates for the first analysis turn

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::AnalysisError;
use crate::config::Config;
use crate::procedure::ProcedureKind;

/// Shared template used when no per-procedure file exists
pub const GENERAL_TEMPLATE_FILE: &str = "general_sp_blitz.txt";

const BUILTIN_TEMPLATE: &str = "\
The stored procedure {procedure} was run against the SQL Server database {database} \
and reported the following:

{finding}

Explain what this finding means for this server and how serious it is. \
Then give concrete remediation steps, including T-SQL where it applies.";

/// System message sent ahead of every conversation
pub const SYSTEM_PROMPT: &str = "You are an experienced SQL Server DBA reviewing \
First Responder Kit diagnostics. Answer precisely and prefer actionable T-SQL.";

/// Resolves and renders prompt templates
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    dir: Option<PathBuf>,
    use_procedure_prompts: bool,
}

impl PromptLibrary {
    pub fn new(dir: Option<PathBuf>, use_procedure_prompts: bool) -> Self {
        Self {
            dir,
            use_procedure_prompts,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.prompts_dir(), config.prompts.use_procedure_prompts)
    }

    /// Template text for `kind`.
    ///
    /// Lookup order: `<dir>/<procedure>.txt` (when per-procedure prompts are
    /// on), `<dir>/general_sp_blitz.txt`, then the built-in template.
    pub fn template(&self, kind: ProcedureKind) -> Result<String, AnalysisError> {
        let Some(dir) = &self.dir else {
            return Ok(BUILTIN_TEMPLATE.to_string());
        };

        let mut candidates = Vec::with_capacity(2);
        if self.use_procedure_prompts {
            candidates.push(dir.join(format!("{}.txt", kind.procedure_name())));
        }
        candidates.push(dir.join(GENERAL_TEMPLATE_FILE));

        for path in &candidates {
            if let Some(template) = read_template(path)? {
                debug!("using prompt template {}", path.display());
                return Ok(template);
            }
        }

        warn!(
            "no prompt template for {} in {}, using built-in prompt",
            kind,
            dir.display()
        );
        Ok(BUILTIN_TEMPLATE.to_string())
    }

    /// Render the first-turn prompt for a finding
    pub fn render(
        &self,
        kind: ProcedureKind,
        finding: &str,
        database: &str,
    ) -> Result<String, AnalysisError> {
        Ok(fill(&self.template(kind)?, kind.procedure_name(), finding, database))
    }
}

fn read_template(path: &Path) -> Result<Option<String>, AnalysisError> {
    match std::fs::read_to_string(path) {
        Ok(text) if text.trim().is_empty() => Ok(None),
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(AnalysisError::Prompt {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Substitute the `{procedure}`, `{finding}` and `{database}` placeholders.
/// Substituted values are never scanned again.
pub fn fill(template: &str, procedure: &str, finding: &str, database: &str) -> String {
    let placeholders = [
        ("{procedure}", procedure),
        ("{finding}", finding),
        ("{database}", database),
    ];

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        match placeholders.iter().find(|(name, _)| rest.starts_with(name)) {
            Some((name, value)) => {
                out.push_str(value);
                rest = &rest[name.len()..];
            }
            None => {
                out.push('{');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_replaces_every_placeholder() {
        let text = fill("{procedure} on {database}: {finding} ({procedure})", "sp_Blitz", "X", "Shop");
        assert_eq!(text, "sp_Blitz on Shop: X (sp_Blitz)");
    }

    #[test]
    fn test_fill_leaves_placeholders_inside_values() {
        let text = fill("{database}: {finding}", "sp_Blitz", "{database}", "{finding}");
        assert_eq!(text, "{finding}: {database}");

        let text = fill("{ {unknown} {finding}", "sp_Blitz", "X", "Shop");
        assert_eq!(text, "{ {unknown} X");
    }

    #[test]
    fn test_builtin_without_directory() {
        let prompts = PromptLibrary::default();
        let text = prompts.render(ProcedureKind::Blitz, "Backups missing", "Shop").unwrap();
        assert!(text.contains("sp_Blitz"));
        assert!(text.contains("Backups missing"));
        assert!(text.contains("Shop"));
    }

    #[test]
    fn test_procedure_template_preferred_over_general() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sp_BlitzIndex.txt"), "index: {finding}").unwrap();
        std::fs::write(dir.path().join(GENERAL_TEMPLATE_FILE), "general: {finding}").unwrap();

        let specific = PromptLibrary::new(Some(dir.path().to_path_buf()), true);
        assert_eq!(
            specific.render(ProcedureKind::BlitzIndex, "dup", "Shop").unwrap(),
            "index: dup"
        );
        // No sp_BlitzCache.txt, so the general file applies
        assert_eq!(
            specific.render(ProcedureKind::BlitzCache, "slow", "Shop").unwrap(),
            "general: slow"
        );

        let general_only = PromptLibrary::new(Some(dir.path().to_path_buf()), false);
        assert_eq!(
            general_only.render(ProcedureKind::BlitzIndex, "dup", "Shop").unwrap(),
            "general: dup"
        );
    }

    #[test]
    fn test_empty_directory_falls_back_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let prompts = PromptLibrary::new(Some(dir.path().to_path_buf()), true);
        assert_eq!(prompts.template(ProcedureKind::Blitz).unwrap(), BUILTIN_TEMPLATE);
    }
}
