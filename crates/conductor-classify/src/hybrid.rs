use conductor_core::types::ClassificationResult;

use crate::llm::{ClassifyMeta, OpenRouterClassifier};
use crate::pack::ClassifierPack;
use crate::regex_classifier::RegexClassifier;

/// Tries the LLM classifier first (when configured), silently falling back
/// to the deterministic regex classifier on any failure. Never returns an
/// error — callers in the watcher's poll loop must always get a verdict.
pub struct HybridClassifier<'a> {
    pack: &'a ClassifierPack,
    llm: Option<&'a OpenRouterClassifier>,
}

impl<'a> HybridClassifier<'a> {
    pub fn new(pack: &'a ClassifierPack, llm: Option<&'a OpenRouterClassifier>) -> Self {
        HybridClassifier { pack, llm }
    }

    pub async fn classify(&self, snapshot: &str, meta: &ClassifyMeta) -> ClassificationResult {
        if let Some(llm) = self.llm {
            match llm.classify(snapshot, meta).await {
                Ok(result) => return result,
                Err(err) => {
                    tracing::warn!(pane_id = %meta.pane_id, %err, "LLM classification failed, falling back to regex");
                }
            }
        }
        RegexClassifier::new(self.pack).classify(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn falls_back_to_regex_when_no_llm_configured() {
        let pack = ClassifierPack::load(tempfile::tempdir().unwrap().path(), "codex", 3);
        let hybrid = HybridClassifier::new(&pack, None);
        let meta = ClassifyMeta {
            pane_id: "%1".to_string(),
            cli_type: "codex".to_string(),
        };
        let result = hybrid.classify("anything", &meta).await;
        assert_eq!(result.summary, "No activity detected in snapshot");
    }

    #[tokio::test]
    async fn falls_back_to_regex_when_llm_errors() {
        let pack = ClassifierPack::load(tempfile::tempdir().unwrap().path(), "codex", 3);
        let llm = OpenRouterClassifier::new("", "openrouter/auto");
        let hybrid = HybridClassifier::new(&pack, Some(&llm));
        let meta = ClassifyMeta {
            pane_id: "%1".to_string(),
            cli_type: "codex".to_string(),
        };
        let result = hybrid.classify("anything", &meta).await;
        assert_eq!(result.summary, "No activity detected in snapshot");
    }
}
