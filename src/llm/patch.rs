//! Prompt construction for vulnerability patch generation.

use std::sync::Arc;

use super::{Llm, LlmError};
use crate::context::ContextPayload;

const SYSTEM_PROMPT: &str = "You are an expert security engineer. You localize faults from \
vulnerability reports and produce minimal, correct patches. You only change what is necessary \
to fix the described vulnerability.";

/// Generates candidate patches from a vulnerability description and
/// retrieved code context.
pub struct PatchGenerator {
    llm: Arc<dyn Llm>,
}

impl PatchGenerator {
    pub fn new(llm: Arc<dyn Llm>) -> Self {
        Self { llm }
    }

    /// Build the fault-localization and patch prompt.
    pub fn build_prompt(vulnerability: &str, context: &ContextPayload) -> String {
        format!(
            "## Vulnerability report\n\n{}\n\n\
             ## Retrieved code context\n\n\
             The following code entities were retrieved as most relevant, ordered by relevance. \
             Seed entries matched the report directly; hop entries are structurally related.\n\n\
             {}\
             ## Task\n\n\
             1. Identify the entity most likely containing the fault and explain why in one or two sentences.\n\
             2. Produce a patch in unified diff format that fixes the vulnerability. \
             Only modify code shown above. Do not refactor unrelated code.\n",
            vulnerability.trim(),
            context.rendered
        )
    }

    /// Generate a candidate patch. Returns the raw model response; the
    /// caller applies and validates the diff.
    pub async fn generate(
        &self,
        vulnerability: &str,
        context: &ContextPayload,
    ) -> Result<String, LlmError> {
        let prompt = Self::build_prompt(vulnerability, context);
        self.llm.complete_with_system(SYSTEM_PROMPT, &prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_report_and_context() {
        let payload = ContextPayload {
            rendered: "### a.py [function] compute_checksum (seed, score 0.93)\n```python\ndef compute_checksum(p): ...\n```\n\n".to_string(),
            included: Vec::new(),
            dropped: 0,
            tokens_used: 20,
        };
        let prompt = PatchGenerator::build_prompt("CWE-20: missing input validation", &payload);
        assert!(prompt.contains("CWE-20"));
        assert!(prompt.contains("compute_checksum"));
        assert!(prompt.contains("unified diff"));
    }
}
