use llm::CompletionRequest;

use crate::config::GenerationConfig;

/// Renders retrieved context and the user question into one generation request.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system_prompt: String,
    max_tokens: u32,
    temperature: f32,
}

impl PromptBuilder {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// `Context:\n<context>\n\nQuestion:\n<query>`, with tool output
    /// appended to the context when present.
    pub fn render(&self, context_text: &str, query: &str, tool_output: Option<&str>) -> String {
        let mut context = context_text.to_string();
        if let Some(extra) = tool_output.filter(|t| !t.trim().is_empty()) {
            if !context.is_empty() {
                context.push_str("\n\n");
            }
            context.push_str(extra);
        }

        format!("Context:\n{}\n\nQuestion:\n{}", context, query)
    }

    pub fn build(
        &self,
        context_text: &str,
        query: &str,
        tool_output: Option<&str>,
    ) -> CompletionRequest {
        CompletionRequest::new(self.render(context_text, query, tool_output))
            .with_system_prompt(self.system_prompt.clone())
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature)
    }
}

/// Trim the raw completion and drop a leading `Answer:` label.
pub fn postprocess_answer(raw: &str) -> String {
    const LABEL: &str = "answer:";

    let trimmed = raw.trim();
    let has_label = trimmed
        .get(..LABEL.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(LABEL));

    if has_label {
        trimmed[LABEL.len()..].trim().to_string()
    } else {
        trimmed.to_string()
    }
}
