use std::sync::Arc;
use std::time::Duration;

use llm::{CompletionRequest, LlmProvider};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::prompt::{EXTRACTION_SYSTEM_PROMPT, build_extraction_prompt};

/// Decomposes generated text into atomic claims.
///
/// Best effort: any provider failure yields no claims rather than an error.
#[derive(Clone)]
pub struct ClaimExtractor {
    llm: Arc<dyn LlmProvider>,
    max_tokens: u32,
    timeout: Duration,
}

impl ClaimExtractor {
    pub fn new(llm: Arc<dyn LlmProvider>, max_tokens: u32, timeout: Duration) -> Self {
        Self {
            llm,
            max_tokens,
            timeout,
        }
    }

    pub async fn extract_claims(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let request = CompletionRequest::new(build_extraction_prompt(text))
            .with_system_prompt(EXTRACTION_SYSTEM_PROMPT)
            .with_max_tokens(self.max_tokens)
            .with_temperature(0.0);

        let completion = match timeout(self.timeout, self.llm.complete(request)).await {
            Ok(Ok(completion)) => completion,
            Ok(Err(e)) => {
                warn!(error = %e, "Claim extraction failed, treating as no claims");
                return Vec::new();
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis(), "Claim extraction timed out");
                return Vec::new();
            }
        };

        let claims = parse_claims(&completion.text);
        debug!(claims = claims.len(), "claims extracted");
        claims
    }
}

/// One claim per line; bullet markers stripped, blanks, rules and headings
/// dropped.
pub fn parse_claims(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .map(strip_bullet)
        .filter(|line| line.chars().any(char::is_alphanumeric))
        .map(str::to_string)
        .collect()
}

/// Removes one leading list marker, only when whitespace follows it.
fn strip_bullet(line: &str) -> &str {
    ['-', '•', '*']
        .into_iter()
        .filter_map(|marker| line.strip_prefix(marker))
        .find(|rest| rest.starts_with(char::is_whitespace))
        .map_or(line, str::trim_start)
}
