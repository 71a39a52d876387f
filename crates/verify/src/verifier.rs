use std::sync::Arc;
use std::time::Duration;

use llm::{CompletionRequest, LlmProvider};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::warn;

use crate::prompt::{VERIFICATION_SYSTEM_PROMPT, build_verification_prompt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationVerdict {
    Supported,
    PartiallySupported,
    NotSupported,
}

impl VerificationVerdict {
    /// Map a free-text judgement onto a verdict.
    ///
    /// `SUPPORTED` only counts when neither `NOT` nor `PARTIALLY` appears, so
    /// `NOT_SUPPORTED` and `PARTIALLY_SUPPORTED` never read as support.
    pub fn parse(response: &str) -> Self {
        let upper = response.to_uppercase();
        if upper.contains("SUPPORTED") && !upper.contains("NOT") && !upper.contains("PARTIALLY") {
            VerificationVerdict::Supported
        } else if upper.contains("PARTIALLY") {
            VerificationVerdict::PartiallySupported
        } else {
            VerificationVerdict::NotSupported
        }
    }

    /// Contribution to the hallucination score.
    pub fn weight(&self) -> f64 {
        match self {
            VerificationVerdict::Supported => 0.0,
            VerificationVerdict::PartiallySupported => 0.5,
            VerificationVerdict::NotSupported => 1.0,
        }
    }
}

/// Judges one claim against the retrieved context. Fails closed.
#[derive(Clone)]
pub struct ClaimVerifier {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl ClaimVerifier {
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub async fn verify(&self, claim: &str, context: &str) -> VerificationVerdict {
        let request = CompletionRequest::new(build_verification_prompt(claim, context))
            .with_system_prompt(VERIFICATION_SYSTEM_PROMPT)
            .with_max_tokens(16)
            .with_temperature(0.0);

        match timeout(self.timeout, self.llm.complete(request)).await {
            Ok(Ok(completion)) => VerificationVerdict::parse(&completion.text),
            Ok(Err(e)) => {
                warn!(claim, error = %e, "Claim verification failed, marking unsupported");
                VerificationVerdict::NotSupported
            }
            Err(_) => {
                warn!(claim, "Claim verification timed out, marking unsupported");
                VerificationVerdict::NotSupported
            }
        }
    }
}
