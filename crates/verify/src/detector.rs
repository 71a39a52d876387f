use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, stream};
use llm::LlmProvider;
use tracing::info;

use crate::extractor::ClaimExtractor;
use crate::scorer::{ClaimVerdict, HallucinationReport, HallucinationScorer};
use crate::verifier::ClaimVerifier;

/// Extract → verify → score.
///
/// Claims are verified concurrently; the aggregate does not depend on the
/// order they finish in.
#[derive(Clone)]
pub struct HallucinationDetector {
    extractor: ClaimExtractor,
    verifier: ClaimVerifier,
    concurrency: usize,
}

impl HallucinationDetector {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        concurrency: usize,
        max_tokens: u32,
        call_timeout: Duration,
    ) -> Self {
        Self {
            extractor: ClaimExtractor::new(llm.clone(), max_tokens, call_timeout),
            verifier: ClaimVerifier::new(llm, call_timeout),
            concurrency: concurrency.max(1),
        }
    }

    pub async fn detect(&self, response: &str, context: &str) -> HallucinationReport {
        let claims = self.extractor.extract_claims(response).await;
        if claims.is_empty() {
            return HallucinationReport::empty();
        }

        let verdicts: Vec<ClaimVerdict> = stream::iter(claims)
            .map(|claim| async move {
                let verdict = self.verifier.verify(&claim, context).await;
                ClaimVerdict::new(claim, verdict)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let report = HallucinationScorer::score(&verdicts);
        info!(
            claims = report.total_claims,
            unsupported = report.unsupported_claims.len(),
            partially_supported = report.partially_supported_claims.len(),
            score = report.score,
            "hallucination check finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use llm::{Completion, CompletionRequest, LlmError, TokenStream};

    use crate::prompt::EXTRACTION_SYSTEM_PROMPT;

    /// Verdict that makes the provider call fail.
    const FAIL: &str = "<provider error>";
    /// Verdict that never arrives.
    const HANG: &str = "<no answer>";

    /// Answers extraction prompts with `claims` and judges every claim with
    /// `judge(claim_prompt)`.
    struct Judge {
        claims: Result<&'static str, ()>,
        judge: fn(&str) -> &'static str,
    }

    #[async_trait]
    impl LlmProvider for Judge {
        fn name(&self) -> &str {
            "judge"
        }

        fn model(&self) -> &str {
            "judge-1"
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            Err(LlmError::Unsupported("embeddings"))
        }

        async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
            let is_extraction = request.system_prompt.as_deref() == Some(EXTRACTION_SYSTEM_PROMPT);
            let text = if is_extraction {
                self.claims.map_err(|_| LlmError::EmptyResponse)?.to_string()
            } else {
                match (self.judge)(&request.prompt) {
                    FAIL => return Err(LlmError::EmptyResponse),
                    HANG => std::future::pending::<String>().await,
                    verdict => verdict.to_string(),
                }
            };
            Ok(Completion {
                text,
                token_count: 1,
                model: "judge".into(),
                provider: "judge".into(),
            })
        }

        async fn stream_complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<TokenStream, LlmError> {
            Err(LlmError::Unsupported("streaming"))
        }
    }

    fn detector(judge: Judge) -> HallucinationDetector {
        HallucinationDetector::new(Arc::new(judge), 4, 256, Duration::from_secs(5))
    }

    const CONTEXT: &str = "[Source 1] Weave is a toolkit for tracking LLM applications. \
                           (https://docs.example.com/weave)";

    #[tokio::test]
    async fn fabricated_answer_scores_one() {
        let judge = Judge {
            claims: Ok("- Weave was created by Microsoft.\n- Weave was released in 2020."),
            judge: |_| "NOT_SUPPORTED",
        };

        let report = detector(judge)
            .detect("Weave was created by Microsoft in 2020.", CONTEXT)
            .await;

        assert_eq!(report.score, 1.0);
        assert_eq!(report.total_claims, 2);
        assert!(report.unsupported_claims.iter().any(|c| c.contains("Microsoft")));
        assert!(report.supported_claims.is_empty());
    }

    #[tokio::test]
    async fn grounded_answer_scores_zero() {
        let judge = Judge {
            claims: Ok("- Weave is a toolkit for tracking LLM applications."),
            judge: |_| "SUPPORTED",
        };

        let report = detector(judge)
            .detect("Weave is a toolkit for tracking LLM applications.", CONTEXT)
            .await;

        assert_eq!(report.score, 0.0);
        assert_eq!(report.supported_claims.len(), 1);
        assert!(report.unsupported_claims.is_empty());
    }

    #[tokio::test]
    async fn mixed_verdicts_are_weighted() {
        let judge = Judge {
            claims: Ok("- Weave tracks LLM apps.\n- Weave tracks GPUs.\n- Weave is written in Go."),
            judge: |prompt| {
                if prompt.contains("LLM apps") {
                    "SUPPORTED"
                } else if prompt.contains("GPUs") {
                    "PARTIALLY_SUPPORTED"
                } else {
                    "NOT_SUPPORTED"
                }
            },
        };

        let report = detector(judge).detect("irrelevant", CONTEXT).await;

        assert_eq!(report.score, 0.5);
        assert_eq!(report.total_claims, 3);
        assert_eq!(report.partially_supported_claims, vec!["Weave tracks GPUs."]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_or_silent_verdicts_count_as_unsupported() {
        let judge = Judge {
            claims: Ok("- Weave was created by Microsoft.\n- Weave was released in 2020."),
            judge: |prompt| if prompt.contains("Microsoft") { FAIL } else { HANG },
        };

        let report = detector(judge).detect("irrelevant", CONTEXT).await;

        assert_eq!(report.score, 1.0);
        assert_eq!(report.total_claims, 2);
        assert_eq!(report.unsupported_claims.len(), 2);
        assert!(report.supported_claims.is_empty());
    }

    #[tokio::test]
    async fn extraction_failure_reports_nothing() {
        let judge = Judge {
            claims: Err(()),
            judge: |_| "NOT_SUPPORTED",
        };

        let report = detector(judge).detect("Weave was created by Microsoft.", CONTEXT).await;

        assert_eq!(report, HallucinationReport::empty());
    }

    #[tokio::test]
    async fn empty_response_reports_nothing() {
        let judge = Judge {
            claims: Ok("- should never be asked"),
            judge: |_| "NOT_SUPPORTED",
        };

        let report = detector(judge).detect("   ", CONTEXT).await;

        assert_eq!(report.score, 0.0);
        assert_eq!(report.total_claims, 0);
    }
}
