use serde::{Deserialize, Serialize};

use crate::verifier::VerificationVerdict;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimVerdict {
    pub claim: String,
    pub verdict: VerificationVerdict,
}

impl ClaimVerdict {
    pub fn new(claim: impl Into<String>, verdict: VerificationVerdict) -> Self {
        Self {
            claim: claim.into(),
            verdict,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallucinationReport {
    /// 0.0 fully grounded, 1.0 fully unsupported.
    pub score: f64,
    pub supported_claims: Vec<String>,
    pub partially_supported_claims: Vec<String>,
    pub unsupported_claims: Vec<String>,
    pub total_claims: usize,
}

impl HallucinationReport {
    pub fn empty() -> Self {
        Self {
            score: 0.0,
            supported_claims: Vec::new(),
            partially_supported_claims: Vec::new(),
            unsupported_claims: Vec::new(),
            total_claims: 0,
        }
    }
}

pub struct HallucinationScorer;

impl HallucinationScorer {
    /// Weighted share of unsupported claims, rounded to three decimals.
    ///
    /// No claims means no evidence of hallucination: the score is 0.0.
    pub fn score(verdicts: &[ClaimVerdict]) -> HallucinationReport {
        if verdicts.is_empty() {
            return HallucinationReport::empty();
        }

        let mut report = HallucinationReport::empty();
        let mut weighted = 0.0;

        for v in verdicts {
            weighted += v.verdict.weight();
            let bucket = match v.verdict {
                VerificationVerdict::Supported => &mut report.supported_claims,
                VerificationVerdict::PartiallySupported => &mut report.partially_supported_claims,
                VerificationVerdict::NotSupported => &mut report.unsupported_claims,
            };
            bucket.push(v.claim.clone());
        }

        report.total_claims = verdicts.len();
        report.score = round3(weighted / verdicts.len() as f64);
        report
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
