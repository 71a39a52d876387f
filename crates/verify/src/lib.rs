pub mod detector;
pub mod extractor;
pub mod prompt;
pub mod scorer;
pub mod verifier;

pub use detector::HallucinationDetector;
pub use extractor::ClaimExtractor;
pub use scorer::{ClaimVerdict, HallucinationReport, HallucinationScorer};
pub use verifier::{ClaimVerifier, VerificationVerdict};
