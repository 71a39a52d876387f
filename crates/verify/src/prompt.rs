pub const EXTRACTION_SYSTEM_PROMPT: &str =
    "You are an expert at extracting verifiable factual claims from text.";

pub const VERIFICATION_SYSTEM_PROMPT: &str =
    "You are a meticulous fact checker. Judge claims ONLY against the provided context.";

pub fn build_extraction_prompt(text: &str) -> String {
    format!(
        r#"Extract all factual claims from the following text.

INSTRUCTIONS:
- Each claim must be a single, atomic, verifiable statement
- Rewrite pronouns so each claim stands on its own
- Ignore opinions, advice and questions
- Output one claim per line, prefixed with "- "
- Output nothing else

TEXT:
{}

CLAIMS:"#,
        text
    )
}

pub fn build_verification_prompt(claim: &str, context: &str) -> String {
    format!(
        r#"Decide whether the claim is supported by the context.

CONTEXT:
{}

CLAIM:
{}

Answer with exactly one of:
SUPPORTED - the context states or directly implies the claim
PARTIALLY_SUPPORTED - the context supports part of the claim
NOT_SUPPORTED - the context does not support the claim or contradicts it

VERDICT:"#,
        context, claim
    )
}
