//! Research-category classification prompts.
//!
//! Contains system and user prompt templates for LLM-based category assignment.

/// System prompt for publication category classification.
///
/// The allowed label list is interpolated at request time so the prompt and the
/// validator can never drift apart.
pub const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are an academic publication classifier. Your task is to assign exactly one research category to a publication based ONLY on the provided fields (title/venue/year/abstract_hint).

Rules you MUST follow:
- Choose the single best-fitting category from the allowed list. Never invent a category.
- Base your judgment on the input text only; do not fabricate publication content.
- Output MUST be valid JSON only (no extra text), for machine parsing.

Allowed categories:
{allowed_labels}

Important rules:
- Evidence priority: abstract_hint > title > venue.
- If abstract_hint is empty: use only title + venue, and lower your confidence accordingly.
- Interdisciplinary work: pick the category of the primary contribution.

Output format (strict JSON, no markdown):
{
  "label": "<one allowed category>",
  "confidence": 0.0-1.0
}"#;

/// User prompt template for a single publication.
/// Placeholders: {publication_json}
pub const USER_PROMPT_TEMPLATE: &str = r#"Assign a research category to the following publication.

Publication data (JSON):
{publication_json}

Output strict JSON only (no markdown code blocks, no extra text):
{
  "label": "<one allowed category>",
  "confidence": 0.0-1.0
}"#;

/// Build the system prompt with the allowed label list
pub fn build_system_prompt(allowed_labels: &str) -> String {
    SYSTEM_PROMPT_TEMPLATE.replace("{allowed_labels}", allowed_labels)
}

/// Build the user prompt with publication data
pub fn build_user_prompt(publication_json: &str) -> String {
    USER_PROMPT_TEMPLATE.replace("{publication_json}", publication_json)
}
