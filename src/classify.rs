//! LLM-backed research-category classification.
//!
//! Isolates the model call behind a validating boundary: responses are checked
//! against the expected schema (allowed label, numeric confidence in [0,1]),
//! low-confidence or malformed output is retried a bounded number of times, and
//! exhausted retries degrade to the `unclassified` sentinel. Results are cached
//! by content hash so unchanged entities never re-invoke the model.

use crate::error::{AcadError, Result};
use crate::prompts::classification::{build_system_prompt, build_user_prompt};
use crate::publication::{AssignedCategory, Publication};
use crate::taxonomy::{assignable_label_list, CategoryLabel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default number of independent classification attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default minimum confidence accepted from the model
pub const DEFAULT_CONFIDENCE_FLOOR: f64 = 0.3;

/// Classification behavior knobs.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Total attempts before degrading to the sentinel
    pub max_attempts: u32,
    /// Responses below this confidence are treated as invalid and retried
    pub confidence_floor: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
        }
    }
}

/// Model endpoint configuration
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

/// The suspension point to the hosted model. One call per attempt; attempts are
/// independent and carry no conversation state.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// OpenAI-compatible chat-completions client
pub struct HttpModelClient {
    client: reqwest::Client,
    config: ModelConfig,
}

impl HttpModelClient {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AcadError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }
}

/// OpenAI-compatible API response structures
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let request_body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": 0.1,
            "max_tokens": 200
        });

        let api_url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&api_url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request_body)
            .send()
            .await
            .map_err(AcadError::Network)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AcadError::Api {
                code: status.as_u16() as i32,
                message: format!("Model API error: {} - {}", status, error_text),
            });
        }

        let api_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AcadError::Parse(format!("Failed to parse model response: {}", e)))?;

        api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AcadError::Classification("empty choices in model response".to_string()))
    }
}

/// One exhausted-retries degradation, recorded for observability.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationFailure {
    pub entity_id: String,
    pub content_hash: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Classification service with a content-hash keyed cache.
///
/// The cache is run-scoped state owned by this struct (seedable from persisted
/// entities), never ambient: the pipeline passes the classifier around
/// explicitly so tests can run it in isolation.
pub struct Classifier<C> {
    client: C,
    config: ClassifierConfig,
    cache: HashMap<String, AssignedCategory>,
    failures: Vec<ClassificationFailure>,
    model_calls: u64,
}

impl<C: ModelClient> Classifier<C> {
    pub fn new(client: C, config: ClassifierConfig) -> Self {
        Self {
            client,
            config,
            cache: HashMap::new(),
            failures: Vec::new(),
            model_calls: 0,
        }
    }

    /// Pre-populate the cache from an already-classified entity.
    pub fn seed_cache(&mut self, content_hash: String, category: AssignedCategory) {
        self.cache.entry(content_hash).or_insert(category);
    }

    /// Degradations recorded this run.
    pub fn failures(&self) -> &[ClassificationFailure] {
        &self.failures
    }

    /// Number of model invocations this run (cache hits excluded).
    pub fn model_calls(&self) -> u64 {
        self.model_calls
    }

    /// Classify a publication. Never fails: exhausted retries return the
    /// `unclassified` sentinel with confidence 0.
    pub async fn classify(&mut self, publication: &Publication) -> AssignedCategory {
        let content_hash = publication.content_hash();
        if let Some(cached) = self.cache.get(&content_hash) {
            debug!(entity = %publication.entity_id, "Classification cache hit");
            return *cached;
        }

        let system_prompt = build_system_prompt(&assignable_label_list());
        let payload = serde_json::json!({
            "title": publication.title,
            "venue": publication.venue,
            "year": publication.year,
            "abstract_hint": publication.abstract_hint,
        });
        let user_prompt = build_user_prompt(&payload.to_string());

        let mut last_error = String::new();
        for attempt in 1..=self.config.max_attempts {
            self.model_calls += 1;
            match self.client.complete(&system_prompt, &user_prompt).await {
                Ok(content) => {
                    match validate_judgment(&content, self.config.confidence_floor) {
                        Ok(category) => {
                            debug!(
                                entity = %publication.entity_id,
                                label = %category.label,
                                confidence = category.confidence,
                                attempt,
                                "Publication classified"
                            );
                            self.cache.insert(content_hash, category);
                            return category;
                        }
                        Err(e) => {
                            let preview: String = content.chars().take(200).collect();
                            warn!(
                                entity = %publication.entity_id,
                                attempt,
                                error = %e,
                                content_preview = %preview,
                                "Invalid classification output"
                            );
                            last_error = e.to_string();
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        entity = %publication.entity_id,
                        attempt,
                        error = %e,
                        "Classification request failed"
                    );
                    last_error = e.to_string();
                }
            }
        }

        info!(
            entity = %publication.entity_id,
            attempts = self.config.max_attempts,
            "Classification exhausted retries, assigning sentinel"
        );
        let fallback = AssignedCategory::unclassified();
        self.failures.push(ClassificationFailure {
            entity_id: publication.entity_id.clone(),
            content_hash: content_hash.clone(),
            attempts: self.config.max_attempts,
            last_error,
        });
        self.cache.insert(content_hash, fallback);
        fallback
    }
}

/// Validate one raw model response against the output contract.
fn validate_judgment(content: &str, confidence_floor: f64) -> Result<AssignedCategory> {
    let json_str = extract_json(content);

    #[derive(Deserialize)]
    struct ModelJudgment {
        label: String,
        confidence: f64,
    }

    let judgment: ModelJudgment = serde_json::from_str(&json_str)
        .map_err(|e| AcadError::Classification(format!("schema violation: {}", e)))?;

    let label = CategoryLabel::parse_assignable(&judgment.label).ok_or_else(|| {
        AcadError::Classification(format!("label '{}' outside allowed set", judgment.label))
    })?;

    if !(0.0..=1.0).contains(&judgment.confidence) {
        return Err(AcadError::Classification(format!(
            "confidence {} outside [0,1]",
            judgment.confidence
        )));
    }
    if judgment.confidence < confidence_floor {
        return Err(AcadError::Classification(format!(
            "confidence {} below floor {}",
            judgment.confidence, confidence_floor
        )));
    }

    Ok(AssignedCategory {
        label,
        confidence: judgment.confidence,
    })
}

/// Extract JSON from a model response (handles markdown code blocks)
fn extract_json(content: &str) -> String {
    let trimmed = content.trim();

    if trimmed.starts_with("```") {
        let lines: Vec<&str> = trimmed.lines().collect();
        if lines.len() >= 2 {
            let start = if lines[0].starts_with("```json") || lines[0] == "```" { 1 } else { 0 };
            let end = if lines.last().map(|l| l.trim()) == Some("```") {
                lines.len() - 1
            } else {
                lines.len()
            };
            return lines[start..end].join("\n");
        }
    }

    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publication::Author;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted model for tests: pops responses in order, repeating the last.
    struct ScriptedClient {
        responses: Mutex<VecDeque<String>>,
        last: Mutex<String>,
        calls: AtomicU32,
    }

    impl ScriptedClient {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                last: Mutex::new(String::new()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelClient for &ScriptedClient {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut queue = self.responses.lock().expect("lock");
            match queue.pop_front() {
                Some(next) => {
                    *self.last.lock().expect("lock") = next.clone();
                    Ok(next)
                }
                None => Ok(self.last.lock().expect("lock").clone()),
            }
        }
    }

    fn publication(title: &str) -> Publication {
        Publication {
            entity_id: format!("pub-{}", title.len()),
            identifier: Some("10.1/x".to_string()),
            title: title.to_string(),
            venue: "Nature".to_string(),
            year: Some(2020),
            authors: vec![Author::new("J. Smith")],
            citation_count: 5,
            source_records: Default::default(),
            category: None,
            abstract_hint: "A study.".to_string(),
            merged_into: None,
            created_seq: 0,
        }
    }

    #[tokio::test]
    async fn test_valid_response_classifies_once() {
        let client = ScriptedClient::new(&[r#"{"label": "engineering", "confidence": 0.9}"#]);
        let mut classifier = Classifier::new(&client, ClassifierConfig::default());

        let category = classifier.classify(&publication("Foo Bar")).await;
        assert_eq!(category.label, CategoryLabel::Engineering);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_prevents_second_invocation() {
        let client = ScriptedClient::new(&[r#"{"label": "business", "confidence": 0.8}"#]);
        let mut classifier = Classifier::new(&client, ClassifierConfig::default());

        let first = classifier.classify(&publication("Foo Bar")).await;
        let second = classifier.classify(&publication("Foo Bar")).await;
        assert_eq!(first.label, second.label);
        assert_eq!(client.calls(), 1);
        assert_eq!(classifier.model_calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_bound_then_sentinel() {
        let client = ScriptedClient::new(&["this is not JSON at all"]);
        let mut classifier = Classifier::new(&client, ClassifierConfig::default());

        let category = classifier.classify(&publication("Foo Bar")).await;
        assert_eq!(category.label, CategoryLabel::Unclassified);
        assert_eq!(category.confidence, 0.0);
        assert_eq!(client.calls(), DEFAULT_MAX_ATTEMPTS);
        assert_eq!(classifier.failures().len(), 1);
        assert_eq!(classifier.failures()[0].attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_low_confidence_retried() {
        let client = ScriptedClient::new(&[
            r#"{"label": "education", "confidence": 0.1}"#,
            r#"{"label": "education", "confidence": 0.7}"#,
        ]);
        let mut classifier = Classifier::new(&client, ClassifierConfig::default());

        let category = classifier.classify(&publication("Foo Bar")).await;
        assert_eq!(category.label, CategoryLabel::Education);
        assert_eq!(category.confidence, 0.7);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_label_rejected() {
        let client = ScriptedClient::new(&[
            r#"{"label": "astrology", "confidence": 0.99}"#,
            r#"{"label": "physical-sciences", "confidence": 0.9}"#,
        ]);
        let mut classifier = Classifier::new(&client, ClassifierConfig::default());

        let category = classifier.classify(&publication("Foo Bar")).await;
        assert_eq!(category.label, CategoryLabel::PhysicalSciences);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_seeded_cache_short_circuits() {
        let client = ScriptedClient::new(&[]);
        let mut classifier = Classifier::new(&client, ClassifierConfig::default());

        let publication = publication("Foo Bar");
        classifier.seed_cache(
            publication.content_hash(),
            AssignedCategory {
                label: CategoryLabel::Mathematics,
                confidence: 0.95,
            },
        );

        let category = classifier.classify(&publication).await;
        assert_eq!(category.label, CategoryLabel::Mathematics);
        assert_eq!(client.calls(), 0);
    }

    #[test]
    fn test_validate_judgment_confidence_range() {
        let err = validate_judgment(r#"{"label": "business", "confidence": 1.4}"#, 0.3);
        assert!(err.is_err());
        let err = validate_judgment(r#"{"label": "business", "confidence": "high"}"#, 0.3);
        assert!(err.is_err());
        let ok = validate_judgment(r#"{"label": "business", "confidence": 1.0}"#, 0.3);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_extract_json_code_block() {
        let input = "```json\n{\"label\": \"business\", \"confidence\": 0.9}\n```";
        let result = extract_json(input);
        assert!(result.starts_with('{'));
        assert!(result.contains("\"label\""));
    }

    #[test]
    fn test_extract_json_with_surrounding_text() {
        let input = r#"Here is the result: {"label": "business", "confidence": 0.8}"#;
        let result = extract_json(input);
        assert!(result.starts_with('{'));
        assert!(result.ends_with('}'));
    }
}
