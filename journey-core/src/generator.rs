//! Response generation with bounded retries.
//!
//! A failed generation never surfaces as an error: after the last attempt
//! the generator returns a descriptive failure string, which the driver
//! records like any other message.

use crate::backend::{GeminiBackend, TextBackend};
use crate::config::SimulationConfig;
use crate::persona::Persona;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Start of every exhausted-retries message.
pub const FAILURE_PREFIX: &str = "Error calling";

/// Start of every message produced without a backend.
pub const PLACEHOLDER_PREFIX: &str = "Placeholder response for";

/// Appended to every prompt.
pub const OUTPUT_CONSTRAINT: &str =
    "Your response must ONLY be the message content, with no preamble and no author label.";

/// Cause recorded when the backend answers with nothing.
const EMPTY_RESPONSE: &str = "empty response";

/// Turns (persona, instruction, context) into message text.
pub struct ResponseGenerator {
    backend: Option<Arc<dyn TextBackend>>,
    max_attempts: u32,
    retry_backoff: Duration,
    attempts_made: AtomicU64,
}

impl ResponseGenerator {
    /// Create a generator around `backend`; `None` selects placeholder mode.
    pub fn new(backend: Option<Arc<dyn TextBackend>>, config: &SimulationConfig) -> Self {
        Self {
            backend,
            max_attempts: config.max_attempts.max(1),
            retry_backoff: config.retry_backoff,
            attempts_made: AtomicU64::new(0),
        }
    }

    /// A generator that never calls out.
    pub fn placeholder(config: &SimulationConfig) -> Self {
        Self::new(None, config)
    }

    /// Gemini when a credential is configured, placeholder mode otherwise.
    pub fn from_config(config: &SimulationConfig) -> Self {
        let backend = GeminiBackend::from_config(config)
            .map(|b| Arc::new(b) as Arc<dyn TextBackend>);
        Self::new(backend, config)
    }

    pub fn is_placeholder(&self) -> bool {
        self.backend.is_none()
    }

    /// Backend attempts made over the generator's lifetime.
    pub fn attempts_made(&self) -> u64 {
        self.attempts_made.load(Ordering::Relaxed)
    }

    /// Compose the full prompt for one generation.
    pub fn build_prompt(persona: &Persona, instruction: &str, journal_context: &str) -> String {
        format!(
            "{}\n\n{}\n\n--- Your Task ---\nYour instruction is: \"{}\"\n{}",
            persona.prompt, journal_context, instruction, OUTPUT_CONSTRAINT
        )
    }

    /// Deterministic stand-in text used when no backend is configured.
    pub fn placeholder_text(persona: &Persona, instruction: &str) -> String {
        format!("{PLACEHOLDER_PREFIX} {}: {}", persona.name, instruction)
    }

    /// Produce the text of one message.
    ///
    /// Empty output and backend errors both count as failed attempts. After
    /// `max_attempts` failures the returned text describes the last cause.
    pub async fn generate(
        &self,
        persona: &Persona,
        instruction: &str,
        journal_context: &str,
    ) -> String {
        let Some(backend) = &self.backend else {
            return Self::placeholder_text(persona, instruction);
        };

        let prompt = Self::build_prompt(persona, instruction, journal_context);
        let mut last_cause = String::new();

        for attempt in 1..=self.max_attempts {
            tracing::info!(
                persona = %persona.name,
                attempt,
                max_attempts = self.max_attempts,
                "Generating response"
            );
            self.attempts_made.fetch_add(1, Ordering::Relaxed);

            match backend.generate(&prompt).await {
                Ok(text) if !text.trim().is_empty() => {
                    tracing::info!(persona = %persona.name, "Generation succeeded");
                    return text.trim().to_string();
                }
                Ok(_) => {
                    tracing::warn!(
                        persona = %persona.name,
                        backend = backend.name(),
                        "Backend returned an empty response"
                    );
                    last_cause = EMPTY_RESPONSE.to_string();
                }
                Err(e) => {
                    tracing::warn!(
                        persona = %persona.name,
                        backend = backend.name(),
                        error = %e,
                        "Generation attempt failed"
                    );
                    last_cause = e.to_string();
                }
            }

            if attempt < self.max_attempts {
                tracing::info!(
                    wait_secs = self.retry_backoff.as_secs_f64(),
                    "Waiting before retry"
                );
                tokio::time::sleep(self.retry_backoff).await;
            }
        }

        format!(
            "{FAILURE_PREFIX} {} after {} attempts: {}",
            backend.name(),
            self.max_attempts,
            last_cause
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::persona::PersonaRegistry;
    use crate::testing::{FailingBackend, ScriptedBackend};

    fn config(attempts: u32) -> SimulationConfig {
        SimulationConfig::new("unused.json")
            .with_max_attempts(attempts)
            .without_delays()
    }

    fn ruby() -> Persona {
        PersonaRegistry::elyx().get("Ruby").unwrap().clone()
    }

    #[tokio::test]
    async fn test_placeholder_mode() {
        let generator = ResponseGenerator::placeholder(&config(3));
        assert!(generator.is_placeholder());

        let first = generator.generate(&ruby(), "say hello", "ctx").await;
        let second = generator.generate(&ruby(), "say hello", "other ctx").await;

        assert_eq!(first, "Placeholder response for Ruby: say hello");
        assert_eq!(first, second);
        assert_eq!(generator.attempts_made(), 0);
    }

    #[test]
    fn test_from_config_without_key_is_placeholder() {
        assert!(ResponseGenerator::from_config(&config(3)).is_placeholder());
    }

    #[test]
    fn test_prompt_layout() {
        let prompt = ResponseGenerator::build_prompt(&ruby(), "Confirm the booking", "HISTORY");
        let persona_at = prompt.find("You are Ruby").unwrap();
        let history_at = prompt.find("HISTORY").unwrap();
        let task_at = prompt.find("Confirm the booking").unwrap();

        assert!(persona_at < history_at && history_at < task_at);
        assert!(prompt.ends_with(OUTPUT_CONSTRAINT));
    }

    #[tokio::test]
    async fn test_exhausts_exactly_max_attempts() {
        let backend = Arc::new(FailingBackend::new("connection reset"));
        let generator = ResponseGenerator::new(Some(backend.clone() as Arc<dyn TextBackend>), &config(4));

        let text = generator.generate(&ruby(), "hi", "").await;

        assert_eq!(backend.calls(), 4);
        assert_eq!(generator.attempts_made(), 4);
        assert!(text.starts_with(FAILURE_PREFIX));
        assert!(text.contains("after 4 attempts"));
        assert!(text.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_empty_response_is_retried() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok("   ".to_string()),
            Ok(String::new()),
            Ok("  Booked for Tuesday.  ".to_string()),
        ]));
        let generator = ResponseGenerator::new(Some(backend.clone() as Arc<dyn TextBackend>), &config(3));

        let text = generator.generate(&ruby(), "book it", "").await;

        assert_eq!(text, "Booked for Tuesday.");
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_only_empty_responses() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(String::new()), Ok(String::new())]));
        let generator = ResponseGenerator::new(Some(backend as Arc<dyn TextBackend>), &config(2));

        let text = generator.generate(&ruby(), "hi", "").await;
        assert!(text.ends_with("after 2 attempts: empty response"));
    }

    #[tokio::test]
    async fn test_recovers_after_error() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(BackendError::Failed("503".to_string())),
            Ok("Second time lucky".to_string()),
        ]));
        let generator = ResponseGenerator::new(Some(backend.clone() as Arc<dyn TextBackend>), &config(3));

        assert_eq!(generator.generate(&ruby(), "hi", "").await, "Second time lucky");
        assert_eq!(backend.calls(), 2);
        assert!(backend.prompts()[0].contains("You are Ruby"));
    }
}
