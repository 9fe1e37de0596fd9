use std::{collections::HashSet, sync::Arc};

use common::{
    error::AppError,
    utils::{
        generation::{GenerationRequest, Generator},
        retry::{call_with_retry, RetryPolicy},
        text::normalize_query,
    },
};
use tracing::{debug, instrument, warn};

use crate::llm_instructions::{expansion_user_message, QUERY_EXPANSION_PROMPT};

/// Produces alternative phrasings of a question. Degrades to the original
/// question alone when disabled or when the generator is unavailable.
pub struct QueryExpander {
    generator: Option<Arc<dyn Generator>>,
    retry: RetryPolicy,
}

impl QueryExpander {
    pub fn new(generator: Arc<dyn Generator>, retry: RetryPolicy) -> Self {
        Self {
            generator: Some(generator),
            retry,
        }
    }

    pub fn disabled() -> Self {
        Self {
            generator: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.generator.is_some()
    }

    /// Returns at most `n` distinct variants, the original question first.
    #[instrument(skip_all, fields(n))]
    pub async fn expand(&self, query: &str, n: usize) -> Vec<String> {
        let original = query.trim().to_string();
        let Some(generator) = self.generator.as_ref().filter(|_| n > 1) else {
            return vec![original];
        };

        let request = GenerationRequest {
            system: QUERY_EXPANSION_PROMPT.to_string(),
            user: expansion_user_message(&original, n - 1),
            structured: false,
        };

        let generated = call_with_retry(&self.retry, "generator.expand", || {
            generator.generate(request.clone())
        })
        .await;

        match generated {
            Ok(generation) => {
                let variants = collect_variants(&original, &generation.text, n);
                debug!(variants = variants.len(), "query expanded");
                variants
            }
            Err(err) => {
                log_degraded(&err);
                vec![original]
            }
        }
    }
}

fn log_degraded(err: &AppError) {
    warn!(error = %err, "query expansion unavailable; using the original query only");
}

/// Parses one variant per line and dedups by normalized form.
fn collect_variants(original: &str, generated: &str, n: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut variants = Vec::with_capacity(n);

    let candidates = std::iter::once(original).chain(generated.lines().map(strip_list_marker));
    for candidate in candidates {
        if variants.len() == n {
            break;
        }
        let normalized = normalize_query(candidate);
        if normalized.is_empty() || !seen.insert(normalized) {
            continue;
        }
        variants.push(candidate.to_string());
    }
    variants
}

fn strip_list_marker(line: &str) -> &str {
    let trimmed = line.trim();
    let without_bullet = trimmed
        .strip_prefix(['-', '*', '•'])
        .unwrap_or(trimmed)
        .trim_start();

    let digits = without_bullet
        .chars()
        .take_while(char::is_ascii_digit)
        .count();
    let without_number = if digits > 0 {
        let rest = &without_bullet[digits..];
        rest.strip_prefix(['.', ')', ':'])
            .map_or(without_bullet, str::trim_start)
    } else {
        without_bullet
    };

    without_number.trim_matches('"').trim()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use common::utils::generation::Generation;

    use super::*;

    struct ScriptedGenerator {
        reply: Result<String, ()>,
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, _request: GenerationRequest) -> Result<Generation, AppError> {
            match &self.reply {
                Ok(text) => Ok(Generation {
                    text: text.clone(),
                    citations: Vec::new(),
                }),
                Err(()) => Err(AppError::GenerationFailed("model offline".into())),
            }
        }
    }

    fn expander(reply: Result<&str, ()>) -> QueryExpander {
        QueryExpander::new(
            Arc::new(ScriptedGenerator {
                reply: reply.map(str::to_string),
            }),
            RetryPolicy::immediate(1),
        )
    }

    #[tokio::test]
    async fn keeps_original_first_and_strips_markers() {
        let expander = expander(Ok(
            "1. How do I rotate API keys?\n- Steps for key rotation\n\n2) Rotating credentials",
        ));

        let variants = expander.expand("How to rotate keys?", 3).await;

        assert_eq!(
            variants,
            vec![
                "How to rotate keys?".to_string(),
                "How do I rotate API keys?".to_string(),
                "Steps for key rotation".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn drops_case_and_whitespace_duplicates() {
        let expander = expander(Ok("how   to ROTATE keys?\nKey rotation guide"));

        let variants = expander.expand("How to rotate keys?", 3).await;

        assert_eq!(
            variants,
            vec!["How to rotate keys?".to_string(), "Key rotation guide".to_string()]
        );
    }

    #[tokio::test]
    async fn falls_back_to_original_when_generator_fails() {
        let variants = expander(Err(())).expand("What is HNSW?", 3).await;
        assert_eq!(variants, vec!["What is HNSW?".to_string()]);
    }

    #[tokio::test]
    async fn disabled_expander_returns_original_only() {
        let variants = QueryExpander::disabled().expand("What is HNSW?", 3).await;
        assert_eq!(variants, vec!["What is HNSW?".to_string()]);
    }

    #[test]
    fn numbers_inside_text_are_kept() {
        assert_eq!(strip_list_marker("3. 2024 budget"), "2024 budget");
        assert_eq!(strip_list_marker("2024 budget"), "2024 budget");
    }
}
