use common::utils::{config::PipelineSettings, retry::RetryPolicy};

#[derive(Debug, Clone)]
pub struct AnswerTuning {
    pub query_variants: usize,
    pub candidates_per_variant: usize,
    pub rerank_top_n: usize,
    pub query_expansion_enabled: bool,
    pub retry: RetryPolicy,
}

impl Default for AnswerTuning {
    fn default() -> Self {
        Self::from(&PipelineSettings::default())
    }
}

impl From<&PipelineSettings> for AnswerTuning {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            query_variants: settings.query_variants,
            candidates_per_variant: settings.candidates_per_variant,
            rerank_top_n: settings.rerank_top_n,
            query_expansion_enabled: settings.query_expansion_enabled,
            retry: settings.retry.clone(),
        }
    }
}

impl AnswerTuning {
    /// Variants to ask the expander for.
    pub fn variant_count(&self) -> usize {
        if self.query_expansion_enabled {
            self.query_variants.max(1)
        } else {
            1
        }
    }
}
