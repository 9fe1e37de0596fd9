mod config;
mod state;

pub use config::AnswerTuning;

use std::{sync::Arc, time::Instant};

use common::{
    error::AppError,
    utils::{
        generation::{Generation, GenerationRequest, Generator},
        retry::call_with_retry,
        text::preview,
    },
};
use state_machines::core::GuardError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    answer_retrieval::{citation_for, create_user_message, map_citations, Answer},
    cache::{short, ResponseCache},
    expansion::QueryExpander,
    llm_instructions::{NO_ANSWER, QUERY_SYSTEM_PROMPT},
    pipeline::{PipelineStageTimings, StageKind},
    reranking::Reranker,
    retriever::Retriever,
    RankedResult,
};

use self::state::received;

/// Answers questions: cache first, then expand, retrieve, rerank and generate.
pub struct AnswerOrchestrator {
    tuning: AnswerTuning,
    cache: Arc<ResponseCache>,
    expander: QueryExpander,
    retriever: Retriever,
    reranker: Reranker,
    generator: Arc<dyn Generator>,
}

impl AnswerOrchestrator {
    pub fn new(
        tuning: AnswerTuning,
        cache: Arc<ResponseCache>,
        expander: QueryExpander,
        retriever: Retriever,
        reranker: Reranker,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            tuning,
            cache,
            expander,
            retriever,
            reranker,
            generator,
        }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Like [`Self::answer`], but gives up with [`AppError::Cancelled`] once
    /// `token` fires. Pending capability calls are dropped; a cache write that
    /// already started still lands.
    pub async fn answer_with_cancellation(
        &self,
        query: &str,
        token: &CancellationToken,
    ) -> Result<Answer, AppError> {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                info!("question cancelled by caller");
                Err(AppError::Cancelled)
            }
            result = self.answer(query) => result,
        }
    }

    #[instrument(skip_all, fields(query_chars = query.chars().count()))]
    pub async fn answer(&self, query: &str) -> Result<Answer, AppError> {
        let started = Instant::now();
        let question = query.trim();
        if question.is_empty() {
            return Err(AppError::Validation("Please ask a question".into()));
        }
        info!(preview = %preview(question), "answering question");

        let mut timings = PipelineStageTimings::default();
        let machine = received();
        let machine = machine
            .check_cache()
            .map_err(|(_, guard)| map_guard_error("check_cache", &guard))?;

        let stage_start = Instant::now();
        let corpus_version = match self.cache.current_corpus_version().await {
            Ok(version) => version,
            Err(err) => {
                let _failed = machine
                    .fail_retrieval()
                    .map_err(|(_, guard)| map_guard_error("fail_retrieval", &guard))?;
                warn!(error = %err, "could not read corpus version");
                return Err(err);
            }
        };
        let fingerprint = self.cache.fingerprint(question, corpus_version);
        let cached = self.cache.get(&fingerprint).await;
        timings.record(StageKind::CacheCheck, stage_start.elapsed());

        if let Some(entry) = cached {
            let machine = machine
                .hit()
                .map_err(|(_, guard)| map_guard_error("hit", &guard))?;
            let _done = machine
                .finish()
                .map_err(|(_, guard)| map_guard_error("finish", &guard))?;

            let mut answer = Answer::from_cache(entry);
            answer.elapsed = started.elapsed();
            answer.stage_timings = timings;
            info!(
                cache_hit = true,
                fingerprint = %short(&fingerprint),
                corpus_version,
                total_ms = answer.elapsed.as_millis(),
                "question answered"
            );
            return Ok(answer);
        }

        let machine = machine
            .miss()
            .map_err(|(_, guard)| map_guard_error("miss", &guard))?;

        let stage_start = Instant::now();
        let variants = self
            .expander
            .expand(question, self.tuning.variant_count())
            .await;
        timings.record(StageKind::Expand, stage_start.elapsed());

        let machine = machine
            .retrieve()
            .map_err(|(_, guard)| map_guard_error("retrieve", &guard))?;
        let stage_start = Instant::now();
        let candidates = match self
            .retriever
            .retrieve(&variants, self.tuning.candidates_per_variant)
            .await
        {
            Ok(candidates) => candidates,
            Err(err) => {
                let _failed = machine
                    .fail_retrieval()
                    .map_err(|(_, guard)| map_guard_error("fail_retrieval", &guard))?;
                warn!(error = %err, "retrieval failed");
                return Err(err);
            }
        };
        timings.record(StageKind::Retrieve, stage_start.elapsed());
        let candidate_count = candidates.len();

        let machine = machine
            .rerank()
            .map_err(|(_, guard)| map_guard_error("rerank", &guard))?;
        let stage_start = Instant::now();
        // Reranking is anchored to the original question, never a variant.
        let ranked = self
            .reranker
            .rerank(question, candidates, self.tuning.rerank_top_n)
            .await;
        timings.record(StageKind::Rerank, stage_start.elapsed());

        let machine = machine
            .generate()
            .map_err(|(_, guard)| map_guard_error("generate", &guard))?;
        let stage_start = Instant::now();
        let generation = match self.generate(question, &ranked).await {
            Ok(generation) => generation,
            Err(err) => {
                let _failed = machine
                    .fail_generation()
                    .map_err(|(_, guard)| map_guard_error("fail_generation", &guard))?;
                warn!(error = %err, "generation failed");
                return Err(err);
            }
        };
        timings.record(StageKind::Generate, stage_start.elapsed());

        let mut answer = assemble_answer(generation, &ranked, corpus_version);

        let machine = machine
            .write_cache()
            .map_err(|(_, guard)| map_guard_error("write_cache", &guard))?;
        let stage_start = Instant::now();
        self.write_cache(fingerprint.clone(), &answer).await;
        timings.record(StageKind::CacheWrite, stage_start.elapsed());
        let _done = machine
            .finish()
            .map_err(|(_, guard)| map_guard_error("finish", &guard))?;

        answer.elapsed = started.elapsed();
        answer.stage_timings = timings;
        info!(
            cache_hit = false,
            fingerprint = %short(&fingerprint),
            corpus_version,
            variants = variants.len(),
            candidates = candidate_count,
            ranked = ranked.len(),
            cited = answer.cited,
            citations = answer.citations.len(),
            total_ms = answer.elapsed.as_millis(),
            expand_ms = answer.stage_timings.expand_ms(),
            retrieve_ms = answer.stage_timings.retrieve_ms(),
            rerank_ms = answer.stage_timings.rerank_ms(),
            generate_ms = answer.stage_timings.generate_ms(),
            "question answered"
        );
        Ok(answer)
    }

    async fn generate(
        &self,
        question: &str,
        ranked: &[RankedResult],
    ) -> Result<Generation, AppError> {
        if ranked.is_empty() {
            debug!("no passages retrieved; skipping generation");
            return Ok(Generation {
                text: NO_ANSWER.to_string(),
                citations: Vec::new(),
            });
        }

        let request = GenerationRequest {
            system: QUERY_SYSTEM_PROMPT.to_string(),
            user: create_user_message(question, ranked),
            structured: true,
        };
        call_with_retry(&self.tuning.retry, "generator.answer", || {
            self.generator.generate(request.clone())
        })
        .await
        .map_err(|err| match err {
            AppError::GenerationFailed(_) | AppError::Cancelled => err,
            other => AppError::GenerationFailed(other.to_string()),
        })
    }

    /// Runs the write on its own task so it completes even if the caller
    /// goes away mid-write. Failures are logged, never surfaced.
    async fn write_cache(&self, fingerprint: String, answer: &Answer) {
        let cache = self.cache.clone();
        let entry = answer.to_cache_entry(cache.ttl());
        let write = tokio::spawn(async move { cache.put(&fingerprint, entry).await });
        match write.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "failed to cache answer"),
            Err(err) => warn!(error = %err, "cache write task failed"),
        }
    }
}

fn assemble_answer(generation: Generation, ranked: &[RankedResult], corpus_version: u64) -> Answer {
    let mapped = map_citations(&generation.citations, ranked);
    let cited = !mapped.is_empty();
    let citations = if cited {
        mapped
    } else {
        ranked.iter().map(citation_for).collect()
    };

    Answer {
        text: generation.text,
        citations,
        cited,
        cache_hit: false,
        context: ranked.iter().map(|result| result.chunk.text.clone()).collect(),
        corpus_version,
        elapsed: std::time::Duration::ZERO,
        stage_timings: PipelineStageTimings::default(),
    }
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid answer pipeline transition during {event}: {guard:?}"
    ))
}
