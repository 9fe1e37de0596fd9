use std::fmt::Write as _;

use common::utils::text::preview;
use ingestion_pipeline::JobStatus;
use retrieval_pipeline::Answer;

use crate::app::StatusReport;

const CONTEXT_SNIPPETS: usize = 5;

pub fn answer(answer: &Answer) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", answer.text.trim());

    let sources = answer.sources();
    if !sources.is_empty() {
        let label = if answer.cited {
            "Sources"
        } else {
            "Sources (uncited, retrieved passages)"
        };
        let _ = writeln!(out, "\n{label}:");
        for source in sources {
            let _ = writeln!(out, "  - {source}");
        }
    }

    if !answer.context.is_empty() {
        let _ = writeln!(out, "\nContext:");
        for (idx, passage) in answer.context.iter().take(CONTEXT_SNIPPETS).enumerate() {
            let _ = writeln!(out, "  {}. {}", idx + 1, preview(passage));
        }
    }

    let _ = write!(
        out,
        "\nCache hit: {} | Response time: {:.2}s",
        if answer.cache_hit { "yes" } else { "no" },
        answer.elapsed.as_secs_f64()
    );
    out
}

pub fn status(report: &StatusReport) -> String {
    let last_ingested = report
        .corpus
        .last_ingested_at
        .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
    let job = match report.ingestion.status {
        JobStatus::Idle => "idle",
        JobStatus::Running => "running",
        JobStatus::Succeeded => "succeeded",
        JobStatus::Failed => "failed",
    };

    let mut out = format!(
        "Corpus version: {}\nDocuments: {}\nChunks: {}\nLast ingestion: {last_ingested}\nIngestion job: {job}",
        report.corpus.corpus_version, report.corpus.document_count, report.corpus.chunk_count,
    );
    if let Some(err) = &report.ingestion.last_error {
        let _ = write!(out, "\nLast ingestion error: {err}");
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::storage::{store::CorpusStats, types::Citation};
    use ingestion_pipeline::JobSnapshot;
    use retrieval_pipeline::PipelineStageTimings;

    use super::*;

    #[test]
    fn renders_sources_context_and_cache_flag() {
        let rendered = answer(&Answer {
            text: "Rotate keys monthly.".into(),
            citations: vec![Citation {
                chunk_id: "ops.md::0".into(),
                document_id: "ops.md".into(),
                source: "ops.md".into(),
                snippet: "Rotate keys monthly".into(),
            }],
            cited: true,
            cache_hit: true,
            context: vec!["Rotate keys monthly.\nAlways.".into()],
            corpus_version: 3,
            elapsed: Duration::from_millis(1500),
            stage_timings: PipelineStageTimings::default(),
        });

        assert!(rendered.starts_with("Rotate keys monthly."));
        assert!(rendered.contains("Sources:\n  - ops.md"));
        assert!(rendered.contains("  1. Rotate keys monthly. Always."));
        assert!(rendered.ends_with("Cache hit: yes | Response time: 1.50s"));
    }

    #[test]
    fn renders_status_without_ingestion_history() {
        let rendered = status(&StatusReport {
            corpus: CorpusStats {
                corpus_version: 0,
                document_count: 0,
                chunk_count: 0,
                last_ingested_at: None,
            },
            ingestion: JobSnapshot::default(),
        });

        assert!(rendered.contains("Corpus version: 0"));
        assert!(rendered.contains("Last ingestion: never"));
        assert!(rendered.ends_with("Ingestion job: idle"));
    }
}
