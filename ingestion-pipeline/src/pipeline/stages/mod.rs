use common::{
    error::AppError,
    storage::types::ChunkRecord,
    utils::text::{content_hash, preview},
};
use state_machines::core::GuardError;
use tracing::{debug, info, instrument, warn};

use super::{
    context::DocumentContext,
    state::{Chunked, Committed, DocumentMachine, Embedded, Hashed, Ready, Skipped},
};
use crate::chunker::chunk_text;

#[instrument(level = "trace", skip_all, fields(document_id = %ctx.document.id))]
pub async fn fingerprint(
    machine: DocumentMachine<(), Ready>,
    ctx: &mut DocumentContext<'_>,
) -> Result<DocumentMachine<(), Hashed>, AppError> {
    ctx.content_hash = content_hash(&ctx.text);
    ctx.existing = ctx.services.find_document(ctx.document_id()).await?;

    debug!(
        document_id = %ctx.document.id,
        text_chars = ctx.text.chars().count(),
        content_hash = %ctx.content_hash,
        known = ctx.existing.is_some(),
        preview = %preview(&ctx.text),
        "document hashed"
    );

    machine
        .fingerprint()
        .map_err(|(_, guard)| map_guard_error("fingerprint", &guard))
}

#[instrument(level = "trace", skip_all, fields(document_id = %ctx.document.id))]
pub fn skip(
    machine: DocumentMachine<(), Hashed>,
    ctx: &DocumentContext<'_>,
) -> Result<DocumentMachine<(), Skipped>, AppError> {
    debug!(
        document_id = %ctx.document.id,
        content_hash = %ctx.content_hash,
        "document unchanged; skipping"
    );
    machine
        .skip()
        .map_err(|(_, guard)| map_guard_error("skip", &guard))
}

#[instrument(level = "trace", skip_all, fields(document_id = %ctx.document.id))]
pub async fn split(
    machine: DocumentMachine<(), Hashed>,
    ctx: &mut DocumentContext<'_>,
) -> Result<DocumentMachine<(), Chunked>, AppError> {
    if ctx.existing.is_none() {
        // Register the document so a failure later on is visible in the catalog.
        let pending = ctx.catalog_record();
        ctx.services.record_document(pending.clone()).await?;
        ctx.existing = Some(pending);
    }

    ctx.chunks = chunk_text(
        ctx.document_id(),
        &ctx.text,
        ctx.tuning.chunk_size,
        ctx.tuning.chunk_overlap,
    )?;

    debug!(
        document_id = %ctx.document.id,
        chunk_count = ctx.chunks.len(),
        "document chunked"
    );

    machine
        .split()
        .map_err(|(_, guard)| map_guard_error("split", &guard))
}

/// Embeds every chunk, one batch after another. Nothing is written until all
/// batches succeed.
#[instrument(level = "trace", skip_all, fields(document_id = %ctx.document.id))]
pub async fn embed(
    machine: DocumentMachine<(), Chunked>,
    ctx: &mut DocumentContext<'_>,
) -> Result<DocumentMachine<(), Embedded>, AppError> {
    let batch_size = ctx.tuning.embedding_batch_size.max(1);
    let mut records = Vec::with_capacity(ctx.chunks.len());

    for (batch_index, batch) in ctx.chunks.chunks(batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = ctx.services.embed_batch(texts).await?;
        if vectors.len() != batch.len() {
            return Err(AppError::Validation(format!(
                "embedding batch {batch_index} returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            )));
        }
        records.extend(
            batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, embedding)| ChunkRecord {
                    chunk,
                    source: ctx.document.source.clone(),
                    embedding,
                }),
        );
        debug!(
            document_id = %ctx.document.id,
            batch_index,
            batch_len = batch.len(),
            "embedding batch completed"
        );
    }

    ctx.records = records;

    machine
        .embed()
        .map_err(|(_, guard)| map_guard_error("embed", &guard))
}

/// Replaces the document's chunks and records it as ingested.
///
/// Old chunks are deleted only once the new ones are fully embedded. When the
/// upsert fails, whatever landed is deleted again and the document stays
/// unrecorded so the next run retries it.
#[instrument(level = "trace", skip_all, fields(document_id = %ctx.document.id))]
pub async fn commit(
    machine: DocumentMachine<(), Embedded>,
    ctx: &mut DocumentContext<'_>,
) -> Result<DocumentMachine<(), Committed>, AppError> {
    let document_id = ctx.document_id().to_owned();
    let records = std::mem::take(&mut ctx.records);
    let chunk_count = records.len();

    let removed = ctx.services.delete_chunks(&document_id).await?;

    if let Err(err) = ctx.services.upsert_chunks(records).await {
        let compensated = match ctx.services.delete_chunks(&document_id).await {
            Ok(count) => count,
            Err(cleanup_err) => {
                warn!(
                    document_id = %document_id,
                    error = %cleanup_err,
                    "compensating delete failed"
                );
                0
            }
        };
        if removed > 0 || compensated > 0 {
            // The visible corpus changed even though the commit failed.
            let version = ctx.services.bump_corpus_version().await?;
            invalidate_previous(ctx, version).await;
            ctx.corpus_version = Some(version);
        }
        return Err(AppError::IngestionPartialFailure {
            document_id,
            reason: format!("storing chunks failed: {err}"),
        });
    }

    let version = ctx.services.bump_corpus_version().await?;
    ctx.corpus_version = Some(version);

    let mut record = ctx.catalog_record();
    record.mark_ingested(ctx.content_hash.clone(), chunk_count);
    ctx.services.record_document(record.clone()).await?;
    ctx.existing = Some(record);

    invalidate_previous(ctx, version).await;

    info!(
        document_id = %document_id,
        chunk_count,
        replaced = removed,
        corpus_version = version,
        "document committed"
    );

    machine
        .commit()
        .map_err(|(_, guard)| map_guard_error("commit", &guard))
}

async fn invalidate_previous(ctx: &DocumentContext<'_>, version: u64) {
    let previous = version.saturating_sub(1);
    match ctx.services.invalidate_answers(previous).await {
        Ok(cleared) => debug!(previous_version = previous, cleared, "cached answers cleared"),
        // Entries for older versions can no longer be hit; clearing is housekeeping.
        Err(err) => warn!(previous_version = previous, error = %err, "failed to clear cached answers"),
    }
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid document ingestion transition during {event}: {guard:?}"
    ))
}
