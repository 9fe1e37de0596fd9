use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
};

use common::storage::types::ChunkHit;

use crate::Candidate;

/// Merges per-variant search results by chunk id.
///
/// A chunk keeps the highest similarity any variant gave it, and `support`
/// counts the variants that returned it. Output is ordered by descending
/// score, then support, then chunk id, all descending.
pub fn fuse_candidates(per_variant: Vec<Vec<ChunkHit>>) -> Vec<Candidate> {
    let mut merged: HashMap<String, Candidate> = HashMap::new();

    for hits in per_variant {
        let mut seen_in_variant = HashSet::new();
        for hit in hits {
            let id = hit.chunk.id.clone();
            let first_in_variant = seen_in_variant.insert(id.clone());
            match merged.get_mut(&id) {
                Some(existing) => {
                    if first_in_variant {
                        existing.support += 1;
                    }
                    if hit.score > existing.score {
                        existing.score = hit.score;
                    }
                }
                None => {
                    merged.insert(
                        id,
                        Candidate {
                            chunk: hit.chunk,
                            source: hit.source,
                            score: hit.score,
                            support: 1,
                        },
                    );
                }
            }
        }
    }

    let mut fused: Vec<Candidate> = merged.into_values().collect();
    sort_candidates(&mut fused);
    fused
}

pub fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(compare_candidates);
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.support.cmp(&a.support))
        .then_with(|| b.chunk.id.cmp(&a.chunk.id))
}
