use common::{error::AppError, storage::types::Chunk};

/// Boundary kinds in order of preference.
#[derive(Debug, Clone, Copy)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Whitespace,
}

const BOUNDARIES: [Boundary; 4] = [
    Boundary::Paragraph,
    Boundary::Line,
    Boundary::Sentence,
    Boundary::Whitespace,
];

/// Splits `text` into chunks of at most `chunk_size` characters.
///
/// Each chunk ends on the best semantic boundary found in the back half of its
/// window (paragraph, then line, then sentence, then any whitespace) and falls
/// back to the hard window edge. The next chunk starts exactly `overlap`
/// characters before the previous end, so neighbours share exactly `overlap`
/// characters and together cover the whole text. Offsets are in characters.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, AppError> {
    if chunk_size == 0 {
        return Err(AppError::InvalidConfig(
            "chunk_size must be greater than zero".into(),
        ));
    }
    if overlap >= chunk_size {
        return Err(AppError::InvalidConfig(format!(
            "chunk_overlap ({overlap}) must be smaller than chunk_size ({chunk_size})"
        )));
    }

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < total {
        let hard_end = start.saturating_add(chunk_size).min(total);
        let end = if hard_end == total {
            total
        } else {
            // Any end past start + overlap guarantees forward progress.
            let min_end = start
                .saturating_add(overlap)
                .saturating_add(1)
                .max(start.saturating_add(chunk_size / 2))
                .min(hard_end);
            find_boundary(&chars, min_end, hard_end).unwrap_or(hard_end)
        };

        let span: String = chars.get(start..end).unwrap_or_default().iter().collect();
        chunks.push(Chunk::new(document_id, span, start, end));

        if end == total {
            break;
        }
        start = end.saturating_sub(overlap);
    }

    Ok(chunks)
}

/// Latest exclusive end in `min_end..=hard_end` that sits on a boundary.
fn find_boundary(chars: &[char], min_end: usize, hard_end: usize) -> Option<usize> {
    BOUNDARIES.iter().find_map(|boundary| {
        (min_end..=hard_end)
            .rev()
            .find(|&end| is_boundary(chars, end, *boundary))
    })
}

fn is_boundary(chars: &[char], end: usize, boundary: Boundary) -> bool {
    let Some(last) = end.checked_sub(1).and_then(|idx| chars.get(idx)) else {
        return false;
    };
    match boundary {
        Boundary::Paragraph => {
            *last == '\n'
                && end
                    .checked_sub(2)
                    .and_then(|idx| chars.get(idx))
                    .is_some_and(|prev| *prev == '\n')
        }
        Boundary::Line => *last == '\n',
        Boundary::Sentence => {
            matches!(last, '.' | '!' | '?')
                && chars.get(end).map_or(true, |next| next.is_whitespace())
        }
        Boundary::Whitespace => last.is_whitespace(),
    }
}
