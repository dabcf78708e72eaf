//! Cosine similarity ranking over precomputed embeddings
//!
//! Pure functions: no I/O, no mutation of inputs. Every call either returns a
//! complete ranking or a `RetrievalError`.

use crate::error::RetrievalError;

/// Scores closer than this are treated as tied, and tied candidates keep
/// their original dataset order.
pub const TIE_EPSILON: f32 = 1e-6;

/// One ranked candidate: its position in the dataset and its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub index: usize,
    pub score: f32,
}

/// Cosine similarity of two equal-length vectors, clamped to [-1, 1].
///
/// Returns 0.0 if either vector has zero norm. Callers check lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let norm_a = norm(a);
    let norm_b = norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot(a, b) / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Score every candidate against `query`, in candidate order.
pub fn scores<'a, I>(query: &[f32], candidates: I) -> Result<Vec<f32>, RetrievalError>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    if query.is_empty() || query.iter().any(|x| !x.is_finite()) {
        return Err(RetrievalError::DegenerateQuery);
    }
    let query_norm = norm(query);
    if query_norm == 0.0 {
        return Err(RetrievalError::DegenerateQuery);
    }

    let mut out = Vec::new();
    for (index, candidate) in candidates.into_iter().enumerate() {
        if candidate.len() != query.len() {
            return Err(RetrievalError::DimensionMismatch {
                index,
                expected: query.len(),
                actual: candidate.len(),
            });
        }
        if candidate.iter().any(|x| !x.is_finite()) {
            return Err(RetrievalError::MalformedDataset(format!(
                "image {index} has non-finite embedding values"
            )));
        }
        let candidate_norm = norm(candidate);
        let score = if candidate_norm == 0.0 {
            0.0
        } else {
            (dot(query, candidate) / (query_norm * candidate_norm)).clamp(-1.0, 1.0)
        };
        out.push(score);
    }

    if out.is_empty() {
        return Err(RetrievalError::EmptyDataset);
    }
    Ok(out)
}

/// Order `scores` descending and keep the best `k`.
///
/// Runs of scores within `TIE_EPSILON` of the run's leading score are put
/// back in dataset order, so the earlier image wins a tie.
pub fn rank(scores: &[f32], k: usize) -> Result<Vec<Scored>, RetrievalError> {
    if k == 0 {
        return Err(RetrievalError::InvalidTopK);
    }
    if scores.is_empty() {
        return Err(RetrievalError::EmptyDataset);
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut start = 0;
    while start < order.len() {
        let head = scores[order[start]];
        let mut end = start + 1;
        while end < order.len() && head - scores[order[end]] <= TIE_EPSILON {
            end += 1;
        }
        order[start..end].sort_unstable();
        start = end;
    }

    Ok(order
        .into_iter()
        .take(k)
        .map(|index| Scored {
            index,
            score: scores[index],
        })
        .collect())
}

/// Score and rank in one step.
pub fn top_k<'a, I>(query: &[f32], candidates: I, k: usize) -> Result<Vec<Scored>, RetrievalError>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    if k == 0 {
        return Err(RetrievalError::InvalidTopK);
    }
    rank(&scores(query, candidates)?, k)
}
