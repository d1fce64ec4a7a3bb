//! Cosine similarity over stored embeddings and threshold-based selection.

use thiserror::Error;

use crate::source::Source;

/// Vector comparison failure.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("vector dimensions differ: {left} vs {right}")]
pub struct SimilarityError {
    /// Length of the first vector.
    pub left: usize,
    /// Length of the second vector.
    pub right: usize,
}

/// Anything that may carry a retrieval embedding.
pub trait Embedded {
    /// Stored embedding, if one was computed.
    fn embedding(&self) -> Option<&[f32]>;
}

impl Embedded for Source {
    fn embedding(&self) -> Option<&[f32]> {
        self.text_embedding.as_deref()
    }
}

/// Cosine similarity in `[-1, 1]`; `0.0` when either vector has zero magnitude.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> Result<f64, SimilarityError> {
    if left.len() != right.len() {
        return Err(SimilarityError {
            left: left.len(),
            right: right.len(),
        });
    }

    let (mut dot, mut left_norm, mut right_norm) = (0.0f64, 0.0f64, 0.0f64);
    for (&a, &b) in left.iter().zip(right) {
        let (a, b) = (f64::from(a), f64::from(b));
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }
    if left_norm == 0.0 || right_norm == 0.0 {
        return Ok(0.0);
    }

    let similarity = dot / (left_norm.sqrt() * right_norm.sqrt());
    Ok(similarity.clamp(-1.0, 1.0))
}

/// Candidates whose embedding is strictly more similar to `query` than `threshold`, in input
/// order. Candidates without an embedding are skipped.
pub fn relevant_sources<'a, T: Embedded>(
    query: &[f32],
    candidates: &'a [T],
    threshold: f64,
) -> Result<Vec<&'a T>, SimilarityError> {
    let mut relevant = Vec::new();
    for candidate in candidates {
        let Some(embedding) = candidate.embedding() else {
            tracing::debug!("Skipping candidate without embedding");
            continue;
        };
        if cosine_similarity(query, embedding)? > threshold {
            relevant.push(candidate);
        }
    }
    Ok(relevant)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Candidate {
        name: &'static str,
        embedding: Option<Vec<f32>>,
    }

    impl Embedded for Candidate {
        fn embedding(&self) -> Option<&[f32]> {
            self.embedding.as_deref()
        }
    }

    /// Unit vector in the plane whose cosine with `[1, 0]` is `similarity`.
    fn at(similarity: f32) -> Vec<f32> {
        vec![similarity, (1.0 - similarity * similarity).sqrt()]
    }

    fn names<'a>(selected: &[&'a Candidate]) -> Vec<&'a str> {
        selected.iter().map(|candidate| candidate.name).collect()
    }

    #[test]
    fn threshold_keeps_only_strictly_more_similar() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            Candidate { name: "high", embedding: Some(at(0.95)) },
            Candidate { name: "close", embedding: Some(at(0.81)) },
            Candidate { name: "low", embedding: Some(at(0.5)) },
        ];
        let selected = relevant_sources(&query, &candidates, 0.8).expect("select");
        assert_eq!(names(&selected), vec!["high", "close"]);

        let reversed: Vec<Candidate> = candidates.into_iter().rev().collect();
        let selected = relevant_sources(&query, &reversed, 0.8).expect("select");
        assert_eq!(names(&selected), vec!["close", "high"]);
    }

    #[test]
    fn similarity_just_above_threshold_is_kept() {
        // One f32 step below 0.6 puts the cosine with [1, 0] a hair above 0.8.
        let below = f32::from_bits(0.6f32.to_bits() - 1);
        let candidates = vec![Candidate { name: "edge", embedding: Some(vec![0.8, below]) }];

        let similarity = cosine_similarity(&[1.0, 0.0], &[0.8, below]).expect("similarity");
        assert!(similarity > 0.8);
        let selected = relevant_sources(&[1.0, 0.0], &candidates, 0.8).expect("select");
        assert_eq!(names(&selected), vec!["edge"]);
    }

    #[test]
    fn candidates_without_embedding_are_skipped() {
        let candidates = vec![
            Candidate { name: "none", embedding: None },
            Candidate { name: "same", embedding: Some(vec![2.0, 0.0]) },
        ];
        let selected = relevant_sources(&[1.0, 0.0], &candidates, 0.8).expect("select");
        assert_eq!(names(&selected), vec!["same"]);
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let candidates = vec![Candidate { name: "3d", embedding: Some(vec![1.0, 0.0, 0.0]) }];
        let error = relevant_sources(&[1.0, 0.0], &candidates, 0.8).expect_err("mismatch");
        assert_eq!(error, SimilarityError { left: 2, right: 3 });
    }

    #[test]
    fn similarity_properties_hold() {
        let a = [0.3, -1.2, 4.0];
        let b = [2.0, 0.5, -0.7];
        let ab = cosine_similarity(&a, &b).expect("ab");
        let ba = cosine_similarity(&b, &a).expect("ba");
        assert!((ab - ba).abs() < 1e-6);
        assert!((-1.0..=1.0).contains(&ab));
        assert!((cosine_similarity(&a, &a).expect("self") - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]).expect("zero"), 0.0);
        assert_eq!(cosine_similarity(&[], &[]).expect("empty"), 0.0);
    }

    #[test]
    fn opposite_vectors_are_minus_one() {
        let similarity = cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]).expect("opposite");
        assert!((similarity + 1.0).abs() < 1e-6);
    }
}
