//! Top-k compatibility ranking
//!
//! Scores every candidate against a target embedding, orders them by
//! descending similarity and keeps the best `top_k`. Candidates that cannot
//! be scored are reported next to the results instead of failing the call.

use crate::candidate::{Candidate, CandidateId, ID_FIELD};
use crate::similarity::{round_to, score_from_similarity};
use crate::{Embedding, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Number of results returned when the caller does not ask for a specific count
pub const DEFAULT_TOP_K: usize = 5;

/// Decimal places kept on the reported similarity
const SIMILARITY_DECIMALS: i32 = 4;

/// One entry of a ranking; its position in the output is its rank
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub id: CandidateId,
    /// Cosine similarity to the target, rounded to 4 decimals
    pub similarity: f64,
    /// Compatibility score in [0, 100], rounded to 2 decimals
    pub compatibility_score: f64,
    /// Candidate attributes other than id and embedding
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A candidate that was left out of the ranking
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedCandidate {
    /// Index of the candidate in the caller's input
    pub position: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<CandidateId>,
    #[serde(rename = "error", serialize_with = "serialize_error")]
    pub error: Error,
}

fn serialize_error<S: serde::Serializer>(error: &Error, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// Outcome of a ranking call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ranking {
    pub results: Vec<RankedResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedCandidate>,
}

impl Ranking {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn ids(&self) -> Vec<&CandidateId> {
        self.results.iter().map(|r| &r.id).collect()
    }
}

/// Ranks candidates of a fixed embedding dimension against a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ranker {
    dim: usize,
}

impl Ranker {
    /// Create a ranker that accepts embeddings of `dim` values
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Rank candidates by compatibility with the target
    ///
    /// # Arguments
    /// * `target` - The embedding to match against
    /// * `candidates` - Items to score, in caller order
    /// * `top_k` - Maximum number of results to keep
    ///
    /// # Returns
    /// Results sorted by descending similarity. Equal similarities keep their
    /// input order. Candidates with a wrong dimension are listed in
    /// `rejected`; a target with a wrong dimension fails the whole call.
    pub fn rank(
        &self,
        target: &Embedding,
        candidates: Vec<Candidate>,
        top_k: usize,
    ) -> Result<Ranking> {
        target.check_dim(self.dim)?;

        let mut ranking = Ranking::default();
        for (position, candidate) in candidates.into_iter().enumerate() {
            match self.score(target, candidate) {
                Ok(result) => ranking.results.push(result),
                Err((id, error)) => ranking.rejected.push(RejectedCandidate {
                    position,
                    id: Some(id),
                    error,
                }),
            }
        }

        Self::order_and_truncate(&mut ranking.results, top_k);
        Ok(ranking)
    }

    /// Rank a JSON array of candidate records
    ///
    /// Records that fail to parse are rejected individually, so one bad
    /// record never hides the rest.
    pub fn rank_records(&self, target: &Embedding, records: &Value, top_k: usize) -> Result<Ranking> {
        target.check_dim(self.dim)?;

        let mut ranking = Ranking::default();
        for (position, parsed) in Candidate::parse_many(records)?.into_iter().enumerate() {
            let outcome = parsed
                .map_err(|error| (record_id(records, position), error))
                .and_then(|candidate| {
                    self.score(target, candidate)
                        .map_err(|(id, error)| (Some(id), error))
                });
            match outcome {
                Ok(result) => ranking.results.push(result),
                Err((id, error)) => ranking.rejected.push(RejectedCandidate { position, id, error }),
            }
        }

        Self::order_and_truncate(&mut ranking.results, top_k);
        Ok(ranking)
    }

    fn score(
        &self,
        target: &Embedding,
        candidate: Candidate,
    ) -> std::result::Result<RankedResult, (CandidateId, Error)> {
        let Candidate { id, embedding, extra } = candidate;

        if let Err(e) = embedding.check_dim(self.dim) {
            return Err((id, e));
        }
        let raw = match target.cosine_similarity(&embedding) {
            Ok(sim) => sim,
            Err(e) => return Err((id, e)),
        };

        Ok(RankedResult {
            id,
            // adding 0.0 folds a rounded -0.0 into 0.0
            similarity: round_to(raw, SIMILARITY_DECIMALS) + 0.0,
            compatibility_score: score_from_similarity(raw),
            extra,
        })
    }

    fn order_and_truncate(results: &mut Vec<RankedResult>, top_k: usize) {
        // sort_by is stable, ties keep input order
        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });
        results.truncate(top_k);
    }
}

/// Rank candidates using the target's own dimension as the expected one
pub fn rank(target: &Embedding, candidates: Vec<Candidate>, top_k: usize) -> Result<Ranking> {
    Ranker::new(target.dim()).rank(target, candidates, top_k)
}

fn record_id(records: &Value, position: usize) -> Option<CandidateId> {
    records
        .get(position)?
        .get(ID_FIELD)
        .and_then(|raw| CandidateId::deserialize(raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DIM: usize = 8;

    fn embedding(values: &[f32]) -> Embedding {
        let mut data = vec![0.0; DIM];
        data[..values.len()].copy_from_slice(values);
        Embedding::new(data).unwrap()
    }

    fn candidate(id: &str, values: &[f32]) -> Candidate {
        Candidate::new(id, embedding(values))
    }

    fn target() -> Embedding {
        embedding(&[1.0])
    }

    #[test]
    fn test_rank_sorting() {
        let ranker = Ranker::new(DIM);
        let candidates = vec![
            candidate("opposite", &[-1.0]),
            candidate("close", &[1.0, 0.2]),
            candidate("same", &[2.0]),
            candidate("orthogonal", &[0.0, 1.0]),
        ];

        let ranking = ranker.rank(&target(), candidates, 10).unwrap();

        let ids: Vec<String> = ranking.ids().iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["same", "close", "orthogonal", "opposite"]);
        assert_eq!(ranking.results[0].similarity, 1.0);
        assert_eq!(ranking.results[0].compatibility_score, 100.0);
        assert_eq!(ranking.results[2].compatibility_score, 50.0);
        assert_eq!(ranking.results[3].compatibility_score, 0.0);
    }

    #[test]
    fn test_top_k_truncates() {
        let ranker = Ranker::new(DIM);
        let candidates = (0..10)
            .map(|i| candidate(&format!("c{i}"), &[1.0, i as f32]))
            .collect();

        let ranking = ranker.rank(&target(), candidates, 3).unwrap();
        assert_eq!(ranking.len(), 3);
        assert_eq!(ranking.results[0].id.to_string(), "c0");
    }

    #[test]
    fn test_fewer_candidates_than_top_k() {
        let ranker = Ranker::new(DIM);
        let candidates = vec![candidate("a", &[1.0]), candidate("b", &[0.0, 1.0])];

        let ranking = ranker.rank(&target(), candidates, DEFAULT_TOP_K).unwrap();
        assert_eq!(ranking.len(), 2);
    }

    #[test]
    fn test_empty_candidates() {
        let ranking = Ranker::new(DIM).rank(&target(), Vec::new(), 5).unwrap();
        assert!(ranking.is_empty());
        assert!(ranking.rejected.is_empty());
    }

    #[test]
    fn test_ties_keep_input_order() {
        let ranker = Ranker::new(DIM);
        let candidates = vec![
            candidate("first", &[0.0, 1.0]),
            candidate("second", &[0.0, 0.0, 3.0]),
            candidate("third", &[0.0, 0.0, 0.0, 0.5]),
        ];

        let ranking = ranker.rank(&target(), candidates, 3).unwrap();
        let ids: Vec<String> = ranking.ids().iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_passthrough_attributes() {
        let ranker = Ranker::new(DIM);
        let candidates = vec![candidate("a", &[1.0])
            .with_attribute("category", json!("shoes"))
            .with_attribute("image_url", json!("https://example.com/a.png"))];

        let ranking = ranker.rank(&target(), candidates, 1).unwrap();
        let value = serde_json::to_value(&ranking.results[0]).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "a",
                "similarity": 1.0,
                "compatibility_score": 100.0,
                "category": "shoes",
                "image_url": "https://example.com/a.png"
            })
        );
    }

    #[test]
    fn test_wrong_dimension_candidate_is_rejected_not_fatal() {
        let ranker = Ranker::new(DIM);
        let candidates = vec![
            candidate("good", &[1.0]),
            Candidate::new("short", Embedding::new(vec![1.0, 0.0]).unwrap()),
            candidate("also-good", &[0.5, 0.5]),
        ];

        let ranking = ranker.rank(&target(), candidates, 5).unwrap();
        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking.rejected.len(), 1);
        assert_eq!(ranking.rejected[0].position, 1);
        assert_eq!(ranking.rejected[0].id, Some(CandidateId::from("short")));
        assert_eq!(
            ranking.rejected[0].error,
            Error::InvalidDimension { expected: DIM, actual: 2 }
        );
    }

    #[test]
    fn test_wrong_dimension_target_is_error() {
        let ranker = Ranker::new(DIM);
        let short = Embedding::new(vec![1.0; 3]).unwrap();
        assert!(ranker.rank(&short, vec![candidate("a", &[1.0])], 5).is_err());
    }

    #[test]
    fn test_similarity_rounded_to_four_decimals() {
        let ranker = Ranker::new(DIM);
        let ranking = ranker
            .rank(&target(), vec![candidate("a", &[1.0, 0.3])], 1)
            .unwrap();

        let sim = ranking.results[0].similarity;
        assert_eq!(sim, round_to(sim, 4));
        assert_eq!(sim, 0.9578);
        assert_eq!(ranking.results[0].compatibility_score, 97.89);
    }

    #[test]
    fn test_rank_records_isolates_bad_records() {
        let ranker = Ranker::new(2);
        let target = Embedding::new(vec![1.0, 0.0]).unwrap();
        let records = json!([
            {"id": "a", "embedding": [1.0, 0.0], "brand": "x"},
            {"id": "b", "embedding": [1.0, "oops"]},
            {"embedding": [0.0, 1.0]},
            {"id": "d", "embedding": [1.0, 0.0, 0.0]},
            {"id": 5, "embedding": [0.0, 1.0]}
        ]);

        let ranking = ranker.rank_records(&target, &records, 5).unwrap();
        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking.results[0].id, CandidateId::from("a"));
        assert_eq!(ranking.results[0].extra["brand"], json!("x"));
        assert_eq!(ranking.results[1].id, CandidateId::Integer(5));

        let positions: Vec<usize> = ranking.rejected.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert_eq!(ranking.rejected[0].id, Some(CandidateId::from("b")));
        assert_eq!(ranking.rejected[1].id, None);
    }

    #[test]
    fn test_free_rank_uses_target_dimension() {
        let target = Embedding::new(vec![1.0, 0.0]).unwrap();
        let ranking = rank(
            &target,
            vec![Candidate::new("a", Embedding::new(vec![-1.0, 0.0]).unwrap())],
            DEFAULT_TOP_K,
        )
        .unwrap();
        assert_eq!(ranking.results[0].similarity, -1.0);
        assert_eq!(ranking.results[0].compatibility_score, 0.0);
    }
}
