use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    collection::{CollectionHandle, live_collection},
    embedding::EmbeddingProvider,
    error::{Error, Result},
    records::{self, Metadata, VectorRecord},
    similarity::{self, Ranked},
    store::Store,
};

pub const DEFAULT_K: usize = 4;
pub const DEFAULT_FETCH_K: usize = 20;
pub const DEFAULT_LAMBDA_MULT: f32 = 0.5;

/// How candidates are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    /// Top-k by cosine similarity.
    #[default]
    Similarity,
    /// Top-k, then drop everything below a required threshold.
    SimilarityScoreThreshold,
    /// Maximal marginal relevance over a `fetch_k` candidate pool.
    Mmr,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Similarity => "similarity",
            SearchType::SimilarityScoreThreshold => {
                "similarity_score_threshold"
            }
            SearchType::Mmr => "mmr",
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "similarity" => Ok(SearchType::Similarity),
            "similarity_score_threshold" => {
                Ok(SearchType::SimilarityScoreThreshold)
            }
            "mmr" => Ok(SearchType::Mmr),
            other => Err(Error::Validation(format!(
                "unknown search type '{other}'"
            ))),
        }
    }
}

/// Tuning knobs for a search; unset fields take their defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreKwargs {
    pub k: Option<usize>,
    pub score_threshold: Option<f32>,
    pub fetch_k: Option<usize>,
    pub lambda_mult: Option<f32>,
}

/// A validated search configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchPolicy {
    pub search_type: SearchType,
    pub k: usize,
    pub score_threshold: Option<f32>,
    pub fetch_k: usize,
    pub lambda_mult: f32,
}

impl Default for SearchPolicy {
    fn default() -> Self {
        Self {
            search_type: SearchType::Similarity,
            k: DEFAULT_K,
            score_threshold: None,
            fetch_k: DEFAULT_FETCH_K,
            lambda_mult: DEFAULT_LAMBDA_MULT,
        }
    }
}

impl SearchPolicy {
    pub fn new(search_type: SearchType, kwargs: ScoreKwargs) -> Result<Self> {
        let k = kwargs.k.unwrap_or(DEFAULT_K);
        let policy = Self {
            search_type,
            k,
            score_threshold: kwargs.score_threshold,
            fetch_k: kwargs.fetch_k.unwrap_or(DEFAULT_FETCH_K.max(k)),
            lambda_mult: kwargs.lambda_mult.unwrap_or(DEFAULT_LAMBDA_MULT),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// This policy with the given parts replaced. Fields left unset in
    /// `kwargs`, or all of them when `kwargs` is `None`, keep their current
    /// values; `fetch_k` still grows to at least the new `k`.
    pub fn merged(
        &self,
        search_type: Option<SearchType>,
        kwargs: Option<ScoreKwargs>,
    ) -> Result<Self> {
        let kwargs = kwargs.unwrap_or_default();
        let k = kwargs.k.unwrap_or(self.k);
        let policy = Self {
            search_type: search_type.unwrap_or(self.search_type),
            k,
            score_threshold: kwargs.score_threshold.or(self.score_threshold),
            fetch_k: kwargs.fetch_k.unwrap_or(self.fetch_k.max(k)),
            lambda_mult: kwargs.lambda_mult.unwrap_or(self.lambda_mult),
        };
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Error::Validation("k must be positive".into()));
        }
        if let Some(threshold) = self.score_threshold
            && !threshold.is_finite()
        {
            return Err(Error::Validation(
                "score threshold must be finite".into(),
            ));
        }
        match self.search_type {
            SearchType::Similarity => {}
            SearchType::SimilarityScoreThreshold => {
                if self.score_threshold.is_none() {
                    return Err(Error::Validation(
                        "similarity_score_threshold needs a score_threshold"
                            .into(),
                    ));
                }
            }
            SearchType::Mmr => {
                if self.fetch_k < self.k {
                    return Err(Error::Validation(format!(
                        "fetch_k ({}) must be at least k ({})",
                        self.fetch_k, self.k
                    )));
                }
                if !(0.0..=1.0).contains(&self.lambda_mult) {
                    return Err(Error::Validation(format!(
                        "lambda_mult must be within [0, 1], got {}",
                        self.lambda_mult
                    )));
                }
            }
        }
        Ok(())
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    pub id: String,
    pub score: f32,
    pub content: String,
    pub metadata: Metadata,
}

/// Applies a policy to an embedded query and the collection's records.
#[derive(Debug, Clone, Copy)]
struct QueryExecutor {
    policy: SearchPolicy,
}

impl QueryExecutor {
    fn new(policy: SearchPolicy) -> Self {
        Self { policy }
    }

    /// `records` must be in id order; equal scores then rank by id.
    fn execute(
        &self,
        query: &[f32],
        records: Vec<VectorRecord>,
    ) -> Vec<ScoredRecord> {
        let vectors: Vec<&[f32]> =
            records.iter().map(|r| r.vector.as_slice()).collect();
        let ranked = similarity::rank(query, &vectors);

        let picked: Vec<Ranked> = match self.policy.search_type {
            SearchType::Mmr => {
                let pool = &ranked[..ranked.len().min(self.policy.fetch_k)];
                let mut picked = similarity::mmr(
                    pool,
                    &vectors,
                    self.policy.k,
                    self.policy.lambda_mult,
                );
                similarity::sort_ranked(&mut picked);
                picked
            }
            SearchType::Similarity | SearchType::SimilarityScoreThreshold => {
                ranked.into_iter().take(self.policy.k).collect()
            }
        };

        let threshold = self.policy.score_threshold;
        let keep: Vec<Ranked> = picked
            .into_iter()
            .filter(|r| threshold.is_none_or(|t| r.score >= t))
            .collect();

        let mut slots: Vec<Option<VectorRecord>> =
            records.into_iter().map(Some).collect();
        keep.into_iter()
            .filter_map(|r| {
                slots[r.index].take().map(|record| ScoredRecord {
                    id: record.id,
                    score: r.score,
                    content: record.content,
                    metadata: record.metadata,
                })
            })
            .collect()
    }
}

/// Similarity search over one collection.
pub struct SimilarityRetriever<'a> {
    store: &'a Store,
    provider: &'a dyn EmbeddingProvider,
    collection: CollectionHandle,
    executor: QueryExecutor,
}

impl<'a> SimilarityRetriever<'a> {
    pub fn new(
        store: &'a Store,
        provider: &'a dyn EmbeddingProvider,
        collection: CollectionHandle,
        policy: SearchPolicy,
    ) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            store,
            provider,
            collection,
            executor: QueryExecutor::new(policy),
        })
    }

    pub fn policy(&self) -> &SearchPolicy {
        &self.executor.policy
    }

    pub fn collection(&self) -> &CollectionHandle {
        &self.collection
    }

    /// Replace the search type, the score kwargs, or both, keeping whatever
    /// is not given. On a validation error the old policy stays.
    pub fn update(
        &mut self,
        search_type: Option<SearchType>,
        kwargs: Option<ScoreKwargs>,
    ) -> Result<()> {
        let policy = self.executor.policy.merged(search_type, kwargs)?;
        self.executor = QueryExecutor::new(policy);
        tracing::debug!(
            search_type = %policy.search_type,
            k = policy.k,
            "updated search policy"
        );
        Ok(())
    }

    /// Embed `text` and return the best matching records, best first.
    pub fn search(&self, text: &str) -> Result<Vec<ScoredRecord>> {
        let query = self.provider.embed_query(text)?;

        let handle = self.collection.clone();
        let conn = self.store.acquire()?;
        let (dimension, records) = conn.read("search", move |txn| {
            let collections = txn.open_table(handle.schema().collections())?;
            let row = live_collection(&collections, &handle)?;
            let rows = txn.open_table(handle.schema().records())?;
            let vectors = txn.open_table(handle.schema().vectors())?;
            let records =
                records::scan_collection(&rows, &vectors, handle.uuid())?;
            Ok((row.dimension, records))
        })?;
        drop(conn);

        if records.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(expected) = dimension
            && expected != query.len()
        {
            return Err(Error::DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }

        let results = self.executor.execute(&query, records);
        tracing::debug!(
            collection = self.collection.name(),
            search_type = %self.executor.policy.search_type,
            hits = results.len(),
            "search finished"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
        let mut metadata = Metadata::new();
        metadata.insert("id".into(), id.into());
        VectorRecord {
            id: id.into(),
            vector,
            content: id.into(),
            metadata,
            collection_id: "c".into(),
        }
    }

    fn ids(results: &[ScoredRecord]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn search_type_names() {
        for t in [
            SearchType::Similarity,
            SearchType::SimilarityScoreThreshold,
            SearchType::Mmr,
        ] {
            assert_eq!(t.as_str().parse::<SearchType>().unwrap(), t);
        }
        assert!("cosine".parse::<SearchType>().is_err());
    }

    #[test]
    fn policy_validation() {
        let zero_k = ScoreKwargs {
            k: Some(0),
            ..ScoreKwargs::default()
        };
        assert!(SearchPolicy::new(SearchType::Similarity, zero_k).is_err());
        assert!(
            SearchPolicy::new(
                SearchType::SimilarityScoreThreshold,
                ScoreKwargs::default()
            )
            .is_err()
        );

        let small_pool = ScoreKwargs {
            k: Some(5),
            fetch_k: Some(3),
            ..ScoreKwargs::default()
        };
        assert!(SearchPolicy::new(SearchType::Mmr, small_pool).is_err());

        let bad_lambda = ScoreKwargs {
            lambda_mult: Some(1.5),
            ..ScoreKwargs::default()
        };
        assert!(SearchPolicy::new(SearchType::Mmr, bad_lambda).is_err());
    }

    #[test]
    fn fetch_k_defaults_to_at_least_k() {
        let policy = SearchPolicy::new(
            SearchType::Mmr,
            ScoreKwargs {
                k: Some(30),
                ..ScoreKwargs::default()
            },
        )
        .unwrap();
        assert_eq!(policy.fetch_k, 30);
        assert_eq!(policy.lambda_mult, DEFAULT_LAMBDA_MULT);
    }

    #[test]
    fn top_k_breaks_ties_by_id() {
        let executor = QueryExecutor::new(SearchPolicy {
            k: 2,
            ..SearchPolicy::default()
        });
        let records = vec![
            record("a", vec![0.0, 1.0]),
            record("b", vec![1.0, 0.0]),
            record("c", vec![1.0, 0.0]),
        ];
        let results = executor.execute(&[1.0, 0.0], records);
        assert_eq!(ids(&results), vec!["b", "c"]);
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn threshold_filters_after_ranking() {
        let executor = QueryExecutor::new(SearchPolicy {
            search_type: SearchType::SimilarityScoreThreshold,
            k: 3,
            score_threshold: Some(0.5),
            ..SearchPolicy::default()
        });
        let records = vec![
            record("hit", vec![1.0, 0.0]),
            record("miss", vec![0.0, 1.0]),
        ];
        let results = executor.execute(&[1.0, 0.1], records);
        assert_eq!(ids(&results), vec!["hit"]);
    }

    #[test]
    fn unattainable_threshold_is_empty() {
        let executor = QueryExecutor::new(SearchPolicy {
            score_threshold: Some(1.1),
            ..SearchPolicy::default()
        });
        let results = executor.execute(&[1.0], vec![record("a", vec![1.0])]);
        assert!(results.is_empty());
    }

    #[test]
    fn mmr_skips_near_duplicates() {
        let executor = QueryExecutor::new(SearchPolicy {
            search_type: SearchType::Mmr,
            k: 2,
            fetch_k: 3,
            lambda_mult: 0.5,
            ..SearchPolicy::default()
        });
        let records = vec![
            record("dup1", vec![1.0, 0.1]),
            record("dup2", vec![1.0, 0.1]),
            record("other", vec![0.6, 0.8]),
        ];
        let results = executor.execute(&[1.0, 0.2], records);
        assert_eq!(ids(&results), vec!["dup1", "other"]);
    }

    #[test]
    fn mmr_results_are_sorted_by_score() {
        let executor = QueryExecutor::new(SearchPolicy {
            search_type: SearchType::Mmr,
            k: 3,
            fetch_k: 4,
            lambda_mult: 0.5,
            ..SearchPolicy::default()
        });
        let records = vec![
            record("dup1", vec![1.0, 0.1, 0.0]),
            record("dup2", vec![1.0, 0.1, 0.0]),
            record("other", vec![0.6, 0.8, 0.0]),
            record("third", vec![0.8, 0.0, 0.6]),
        ];
        let results = executor.execute(&[1.0, 0.0, 0.0], records);

        assert_eq!(ids(&results), vec!["dup1", "dup2", "third"]);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn merged_keeps_unset_parts() {
        let base = SearchPolicy::new(
            SearchType::SimilarityScoreThreshold,
            ScoreKwargs {
                k: Some(7),
                score_threshold: Some(0.3),
                ..ScoreKwargs::default()
            },
        )
        .unwrap();

        let mmr = base.merged(Some(SearchType::Mmr), None).unwrap();
        assert_eq!(mmr.search_type, SearchType::Mmr);
        assert_eq!(mmr.k, 7);
        assert_eq!(mmr.score_threshold, Some(0.3));
        assert_eq!(mmr.fetch_k, DEFAULT_FETCH_K);

        let wider = base
            .merged(
                None,
                Some(ScoreKwargs {
                    k: Some(40),
                    ..ScoreKwargs::default()
                }),
            )
            .unwrap();
        assert_eq!(wider.search_type, SearchType::SimilarityScoreThreshold);
        assert_eq!(wider.k, 40);
        assert_eq!(wider.fetch_k, 40);
        assert_eq!(wider.score_threshold, Some(0.3));
    }
}
