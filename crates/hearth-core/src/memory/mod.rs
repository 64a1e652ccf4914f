//! Scoped, embedding-backed memory.
//!
//! Records are append-only. Every search is restricted to exactly one
//! [`Scope`]; a backend that hands back a record from another scope is treated
//! as a defect and the search fails with `MemoryError::ScopeViolation`.

pub mod sqlite;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CollaboratorError, MemoryError};
use crate::llm::Embedder;

pub use sqlite::SqliteMemoryBackend;

/// Family/user boundary that partitions memory.
///
/// Matching is exact: a family-wide scope (`user_id == None`) and a user scope
/// within the same family are different scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub family_id: Uuid,
    pub user_id: Option<Uuid>,
}

impl Scope {
    pub fn family(family_id: Uuid) -> Self {
        Self {
            family_id,
            user_id: None,
        }
    }

    pub fn user(family_id: Uuid, user_id: Uuid) -> Self {
        Self {
            family_id,
            user_id: Some(user_id),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.user_id {
            Some(user) => write!(f, "family:{}/user:{user}", self.family_id),
            None => write!(f, "family:{}", self.family_id),
        }
    }
}

/// Conventional values of the `kind` metadata key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Conversation,
    Insight,
    Preference,
    Behavior,
    Rule,
    Summary,
    Goal,
    Fact,
}

impl MemoryKind {
    pub const ALL: [MemoryKind; 8] = [
        MemoryKind::Conversation,
        MemoryKind::Insight,
        MemoryKind::Preference,
        MemoryKind::Behavior,
        MemoryKind::Rule,
        MemoryKind::Summary,
        MemoryKind::Goal,
        MemoryKind::Fact,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MemoryKind::Conversation => "conversation",
            MemoryKind::Insight => "insight",
            MemoryKind::Preference => "preference",
            MemoryKind::Behavior => "behavior",
            MemoryKind::Rule => "rule",
            MemoryKind::Summary => "summary",
            MemoryKind::Goal => "goal",
            MemoryKind::Fact => "fact",
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        MemoryKind::ALL
            .into_iter()
            .find(|k| k.as_str() == lowered)
            .ok_or_else(|| format!("unknown memory kind '{s}'"))
    }
}

pub const KIND_KEY: &str = "kind";
pub const SOURCE_KEY: &str = "source";
pub const IMPORTANCE_KEY: &str = "importance";

/// Importance written when the caller supplies none.
pub const DEFAULT_IMPORTANCE: u8 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub scope: Scope,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    pub score: f32,
}

/// Restrictions applied before ranking, so a filtered-out record never takes
/// a top-k slot.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Every key must be present in the record's metadata with an equal value.
    pub metadata: Map<String, Value>,
    pub min_score: Option<f32>,
}

impl SearchFilters {
    pub fn with_kind(mut self, kind: MemoryKind) -> Self {
        self.metadata
            .insert(KIND_KEY.into(), Value::String(kind.as_str().into()));
        self
    }

    pub fn with_min_score(mut self, min_score: Option<f32>) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        self.metadata
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

/// Physical storage for memory records.
///
/// Implementations must return only records of the requested scope that pass
/// the metadata filters. `MemoryStore` re-checks the scope of everything it is
/// given.
pub trait MemoryBackend: Send + Sync {
    fn insert(&self, record: &MemoryRecord) -> Result<(), MemoryError>;

    fn candidates(
        &self,
        scope: &Scope,
        filters: &SearchFilters,
    ) -> Result<Vec<MemoryRecord>, MemoryError>;

    /// Records of `scope` passing the metadata filters, newest first, after
    /// skipping `offset` of them and keeping at most `limit`.
    fn list(
        &self,
        scope: &Scope,
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError>;

    fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>, MemoryError>;

    fn count(&self, scope: &Scope) -> Result<usize, MemoryError>;
}

const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(15);

pub struct MemoryStore {
    embedder: Arc<dyn Embedder>,
    backend: Arc<dyn MemoryBackend>,
    embed_timeout: Duration,
    dimensions: Option<usize>,
}

impl MemoryStore {
    pub fn new(embedder: Arc<dyn Embedder>, backend: Arc<dyn MemoryBackend>) -> Self {
        Self {
            embedder,
            backend,
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
            dimensions: None,
        }
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    /// Reject embeddings whose length differs from `dimensions`.
    pub fn with_dimensions(mut self, dimensions: Option<usize>) -> Self {
        self.dimensions = dimensions;
        self
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let vector = tokio::time::timeout(self.embed_timeout, self.embedder.embed(text))
            .await
            .unwrap_or(Err(CollaboratorError::Timeout(self.embed_timeout)))
            .map_err(|e| MemoryError::EmbeddingFailure(e.to_string()))?;

        if vector.is_empty() {
            return Err(MemoryError::EmbeddingFailure("empty embedding vector".into()));
        }
        if let Some(expected) = self.dimensions {
            if vector.len() != expected {
                return Err(MemoryError::EmbeddingFailure(format!(
                    "expected {expected} dimensions, got {}",
                    vector.len()
                )));
            }
        }
        Ok(vector)
    }

    /// Embed and persist `content`. Not deduplicated: storing the same text
    /// twice creates two records. Metadata without an importance gets
    /// [`DEFAULT_IMPORTANCE`].
    pub async fn store(
        &self,
        scope: Scope,
        content: &str,
        mut metadata: Map<String, Value>,
    ) -> Result<Uuid, MemoryError> {
        if content.trim().is_empty() {
            return Err(MemoryError::EmptyContent);
        }
        metadata
            .entry(IMPORTANCE_KEY)
            .or_insert_with(|| Value::from(DEFAULT_IMPORTANCE));

        let embedding = self.embed(content).await?;
        let record = MemoryRecord {
            id: Uuid::new_v4(),
            scope,
            content: content.to_string(),
            embedding,
            metadata,
            created_at: Utc::now(),
        };
        self.backend.insert(&record)?;

        info!("Stored memory {} in {scope} ({} chars)", record.id, content.len());
        Ok(record.id)
    }

    /// Top `k` records of `scope` most similar to `query`, best first. Equal
    /// scores are ordered newest first.
    pub async fn search(
        &self,
        scope: Scope,
        query: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredRecord>, MemoryError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embed(query).await?;
        let candidates = self.backend.candidates(&scope, filters)?;
        ensure_scope(scope, &candidates)?;

        let mut scored: Vec<ScoredRecord> = candidates
            .into_iter()
            .map(|record| ScoredRecord {
                score: cosine_similarity(&query_vector, &record.embedding),
                record,
            })
            .filter(|s| filters.min_score.map_or(true, |min| s.score >= min))
            .collect();

        scored.sort_by(rank);
        scored.truncate(k);

        debug!("Memory search in {scope}: {} results", scored.len());
        Ok(scored)
    }

    /// Records of `scope` newest first, without ranking. Only the metadata
    /// part of `filters` applies.
    pub fn list(
        &self,
        scope: Scope,
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let records = self.backend.list(&scope, filters, limit, offset)?;
        ensure_scope(scope, &records)?;
        debug!("Memory list in {scope}: {} records", records.len());
        Ok(records)
    }

    /// The record with `id`, if it exists and belongs to `scope`.
    pub fn get(&self, scope: Scope, id: Uuid) -> Result<Option<MemoryRecord>, MemoryError> {
        match self.backend.get(id)? {
            Some(record) if record.scope == scope => Ok(Some(record)),
            Some(record) => {
                debug!("Memory {id} is in {}, not {scope}", record.scope);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn count(&self, scope: &Scope) -> Result<usize, MemoryError> {
        self.backend.count(scope)
    }
}

fn ensure_scope(scope: Scope, records: &[MemoryRecord]) -> Result<(), MemoryError> {
    match records.iter().find(|r| r.scope != scope) {
        Some(stray) => {
            warn!(
                "Memory backend returned record {} from {} for a read in {scope}",
                stray.id, stray.scope
            );
            Err(MemoryError::ScopeViolation {
                record_id: stray.id,
                expected: scope,
                found: stray.scope,
            })
        }
        None => Ok(()),
    }
}

/// Score descending, then newest first, then id for a total order.
fn rank(a: &ScoredRecord, b: &ScoredRecord) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.record.created_at.cmp(&a.record.created_at))
        .then_with(|| a.record.id.cmp(&b.record.id))
}

/// Cosine similarity in [-1, 1]. Zero for empty, mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}
