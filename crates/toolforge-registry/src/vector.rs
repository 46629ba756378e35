//! Vector store for manifest embeddings.
//!
//! The registry indexes every manifest under its `(tool_id, version)` key
//! with a payload used for metadata filtering at search time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

use toolforge::{Result, ToolManifest, ToolType, TrustLevel};

use crate::embed::cosine_similarity;

/// Payload stored with every manifest vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    /// Tool identifier.
    pub tool_id: String,
    /// Version string.
    pub version: String,
    /// Tool type.
    pub tool_type: ToolType,
    /// Trust level at index time.
    pub trust_level: TrustLevel,
    /// Tags at index time.
    pub tags: Vec<String>,
    /// Whether the manifest was active at index time.
    pub active: bool,
}

impl From<&ToolManifest> for VectorPayload {
    fn from(manifest: &ToolManifest) -> Self {
        Self {
            tool_id: manifest.tool_id.clone(),
            version: manifest.version.to_string(),
            tool_type: manifest.tool_type.clone(),
            trust_level: manifest.trust.level,
            tags: manifest.tags.clone(),
            active: manifest.active,
        }
    }
}

/// Metadata filter applied during vector search.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    /// Require all of these tags.
    pub tags: Vec<String>,
    /// Require at least this trust level.
    pub min_trust: Option<TrustLevel>,
    /// Require this tool type.
    pub tool_type: Option<ToolType>,
    /// Only match active manifests.
    pub active_only: bool,
}

impl VectorFilter {
    /// Whether a payload passes this filter.
    pub fn matches(&self, payload: &VectorPayload) -> bool {
        if self.active_only && !payload.active {
            return false;
        }
        if let Some(min_trust) = self.min_trust {
            if payload.trust_level < min_trust {
                return false;
            }
        }
        if let Some(tool_type) = &self.tool_type {
            if &payload.tool_type != tool_type {
                return false;
            }
        }
        self.tags
            .iter()
            .all(|tag| payload.tags.iter().any(|t| t == tag))
    }
}

/// A match from vector search.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    /// Manifest key (`tool_id:version`).
    pub id: String,
    /// Cosine similarity in [-1, 1].
    pub score: f64,
    /// Indexed payload.
    pub payload: VectorPayload,
}

/// Trait for vector database operations.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert a vector with its payload.
    async fn upsert(&self, id: &str, vector: Vec<f32>, payload: VectorPayload) -> Result<()>;

    /// Search for similar vectors, filtered, keeping scores >= `score_threshold`.
    async fn search(
        &self,
        vector: &[f32],
        filter: &VectorFilter,
        top_k: usize,
        score_threshold: f64,
    ) -> Result<Vec<VectorMatch>>;

    /// Delete a vector by id. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool>;
}

struct StoredVector {
    id: String,
    vector: Vec<f32>,
    payload: VectorPayload,
}

/// In-memory vector store.
///
/// The process-wide default backend; an RPC-backed store can be substituted
/// through the [`VectorStore`] trait.
#[derive(Default)]
pub struct InMemoryVectorStore {
    vectors: RwLock<Vec<StoredVector>>,
}

impl InMemoryVectorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.vectors.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, id: &str, vector: Vec<f32>, payload: VectorPayload) -> Result<()> {
        let mut vectors = self.vectors.write().unwrap_or_else(|e| e.into_inner());
        vectors.retain(|v| v.id != id);
        vectors.push(StoredVector {
            id: id.to_string(),
            vector,
            payload,
        });
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        filter: &VectorFilter,
        top_k: usize,
        score_threshold: f64,
    ) -> Result<Vec<VectorMatch>> {
        let vectors = self.vectors.read().unwrap_or_else(|e| e.into_inner());

        let mut matches: Vec<VectorMatch> = vectors
            .iter()
            .filter(|stored| filter.matches(&stored.payload))
            .map(|stored| VectorMatch {
                id: stored.id.clone(),
                score: cosine_similarity(vector, &stored.vector),
                payload: stored.payload.clone(),
            })
            .filter(|m| m.score >= score_threshold)
            .collect();

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut vectors = self.vectors.write().unwrap_or_else(|e| e.into_inner());
        let before = vectors.len();
        vectors.retain(|v| v.id != id);
        Ok(vectors.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(tool_id: &str, trust: TrustLevel, tags: &[&str]) -> VectorPayload {
        VectorPayload {
            tool_id: tool_id.to_string(),
            version: "1.0.0".to_string(),
            tool_type: ToolType::CapabilityServer,
            trust_level: trust,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            active: true,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let store = InMemoryVectorStore::new();
        store
            .upsert("a:1.0.0", vec![1.0, 0.0], payload("a", TrustLevel::Core, &[]))
            .await
            .unwrap();
        store
            .upsert("a:1.0.0", vec![0.0, 1.0], payload("a", TrustLevel::Core, &[]))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_search_sorted_and_truncated() {
        let store = InMemoryVectorStore::new();
        store
            .upsert("a:1.0.0", vec![1.0, 0.0], payload("a", TrustLevel::Core, &[]))
            .await
            .unwrap();
        store
            .upsert("b:1.0.0", vec![0.8, 0.6], payload("b", TrustLevel::Core, &[]))
            .await
            .unwrap();
        store
            .upsert("c:1.0.0", vec![0.0, 1.0], payload("c", TrustLevel::Core, &[]))
            .await
            .unwrap();

        let hits = store
            .search(&[1.0, 0.0], &VectorFilter::default(), 2, 0.0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload.tool_id, "a");
        assert_eq!(hits[1].payload.tool_id, "b");
    }

    #[tokio::test]
    async fn test_filter_by_trust_and_tags() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(
                "a:1.0.0",
                vec![1.0, 0.0],
                payload("a", TrustLevel::Experimental, &["forge"]),
            )
            .await
            .unwrap();
        store
            .upsert(
                "b:1.0.0",
                vec![1.0, 0.0],
                payload("b", TrustLevel::Core, &["forge", "finance"]),
            )
            .await
            .unwrap();

        let filter = VectorFilter {
            tags: vec!["forge".into()],
            min_trust: Some(TrustLevel::ThirdParty),
            ..Default::default()
        };
        let hits = store.search(&[1.0, 0.0], &filter, 10, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.tool_id, "b");
    }

    #[tokio::test]
    async fn test_score_threshold() {
        let store = InMemoryVectorStore::new();
        store
            .upsert("a:1.0.0", vec![1.0, 0.0], payload("a", TrustLevel::Core, &[]))
            .await
            .unwrap();
        store
            .upsert("b:1.0.0", vec![0.0, 1.0], payload("b", TrustLevel::Core, &[]))
            .await
            .unwrap();

        let hits = store
            .search(&[1.0, 0.0], &VectorFilter::default(), 10, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryVectorStore::new();
        store
            .upsert("a:1.0.0", vec![1.0], payload("a", TrustLevel::Core, &[]))
            .await
            .unwrap();
        assert!(store.delete("a:1.0.0").await.unwrap());
        assert!(!store.delete("a:1.0.0").await.unwrap());
    }
}
