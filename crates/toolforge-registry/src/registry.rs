//! The versioned tool registry.
//!
//! Combines the manifest store (durability) and the vector store (semantic
//! search) behind one interface:
//!
//! - `register` persists a manifest, enforcing identity and lineage
//!   invariants, recomputing the embedding when the searchable text changed,
//!   and maintaining the tags and lineage indexes
//! - `get` / `get_by_spec` resolve versions, including the `latest`, `best`,
//!   `stable`, and minor-line expressions
//! - `query` discovers tools by capability with constraint filtering and
//!   consensus-weight ranking
//! - consensus records are appended through the registry and never rewritten
//!
//! The registry exclusively owns manifest records; writes to one
//! `(tool_id, version)` are serialized through a keyed lock.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use toolforge::{
    ConsensusConfig, ConsensusScore, ExecutionSample, ForgeError, MetricsSnapshot, Result,
    ToolManifest, ToolType, TrustLevel,
};

use crate::constraint::QueryConstraints;
use crate::embed::Embedder;
use crate::store::ManifestStore;
use crate::vector::{VectorFilter, VectorPayload, VectorStore};

/// Default consensus weight for tools that have never been scored.
pub const UNSCORED_WEIGHT: f64 = 0.5;

/// Key prefix for consensus artifacts in the manifest store.
const CONSENSUS_PREFIX: &str = "consensus";

/// Store key for the regenerable tags index.
const TAGS_INDEX_KEY: &str = "tags_index";

/// A version expression accepted by lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    /// Exact `M.m.p` (single match).
    Exact(semver::Version),
    /// `M.m` - highest patch in that minor line.
    MinorLine { major: u64, minor: u64 },
    /// Highest semver among active versions.
    Latest,
    /// Highest current consensus weight.
    Best,
    /// Highest semver with no pre-release tag.
    Stable,
}

impl std::str::FromStr for VersionSpec {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "latest" => return Ok(VersionSpec::Latest),
            "best" => return Ok(VersionSpec::Best),
            "stable" => return Ok(VersionSpec::Stable),
            _ => {}
        }

        if let Ok(version) = semver::Version::parse(s) {
            return Ok(VersionSpec::Exact(version));
        }

        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() == 2 {
            if let (Ok(major), Ok(minor)) = (parts[0].parse(), parts[1].parse()) {
                return Ok(VersionSpec::MinorLine { major, minor });
            }
        }

        Err(ForgeError::InvalidVersion(s.to_string()))
    }
}

/// One ranked discovery result.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryHit {
    /// Tool identifier.
    pub tool_id: String,
    /// Resolved version.
    pub version: String,
    /// Display name.
    pub name: String,
    /// Current (decayed) consensus weight.
    pub weight: f64,
    /// Trust level.
    pub trust_level: TrustLevel,
    /// Latest metrics snapshot.
    pub metrics: MetricsSnapshot,
}

/// Discovery result: the best match plus ranked alternatives.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueryResult {
    /// Highest-weighted match, when any candidate survived filtering.
    pub best: Option<QueryHit>,
    /// Remaining matches, weight-descending.
    pub alternatives: Vec<QueryHit>,
}

/// The versioned tool registry.
pub struct Registry {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    store: Arc<dyn ManifestStore>,
    consensus_config: ConsensusConfig,

    /// Manifest cache, keyed `tool_id:version`.
    manifests: RwLock<HashMap<String, ToolManifest>>,
    /// Latest consensus record per `tool_id:version`.
    consensus: RwLock<HashMap<String, ConsensusScore>>,
    /// tag -> manifest keys. Regenerable from manifests.
    tags_index: RwLock<BTreeMap<String, BTreeSet<String>>>,
    /// ancestor tool_id -> descendant tool_ids (lineage back-references).
    lineage_children: RwLock<BTreeMap<String, BTreeSet<String>>>,
    /// Per-manifest write locks, keyed `tool_id:version`.
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Registry {
    /// Create a registry over the given backends.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        store: Arc<dyn ManifestStore>,
        consensus_config: ConsensusConfig,
    ) -> Self {
        Self {
            embedder,
            vectors,
            store,
            consensus_config,
            manifests: RwLock::new(HashMap::new()),
            consensus: RwLock::new(HashMap::new()),
            tags_index: RwLock::new(BTreeMap::new()),
            lineage_children: RwLock::new(BTreeMap::new()),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Open a registry and warm its caches and indexes from the store.
    pub async fn open(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        store: Arc<dyn ManifestStore>,
        consensus_config: ConsensusConfig,
    ) -> Result<Self> {
        let registry = Self::new(embedder, vectors, store, consensus_config);
        registry.rebuild_indexes().await?;
        Ok(registry)
    }

    fn manifest_store_key(tool_id: &str, version: &str) -> String {
        format!("{tool_id}_v{version}")
    }

    async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().await;
        locks.entry(key.to_string()).or_default().clone()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a manifest.
    ///
    /// Fails with an invariant violation when the `(tool_id, version)` pair
    /// already exists with a different origin author or ancestor (forgery),
    /// when the lineage would contain a cycle, or when the trust level
    /// changed relative to the stored copy (trust transitions go through
    /// [`Registry::reregister_after_validation`]).
    pub async fn register(&self, manifest: ToolManifest) -> Result<()> {
        self.register_inner(manifest, false).await
    }

    /// Re-register a manifest whose trust state was rewritten by a
    /// validation run or a recorded policy action.
    pub async fn reregister_after_validation(&self, manifest: ToolManifest) -> Result<()> {
        self.register_inner(manifest, true).await
    }

    async fn register_inner(&self, mut manifest: ToolManifest, trust_transition: bool) -> Result<()> {
        manifest.validate()?;

        let key = manifest.key();
        let lock = self.lock_for(&key).await;
        let _guard = lock.lock().await;

        let existing = self.load_manifest(&manifest.tool_id, &manifest.version.to_string()).await?;
        if let Some(existing) = &existing {
            // Manifest identity: same pair must agree on author and ancestor.
            if existing.origin.author != manifest.origin.author {
                return Err(ForgeError::InvariantViolation(format!(
                    "manifest {key} already registered by {}; refusing author {}",
                    existing.origin.author, manifest.origin.author
                )));
            }
            if existing.lineage.ancestor_tool_id != manifest.lineage.ancestor_tool_id {
                return Err(ForgeError::InvariantViolation(format!(
                    "manifest {key} lineage ancestor mismatch"
                )));
            }
            // Trust monotonicity: level changes only via validation.
            if !trust_transition && existing.trust.level != manifest.trust.level {
                return Err(ForgeError::InvariantViolation(format!(
                    "trust level of {key} may only change through validation"
                )));
            }
        }

        self.check_lineage_acyclic(&manifest).await?;

        // Recompute the embedding when the searchable text changed (or was
        // never computed); otherwise keep the stored one.
        let text = manifest.searchable_text();
        let reuse = existing
            .as_ref()
            .filter(|e| e.searchable_text() == text)
            .and_then(|e| e.embedding.clone());
        manifest.embedding = match reuse {
            Some(embedding) => Some(embedding),
            None => Some(self.embedder.embed(&text).await?),
        };

        // Persist before returning success.
        let store_key = Self::manifest_store_key(&manifest.tool_id, &manifest.version.to_string());
        let bytes = serde_json::to_vec_pretty(&manifest)?;
        self.store.put(&store_key, &bytes).await?;

        // Index by embedding with tag/trust/type payload.
        if let Some(embedding) = &manifest.embedding {
            self.vectors
                .upsert(&key, embedding.clone(), VectorPayload::from(&manifest))
                .await?;
        }

        self.index_tags(&manifest).await;
        if let Some(ancestor) = &manifest.lineage.ancestor_tool_id {
            self.lineage_children
                .write()
                .await
                .entry(ancestor.clone())
                .or_default()
                .insert(manifest.tool_id.clone());
        }
        self.persist_tags_index().await?;

        tracing::info!(
            tool_id = %manifest.tool_id,
            version = %manifest.version,
            trust = %manifest.trust.level,
            "registered tool manifest"
        );

        self.manifests.write().await.insert(key, manifest);
        Ok(())
    }

    /// Walk the ancestor chain and reject cycles. Each hop resolves the
    /// ancestor's latest manifest; a missing ancestor ends the walk.
    async fn check_lineage_acyclic(&self, manifest: &ToolManifest) -> Result<()> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(manifest.tool_id.clone());

        let mut current = manifest.lineage.ancestor_tool_id.clone();
        while let Some(ancestor_id) = current {
            if !visited.insert(ancestor_id.clone()) {
                return Err(ForgeError::InvariantViolation(format!(
                    "lineage cycle through {ancestor_id} for tool {}",
                    manifest.tool_id
                )));
            }
            current = match self.get(&ancestor_id, None).await? {
                Some(ancestor) => ancestor.lineage.ancestor_tool_id,
                None => None,
            };
        }
        Ok(())
    }

    async fn index_tags(&self, manifest: &ToolManifest) {
        let key = manifest.key();
        let mut index = self.tags_index.write().await;
        // Drop stale entries for this manifest first.
        for members in index.values_mut() {
            members.remove(&key);
        }
        index.retain(|_, members| !members.is_empty());
        for tag in &manifest.tags {
            index.entry(tag.clone()).or_default().insert(key.clone());
        }
    }

    async fn persist_tags_index(&self) -> Result<()> {
        let index = self.tags_index.read().await;
        let bytes = serde_json::to_vec_pretty(&*index)?;
        self.store.put(TAGS_INDEX_KEY, &bytes).await
    }

    /// Rebuild the caches, the tags index, and the lineage back-references
    /// from the manifest store.
    pub async fn rebuild_indexes(&self) -> Result<()> {
        let keys = self.store.list("").await?;
        for key in keys {
            if key.starts_with(CONSENSUS_PREFIX) || key == TAGS_INDEX_KEY {
                continue;
            }
            let Some(bytes) = self.store.get(&key).await? else {
                continue;
            };
            let manifest: ToolManifest = match serde_json::from_slice(&bytes) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping unreadable manifest");
                    continue;
                }
            };

            if let Some(embedding) = &manifest.embedding {
                self.vectors
                    .upsert(&manifest.key(), embedding.clone(), VectorPayload::from(&manifest))
                    .await?;
            }
            self.index_tags(&manifest).await;
            if let Some(ancestor) = &manifest.lineage.ancestor_tool_id {
                self.lineage_children
                    .write()
                    .await
                    .entry(ancestor.clone())
                    .or_default()
                    .insert(manifest.tool_id.clone());
            }
            self.manifests.write().await.insert(manifest.key(), manifest);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    async fn load_manifest(&self, tool_id: &str, version: &str) -> Result<Option<ToolManifest>> {
        let key = format!("{tool_id}:{version}");
        if let Some(manifest) = self.manifests.read().await.get(&key) {
            return Ok(Some(manifest.clone()));
        }

        let store_key = Self::manifest_store_key(tool_id, version);
        match self.store.get(&store_key).await? {
            Some(bytes) => {
                let manifest: ToolManifest = serde_json::from_slice(&bytes)?;
                self.manifests.write().await.insert(key, manifest.clone());
                Ok(Some(manifest))
            }
            None => Ok(None),
        }
    }

    /// All versions of a tool, cached, any status.
    pub async fn versions_of(&self, tool_id: &str) -> Result<Vec<ToolManifest>> {
        let prefix = format!("{tool_id}_v");
        let keys = self.store.list(&prefix).await?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(version) = key.strip_prefix(&prefix) else {
                continue;
            };
            if let Some(manifest) = self.load_manifest(tool_id, version).await? {
                // `list` is prefix-based, so summarize_pdf_v... also matches
                // summarize_pdf_extended_v...; keep exact tool ids only.
                if manifest.tool_id == tool_id {
                    out.push(manifest);
                }
            }
        }
        out.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(out)
    }

    /// Get a manifest. With `version = None`, returns the highest semver
    /// among active versions, ties resolved by latest creation time.
    pub async fn get(
        &self,
        tool_id: &str,
        version: Option<&semver::Version>,
    ) -> Result<Option<ToolManifest>> {
        match version {
            Some(version) => self.load_manifest(tool_id, &version.to_string()).await,
            None => {
                let versions = self.versions_of(tool_id).await?;
                Ok(versions
                    .into_iter()
                    .filter(|m| m.active)
                    .max_by(|a, b| {
                        a.version
                            .cmp(&b.version)
                            .then(a.origin.created_at.cmp(&b.origin.created_at))
                    }))
            }
        }
    }

    /// Resolve a version expression against a tool's registered versions.
    pub async fn get_by_spec(&self, tool_id: &str, spec: &VersionSpec) -> Result<Option<ToolManifest>> {
        match spec {
            VersionSpec::Exact(version) => self.get(tool_id, Some(version)).await,
            VersionSpec::Latest => self.get(tool_id, None).await,
            VersionSpec::MinorLine { major, minor } => {
                let versions = self.versions_of(tool_id).await?;
                Ok(versions
                    .into_iter()
                    .filter(|m| {
                        m.active && m.version.major == *major && m.version.minor == *minor
                    })
                    .max_by(|a, b| a.version.cmp(&b.version)))
            }
            VersionSpec::Stable => {
                let versions = self.versions_of(tool_id).await?;
                Ok(versions
                    .into_iter()
                    .filter(|m| m.active && m.version.pre.is_empty())
                    .max_by(|a, b| a.version.cmp(&b.version)))
            }
            VersionSpec::Best => {
                let versions = self.versions_of(tool_id).await?;
                let mut best: Option<(f64, ToolManifest)> = None;
                for manifest in versions.into_iter().filter(|m| m.active) {
                    let weight = self
                        .current_weight(&manifest.tool_id, &manifest.version.to_string())
                        .await;
                    match &best {
                        Some((best_weight, _)) if *best_weight >= weight => {}
                        _ => best = Some((weight, manifest)),
                    }
                }
                Ok(best.map(|(_, manifest)| manifest))
            }
        }
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// Query tools by capability with constraint filtering.
    ///
    /// Retrieves `2 * limit` candidates from the vector store, filters by
    /// constraints, enriches with current consensus weights, and returns the
    /// best match plus up to `limit - 1` alternatives. Never fails: an empty
    /// result is `{None, []}`.
    pub async fn query(
        &self,
        capability: &str,
        constraints: Option<&QueryConstraints>,
        context_tags: &[String],
        limit: usize,
    ) -> QueryResult {
        match self.try_query(capability, constraints, context_tags, limit).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(capability, error = %e, "query failed; returning empty result");
                QueryResult::default()
            }
        }
    }

    async fn try_query(
        &self,
        capability: &str,
        constraints: Option<&QueryConstraints>,
        context_tags: &[String],
        limit: usize,
    ) -> Result<QueryResult> {
        let limit = limit.max(1);

        let mut search_text = format!("capability: {capability}");
        if !context_tags.is_empty() {
            search_text.push_str(&format!(" tags: {}", context_tags.join(" ")));
        }
        let query_vector = self.embedder.embed(&search_text).await?;

        let filter = VectorFilter {
            active_only: true,
            ..Default::default()
        };
        let hits = self
            .vectors
            .search(&query_vector, &filter, limit * 2, 0.0)
            .await?;

        let mut ranked: Vec<QueryHit> = Vec::new();
        for hit in hits {
            let Some(manifest) = self
                .load_manifest(&hit.payload.tool_id, &hit.payload.version)
                .await?
            else {
                continue;
            };

            if let Some(constraints) = constraints {
                if !constraints.accepts(&manifest) {
                    continue;
                }
            }

            let weight = self
                .current_weight(&manifest.tool_id, &manifest.version.to_string())
                .await;

            ranked.push(QueryHit {
                tool_id: manifest.tool_id.clone(),
                version: manifest.version.to_string(),
                name: manifest.name.clone(),
                weight,
                trust_level: manifest.trust.level,
                metrics: manifest.metrics.latest.clone(),
            });
        }

        ranked.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(limit);

        let mut iter = ranked.into_iter();
        Ok(QueryResult {
            best: iter.next(),
            alternatives: iter.collect(),
        })
    }

    /// List tools filtered by trust level, type, and tags.
    pub async fn list(
        &self,
        trust_level: Option<TrustLevel>,
        tool_type: Option<&ToolType>,
        tags: &[String],
    ) -> Result<Vec<ToolManifest>> {
        // Ensure the cache has seen everything on disk.
        self.rebuild_indexes().await?;

        let manifests = self.manifests.read().await;
        let mut out: Vec<ToolManifest> = manifests
            .values()
            .filter(|m| m.active)
            .filter(|m| trust_level.map_or(true, |t| m.trust.level == t))
            .filter(|m| tool_type.map_or(true, |t| &m.tool_type == t))
            .filter(|m| tags.iter().all(|tag| m.has_tag(tag)))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.tool_id.cmp(&b.tool_id).then(a.version.cmp(&b.version)));
        Ok(out)
    }

    /// Tool ids whose lineage points at `tool_id`.
    pub async fn descendants_of(&self, tool_id: &str) -> Vec<String> {
        self.lineage_children
            .read()
            .await
            .get(tool_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Metrics and consensus records
    // ------------------------------------------------------------------

    /// Append an execution sample to a manifest's bounded window and refresh
    /// its latest aggregates. Serialized per manifest.
    pub async fn record_execution_sample(
        &self,
        tool_id: &str,
        version: &str,
        sample: ExecutionSample,
    ) -> Result<ToolManifest> {
        let key = format!("{tool_id}:{version}");
        let lock = self.lock_for(&key).await;
        let _guard = lock.lock().await;

        let mut manifest = self
            .load_manifest(tool_id, version)
            .await?
            .ok_or_else(|| ForgeError::VersionNotFound {
                tool_id: tool_id.to_string(),
                version: version.to_string(),
            })?;

        manifest.metrics.record(sample);

        let store_key = Self::manifest_store_key(tool_id, version);
        let bytes = serde_json::to_vec_pretty(&manifest)?;
        self.store.put(&store_key, &bytes).await?;
        self.manifests.write().await.insert(key, manifest.clone());
        Ok(manifest)
    }

    /// Update the correctness field of a manifest's latest metrics after a
    /// validation run. Serialized per manifest.
    pub async fn update_correctness(&self, tool_id: &str, version: &str, correctness: f64) -> Result<()> {
        let key = format!("{tool_id}:{version}");
        let lock = self.lock_for(&key).await;
        let _guard = lock.lock().await;

        let mut manifest = self
            .load_manifest(tool_id, version)
            .await?
            .ok_or_else(|| ForgeError::VersionNotFound {
                tool_id: tool_id.to_string(),
                version: version.to_string(),
            })?;
        manifest.metrics.latest.correctness = Some(correctness.clamp(0.0, 1.0));

        let store_key = Self::manifest_store_key(tool_id, version);
        let bytes = serde_json::to_vec_pretty(&manifest)?;
        self.store.put(&store_key, &bytes).await?;
        self.manifests.write().await.insert(key, manifest);
        Ok(())
    }

    /// Archive or reactivate a version. Manifests are never deleted;
    /// archival is a status change. Serialized per manifest.
    pub async fn set_active(&self, tool_id: &str, version: &str, active: bool) -> Result<()> {
        let key = format!("{tool_id}:{version}");
        let lock = self.lock_for(&key).await;
        let _guard = lock.lock().await;

        let mut manifest = self
            .load_manifest(tool_id, version)
            .await?
            .ok_or_else(|| ForgeError::VersionNotFound {
                tool_id: tool_id.to_string(),
                version: version.to_string(),
            })?;
        if manifest.active == active {
            return Ok(());
        }
        manifest.active = active;

        let store_key = Self::manifest_store_key(tool_id, version);
        let bytes = serde_json::to_vec_pretty(&manifest)?;
        self.store.put(&store_key, &bytes).await?;
        if let Some(embedding) = &manifest.embedding {
            self.vectors
                .upsert(&manifest.key(), embedding.clone(), VectorPayload::from(&manifest))
                .await?;
        }
        tracing::info!(tool_id, version, active, "manifest activity changed");
        self.manifests.write().await.insert(key, manifest);
        Ok(())
    }

    /// Append an immutable consensus record, tagged `consensus`, `forge`,
    /// and the tool id. Records per `(tool_id, version)` must be strictly
    /// monotonic by timestamp.
    pub async fn store_consensus(&self, score: &ConsensusScore) -> Result<()> {
        let key = format!("{}:{}", score.tool_id, score.version);

        {
            let consensus = self.consensus.read().await;
            if let Some(last) = consensus.get(&key) {
                if score.timestamp <= last.timestamp {
                    return Err(ForgeError::InvariantViolation(format!(
                        "consensus records for {key} must be strictly monotonic by timestamp"
                    )));
                }
            }
        }

        let body = serde_json::json!({
            "artifact_type": "consensus",
            "tags": [CONSENSUS_PREFIX, "forge", score.tool_id],
            "record": score,
        });
        let bytes = serde_json::to_vec_pretty(&body)?;
        let digest = toolforge::hash::sha256_hex(&bytes);
        let store_key = format!(
            "{CONSENSUS_PREFIX}/{}_v{}/{}_{}",
            score.tool_id,
            score.version,
            score.timestamp.timestamp_micros(),
            &digest[..8]
        );
        self.store.put(&store_key, &bytes).await?;

        tracing::debug!(
            tool_id = %score.tool_id,
            version = %score.version,
            weight = score.weight,
            "stored consensus record"
        );
        self.consensus.write().await.insert(key, score.clone());
        Ok(())
    }

    /// Latest consensus record for a tool version, loading from the store on
    /// cache miss.
    pub async fn latest_consensus(&self, tool_id: &str, version: &str) -> Option<ConsensusScore> {
        let key = format!("{tool_id}:{version}");
        if let Some(score) = self.consensus.read().await.get(&key) {
            return Some(score.clone());
        }

        let prefix = format!("{CONSENSUS_PREFIX}/{tool_id}_v{version}/");
        let keys = self.store.list(&prefix).await.ok()?;
        let last_key = keys.into_iter().max()?;
        let bytes = self.store.get(&last_key).await.ok()??;
        let body: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
        let score: ConsensusScore = serde_json::from_value(body.get("record")?.clone()).ok()?;
        self.consensus.write().await.insert(key, score.clone());
        Some(score)
    }

    /// Current consensus weight with temporal decay applied at read time.
    /// Unscored tools get [`UNSCORED_WEIGHT`].
    pub async fn current_weight(&self, tool_id: &str, version: &str) -> f64 {
        match self.latest_consensus(tool_id, version).await {
            Some(score) => {
                let days = score.age_days(Utc::now());
                let decay = (-self.consensus_config.decay_factor * days
                    / self.consensus_config.decay_window_days)
                    .exp();
                score.weight * decay
            }
            None => UNSCORED_WEIGHT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;
    use crate::store::InMemoryManifestStore;
    use crate::vector::InMemoryVectorStore;
    use std::collections::BTreeMap as ScoreMap;
    use toolforge::{CapabilitySpec, Dimension, Origin};

    fn registry() -> Registry {
        Registry::new(
            Arc::new(HashEmbedder::default()),
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(InMemoryManifestStore::new()),
            ConsensusConfig::default(),
        )
    }

    fn manifest(tool_id: &str, version: &str, description: &str) -> ToolManifest {
        ToolManifest::builder()
            .tool_id(tool_id)
            .version(version)
            .name(tool_id.replace('_', " "))
            .description(description)
            .origin(Origin::external("alice"))
            .capability(CapabilitySpec::new(tool_id))
            .tag("forge")
            .build()
            .unwrap()
    }

    fn score_record(tool_id: &str, version: &str, weight: f64) -> ConsensusScore {
        ConsensusScore {
            tool_id: tool_id.into(),
            version: version.into(),
            scores: ScoreMap::from([(Dimension::Correctness, weight)]),
            weight,
            evaluators: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = registry();
        registry
            .register(manifest("summarize_pdf", "1.0.0", "summarizes pdfs"))
            .await
            .unwrap();

        let found = registry.get("summarize_pdf", None).await.unwrap().unwrap();
        assert_eq!(found.version.to_string(), "1.0.0");
        assert!(found.embedding.is_some());
    }

    #[tokio::test]
    async fn test_register_idempotent_embedding() {
        let registry = registry();
        let m = manifest("summarize_pdf", "1.0.0", "summarizes pdfs");
        registry.register(m.clone()).await.unwrap();
        let first = registry
            .get("summarize_pdf", None)
            .await
            .unwrap()
            .unwrap()
            .embedding;

        registry.register(m).await.unwrap();
        let second = registry
            .get("summarize_pdf", None)
            .await
            .unwrap()
            .unwrap()
            .embedding;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_identity_forgery_rejected() {
        let registry = registry();
        registry
            .register(manifest("summarize_pdf", "1.0.0", "summarizes pdfs"))
            .await
            .unwrap();

        let mut forged = manifest("summarize_pdf", "1.0.0", "summarizes pdfs");
        forged.origin.author = "mallory".into();
        let result = registry.register(forged).await;
        assert!(matches!(result, Err(ForgeError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn test_lineage_cycle_rejected() {
        let registry = registry();

        let mut a = manifest("tool_a", "1.0.0", "a");
        a.lineage.ancestor_tool_id = Some("tool_b".into());
        registry.register(a).await.unwrap();

        let mut b = manifest("tool_b", "1.0.0", "b");
        b.lineage.ancestor_tool_id = Some("tool_a".into());
        let result = registry.register(b).await;
        assert!(matches!(result, Err(ForgeError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn test_trust_change_outside_validation_rejected() {
        let registry = registry();
        registry
            .register(manifest("summarize_pdf", "1.0.0", "summarizes pdfs"))
            .await
            .unwrap();

        let mut upgraded = manifest("summarize_pdf", "1.0.0", "summarizes pdfs");
        upgraded.trust.level = TrustLevel::Core;
        assert!(matches!(
            registry.register(upgraded.clone()).await,
            Err(ForgeError::InvariantViolation(_))
        ));
        // The validation path is allowed to transition.
        registry.reregister_after_validation(upgraded).await.unwrap();
        let found = registry.get("summarize_pdf", None).await.unwrap().unwrap();
        assert_eq!(found.trust.level, TrustLevel::Core);
    }

    #[tokio::test]
    async fn test_latest_resolution() {
        let registry = registry();
        registry
            .register(manifest("parse_cron", "1.0.0", "parses cron"))
            .await
            .unwrap();
        registry
            .register(manifest("parse_cron", "1.2.0", "parses cron"))
            .await
            .unwrap();
        registry
            .register(manifest("parse_cron", "1.10.1", "parses cron"))
            .await
            .unwrap();

        let latest = registry.get("parse_cron", None).await.unwrap().unwrap();
        // Semver ordering, not lexicographic.
        assert_eq!(latest.version.to_string(), "1.10.1");
    }

    #[tokio::test]
    async fn test_version_spec_resolution() {
        let registry = registry();
        for v in ["1.0.0", "1.0.5", "1.1.0", "2.0.0-beta.1"] {
            registry.register(manifest("parse_cron", v, "parses cron")).await.unwrap();
        }

        let spec: VersionSpec = "1.0".parse().unwrap();
        let hit = registry.get_by_spec("parse_cron", &spec).await.unwrap().unwrap();
        assert_eq!(hit.version.to_string(), "1.0.5");

        let hit = registry
            .get_by_spec("parse_cron", &VersionSpec::Stable)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.version.to_string(), "1.1.0");

        let hit = registry
            .get_by_spec("parse_cron", &VersionSpec::Latest)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.version.to_string(), "2.0.0-beta.1");

        let spec: VersionSpec = "1.0.5".parse().unwrap();
        let hit = registry.get_by_spec("parse_cron", &spec).await.unwrap().unwrap();
        assert_eq!(hit.version.to_string(), "1.0.5");
    }

    #[tokio::test]
    async fn test_best_resolution_uses_weight() {
        let registry = registry();
        registry.register(manifest("parse_cron", "1.0.0", "parses cron")).await.unwrap();
        registry.register(manifest("parse_cron", "2.0.0", "parses cron")).await.unwrap();

        registry
            .store_consensus(&score_record("parse_cron", "1.0.0", 0.9))
            .await
            .unwrap();
        registry
            .store_consensus(&score_record("parse_cron", "2.0.0", 0.4))
            .await
            .unwrap();

        let hit = registry
            .get_by_spec("parse_cron", &VersionSpec::Best)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.version.to_string(), "1.0.0");
    }

    #[tokio::test]
    async fn test_version_spec_parse_errors() {
        assert!("not-a-version".parse::<VersionSpec>().is_err());
        assert!(matches!("latest".parse::<VersionSpec>(), Ok(VersionSpec::Latest)));
        assert!(matches!(
            "1.2".parse::<VersionSpec>(),
            Ok(VersionSpec::MinorLine { major: 1, minor: 2 })
        ));
    }

    #[tokio::test]
    async fn test_query_ranks_by_weight() {
        let registry = registry();
        registry
            .register(manifest("summarize_pdf", "1.0.0", "summarize pdf documents"))
            .await
            .unwrap();
        registry
            .register(manifest("summarize_pdf", "2.0.0", "summarize pdf documents"))
            .await
            .unwrap();

        registry
            .store_consensus(&score_record("summarize_pdf", "1.0.0", 0.81))
            .await
            .unwrap();
        registry
            .store_consensus(&score_record("summarize_pdf", "2.0.0", 0.72))
            .await
            .unwrap();

        let result = registry.query("summarize_pdf", None, &[], 5).await;
        let best = result.best.unwrap();
        assert_eq!(best.version, "1.0.0");
        assert!(best.weight > 0.7);
        assert_eq!(result.alternatives.len(), 1);
        assert_eq!(result.alternatives[0].version, "2.0.0");
    }

    #[tokio::test]
    async fn test_query_never_fails() {
        let registry = registry();
        let result = registry.query("anything", None, &[], 5).await;
        assert!(result.best.is_none());
        assert!(result.alternatives.is_empty());
    }

    #[tokio::test]
    async fn test_query_applies_constraints() {
        let registry = registry();
        registry
            .register(manifest("summarize_pdf", "1.0.0", "summarize pdf documents"))
            .await
            .unwrap();
        registry
            .record_execution_sample("summarize_pdf", "1.0.0", ExecutionSample::new(900.0, true))
            .await
            .unwrap();

        let constraints = QueryConstraints {
            latency_ms_p95: Some(500.0),
            ..Default::default()
        };
        let result = registry
            .query("summarize_pdf", Some(&constraints), &[], 5)
            .await;
        assert!(result.best.is_none());
    }

    #[tokio::test]
    async fn test_consensus_monotonicity() {
        let registry = registry();
        registry.register(manifest("t", "1.0.0", "d")).await.unwrap();

        let mut first = score_record("t", "1.0.0", 0.5);
        first.timestamp = Utc::now();
        registry.store_consensus(&first).await.unwrap();

        let mut stale = score_record("t", "1.0.0", 0.6);
        stale.timestamp = first.timestamp - chrono::Duration::seconds(1);
        assert!(matches!(
            registry.store_consensus(&stale).await,
            Err(ForgeError::InvariantViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_decay_applied_at_read() {
        let registry = registry();
        registry.register(manifest("t", "1.0.0", "d")).await.unwrap();

        let mut score = score_record("t", "1.0.0", 0.8);
        score.timestamp = Utc::now() - chrono::Duration::days(30);
        registry.store_consensus(&score).await.unwrap();

        let weight = registry.current_weight("t", "1.0.0").await;
        let expected = 0.8 * (-0.1f64).exp();
        assert!((weight - expected).abs() < 1e-3, "weight={weight} expected={expected}");
    }

    #[tokio::test]
    async fn test_list_filters() {
        let registry = registry();
        registry.register(manifest("a_tool", "1.0.0", "a")).await.unwrap();
        let mut b = manifest("b_tool", "1.0.0", "b");
        b.tags.push("finance".into());
        registry.register(b).await.unwrap();

        let all = registry.list(None, None, &[]).await.unwrap();
        assert_eq!(all.len(), 2);

        let finance = registry
            .list(None, None, &["finance".to_string()])
            .await
            .unwrap();
        assert_eq!(finance.len(), 1);
        assert_eq!(finance[0].tool_id, "b_tool");

        let core = registry.list(Some(TrustLevel::Core), None, &[]).await.unwrap();
        assert!(core.is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_from_store() {
        let store = Arc::new(InMemoryManifestStore::new());
        {
            let registry = Registry::new(
                Arc::new(HashEmbedder::default()),
                Arc::new(InMemoryVectorStore::new()),
                store.clone(),
                ConsensusConfig::default(),
            );
            registry
                .register(manifest("summarize_pdf", "1.0.0", "summarize pdf documents"))
                .await
                .unwrap();
        }

        // A fresh registry over the same store finds the manifest again.
        let reopened = Registry::open(
            Arc::new(HashEmbedder::default()),
            Arc::new(InMemoryVectorStore::new()),
            store,
            ConsensusConfig::default(),
        )
        .await
        .unwrap();

        let result = reopened.query("summarize_pdf", None, &[], 5).await;
        assert!(result.best.is_some());
    }

    #[tokio::test]
    async fn test_lineage_back_references() {
        let registry = registry();
        registry.register(manifest("base_tool", "1.0.0", "base")).await.unwrap();

        let mut derived = manifest("derived_tool", "1.0.0", "derived");
        derived.lineage.ancestor_tool_id = Some("base_tool".into());
        registry.register(derived).await.unwrap();

        assert_eq!(registry.descendants_of("base_tool").await, vec!["derived_tool"]);
    }
}
