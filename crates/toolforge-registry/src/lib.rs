//! Versioned tool registry.
//!
//! Content-addressed manifest storage with lineage tracking, trust levels,
//! and semantic discovery:
//!
//! 1. **Durable manifests**: one record per `(tool_id, version)`, stored
//!    through a pluggable [`ManifestStore`]; unknown fields round-trip.
//! 2. **Semantic search**: manifests are embedded over their name,
//!    description, and capability summaries and retrieved by cosine
//!    similarity with metadata filters.
//! 3. **Trust-aware ranking**: query results are enriched with current
//!    (temporally decayed) consensus weights and sorted by them.
//! 4. **Invariants**: manifest identity forgeries, lineage cycles, and
//!    out-of-band trust transitions are rejected at registration.

pub mod constraint;
pub mod embed;
pub mod registry;
pub mod store;
pub mod vector;

pub use constraint::QueryConstraints;
pub use embed::{cosine_similarity, Embedder, HashEmbedder};
pub use registry::{QueryHit, QueryResult, Registry, VersionSpec, UNSCORED_WEIGHT};
pub use store::{FilesystemManifestStore, InMemoryManifestStore, ManifestStore};
pub use vector::{InMemoryVectorStore, VectorFilter, VectorMatch, VectorPayload, VectorStore};
