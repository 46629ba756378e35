//! Append-only provenance log.
//!
//! One record per call, keyed by `call_id`, written as `{call_id}.json`
//! under the log directory. Records are never rewritten; a second append
//! under the same call id is rejected.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

use toolforge::{CallMetrics, ForgeError, Result, SandboxProfile};

/// Provenance of one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    /// 16-hex call identifier.
    pub call_id: String,
    /// Tool identifier.
    pub tool_id: String,
    /// Tool version string.
    pub version: String,
    /// When dispatch started.
    pub started_at: DateTime<Utc>,
    /// When the call finished.
    pub finished_at: DateTime<Utc>,
    /// SHA-256 over the stable-JSON input.
    pub input_hash: String,
    /// Sandbox profile the call ran under.
    pub sandbox: SandboxProfile,
    /// Whether the call succeeded.
    pub success: bool,
    /// Error kind for failed calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

/// The persisted log entry for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    /// Provenance of the call.
    pub provenance: ProvenanceRecord,
    /// Call metrics.
    pub metrics: CallMetrics,
    /// SHA-256 over the stable-JSON result (or its string form); absent on
    /// failures that produced no result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_hash: Option<String>,
}

/// Append-only provenance storage.
#[async_trait]
pub trait ProvenanceLog: Send + Sync {
    /// Append a record; fails when the call id already exists.
    async fn append(&self, entry: &ProvenanceEntry) -> Result<()>;

    /// Read a record by call id.
    async fn read(&self, call_id: &str) -> Result<Option<ProvenanceEntry>>;
}

/// In-memory log for tests.
#[derive(Default)]
pub struct InMemoryProvenanceLog {
    entries: Mutex<BTreeMap<String, ProvenanceEntry>>,
}

impl InMemoryProvenanceLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded calls.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the log is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ProvenanceLog for InMemoryProvenanceLog {
    async fn append(&self, entry: &ProvenanceEntry) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let call_id = entry.provenance.call_id.clone();
        if entries.contains_key(&call_id) {
            return Err(ForgeError::InvariantViolation(format!(
                "provenance for call {call_id} already recorded"
            )));
        }
        entries.insert(call_id, entry.clone());
        Ok(())
    }

    async fn read(&self, call_id: &str) -> Result<Option<ProvenanceEntry>> {
        Ok(self.entries.lock().await.get(call_id).cloned())
    }
}

/// Filesystem-backed log: `{call_id}.json` under the log directory.
pub struct FilesystemProvenanceLog {
    dir: PathBuf,
}

impl FilesystemProvenanceLog {
    /// Create a log under `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, call_id: &str) -> Result<PathBuf> {
        if call_id.len() != 16 || !call_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ForgeError::InvalidInput(format!("invalid call id: {call_id}")));
        }
        Ok(self.dir.join(format!("{call_id}.json")))
    }
}

#[async_trait]
impl ProvenanceLog for FilesystemProvenanceLog {
    async fn append(&self, entry: &ProvenanceEntry) -> Result<()> {
        let path = self.path_for(&entry.provenance.call_id)?;
        if path.exists() {
            return Err(ForgeError::InvariantViolation(format!(
                "provenance for call {} already recorded",
                entry.provenance.call_id
            )));
        }
        let bytes = serde_json::to_vec_pretty(entry)?;
        let temp = path.with_extension("tmp");
        tokio::fs::write(&temp, &bytes).await?;
        tokio::fs::rename(&temp, &path).await?;
        Ok(())
    }

    async fn read(&self, call_id: &str) -> Result<Option<ProvenanceEntry>> {
        let path = self.path_for(call_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(call_id: &str) -> ProvenanceEntry {
        let now = Utc::now();
        ProvenanceEntry {
            provenance: ProvenanceRecord {
                call_id: call_id.to_string(),
                tool_id: "translate_text".into(),
                version: "1.2.3".into(),
                started_at: now,
                finished_at: now,
                input_hash: "a".repeat(64),
                sandbox: SandboxProfile::default(),
                success: true,
                error_kind: None,
            },
            metrics: CallMetrics {
                latency_ms: 42.0,
                success: true,
                timestamp: now,
            },
            result_hash: Some("b".repeat(64)),
        }
    }

    #[tokio::test]
    async fn test_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let log = FilesystemProvenanceLog::new(dir.path()).unwrap();

        let e = entry("0123456789abcdef");
        log.append(&e).await.unwrap();
        let read = log.read("0123456789abcdef").await.unwrap().unwrap();
        assert_eq!(read, e);
        assert!(dir.path().join("0123456789abcdef.json").exists());
    }

    #[tokio::test]
    async fn test_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let log = FilesystemProvenanceLog::new(dir.path()).unwrap();

        let e = entry("0123456789abcdef");
        log.append(&e).await.unwrap();
        let result = log.append(&e).await;
        assert!(matches!(result, Err(ForgeError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn test_invalid_call_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let log = FilesystemProvenanceLog::new(dir.path()).unwrap();
        assert!(log.read("../../etc/passwd").await.is_err());
        assert!(log.read("short").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_read() {
        let log = InMemoryProvenanceLog::new();
        assert!(log.read("0123456789abcdef").await.unwrap().is_none());
    }
}
