//! Sandboxed tool runtime.
//!
//! Per-call lifecycle with input/output hashing, provenance logging, and
//! process-managed capability servers:
//!
//! - capability servers are lazily started subprocesses with a JSON-lines
//!   request/response channel and a readiness handshake; `ensure` is
//!   idempotent and serialized per server name, faulted servers cool down
//!   before a retry, and a reference count guards shutdown
//! - every dispatched call gets a 16-hex `call_id`, stable input/result
//!   hashes, and an append-only provenance record, on success and failure
//!   paths alike
//! - deadlines come from the tool's speed tier and the tightest-of merge of
//!   request- and tool-level sandbox profiles

pub mod channel;
pub mod provenance;
pub mod runtime;
pub mod server;

pub use channel::ServerChannel;
pub use provenance::{
    FilesystemProvenanceLog, InMemoryProvenanceLog, ProvenanceEntry, ProvenanceLog,
    ProvenanceRecord,
};
pub use runtime::{ExecutionOutcome, ForgeRuntime};
pub use server::{ServerManager, ServerSpec, ServerState};
