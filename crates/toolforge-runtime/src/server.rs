//! Capability-server lifecycle.
//!
//! Servers are external subprocesses owned by the runtime. They start lazily
//! on first invocation, signal readiness with a `{"ready": true}` line on
//! stdout, and move through `stopped -> starting -> ready`, faulting on any
//! startup failure. `ensure` is idempotent and serialized per server name:
//! concurrent callers wait on a single startup and exactly one subprocess is
//! created. A faulted server is only retried after a cool-down. A per-server
//! reference count guards shutdown.

use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use toolforge::{ForgeError, InterfaceBinding, Result};

use crate::channel::ServerChannel;

/// Connection state of a capability server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Stopped,
    Starting,
    Ready,
    Faulted,
}

/// Spawn specification for a capability server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSpec {
    /// Server name; tools naming the same server share the process.
    pub name: String,
    /// Command to spawn.
    pub command: String,
    /// Command arguments.
    pub args: Vec<String>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
}

impl ServerSpec {
    /// Build a spec from a manifest's capability-server binding.
    pub fn from_binding(binding: &InterfaceBinding) -> Option<Self> {
        match binding {
            InterfaceBinding::CapabilityServer {
                server_name,
                command,
                args,
                env,
            } => Some(Self {
                name: server_name.clone(),
                command: command.clone(),
                args: args.clone(),
                env: env.clone(),
            }),
            _ => None,
        }
    }
}

struct ServerSlot {
    state: ServerState,
    child: Option<Child>,
    channel: Option<Arc<ServerChannel>>,
    refcount: usize,
    faulted_at: Option<Instant>,
}

impl ServerSlot {
    fn new() -> Self {
        Self {
            state: ServerState::Stopped,
            child: None,
            channel: None,
            refcount: 0,
            faulted_at: None,
        }
    }
}

/// Owns and supervises capability-server subprocesses.
pub struct ServerManager {
    slots: Mutex<HashMap<String, Arc<Mutex<ServerSlot>>>>,
    startup_deadline: Duration,
    cooldown: Duration,
    spawn_count: AtomicUsize,
}

impl ServerManager {
    /// Create a manager with the given startup deadline and fault cool-down.
    pub fn new(startup_deadline: Duration, cooldown: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            startup_deadline,
            cooldown,
            spawn_count: AtomicUsize::new(0),
        }
    }

    async fn slot(&self, name: &str) -> Arc<Mutex<ServerSlot>> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ServerSlot::new())))
            .clone()
    }

    /// Total subprocesses spawned over this manager's lifetime.
    pub fn spawn_count(&self) -> usize {
        self.spawn_count.load(Ordering::SeqCst)
    }

    /// Current state of a server.
    pub async fn state(&self, name: &str) -> ServerState {
        let slot = self.slot(name).await;
        let slot = slot.lock().await;
        slot.state
    }

    /// Ensure the server is ready, spawning it if needed, and return its
    /// channel with the reference count incremented. Callers must pair this
    /// with [`ServerManager::release`].
    pub async fn ensure(&self, spec: &ServerSpec) -> Result<Arc<ServerChannel>> {
        let slot = self.slot(&spec.name).await;
        // Per-name serialization: concurrent callers wait here while one
        // startup runs.
        let mut slot = slot.lock().await;

        match slot.state {
            ServerState::Ready => {
                if let Some(child) = &mut slot.child {
                    // A dead child means the connection is gone.
                    if child.try_wait().ok().flatten().is_some() {
                        tracing::warn!(server = %spec.name, "capability server exited; restarting");
                        slot.state = ServerState::Stopped;
                        slot.channel = None;
                        slot.child = None;
                    }
                }
            }
            ServerState::Faulted => {
                let in_cooldown = slot
                    .faulted_at
                    .is_some_and(|at| at.elapsed() < self.cooldown);
                if in_cooldown {
                    return Err(ForgeError::ServerUnavailable {
                        server: spec.name.clone(),
                        reason: "server is faulted and cooling down".to_string(),
                    });
                }
                slot.state = ServerState::Stopped;
                slot.faulted_at = None;
            }
            _ => {}
        }

        if slot.state != ServerState::Ready {
            slot.state = ServerState::Starting;
            match self.spawn(spec).await {
                Ok((child, channel)) => {
                    slot.child = Some(child);
                    slot.channel = Some(Arc::new(channel));
                    slot.state = ServerState::Ready;
                    tracing::info!(server = %spec.name, "capability server ready");
                }
                Err(e) => {
                    slot.state = ServerState::Faulted;
                    slot.faulted_at = Some(Instant::now());
                    tracing::error!(server = %spec.name, error = %e, "capability server faulted");
                    return Err(e);
                }
            }
        }

        slot.refcount += 1;
        slot.channel
            .clone()
            .ok_or_else(|| ForgeError::Internal("ready server has no channel".to_string()))
    }

    async fn spawn(&self, spec: &ServerSpec) -> Result<(Child, ServerChannel)> {
        tracing::info!(server = %spec.name, command = %spec.command, "starting capability server");
        self.spawn_count.fetch_add(1, Ordering::SeqCst);

        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ForgeError::ServerUnavailable {
                server: spec.name.clone(),
                reason: format!("spawn failed: {e}"),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| ForgeError::ServerUnavailable {
            server: spec.name.clone(),
            reason: "no stdin pipe".to_string(),
        })?;
        let mut stdout = BufReader::new(child.stdout.take().ok_or_else(|| {
            ForgeError::ServerUnavailable {
                server: spec.name.clone(),
                reason: "no stdout pipe".to_string(),
            }
        })?);

        // Readiness: the server's hello line within the startup deadline.
        let mut hello = String::new();
        let read = tokio::time::timeout(self.startup_deadline, stdout.read_line(&mut hello))
            .await
            .map_err(|_| ForgeError::ServerUnavailable {
                server: spec.name.clone(),
                reason: format!("no readiness signal within {:?}", self.startup_deadline),
            })?
            .map_err(|e| ForgeError::ServerUnavailable {
                server: spec.name.clone(),
                reason: format!("readiness read failed: {e}"),
            })?;
        if read == 0 {
            return Err(ForgeError::ServerUnavailable {
                server: spec.name.clone(),
                reason: "server exited before signalling readiness".to_string(),
            });
        }

        let ready = serde_json::from_str::<serde_json::Value>(hello.trim())
            .ok()
            .and_then(|v| v.get("ready").and_then(|r| r.as_bool()))
            .unwrap_or(false);
        if !ready {
            return Err(ForgeError::ServerUnavailable {
                server: spec.name.clone(),
                reason: format!("unexpected readiness line: {}", hello.trim()),
            });
        }

        Ok((child, ServerChannel::new(stdin, stdout)))
    }

    /// Release one reference taken by [`ServerManager::ensure`].
    pub async fn release(&self, name: &str) {
        let slot = self.slot(name).await;
        let mut slot = slot.lock().await;
        slot.refcount = slot.refcount.saturating_sub(1);
    }

    /// Shut a server down. Refuses while references are outstanding; returns
    /// whether the server was stopped.
    pub async fn shutdown(&self, name: &str) -> Result<bool> {
        let slot = self.slot(name).await;
        let mut slot = slot.lock().await;
        if slot.refcount > 0 {
            return Ok(false);
        }
        if let Some(mut child) = slot.child.take() {
            let _ = child.kill().await;
        }
        slot.channel = None;
        slot.state = ServerState::Stopped;
        tracing::info!(server = %name, "capability server stopped");
        Ok(true)
    }

    /// Kill every server unconditionally (process exit path).
    pub async fn shutdown_all(&self) {
        let slots: Vec<Arc<Mutex<ServerSlot>>> = {
            let slots = self.slots.lock().await;
            slots.values().cloned().collect()
        };
        for slot in slots {
            let mut slot = slot.lock().await;
            if let Some(mut child) = slot.child.take() {
                let _ = child.kill().await;
            }
            slot.channel = None;
            slot.state = ServerState::Stopped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_spec(name: &str) -> ServerSpec {
        ServerSpec {
            name: name.to_string(),
            command: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                r#"echo '{"ready": true}'; cat > /dev/null"#.to_string(),
            ],
            env: BTreeMap::new(),
        }
    }

    fn broken_spec(name: &str) -> ServerSpec {
        ServerSpec {
            name: name.to_string(),
            command: "definitely-not-a-command-zzz".to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    fn manager() -> ServerManager {
        ServerManager::new(Duration::from_secs(5), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_ensure_starts_and_is_idempotent() {
        let manager = manager();
        let spec = ready_spec("pdf-tools");

        manager.ensure(&spec).await.unwrap();
        assert_eq!(manager.state("pdf-tools").await, ServerState::Ready);
        manager.ensure(&spec).await.unwrap();
        assert_eq!(manager.spawn_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_spawns_once() {
        let manager = Arc::new(manager());
        let spec = ready_spec("shared");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            let spec = spec.clone();
            handles.push(tokio::spawn(async move { manager.ensure(&spec).await.map(|_| ()) }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(manager.spawn_count(), 1);
        assert_eq!(manager.state("shared").await, ServerState::Ready);
    }

    #[tokio::test]
    async fn test_fault_and_cooldown() {
        let manager = manager();
        let spec = broken_spec("broken");

        let err = manager.ensure(&spec).await.unwrap_err();
        assert!(matches!(err, ForgeError::ServerUnavailable { .. }));
        assert_eq!(manager.state("broken").await, ServerState::Faulted);

        // Within the cool-down the server is not respawned.
        let before = manager.spawn_count();
        let err = manager.ensure(&spec).await.unwrap_err();
        assert!(matches!(err, ForgeError::ServerUnavailable { .. }));
        assert_eq!(manager.spawn_count(), before);
    }

    #[tokio::test]
    async fn test_cooldown_expiry_allows_retry() {
        let manager = ServerManager::new(Duration::from_secs(5), Duration::from_millis(10));
        let err = manager.ensure(&broken_spec("flaky")).await.unwrap_err();
        assert!(matches!(err, ForgeError::ServerUnavailable { .. }));

        tokio::time::sleep(Duration::from_millis(20)).await;
        // After the cool-down a retry spawns again (and faults again here).
        let before = manager.spawn_count();
        let _ = manager.ensure(&broken_spec("flaky")).await;
        assert_eq!(manager.spawn_count(), before + 1);
    }

    #[tokio::test]
    async fn test_refcount_guards_shutdown() {
        let manager = manager();
        let spec = ready_spec("guarded");
        manager.ensure(&spec).await.unwrap();

        assert!(!manager.shutdown("guarded").await.unwrap());
        manager.release("guarded").await;
        assert!(manager.shutdown("guarded").await.unwrap());
        assert_eq!(manager.state("guarded").await, ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_not_ready_line_faults() {
        let manager = manager();
        let spec = ServerSpec {
            name: "chatty".to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "echo hello-not-json; cat > /dev/null".to_string()],
            env: BTreeMap::new(),
        };
        let err = manager.ensure(&spec).await.unwrap_err();
        assert!(matches!(err, ForgeError::ServerUnavailable { .. }));
        assert_eq!(manager.state("chatty").await, ServerState::Faulted);
    }
}
