//! The capability-server call channel.
//!
//! One JSON request line per call on the server's stdin, one JSON response
//! line back on its stdout. Calls on one channel are serialized; request ids
//! are monotonic per channel and the response must echo the request id.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use toolforge::{ForgeError, Result};

/// A request line sent to a capability server.
#[derive(Debug, Serialize)]
struct CallRequest<'a> {
    id: u64,
    capability: &'a str,
    input: &'a serde_json::Value,
}

/// A response line from a capability server.
#[derive(Debug, Deserialize)]
struct CallResponse {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

struct ChannelInner {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

/// Serialized request/response channel over a server's standard streams.
pub struct ServerChannel {
    inner: Mutex<ChannelInner>,
}

impl std::fmt::Debug for ServerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerChannel").finish_non_exhaustive()
    }
}

impl ServerChannel {
    /// Wrap a spawned server's streams.
    pub fn new(stdin: ChildStdin, stdout: BufReader<ChildStdout>) -> Self {
        Self {
            inner: Mutex::new(ChannelInner {
                stdin,
                stdout,
                next_id: 0,
            }),
        }
    }

    /// Dispatch one call within the deadline.
    pub async fn call(
        &self,
        capability: &str,
        input: &serde_json::Value,
        deadline: Duration,
    ) -> Result<serde_json::Value> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;

        let mut line = serde_json::to_string(&CallRequest {
            id,
            capability,
            input,
        })?;
        line.push('\n');

        let exchange = async {
            inner.stdin.write_all(line.as_bytes()).await?;
            inner.stdin.flush().await?;

            let mut response_line = String::new();
            let read = inner.stdout.read_line(&mut response_line).await?;
            if read == 0 {
                return Err(ForgeError::ServerUnavailable {
                    server: capability.to_string(),
                    reason: "server closed its output stream".to_string(),
                });
            }
            Ok(response_line)
        };

        let response_line = tokio::time::timeout(deadline, exchange)
            .await
            .map_err(|_| ForgeError::Timeout(deadline))??;

        let response: CallResponse = serde_json::from_str(response_line.trim()).map_err(|e| {
            ForgeError::Internal(format!("malformed server response: {e}"))
        })?;
        if response.id != id {
            return Err(ForgeError::Internal(format!(
                "server response id {} does not match request id {id}",
                response.id
            )));
        }
        if response.ok {
            Ok(response.result.unwrap_or(serde_json::Value::Null))
        } else {
            Err(ForgeError::InvalidInput(
                response.error.unwrap_or_else(|| "tool call failed".to_string()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    /// Spawn a one-shot echo server: after the ready line it answers the
    /// first request with a fixed response for id 1.
    async fn spawn_echo() -> (tokio::process::Child, ServerChannel) {
        let script = r#"read line; echo '{"id": 1, "ok": true, "result": {"echoed": true}}'; cat > /dev/null"#;
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let stdin = child.stdin.take().unwrap();
        let stdout = BufReader::new(child.stdout.take().unwrap());
        (child, ServerChannel::new(stdin, stdout))
    }

    #[tokio::test]
    async fn test_call_roundtrip() {
        let (mut child, channel) = spawn_echo().await;
        let result = channel
            .call(
                "echo",
                &serde_json::json!({"text": "hi"}),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"echoed": true}));
        let _ = child.kill().await;
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let script = r#"cat > /dev/null"#;
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let stdin = child.stdin.take().unwrap();
        let stdout = BufReader::new(child.stdout.take().unwrap());
        let channel = ServerChannel::new(stdin, stdout);

        let result = channel
            .call("echo", &serde_json::json!({}), Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(ForgeError::Timeout(_))));
        let _ = child.kill().await;
    }
}
