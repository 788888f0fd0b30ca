//! MCP client transports
//!
//! Transports move newline-delimited JSON-RPC messages between the client and
//! a server. One message per line.

use super::McpError;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Transport trait for the client side of MCP
#[async_trait]
pub trait ClientTransport: Send {
    /// Write one message line
    async fn send(&mut self, message: &str) -> Result<(), McpError>;

    /// Read the next message line; `None` when the peer closed
    async fn receive(&mut self) -> Result<Option<String>, McpError>;
}

/// Lines buffered between the stdout reader task and the client
const LINE_BUFFER: usize = 32;

/// Stdio transport to a spawned MCP server process.
///
/// Server stdout is read line by line on a dedicated task, so a `receive`
/// dropped by a timeout or cancellation never loses part of a message.
/// `send` writes one line at a time and is not cancel-safe.
pub struct ChildProcessTransport {
    child: Child,
    writer: ChildStdin,
    lines: mpsc::Receiver<std::io::Result<String>>,
    reader: JoinHandle<()>,
}

impl ChildProcessTransport {
    /// Spawn `program` with piped stdin/stdout.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, McpError> {
        tracing::info!(program = %program, "Spawning MCP server process");

        let mut child = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let writer = child.stdin.take().ok_or_else(|| {
            McpError::ServerUnavailable("Failed to capture server stdin".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            McpError::ServerUnavailable("Failed to capture server stdout".to_string())
        })?;

        let (tx, lines) = mpsc::channel(LINE_BUFFER);
        let reader = tokio::spawn(read_lines(stdout, tx));

        Ok(Self {
            child,
            writer,
            lines,
            reader,
        })
    }

    /// Kill the server process
    pub async fn shutdown(mut self) -> Result<(), McpError> {
        tracing::info!("Shutting down MCP server process");
        self.child.kill().await?;
        Ok(())
    }
}

impl Drop for ChildProcessTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Forward non-empty stdout lines until EOF, a read error, or the client goes away
async fn read_lines(stdout: ChildStdout, tx: mpsc::Sender<std::io::Result<String>>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let next = match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                Ok(trimmed.to_string())
            }
            Ok(None) => break,
            Err(err) => Err(err),
        };
        let failed = next.is_err();
        if tx.send(next).await.is_err() || failed {
            break;
        }
    }
    tracing::debug!("MCP server stdout closed");
}

#[async_trait]
impl ClientTransport for ChildProcessTransport {
    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        self.writer.write_all(message.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        match self.lines.recv().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(err)) => Err(err.into()),
            None => Ok(None), // EOF
        }
    }
}

/// In-memory transport for testing, backed by channel pairs
pub struct ChannelTransport {
    rx: tokio::sync::mpsc::Receiver<String>,
    tx: tokio::sync::mpsc::Sender<String>,
}

impl ChannelTransport {
    /// Create a pair of connected transports.
    ///
    /// Messages sent on one transport are received by the other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = tokio::sync::mpsc::channel(32);
        let (tx_b, rx_a) = tokio::sync::mpsc::channel(32);
        (Self { rx: rx_a, tx: tx_a }, Self { rx: rx_b, tx: tx_b })
    }
}

#[async_trait]
impl ClientTransport for ChannelTransport {
    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        self.tx
            .send(message.to_string())
            .await
            .map_err(|_| McpError::ServerUnavailable("Channel closed".to_string()))
    }

    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_channel_transport_pair() {
        let (mut a, mut b) = ChannelTransport::pair();

        a.send("hello from a").await.unwrap();
        assert_eq!(b.receive().await.unwrap(), Some("hello from a".to_string()));

        b.send("hello from b").await.unwrap();
        assert_eq!(a.receive().await.unwrap(), Some("hello from b".to_string()));
    }

    #[tokio::test]
    async fn test_channel_transport_closed() {
        let (mut a, b) = ChannelTransport::pair();
        drop(b);
        assert_eq!(a.receive().await.unwrap(), None);
        assert!(a.send("anyone?").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_receive_survives_timeout_mid_line() {
        let script = r#"printf '{"id":'; sleep 0.3; printf '1}\n'"#;
        let mut transport =
            ChildProcessTransport::spawn("sh", &["-c".to_string(), script.to_string()]).unwrap();

        let first = tokio::time::timeout(Duration::from_millis(50), transport.receive()).await;
        assert!(first.is_err());

        let line = transport.receive().await.unwrap();
        assert_eq!(line.as_deref(), Some(r#"{"id":1}"#));
        assert_eq!(transport.receive().await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_skips_blank_lines() {
        let script = r#"printf '\n  \n{"ok":true}\n'"#;
        let mut transport =
            ChildProcessTransport::spawn("sh", &["-c".to_string(), script.to_string()]).unwrap();

        assert_eq!(transport.receive().await.unwrap().as_deref(), Some(r#"{"ok":true}"#));
        assert_eq!(transport.receive().await.unwrap(), None);
    }
}
