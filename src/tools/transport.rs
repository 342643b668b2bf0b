//! Transport bindings for tool servers.
//!
//! Two interchangeable bindings exchange the same envelope: stdio
//! (newline-delimited JSON over a child process's standard streams) and
//! HTTP (the envelope as a request/response body). Every failure mode
//! normalizes to [`TransportError`] so callers never see
//! binding-specific error types.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::tools::protocol::{Request, Response};

/// Which binding produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Http,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error shape all transport failures normalize to.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{transport}] {code}: {message}")]
pub struct TransportError {
    /// Which binding failed.
    pub transport: TransportKind,
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl TransportError {
    pub fn new(
        transport: TransportKind,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn timeout(transport: TransportKind, after: Duration) -> Self {
        Self::new(
            transport,
            "CONNECTION_TIMEOUT",
            format!("no response within {}ms", after.as_millis()),
        )
    }

    pub fn not_connected(transport: TransportKind) -> Self {
        Self::new(transport, "NOT_CONNECTED", "transport is not connected")
    }

    pub fn malformed(transport: TransportKind, detail: impl Into<String>) -> Self {
        Self::new(transport, "MALFORMED_ENVELOPE", detail)
    }
}

/// A connection to one tool server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which binding this is.
    fn kind(&self) -> TransportKind;

    /// Whether the transport currently holds a live connection.
    fn is_connected(&self) -> bool;

    /// Establish the connection (spawn the child / build the client).
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Send one request and wait for the matching response.
    ///
    /// Responses carrying an id other than the request's are dropped
    /// and logged, never matched to the caller.
    async fn send(&mut self, request: Request) -> Result<Response, TransportError>;

    /// Tear down the connection.
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Stdio binding: a child process speaking newline-delimited envelopes.
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    timeout: Duration,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<Lines<BufReader<ChildStdout>>>,
}

impl StdioTransport {
    /// Create a stdio transport for a subprocess launch spec.
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            env,
            timeout,
            child: None,
            stdin: None,
            stdout: None,
        }
    }

    async fn read_matching(&mut self, id: u64) -> Result<Response, TransportError> {
        let kind = TransportKind::Stdio;
        let lines = self
            .stdout
            .as_mut()
            .ok_or_else(|| TransportError::not_connected(kind))?;

        loop {
            let line = lines.next_line().await.map_err(|e| {
                TransportError::new(kind, "READ_ERROR", e.to_string())
            })?;

            let Some(line) = line else {
                return Err(TransportError::new(
                    kind,
                    "SERVER_CLOSED",
                    "server closed its output stream",
                ));
            };

            if line.trim().is_empty() {
                continue;
            }

            let response: Response = serde_json::from_str(&line)
                .map_err(|e| TransportError::malformed(kind, e.to_string()))?;

            if response.id != id {
                tracing::warn!(
                    expected_id = id,
                    received_id = response.id,
                    "Dropping response with unrecognized id"
                );
                continue;
            }

            return Ok(response);
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn is_connected(&self) -> bool {
        self.child.is_some()
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TransportError::new(
                    TransportKind::Stdio,
                    "SPAWN_ERROR",
                    format!("failed to launch '{}': {}", self.command, e),
                )
            })?;

        self.stdin = child.stdin.take();
        self.stdout = child
            .stdout
            .take()
            .map(|out| BufReader::new(out).lines());
        self.child = Some(child);
        Ok(())
    }

    async fn send(&mut self, request: Request) -> Result<Response, TransportError> {
        let kind = TransportKind::Stdio;
        if !self.is_connected() {
            return Err(TransportError::not_connected(kind));
        }

        let payload = serde_json::to_string(&request)
            .map_err(|e| TransportError::new(kind, "ENCODE_ERROR", e.to_string()))?;

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| TransportError::not_connected(kind))?;
        stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| TransportError::new(kind, "BROKEN_PIPE", e.to_string()))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| TransportError::new(kind, "BROKEN_PIPE", e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| TransportError::new(kind, "BROKEN_PIPE", e.to_string()))?;

        tokio::time::timeout(self.timeout, self.read_matching(request.id))
            .await
            .map_err(|_| TransportError::timeout(kind, self.timeout))?
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        // Closing stdin signals the server to exit; fall back to kill.
        self.stdin = None;
        self.stdout = None;

        if let Some(mut child) = self.child.take()
            && tokio::time::timeout(Duration::from_secs(5), child.wait())
                .await
                .is_err()
        {
            child.kill().await.map_err(|e| {
                TransportError::new(TransportKind::Stdio, "KILL_ERROR", e.to_string())
            })?;
        }
        Ok(())
    }
}

/// HTTP binding: the envelope POSTed to `{base_url}/rpc`.
pub struct HttpTransport {
    base_url: String,
    headers: HashMap<String, String>,
    timeout: Duration,
    client: Option<reqwest::Client>,
}

impl HttpTransport {
    /// Create an HTTP transport for a network base address.
    pub fn new(
        base_url: impl Into<String>,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            headers,
            timeout,
            client: None,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        let kind = TransportKind::Http;
        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in &self.headers {
            let name: reqwest::header::HeaderName = name
                .parse()
                .map_err(|_| TransportError::new(kind, "INVALID_HEADER", name.clone()))?;
            let value = value
                .parse()
                .map_err(|_| TransportError::new(kind, "INVALID_HEADER", name.to_string()))?;
            headers.insert(name, value);
        }

        self.client = Some(
            reqwest::Client::builder()
                .timeout(self.timeout)
                .default_headers(headers)
                .build()
                .map_err(|e| TransportError::new(kind, "CLIENT_BUILD", e.to_string()))?,
        );
        Ok(())
    }

    async fn send(&mut self, request: Request) -> Result<Response, TransportError> {
        let kind = TransportKind::Http;
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| TransportError::not_connected(kind))?;

        let url = format!("{}/rpc", self.base_url);
        let http_response = client.post(&url).json(&request).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::timeout(kind, self.timeout)
            } else if e.is_connect() {
                TransportError::new(kind, "UNREACHABLE", e.to_string())
            } else {
                TransportError::new(kind, "REQUEST_ERROR", e.to_string())
            }
        })?;

        let status = http_response.status();
        if !status.is_success() {
            let body = http_response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(500).collect();
            return Err(TransportError::new(
                kind,
                format!("HTTP_{}", status.as_u16()),
                snippet,
            ));
        }

        let response: Response = http_response
            .json()
            .await
            .map_err(|e| TransportError::malformed(kind, e.to_string()))?;

        // Unlike stdio, HTTP carries exactly one response per request:
        // there is no stream to keep reading for the right id, so a
        // mismatch is dropped by failing the call instead of skipping.
        if response.id != request.id {
            tracing::warn!(
                expected_id = request.id,
                received_id = response.id,
                url = %url,
                "Dropping response with unrecognized id"
            );
            return Err(TransportError::new(
                kind,
                "ID_MISMATCH",
                format!("expected id {}, got {}", request.id, response.id),
            ));
        }

        Ok(response)
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.client = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> StdioTransport {
        StdioTransport::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
            HashMap::new(),
            timeout,
        )
    }

    #[tokio::test]
    async fn test_stdio_round_trip() {
        let mut transport = sh(
            r#"read line; printf '{"version":"2.0","id":7,"result":{"ok":true}}\n'"#,
            Duration::from_secs(5),
        );
        transport.connect().await.unwrap();

        let response = transport
            .send(Request::new(7, "tools/list", None))
            .await
            .unwrap();
        assert_eq!(response.id, 7);
        assert_eq!(response.result.unwrap()["ok"], true);

        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_stdio_drops_unrecognized_id() {
        let mut transport = sh(
            concat!(
                r#"read line; "#,
                r#"printf '{"version":"2.0","id":99,"result":{}}\n'; "#,
                r#"printf '{"version":"2.0","id":7,"result":{"ok":true}}\n'"#,
            ),
            Duration::from_secs(5),
        );
        transport.connect().await.unwrap();

        let response = transport
            .send(Request::new(7, "tools/list", None))
            .await
            .unwrap();
        assert_eq!(response.id, 7);
    }

    #[tokio::test]
    async fn test_stdio_timeout_normalizes() {
        let mut transport = sh("sleep 30", Duration::from_millis(200));
        transport.connect().await.unwrap();

        let err = transport
            .send(Request::new(1, "tools/list", None))
            .await
            .unwrap_err();
        assert_eq!(err.transport, TransportKind::Stdio);
        assert_eq!(err.code, "CONNECTION_TIMEOUT");

        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_stdio_malformed_envelope() {
        let mut transport = sh(
            r#"read line; printf 'this is not json\n'"#,
            Duration::from_secs(5),
        );
        transport.connect().await.unwrap();

        let err = transport
            .send(Request::new(1, "tools/list", None))
            .await
            .unwrap_err();
        assert_eq!(err.code, "MALFORMED_ENVELOPE");
    }

    #[tokio::test]
    async fn test_stdio_spawn_failure() {
        let mut transport = StdioTransport::new(
            "steward-test-missing-binary",
            vec![],
            HashMap::new(),
            Duration::from_secs(1),
        );
        let err = transport.connect().await.unwrap_err();
        assert_eq!(err.code, "SPAWN_ERROR");
    }

    #[tokio::test]
    async fn test_stdio_send_before_connect() {
        let mut transport = sh("true", Duration::from_secs(1));
        let err = transport
            .send(Request::new(1, "tools/list", None))
            .await
            .unwrap_err();
        assert_eq!(err.code, "NOT_CONNECTED");
    }

    #[tokio::test]
    async fn test_http_unreachable_normalizes() {
        let mut transport = HttpTransport::new(
            "http://127.0.0.1:1",
            HashMap::new(),
            Duration::from_millis(500),
        );
        transport.connect().await.unwrap();

        let err = transport
            .send(Request::new(1, "tools/list", None))
            .await
            .unwrap_err();
        assert_eq!(err.transport, TransportKind::Http);
        // Either a refused connection or a timeout depending on the host
        // network stack; both are normalized transport errors.
        assert!(err.code == "UNREACHABLE" || err.code == "CONNECTION_TIMEOUT");
    }
}
