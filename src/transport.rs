//! Node RPC transport
//!
//! Each node exposes two endpoints: one that hands out a freshness nonce
//! and one that accepts an operation request and answers with a share or
//! an error. The wire encoding is JSON over HTTPS; everything above this
//! module only sees the [`NodeTransport`] trait, which is also what test
//! harnesses implement to stand in for a node cluster.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::session::SessionCredential;

/// Address of one node, as a base URL (`https://node-1.example.org`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn new(url: impl Into<String>) -> Self {
        let url: String = url.into();
        Self(url.trim_end_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One logical request prepared for one node. Business parameters are
/// shared across nodes; the credential is node specific.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Operation method name (`sign`, `export`, `import`, `execute`)
    pub method: String,
    /// Operation parameters, shared across all nodes
    pub params: serde_json::Value,
    /// Session credential minted for this node
    pub credential: SessionCredential,
}

/// Classification a node attaches to a rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeErrorKind {
    /// Malformed request; not retried
    Validation,
    /// Session rejected; not retried
    Auth,
    /// Transient transport problem; eligible for one retry
    Network,
    /// Uniqueness violation on import; not retried
    Conflict,
    /// Unclassified node-side failure; not retried
    Internal,
}

impl NodeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeErrorKind::Validation => "validation",
            NodeErrorKind::Auth => "auth",
            NodeErrorKind::Network => "network",
            NodeErrorKind::Conflict => "conflict",
            NodeErrorKind::Internal => "internal",
        }
    }

    /// Whether the dispatcher may retry this failure against the same node.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, NodeErrorKind::Network)
    }
}

/// Outcome of one node call. Lives for one dispatch round.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    /// The node's partial contribution
    Share(Vec<u8>),
    /// The node rejected or failed the request
    Error { kind: NodeErrorKind, message: String },
}

/// One node's terminal failure within a dispatch round, kept for quorum
/// diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node: NodeAddress,
    pub kind: NodeErrorKind,
    pub message: String,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.node, self.kind.as_str(), self.message)
    }
}

/// Transport seam between the client and the node cluster.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Fetch a freshness nonce from one node.
    async fn fetch_nonce(&self, node: &NodeAddress) -> Result<String>;

    /// Submit an operation request to one node.
    ///
    /// `Err` means the node could not be reached at all; a reachable node
    /// that rejects the request answers `Ok(NodeOutcome::Error { .. })`.
    async fn submit(&self, node: &NodeAddress, request: &OperationRequest) -> Result<NodeOutcome>;
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct NonceResponse {
    nonce: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireError {
    kind: NodeErrorKind,
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireResponse {
    /// Base64 share bytes when the node accepted the request
    #[serde(default)]
    share: Option<String>,
    /// Error details when it did not
    #[serde(default)]
    error: Option<WireError>,
}

// ============================================================================
// HTTP transport
// ============================================================================

/// JSON-over-HTTPS implementation of [`NodeTransport`].
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /// Build the transport with a request timeout applied to every call.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl NodeTransport for HttpTransport {
    async fn fetch_nonce(&self, node: &NodeAddress) -> Result<String> {
        let url = format!("{}/v1/nonce", node.as_str());
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "nonce fetch from {} failed: HTTP {}",
                node,
                response.status()
            )));
        }

        let body: NonceResponse = response.json().await?;
        Ok(body.nonce)
    }

    async fn submit(&self, node: &NodeAddress, request: &OperationRequest) -> Result<NodeOutcome> {
        let url = format!("{}/v1/operations", node.as_str());
        let response = self.http.post(&url).json(request).send().await?;
        let status = response.status();

        if status.is_success() {
            let body: WireResponse = response.json().await?;
            return match (body.share, body.error) {
                (Some(share), _) => Ok(NodeOutcome::Share(BASE64.decode(share)?)),
                (None, Some(err)) => Ok(NodeOutcome::Error {
                    kind: err.kind,
                    message: err.message,
                }),
                (None, None) => Err(Error::Network(format!(
                    "node {node} returned neither share nor error"
                ))),
            };
        }

        // Nodes that answer with a bare HTTP status still get classified so
        // the dispatcher can tell fatal rejections from transient failures.
        let message = response.text().await.unwrap_or_default();
        let kind = match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => NodeErrorKind::Auth,
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => NodeErrorKind::Validation,
            StatusCode::CONFLICT => NodeErrorKind::Conflict,
            s if s.is_server_error() => NodeErrorKind::Internal,
            _ => NodeErrorKind::Network,
        };
        Ok(NodeOutcome::Error {
            kind,
            message: format!("HTTP {status}: {message}"),
        })
    }
}
