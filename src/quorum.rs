//! Quorum dispatch
//!
//! Sends one logical operation to every node concurrently and decides
//! success or failure against a threshold. Each node call is bounded by a
//! per-node timeout; the whole round is bounded by an overall timeout.
//! Transient (network) failures earn one immediate retry against the same
//! node within a small budget; fatal rejections (auth, validation,
//! conflict) never retry. The round completes as soon as `threshold`
//! valid shares arrive — stragglers are aborted and their late completion
//! has no effect on the returned result.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::transport::{NodeAddress, NodeErrorKind, NodeFailure, NodeOutcome, NodeTransport, OperationRequest};

/// Quorum parameters: fixed by network configuration, never negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumConfig {
    /// Minimum count of valid shares for a trusted result
    pub threshold: usize,
    /// Total nodes in the network
    pub total: usize,
}

impl QuorumConfig {
    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 || self.threshold > self.total {
            return Err(Error::Config(format!(
                "invalid quorum: threshold {} of {} nodes",
                self.threshold, self.total
            )));
        }
        Ok(())
    }
}

/// One validated share, indexed by the node that produced it so
/// order-sensitive combination schemes can match node identities.
#[derive(Debug, Clone)]
pub struct Share {
    pub node: NodeAddress,
    pub bytes: Vec<u8>,
}

/// Outcome of one node's call within a dispatch round.
#[derive(Debug)]
struct NodeResponse {
    node: NodeAddress,
    outcome: NodeOutcome,
}

/// Concurrent fan-out engine used by every remote operation.
pub struct QuorumDispatcher {
    transport: Arc<dyn NodeTransport>,
    per_node_timeout: Duration,
    overall_timeout: Duration,
    retry_budget: u8,
}

impl QuorumDispatcher {
    pub fn new(
        transport: Arc<dyn NodeTransport>,
        per_node_timeout: Duration,
        overall_timeout: Duration,
        retry_budget: u8,
    ) -> Self {
        Self {
            transport,
            per_node_timeout,
            overall_timeout,
            retry_budget,
        }
    }

    /// Dispatch one request per node and collect shares until the
    /// threshold is met.
    ///
    /// Fails with [`Error::Quorum`] carrying per-node diagnostics when
    /// fewer than `threshold` valid shares were obtained after retries
    /// and timeouts. When every node converged on the identical fatal
    /// rejection, that rejection is surfaced directly instead.
    pub async fn dispatch(
        &self,
        requests: BTreeMap<NodeAddress, OperationRequest>,
        quorum: &QuorumConfig,
    ) -> Result<Vec<Share>> {
        quorum.validate()?;

        let contacted = requests.len();
        let mut pending: BTreeSet<NodeAddress> = requests.keys().cloned().collect();
        let mut calls = JoinSet::new();
        for (node, request) in requests {
            let transport = Arc::clone(&self.transport);
            let per_node_timeout = self.per_node_timeout;
            let retry_budget = self.retry_budget;
            calls.spawn(async move {
                Self::call_node(transport, node, request, per_node_timeout, retry_budget).await
            });
        }

        debug!(nodes = contacted, threshold = quorum.threshold, "dispatch round started");

        let deadline = Instant::now() + self.overall_timeout;
        let mut shares: Vec<Share> = Vec::new();
        let mut failures: Vec<NodeFailure> = Vec::new();

        while !calls.is_empty() {
            let joined = match timeout_at(deadline, calls.join_next()).await {
                Ok(joined) => joined,
                Err(_) => {
                    // Overall deadline exceeded below threshold: every call
                    // still in flight counts as a node failure.
                    calls.abort_all();
                    for node in pending.iter().cloned() {
                        failures.push(NodeFailure {
                            node,
                            kind: NodeErrorKind::Network,
                            message: "overall dispatch deadline exceeded".into(),
                        });
                    }
                    break;
                }
            };

            let response = match joined {
                None => break,
                Some(Err(join_err)) => {
                    warn!(error = %join_err, "node call task failed");
                    continue;
                }
                Some(Ok(response)) => response,
            };

            pending.remove(&response.node);
            match response.outcome {
                NodeOutcome::Share(bytes) => {
                    shares.push(Share {
                        node: response.node,
                        bytes,
                    });
                    if shares.len() >= quorum.threshold {
                        // Threshold met: abandon stragglers. Their eventual
                        // completion never mutates the returned shares.
                        calls.abort_all();
                        debug!(shares = shares.len(), "quorum reached");
                        return Ok(shares);
                    }
                }
                NodeOutcome::Error { kind, message } => {
                    warn!(node = %response.node, kind = kind.as_str(), %message, "node rejected request");
                    failures.push(NodeFailure {
                        node: response.node,
                        kind,
                        message,
                    });
                }
            }
        }

        if let Some(collapsed) = collapse_uniform_failure(&shares, &failures, contacted) {
            return Err(collapsed);
        }
        Err(Error::Quorum {
            needed: quorum.threshold,
            obtained: shares.len(),
            failures,
        })
    }

    /// Call one node, with a bounded immediate retry for transient
    /// failures. Fatal rejections are returned as-is.
    async fn call_node(
        transport: Arc<dyn NodeTransport>,
        node: NodeAddress,
        request: OperationRequest,
        per_node_timeout: Duration,
        retry_budget: u8,
    ) -> NodeResponse {
        let mut attempts: u8 = 0;
        loop {
            attempts += 1;

            let result = match timeout(per_node_timeout, transport.submit(&node, &request)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Network(format!(
                    "node call timed out after {per_node_timeout:?}"
                ))),
            };

            let (kind, message) = match result {
                Ok(NodeOutcome::Share(bytes)) => {
                    return NodeResponse {
                        node,
                        outcome: NodeOutcome::Share(bytes),
                    }
                }
                Ok(NodeOutcome::Error { kind, message }) => (kind, message),
                Err(e) => (NodeErrorKind::Network, e.to_string()),
            };

            if kind.is_recoverable() && attempts <= retry_budget {
                debug!(node = %node, attempt = attempts, "retrying transient node failure");
                tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempts as u32 - 1)))
                    .await;
                continue;
            }

            return NodeResponse {
                node,
                outcome: NodeOutcome::Error { kind, message },
            };
        }
    }
}

/// When every contacted node converged on the identical fatal rejection,
/// surface that class directly instead of a quorum error.
fn collapse_uniform_failure(
    shares: &[Share],
    failures: &[NodeFailure],
    contacted: usize,
) -> Option<Error> {
    if !shares.is_empty() || failures.len() != contacted || failures.is_empty() {
        return None;
    }
    let first = &failures[0];
    if !failures
        .iter()
        .all(|f| f.kind == first.kind && f.message == first.message)
    {
        return None;
    }
    match first.kind {
        NodeErrorKind::Auth => Some(Error::Auth(first.message.clone())),
        NodeErrorKind::Conflict => Some(Error::Conflict(first.message.clone())),
        _ => None,
    }
}
