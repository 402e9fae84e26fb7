//! Session credentials
//!
//! A session credential is a short-lived, capability-scoped proof of
//! authorization presented to nodes instead of a long-lived secret. The
//! caller's authority (a wallet key, or a network-held key reached through
//! delegation) signs a canonical message that binds an ephemeral session
//! key to a set of capability grants, an expiration, and a per-node
//! freshness nonce. One credential is minted per node: nonce and issue
//! time differ, grants and expiration are identical across the set.
//!
//! Session lifetime policy (`expiration - issued_at <= max_session_ttl`)
//! is enforced by the nodes, which are the source of truth; the client
//! surfaces the rejection as an authorization failure.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capability::{delegation_statements, CapabilityGrant};
use crate::error::Result;
use crate::transport::{NodeAddress, NodeErrorKind, NodeFailure, NodeTransport};

/// URI prefix identifying an ephemeral session key.
pub const SESSION_KEY_URI_PREFIX: &str = "conclave:session:";

/// Ephemeral keypair living for the duration of one logical operation.
///
/// The secret half is zeroized on drop and never persisted.
pub struct SessionKeyPair {
    signing: SigningKey,
}

impl SessionKeyPair {
    /// Generate a fresh session keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Session key URI embedded in signed session messages.
    pub fn uri(&self) -> String {
        format!(
            "{SESSION_KEY_URI_PREFIX}{}",
            hex::encode(self.signing.verifying_key().as_bytes())
        )
    }

    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }
}

/// Canonical signable message embedded in a session credential.
///
/// Field order is the wire order; nodes re-serialize this struct to verify
/// the signature, so the encoding must stay stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Session key URI being delegated to
    pub session_key: String,
    /// Sorted, deduplicated delegation statements
    pub delegation: Vec<String>,
    /// RFC 3339 issue time
    pub issued_at: String,
    /// RFC 3339 expiration
    pub expiration: String,
    /// Freshness nonce supplied by the target node
    pub nonce: String,
    /// Address of the signing authority
    pub signer_address: String,
}

/// One node's session credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCredential {
    /// Node this credential was minted for
    pub node: NodeAddress,
    /// Canonical JSON of the [`SessionMessage`]
    pub signed_message: String,
    /// Hex signature over `signed_message` by the authority
    pub signature: String,
    /// Address of the signing authority
    pub signer_address: String,
    /// Expiration, mirrored out of the signed message
    pub expiration: DateTime<Utc>,
}

/// Source of the authority signature over session messages.
///
/// Either an externally owned key, or a network-held key reached by
/// running a signing operation against the network itself with an outer
/// session (recursion bottoms out at a user-controlled signer).
#[async_trait]
pub trait CredentialSigner: Send + Sync {
    /// Stable address identifying the authority.
    fn address(&self) -> String;

    /// Sign a canonical session message.
    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Caller-owned ed25519 authority key.
pub struct ExternalSigner {
    key: SigningKey,
}

impl ExternalSigner {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Generate a fresh authority key, mostly useful in tests and tooling.
    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut OsRng))
    }

    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }
}

#[async_trait]
impl CredentialSigner for ExternalSigner {
    fn address(&self) -> String {
        bs58::encode(self.key.verifying_key().as_bytes()).into_string()
    }

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.sign(message).to_bytes().to_vec())
    }
}

/// Builds one signed, expiring, capability-scoped credential per node.
pub struct SessionCredentialBuilder {
    transport: Arc<dyn NodeTransport>,
}

impl SessionCredentialBuilder {
    pub fn new(transport: Arc<dyn NodeTransport>) -> Self {
        Self { transport }
    }

    /// Mint one credential per node.
    ///
    /// Nonce fetches run concurrently; a node whose nonce fetch fails is
    /// recorded as a failure without aborting the others — the dispatcher
    /// later needs only a threshold of usable credentials.
    pub async fn build(
        &self,
        signer: &dyn CredentialSigner,
        session_key: &SessionKeyPair,
        grants: &[CapabilityGrant],
        expiration: DateTime<Utc>,
        nodes: &[NodeAddress],
    ) -> (BTreeMap<NodeAddress, SessionCredential>, Vec<NodeFailure>) {
        let delegation = delegation_statements(grants);
        let signer_address = signer.address();

        let minting = nodes.iter().map(|node| {
            let delegation = delegation.clone();
            let signer_address = signer_address.clone();
            async move {
                let result = self
                    .mint_for_node(
                        signer,
                        session_key,
                        delegation,
                        expiration,
                        node,
                        signer_address,
                    )
                    .await;
                (node.clone(), result)
            }
        });

        let mut credentials = BTreeMap::new();
        let mut failures = Vec::new();
        for (node, result) in futures::future::join_all(minting).await {
            match result {
                Ok(credential) => {
                    credentials.insert(node, credential);
                }
                Err(e) => {
                    warn!(node = %node, error = %e, "failed to mint session credential");
                    failures.push(NodeFailure {
                        node,
                        kind: NodeErrorKind::Network,
                        message: e.to_string(),
                    });
                }
            }
        }

        debug!(
            minted = credentials.len(),
            failed = failures.len(),
            "session credentials built"
        );
        (credentials, failures)
    }

    async fn mint_for_node(
        &self,
        signer: &dyn CredentialSigner,
        session_key: &SessionKeyPair,
        delegation: Vec<String>,
        expiration: DateTime<Utc>,
        node: &NodeAddress,
        signer_address: String,
    ) -> Result<SessionCredential> {
        let nonce = self.transport.fetch_nonce(node).await?;

        let message = SessionMessage {
            session_key: session_key.uri(),
            delegation,
            issued_at: Utc::now().to_rfc3339(),
            expiration: expiration.to_rfc3339(),
            nonce,
            signer_address: signer_address.clone(),
        };
        let signed_message = serde_json::to_string(&message)?;
        let signature = signer.sign(signed_message.as_bytes()).await?;

        Ok(SessionCredential {
            node: node.clone(),
            signed_message,
            signature: hex::encode(signature),
            signer_address,
            expiration,
        })
    }
}
