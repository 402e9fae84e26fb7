//! Remote operation orchestrator
//!
//! [`ConclaveClient`] is the explicit context object owning the node
//! list, quorum configuration, transport, combiner and envelope — there
//! is no global connection state. It composes the identity, session,
//! quorum and combination layers into the named flows callers use:
//! sign, export, import and execute.
//!
//! Every call walks the same state machine — credentials are minted, the
//! request fans out, shares are collected to threshold, combined, and
//! verified — and the combined result is returned by value, never cached
//! across calls.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::capability::{Ability, CapabilityGrant};
use crate::combine::{combine_agreement, combine_signature, ReplicatedEd25519, SignatureCombiner};
use crate::config::NetworkConfig;
use crate::envelope::{ChaChaEnvelope, EnvelopeCipher};
use crate::error::{Error, Result};
use crate::quorum::{QuorumDispatcher, Share};
use crate::session::{CredentialSigner, SessionCredentialBuilder, SessionKeyPair};
use crate::transport::{HttpTransport, NodeTransport, OperationRequest};

/// Per-call lifecycle, logged as structured phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationPhase {
    Idle,
    CredentialsBuilt,
    Dispatched,
    Collecting,
    QuorumReached,
    Combined,
    Verified,
    Done,
    Failed,
}

impl OperationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationPhase::Idle => "idle",
            OperationPhase::CredentialsBuilt => "credentials_built",
            OperationPhase::Dispatched => "dispatched",
            OperationPhase::Collecting => "collecting",
            OperationPhase::QuorumReached => "quorum_reached",
            OperationPhase::Combined => "combined",
            OperationPhase::Verified => "verified",
            OperationPhase::Done => "done",
            OperationPhase::Failed => "failed",
        }
    }
}

fn phase(op: &Uuid, phase: OperationPhase) {
    debug!(op = %op, phase = phase.as_str(), "operation phase");
}

/// Content-derived fingerprint identifying stored key material.
///
/// Computed over the key material itself so re-importing the same
/// material always lands on the same storage identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyFingerprint(String);

impl KeyFingerprint {
    pub fn compute(key_material: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(key_material)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to network-held key material: the sealed bytes plus the
/// public artifact results are verified against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedKeyRef {
    pub fingerprint: KeyFingerprint,
    pub ciphertext: Vec<u8>,
    pub verifying_key: Vec<u8>,
}

impl EncryptedKeyRef {
    /// Resource string this key is addressed by in capability grants.
    pub fn resource(&self) -> String {
        format!("conclave-key://{}", self.fingerprint)
    }
}

/// Caller-supplied metadata attached to an import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMetadata {
    /// Owner identity the record is stored under
    pub owner: String,
    /// Public half of the imported key
    pub verifying_key: Vec<u8>,
    /// Optional human-readable label
    #[serde(default)]
    pub label: Option<String>,
}

// ============================================================================
// Operation parameter wire shapes
// ============================================================================

/// Key reference as it travels in operation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRefParams {
    pub fingerprint: KeyFingerprint,
    /// Base64 sealed key material
    pub ciphertext: String,
    /// Hex public key
    pub verifying_key: String,
}

impl From<&EncryptedKeyRef> for KeyRefParams {
    fn from(key: &EncryptedKeyRef) -> Self {
        Self {
            fingerprint: key.fingerprint.clone(),
            ciphertext: BASE64.encode(&key.ciphertext),
            verifying_key: hex::encode(&key.verifying_key),
        }
    }
}

/// Parameters of the `sign` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignParams {
    /// Base64 message to sign
    pub message: String,
    pub key: KeyRefParams,
}

/// Parameters of the `export` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportParams {
    pub key: KeyRefParams,
}

/// Parameters of the `import` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportParams {
    pub fingerprint: KeyFingerprint,
    /// Base64 sealed key material
    pub ciphertext: String,
    /// Hex public key
    pub verifying_key: String,
    pub owner: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Parameters of the `execute` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteParams {
    /// Identifier of the remote program
    pub program: String,
    /// Program input
    pub params: serde_json::Value,
}

// ============================================================================
// Client
// ============================================================================

/// Client for one Conclave network.
pub struct ConclaveClient {
    config: NetworkConfig,
    transport: Arc<dyn NodeTransport>,
    combiner: Arc<dyn SignatureCombiner>,
    envelope: Arc<dyn EnvelopeCipher>,
}

impl ConclaveClient {
    /// Build a client with the default HTTP transport, replicated-ed25519
    /// combiner, and ChaCha envelope under the configured network key.
    pub fn new(config: NetworkConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.per_node_timeout)?);
        Self::with_transport(config, transport)
    }

    /// Build a client over a custom transport (test harnesses, alternate
    /// wire encodings).
    pub fn with_transport(config: NetworkConfig, transport: Arc<dyn NodeTransport>) -> Result<Self> {
        config.validate()?;
        let envelope = Arc::new(ChaChaEnvelope::new(config.envelope_key));
        Ok(Self {
            config,
            transport,
            combiner: Arc::new(ReplicatedEd25519),
            envelope,
        })
    }

    /// Swap in a different signature combination scheme.
    pub fn with_combiner(mut self, combiner: Arc<dyn SignatureCombiner>) -> Self {
        self.combiner = combiner;
        self
    }

    /// Swap in a different key-material envelope.
    pub fn with_envelope(mut self, envelope: Arc<dyn EnvelopeCipher>) -> Self {
        self.envelope = envelope;
        self
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Sign `message` with network-held key material.
    ///
    /// The nodes decrypt-then-sign internally; the client combines the
    /// signature shares and verifies the result against the key's public
    /// half before returning it.
    pub async fn sign(
        &self,
        signer: &dyn CredentialSigner,
        key: &EncryptedKeyRef,
        message: &[u8],
    ) -> Result<Vec<u8>> {
        let op = Uuid::new_v4();
        let grants = [CapabilityGrant::new(key.resource(), Ability::Signing)];
        let params = serde_json::to_value(SignParams {
            message: BASE64.encode(message),
            key: key.into(),
        })?;

        let result = async {
            let shares = self.run_operation(&op, signer, &grants, "sign", params).await?;
            let signature = combine_signature(
                self.combiner.as_ref(),
                message,
                &shares,
                self.config.threshold,
                &key.verifying_key,
            )?;
            phase(&op, OperationPhase::Combined);
            phase(&op, OperationPhase::Verified);
            Ok(signature)
        }
        .await;
        self.finish(&op, "sign", result)
    }

    /// Export network-held key material as plaintext.
    ///
    /// Requires the stricter decryption capability. Every node produces a
    /// plaintext candidate independently; all candidates must agree. The
    /// plaintext is never retained beyond the returned value.
    pub async fn export_key(
        &self,
        signer: &dyn CredentialSigner,
        key: &EncryptedKeyRef,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let op = Uuid::new_v4();
        let grants = [CapabilityGrant::new(key.resource(), Ability::Decryption)];
        let params = serde_json::to_value(ExportParams { key: key.into() })?;

        let result = async {
            let shares = self
                .run_operation(&op, signer, &grants, "export", params)
                .await?;
            let plaintext = combine_agreement(&shares, self.config.threshold)?;
            phase(&op, OperationPhase::Combined);
            phase(&op, OperationPhase::Verified);
            Ok(Zeroizing::new(plaintext))
        }
        .await;
        self.finish(&op, "export", result)
    }

    /// Import key material into the network's storage.
    ///
    /// The material is sealed client-side; its content-derived
    /// fingerprint becomes the storage identity. Importing material whose
    /// fingerprint already exists under a different owner fails with a
    /// conflict.
    pub async fn import_key(
        &self,
        signer: &dyn CredentialSigner,
        key_material: &[u8],
        metadata: KeyMetadata,
    ) -> Result<EncryptedKeyRef> {
        let op = Uuid::new_v4();
        let fingerprint = KeyFingerprint::compute(key_material);
        let ciphertext = self.envelope.seal(key_material)?;
        let key = EncryptedKeyRef {
            fingerprint: fingerprint.clone(),
            ciphertext,
            verifying_key: metadata.verifying_key.clone(),
        };

        let grants = [CapabilityGrant::new(key.resource(), Ability::Decryption)];
        let params = serde_json::to_value(ImportParams {
            fingerprint: fingerprint.clone(),
            ciphertext: BASE64.encode(&key.ciphertext),
            verifying_key: hex::encode(&metadata.verifying_key),
            owner: metadata.owner,
            label: metadata.label,
        })?;

        let result = async {
            let shares = self
                .run_operation(&op, signer, &grants, "import", params)
                .await?;
            // Nodes acknowledge a store by echoing the fingerprint; the
            // acknowledgements must agree and match what was submitted.
            let ack = combine_agreement(&shares, self.config.threshold)?;
            if ack != fingerprint.as_str().as_bytes() {
                return Err(Error::Combine(
                    "import acknowledgement does not match submitted fingerprint".into(),
                ));
            }
            phase(&op, OperationPhase::Combined);
            phase(&op, OperationPhase::Verified);
            Ok(key)
        }
        .await;
        self.finish(&op, "import", result)
    }

    /// Run a remote program and return its output.
    pub async fn execute(
        &self,
        signer: &dyn CredentialSigner,
        program: &str,
        program_params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let op = Uuid::new_v4();
        let grants = [CapabilityGrant::new(
            format!("conclave-action://{program}"),
            Ability::Execution,
        )];
        let params = serde_json::to_value(ExecuteParams {
            program: program.to_string(),
            params: program_params,
        })?;

        let result = async {
            let shares = self
                .run_operation(&op, signer, &grants, "execute", params)
                .await?;
            let output = combine_agreement(&shares, self.config.threshold)?;
            phase(&op, OperationPhase::Combined);
            phase(&op, OperationPhase::Verified);
            Ok(serde_json::from_slice(&output)?)
        }
        .await;
        self.finish(&op, "execute", result)
    }

    /// Shared flow up to share collection: mint per-node credentials,
    /// prepare per-node requests, dispatch to quorum.
    async fn run_operation(
        &self,
        op: &Uuid,
        signer: &dyn CredentialSigner,
        grants: &[CapabilityGrant],
        method: &str,
        params: serde_json::Value,
    ) -> Result<Vec<Share>> {
        phase(op, OperationPhase::Idle);
        let session_key = SessionKeyPair::generate();
        let expiration = chrono::Utc::now()
            + chrono::Duration::from_std(self.config.session_ttl)
                .map_err(|e| Error::Config(format!("session TTL out of range: {e}")))?;

        let builder = SessionCredentialBuilder::new(Arc::clone(&self.transport));
        let (credentials, credential_failures) = builder
            .build(signer, &session_key, grants, expiration, &self.config.nodes)
            .await;
        phase(op, OperationPhase::CredentialsBuilt);

        if credentials.len() < self.config.threshold {
            return Err(Error::Quorum {
                needed: self.config.threshold,
                obtained: 0,
                failures: credential_failures,
            });
        }

        let requests: BTreeMap<_, _> = credentials
            .into_iter()
            .map(|(node, credential)| {
                let request = OperationRequest {
                    method: method.to_string(),
                    params: params.clone(),
                    credential,
                };
                (node, request)
            })
            .collect();

        let dispatcher = QuorumDispatcher::new(
            Arc::clone(&self.transport),
            self.config.per_node_timeout,
            self.config.overall_timeout,
            self.config.retry_budget,
        );
        phase(op, OperationPhase::Dispatched);
        phase(op, OperationPhase::Collecting);
        let shares = dispatcher.dispatch(requests, &self.config.quorum()).await?;
        phase(op, OperationPhase::QuorumReached);
        Ok(shares)
    }

    fn finish<T>(&self, op: &Uuid, method: &str, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => phase(op, OperationPhase::Done),
            Err(e) => {
                phase(op, OperationPhase::Failed);
                warn!(op = %op, method, error = %e, "remote operation failed");
            }
        }
        result
    }
}

/// Authority backed by network-held key material.
///
/// Signs session messages by running a signing operation against the
/// network itself with an outer session; the recursion bottoms out at a
/// user-controlled [`CredentialSigner`].
pub struct DelegatedSigner {
    client: Arc<ConclaveClient>,
    key: EncryptedKeyRef,
    authority: Arc<dyn CredentialSigner>,
}

impl DelegatedSigner {
    pub fn new(
        client: Arc<ConclaveClient>,
        key: EncryptedKeyRef,
        authority: Arc<dyn CredentialSigner>,
    ) -> Self {
        Self {
            client,
            key,
            authority,
        }
    }
}

#[async_trait]
impl CredentialSigner for DelegatedSigner {
    fn address(&self) -> String {
        bs58::encode(&self.key.verifying_key).into_string()
    }

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.client
            .sign(self.authority.as_ref(), &self.key, message)
            .await
    }
}
