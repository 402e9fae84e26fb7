//! # conclave-client
//!
//! Client library for Conclave networks: small quorums of nodes that
//! custody key material and perform signing, decryption, and program
//! execution when presented with a valid session credential.
//!
//! The client mints short-lived session credentials from a
//! user-controlled authority, fans requests out to the node set,
//! collects responses until the configured threshold is met, and
//! combines the per-node shares into one verified result.
//!
//! ## Quick start
//!
//! ```no_run
//! use conclave_client::{Ability, CapabilityGrant, ConclaveClient, ExternalSigner, NetworkConfig};
//!
//! # async fn run() -> conclave_client::Result<()> {
//! let mut config = NetworkConfig::default();
//! config.nodes = vec![
//!     "https://node-a.example.org".into(),
//!     "https://node-b.example.org".into(),
//!     "https://node-c.example.org".into(),
//! ];
//! config.threshold = 2;
//!
//! let client = ConclaveClient::new(config)?;
//! let signer = ExternalSigner::generate();
//!
//! let output = client
//!     .execute(&signer, "hello-world", serde_json::json!({ "name": "conclave" }))
//!     .await?;
//! println!("{output}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Layout
//!
//! - [`auth`] — authentication methods and identity derivation
//! - [`capability`] — resources, abilities, delegation statements
//! - [`session`] — session keys, credential minting, signer seam
//! - [`transport`] — node addressing and the HTTP wire protocol
//! - [`quorum`] — threshold dispatch, retries, failure collapse
//! - [`combine`] — share combination and result verification
//! - [`envelope`] — client-side sealing of key material
//! - [`client`] — the orchestrator tying the layers together

pub mod auth;
pub mod capability;
pub mod client;
pub mod combine;
pub mod config;
pub mod envelope;
pub mod error;
pub mod quorum;
pub mod session;
pub mod transport;

pub use auth::{AuthMethod, AuthMethodIdentity, IdentityResolver, OtpFactor};
pub use capability::{delegation_statements, Ability, CapabilityGrant};
pub use client::{
    ConclaveClient, DelegatedSigner, EncryptedKeyRef, KeyFingerprint, KeyMetadata, OperationPhase,
};
pub use combine::{combine_agreement, combine_signature, ReplicatedEd25519, SignatureCombiner};
pub use config::NetworkConfig;
pub use envelope::{ChaChaEnvelope, EnvelopeCipher};
pub use error::{Error, Result};
pub use quorum::{QuorumConfig, QuorumDispatcher, Share};
pub use session::{
    CredentialSigner, ExternalSigner, SessionCredential, SessionCredentialBuilder, SessionKeyPair,
    SessionMessage,
};
pub use transport::{
    HttpTransport, NodeAddress, NodeErrorKind, NodeFailure, NodeOutcome, NodeTransport,
    OperationRequest,
};
