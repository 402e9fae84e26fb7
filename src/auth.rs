//! Auth method identity resolution
//!
//! Maps a heterogeneous externally-issued credential (wallet signature,
//! OAuth access token, JWT, WebAuthn assertion, OTP-session JWT) onto one
//! stable 32-byte identity key. Resolution is deterministic: the same
//! credential always yields the same identity, and distinct credentials
//! separate with overwhelming probability (SHA-256 over a provider
//! specific seed string).
//!
//! JWT payloads are decoded locally without signature verification; the
//! nodes verify token signatures themselves. Only the Discord variant
//! performs a network call (the provider's profile endpoint is the sole
//! source of the stable user id).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::config::NetworkConfig;
use crate::error::{Error, Result};

/// Seed suffix for wallet-derived identities.
pub const WALLET_IDENTITY_TAG: &str = "conclave";

/// Session claim under which OTP providers nest authentication factors.
pub const OTP_SESSION_CLAIM: &str = "https://stytch.com/session";

/// Discord profile endpoint used to fetch the stable user id.
pub const DISCORD_PROFILE_ENDPOINT: &str = "https://discord.com/api/users/@me";

/// An externally-issued credential, tagged by provider. Created once per
/// login event and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Wallet signature: the access token is a JSON object carrying the
    /// signing address
    WalletSig { access_token: String },
    /// Discord OAuth access token
    Discord { access_token: String },
    /// Google (or any JWT-bearing OAuth provider) id token
    GoogleJwt { token: String },
    /// WebAuthn assertion, JSON with the credential's `rawId`
    WebAuthn { assertion: String },
    /// OTP-session JWT carrying provider authentication factors
    StytchOtp { factor: OtpFactor, token: String },
}

/// Authentication factor transports for OTP-session tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpFactor {
    Email,
    Sms,
    WhatsApp,
    Totp,
}

impl OtpFactor {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpFactor::Email => "email",
            OtpFactor::Sms => "sms",
            OtpFactor::WhatsApp => "whatsapp",
            OtpFactor::Totp => "totp",
        }
    }
}

/// Deterministic identity key derived from one [`AuthMethod`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthMethodIdentity([u8; 32]);

impl AuthMethodIdentity {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn derive(seed: &str) -> Self {
        let digest = Sha256::digest(seed.as_bytes());
        Self(digest.into())
    }
}

impl fmt::Display for AuthMethodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for AuthMethodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthMethodIdentity({self})")
    }
}

/// Resolves auth methods into identity keys.
pub struct IdentityResolver {
    http: reqwest::Client,
    discord_client_id: String,
    webauthn_rp_name: String,
    discord_endpoint: String,
}

impl IdentityResolver {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.per_node_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            discord_client_id: config.discord_client_id.clone(),
            webauthn_rp_name: config.webauthn_rp_name.clone(),
            discord_endpoint: DISCORD_PROFILE_ENDPOINT.to_string(),
        })
    }

    /// Override the Discord endpoint, for tests against a local stub.
    pub fn with_discord_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.discord_endpoint = endpoint.into();
        self
    }

    /// Resolve an auth method into its identity key.
    ///
    /// Pure and deterministic for every variant except `Discord`, which
    /// performs one lookup against the provider's profile endpoint.
    pub async fn resolve(&self, method: &AuthMethod) -> Result<AuthMethodIdentity> {
        match method {
            AuthMethod::WalletSig { access_token } => wallet_identity(access_token),
            AuthMethod::Discord { access_token } => self.discord_identity(access_token).await,
            AuthMethod::GoogleJwt { token } => google_jwt_identity(token),
            AuthMethod::WebAuthn { assertion } => {
                webauthn_identity(assertion, &self.webauthn_rp_name)
            }
            AuthMethod::StytchOtp { factor, token } => otp_factor_identity(*factor, token),
        }
    }

    async fn discord_identity(&self, access_token: &str) -> Result<AuthMethodIdentity> {
        let response = self
            .http
            .get(&self.discord_endpoint)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "unable to verify account with identity provider: HTTP {}",
                response.status()
            )));
        }

        let profile: Value = response.json().await?;
        let user_id = profile
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation("identity provider response has no user id".into()))?;

        Ok(AuthMethodIdentity::derive(&format!(
            "{user_id}:{}",
            self.discord_client_id
        )))
    }
}

// ============================================================================
// Provider-specific derivations
// ============================================================================

fn wallet_identity(access_token: &str) -> Result<AuthMethodIdentity> {
    let token: Value = serde_json::from_str(access_token)
        .map_err(|_| Error::Validation("unable to parse access token as JSON object".into()))?;

    let address = token
        .get("address")
        .and_then(Value::as_str)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| Error::Validation("no address found in access token".into()))?;

    Ok(AuthMethodIdentity::derive(&format!(
        "{address}:{WALLET_IDENTITY_TAG}"
    )))
}

fn google_jwt_identity(token: &str) -> Result<AuthMethodIdentity> {
    let payload = decode_jwt_payload(token)?;

    let sub = payload
        .get("sub")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Validation("token has no sub claim".into()))?;
    let aud = claim_string(&payload, "aud")
        .ok_or_else(|| Error::Validation("token has no aud claim".into()))?;

    Ok(AuthMethodIdentity::derive(&format!("{sub}:{aud}")))
}

fn webauthn_identity(assertion: &str, rp_name: &str) -> Result<AuthMethodIdentity> {
    let parsed: Value = serde_json::from_str(assertion)
        .map_err(|_| Error::Validation("unable to parse WebAuthn assertion as JSON".into()))?;

    let raw_id = parsed
        .get("rawId")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Validation("no rawId found in WebAuthn assertion".into()))?;

    Ok(AuthMethodIdentity::derive(&format!("{raw_id}:{rp_name}")))
}

fn otp_factor_identity(factor: OtpFactor, token: &str) -> Result<AuthMethodIdentity> {
    let payload = decode_jwt_payload(token)?;

    let session = payload
        .get(OTP_SESSION_CLAIM)
        .ok_or_else(|| Error::Validation("token does not contain a session claim".into()))?;
    let factors = session
        .get("authentication_factors")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Validation("session claim has no authentication factors".into()))?;

    // Each factor kind nests its user-identifying field under a distinct key.
    let (factor_key, id_field) = match factor {
        OtpFactor::Email => ("email_factor", "email_address"),
        OtpFactor::Sms | OtpFactor::WhatsApp => ("phone_number_factor", "phone_number"),
        OtpFactor::Totp => ("authenticator_app_factor", "totp_id"),
    };

    let user_id = factors
        .iter()
        .find_map(|f| f.get(factor_key))
        .and_then(|f| f.get(id_field))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            Error::Validation(format!(
                "could not find {} authentication factor in session",
                factor.as_str()
            ))
        })?;

    let audience = claim_string(&payload, "aud")
        .ok_or_else(|| Error::Validation("token does not contain an audience".into()))?;

    Ok(AuthMethodIdentity::derive(&format!(
        "{}:{}",
        user_id.to_lowercase(),
        audience.to_lowercase()
    )))
}

/// Decode the payload segment of a JWT without verifying its signature.
fn decode_jwt_payload(token: &str) -> Result<Value> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::Validation("invalid token length".into()));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|_| Error::Validation("token payload is not valid base64".into()))?;

    serde_json::from_slice(&bytes)
        .map_err(|_| Error::Validation("token payload is not valid JSON".into()))
}

/// Read a claim that may be a plain string or an array of strings (the
/// audience claim appears in both shapes).
fn claim_string<'a>(payload: &'a Value, claim: &str) -> Option<&'a str> {
    match payload.get(claim)? {
        Value::String(s) => Some(s.as_str()),
        Value::Array(items) => items.first().and_then(Value::as_str),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal one-shot HTTP server answering every request with `body`.
    async fn serve_json(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.flush().await;
                });
            }
        });
        format!("http://{addr}")
    }

    fn make_jwt(payload: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
        format!("{header}.{body}.sig")
    }

    fn otp_jwt(aud: &str) -> String {
        make_jwt(serde_json::json!({
            "aud": [aud],
            OTP_SESSION_CLAIM: {
                "authentication_factors": [
                    { "email_factor": { "email_address": "Alice@Example.org" } }
                ]
            }
        }))
    }

    #[test]
    fn wallet_resolution_is_deterministic() {
        let token = r#"{"address":"0xAbCd1234"}"#;
        let a = wallet_identity(token).expect("resolves");
        let b = wallet_identity(token).expect("resolves");
        assert_eq!(a, b);
    }

    #[test]
    fn wallet_without_address_is_validation_error() {
        assert!(matches!(
            wallet_identity(r#"{"signature":"0x00"}"#),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            wallet_identity("not json"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn distinct_credentials_never_collide() {
        let mut seen = HashSet::new();
        for i in 0..256 {
            let token = format!(r#"{{"address":"0x{i:040x}"}}"#);
            let identity = wallet_identity(&token).expect("resolves");
            assert!(seen.insert(identity), "collision at sample {i}");
        }
    }

    #[test]
    fn google_jwt_uses_sub_and_aud() {
        let token = make_jwt(serde_json::json!({ "sub": "user-1", "aud": "app-1" }));
        let a = google_jwt_identity(&token).expect("resolves");

        let other = make_jwt(serde_json::json!({ "sub": "user-1", "aud": "app-2" }));
        let b = google_jwt_identity(&other).expect("resolves");
        assert_ne!(a, b, "audience must separate identities");

        // Array-shaped audiences resolve to their first element.
        let array_aud = make_jwt(serde_json::json!({ "sub": "user-1", "aud": ["app-1"] }));
        assert_eq!(a, google_jwt_identity(&array_aud).expect("resolves"));
    }

    #[test]
    fn malformed_jwt_is_validation_error() {
        assert!(matches!(
            google_jwt_identity("onlyone.segment"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            google_jwt_identity("a.!!notbase64!!.c"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn webauthn_identity_binds_relying_party() {
        let assertion = r#"{"rawId":"cred-123"}"#;
        let a = webauthn_identity(assertion, "conclave").expect("resolves");
        let b = webauthn_identity(assertion, "other-rp").expect("resolves");
        assert_ne!(a, b);
    }

    #[test]
    fn otp_factor_is_lowercased_before_hashing() {
        let upper = otp_jwt("Project-A");
        let resolved = otp_factor_identity(OtpFactor::Email, &upper).expect("resolves");

        let lower = make_jwt(serde_json::json!({
            "aud": ["project-a"],
            OTP_SESSION_CLAIM: {
                "authentication_factors": [
                    { "email_factor": { "email_address": "alice@example.org" } }
                ]
            }
        }));
        let expected = otp_factor_identity(OtpFactor::Email, &lower).expect("resolves");
        assert_eq!(resolved, expected);
    }

    #[tokio::test]
    async fn discord_resolution_binds_user_id_to_client_id() {
        let endpoint = serve_json(r#"{"id":"4242","username":"alice"}"#).await;

        let mut config = NetworkConfig::default();
        config.discord_client_id = "app-1".to_string();
        let resolver = IdentityResolver::new(&config)
            .expect("resolver")
            .with_discord_endpoint(endpoint);

        let resolved = resolver
            .resolve(&AuthMethod::Discord {
                access_token: "token".to_string(),
            })
            .await
            .expect("resolves");
        assert_eq!(resolved, AuthMethodIdentity::derive("4242:app-1"));
    }

    #[tokio::test]
    async fn resolve_dispatches_pure_variants_to_their_derivations() {
        let resolver =
            IdentityResolver::new(&NetworkConfig::default()).expect("resolver");

        let wallet = AuthMethod::WalletSig {
            access_token: r#"{"address":"0xAbCd1234"}"#.to_string(),
        };
        assert_eq!(
            resolver.resolve(&wallet).await.expect("resolves"),
            wallet_identity(r#"{"address":"0xAbCd1234"}"#).expect("resolves")
        );

        let jwt = make_jwt(serde_json::json!({ "sub": "user-1", "aud": "app-1" }));
        let google = AuthMethod::GoogleJwt { token: jwt.clone() };
        assert_eq!(
            resolver.resolve(&google).await.expect("resolves"),
            google_jwt_identity(&jwt).expect("resolves")
        );
    }

    #[test]
    fn otp_missing_factor_or_audience_is_validation_error() {
        let wrong_factor = otp_jwt("project-a");
        assert!(matches!(
            otp_factor_identity(OtpFactor::Sms, &wrong_factor),
            Err(Error::Validation(_))
        ));

        let no_audience = make_jwt(serde_json::json!({
            OTP_SESSION_CLAIM: {
                "authentication_factors": [
                    { "email_factor": { "email_address": "alice@example.org" } }
                ]
            }
        }));
        assert!(matches!(
            otp_factor_identity(OtpFactor::Email, &no_audience),
            Err(Error::Validation(_))
        ));
    }
}
