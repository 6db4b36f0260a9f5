//! Credential authority.
//!
//! Devices trade their shared secret for a short-lived HS256 access token.
//! Tokens are stateless: validity is recomputed from the signed claims on
//! every request, and nothing is stored server-side.

use crate::config::{AuthConfig, ConfigError};
use crate::error::{RelayError, Result};
use guardian_types::DeviceId;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Compared against when the presented identity is unknown, so both
/// rejection paths do the same work.
const DUMMY_SECRET: &[u8] = b"guardian-relay-unknown-device-secret";

/// Source of trusted device identities and their secrets.
pub trait TrustRegistry: Send + Sync {
    /// Secret registered for `device`, if it is trusted.
    fn secret_for(&self, device: &DeviceId) -> Option<&[u8]>;

    /// Number of trusted devices.
    fn len(&self) -> usize;

    /// Whether the registry is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `device` is trusted.
    fn contains(&self, device: &DeviceId) -> bool {
        self.secret_for(device).is_some()
    }
}

/// Registry fixed at startup, usually from `[auth.devices]`.
#[derive(Default)]
pub struct StaticRegistry {
    devices: HashMap<DeviceId, Zeroizing<String>>,
}

impl StaticRegistry {
    /// Build a registry from `(device id, secret)` pairs.
    pub fn new(devices: impl IntoIterator<Item = (DeviceId, String)>) -> Self {
        Self {
            devices: devices
                .into_iter()
                .map(|(id, secret)| (id, Zeroizing::new(secret)))
                .collect(),
        }
    }

    /// Build a registry from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a device id is not usable.
    pub fn from_config(config: &AuthConfig) -> std::result::Result<Self, ConfigError> {
        let mut devices = Vec::with_capacity(config.devices.len());
        for (id, secret) in &config.devices {
            let device = DeviceId::parse(id.as_str()).map_err(|e| ConfigError::Invalid {
                field: "auth.devices",
                reason: e.to_string(),
            })?;
            devices.push((device, secret.clone()));
        }
        Ok(Self::new(devices))
    }
}

impl std::fmt::Debug for StaticRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticRegistry")
            .field("devices", &self.devices.len())
            .finish()
    }
}

impl TrustRegistry for StaticRegistry {
    fn secret_for(&self, device: &DeviceId) -> Option<&[u8]> {
        self.devices.get(device).map(|s| s.as_bytes())
    }

    fn len(&self) -> usize {
        self.devices.len()
    }
}

/// Claims embedded in issued tokens.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Device id.
    sub: String,
    /// Issued at (seconds since epoch).
    iat: u64,
    /// Expiry (seconds since epoch).
    exp: u64,
    /// Token id, for log correlation only.
    jti: String,
}

/// A freshly issued access token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Encoded token.
    pub token: String,
    /// Device the token is bound to.
    pub device: DeviceId,
    /// Expiry (seconds since epoch).
    pub expires_at: u64,
    /// Validity window in seconds.
    pub expires_in: u64,
}

/// Issues and verifies device access tokens.
pub struct CredentialAuthority {
    registry: Arc<dyn TrustRegistry>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_secs: u64,
}

impl std::fmt::Debug for CredentialAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialAuthority")
            .field("trusted_devices", &self.registry.len())
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl CredentialAuthority {
    /// Create an authority signing with `secret`.
    pub fn new(registry: Arc<dyn TrustRegistry>, secret: &[u8], ttl_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the caller-supplied clock in `validate_at`.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            registry,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl_secs,
        }
    }

    /// Token validity window in seconds.
    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Number of trusted devices.
    pub fn trusted_devices(&self) -> usize {
        self.registry.len()
    }

    /// Whether `device` is still in the trust registry.
    pub fn is_trusted(&self, device: &DeviceId) -> bool {
        self.registry.contains(device)
    }

    /// Authenticate a device and issue a token valid from now.
    pub fn authenticate(&self, identity: &str, presented_secret: &str) -> Result<IssuedToken> {
        self.authenticate_at(identity, presented_secret, now_secs())
    }

    /// Authenticate a device and issue a token valid from `now`.
    ///
    /// Unknown identities and wrong secrets are indistinguishable to the caller.
    pub fn authenticate_at(
        &self,
        identity: &str,
        presented_secret: &str,
        now: u64,
    ) -> Result<IssuedToken> {
        let device = DeviceId::parse(identity).map_err(|_| RelayError::Unauthorized)?;

        let expected = self.registry.secret_for(&device);
        let matches: bool = expected
            .unwrap_or(DUMMY_SECRET)
            .ct_eq(presented_secret.as_bytes())
            .into();
        if expected.is_none() || !matches {
            return Err(RelayError::Unauthorized);
        }

        self.issue(device, now)
    }

    fn issue(&self, device: DeviceId, now: u64) -> Result<IssuedToken> {
        let expires_at = now.saturating_add(self.ttl_secs);
        let claims = Claims {
            sub: device.to_string(),
            iat: now,
            exp: expires_at,
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| RelayError::Internal(format!("token encoding failed: {e}")))?;

        tracing::debug!(device = %device, jti = %claims.jti, "Issued access token");

        Ok(IssuedToken {
            token,
            device,
            expires_at,
            expires_in: self.ttl_secs,
        })
    }

    /// Validate a token against the system clock.
    pub fn validate(&self, token: &str) -> Result<DeviceId> {
        self.validate_at(token, now_secs())
    }

    /// Validate a token as of `now`, returning the device it is bound to.
    ///
    /// Registry membership is not re-checked; see [`Self::is_trusted`].
    pub fn validate_at(&self, token: &str, now: u64) -> Result<DeviceId> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            tracing::debug!("Rejected token: {}", e);
            RelayError::Unauthorized
        })?;

        if data.claims.exp <= now {
            tracing::debug!(jti = %data.claims.jti, "Rejected expired token");
            return Err(RelayError::Unauthorized);
        }

        DeviceId::parse(data.claims.sub).map_err(|_| RelayError::Unauthorized)
    }
}

/// Credentials for the admin stats endpoint, separate from device tokens.
pub struct AdminCredentials {
    username: Zeroizing<String>,
    password: Zeroizing<String>,
}

impl AdminCredentials {
    /// Create admin credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Zeroizing::new(username.into()),
            password: Zeroizing::new(password.into()),
        }
    }

    /// Constant-time check of a username/password pair.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let user_ok = self.username.as_bytes().ct_eq(username.as_bytes());
        let pass_ok = self.password.as_bytes().ct_eq(password.as_bytes());
        (user_ok & pass_ok).into()
    }
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &*self.username)
            .finish_non_exhaustive()
    }
}

fn now_secs() -> u64 {
    jsonwebtoken::get_current_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE: &str = "AA:BB:CC:DD:EE:FF";
    const SECRET: &str = "s3cr3t";
    const T0: u64 = 1_800_000_000;

    fn registry() -> Arc<StaticRegistry> {
        Arc::new(StaticRegistry::new([
            (DeviceId::parse(DEVICE).unwrap(), SECRET.to_string()),
            (DeviceId::parse("target1").unwrap(), "t1".to_string()),
        ]))
    }

    fn authority() -> CredentialAuthority {
        CredentialAuthority::new(registry(), b"test-signing-key", 1800)
    }

    #[test]
    fn authenticate_then_validate_returns_identity() {
        let auth = authority();
        let issued = auth.authenticate_at(DEVICE, SECRET, T0).unwrap();

        assert_eq!(issued.device.as_str(), DEVICE);
        assert_eq!(issued.expires_at, T0 + 1800);
        assert_eq!(issued.expires_in, 1800);

        for now in [T0, T0 + 1, T0 + 1799] {
            let device = auth.validate_at(&issued.token, now).unwrap();
            assert_eq!(device.as_str(), DEVICE);
        }
    }

    #[test]
    fn token_expires_after_window() {
        let auth = authority();
        let issued = auth.authenticate_at(DEVICE, SECRET, T0).unwrap();

        for now in [T0 + 1800, T0 + 1801, T0 + 86_400] {
            assert!(matches!(
                auth.validate_at(&issued.token, now),
                Err(RelayError::Unauthorized)
            ));
        }
    }

    #[test]
    fn fresh_token_validates_against_system_clock() {
        let auth = authority();
        let issued = auth.authenticate(DEVICE, SECRET).unwrap();
        assert_eq!(auth.validate(&issued.token).unwrap().as_str(), DEVICE);
    }

    #[test]
    fn wrong_secret_and_unknown_device_are_indistinguishable() {
        let auth = authority();

        let wrong = auth.authenticate_at(DEVICE, "nope", T0).unwrap_err();
        let unknown = auth.authenticate_at("11:22:33:44:55:66", SECRET, T0).unwrap_err();
        let empty = auth.authenticate_at("", SECRET, T0).unwrap_err();

        assert!(matches!(wrong, RelayError::Unauthorized));
        assert!(matches!(unknown, RelayError::Unauthorized));
        assert!(matches!(empty, RelayError::Unauthorized));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[test]
    fn secret_prefix_is_rejected() {
        let auth = authority();
        assert!(auth.authenticate_at(DEVICE, "s3cr3", T0).is_err());
        assert!(auth.authenticate_at(DEVICE, "s3cr3t!", T0).is_err());
    }

    #[test]
    fn malformed_and_tampered_tokens_are_rejected() {
        let auth = authority();
        let issued = auth.authenticate_at(DEVICE, SECRET, T0).unwrap();

        assert!(auth.validate_at("", T0).is_err());
        assert!(auth.validate_at("not.a.token", T0).is_err());

        // Claims of one token spliced onto the signature of another.
        let other = auth.authenticate_at("target1", "t1", T0).unwrap();
        let (other_body, _) = other.token.rsplit_once('.').unwrap();
        let (_, signature) = issued.token.rsplit_once('.').unwrap();
        let forged = format!("{other_body}.{signature}");
        assert!(auth.validate_at(&forged, T0).is_err());
    }

    #[test]
    fn token_signed_with_other_key_is_rejected() {
        let issuer = CredentialAuthority::new(registry(), b"other-key", 1800);
        let verifier = authority();

        let issued = issuer.authenticate_at(DEVICE, SECRET, T0).unwrap();
        assert!(verifier.validate_at(&issued.token, T0).is_err());
    }

    #[test]
    fn token_survives_registry_removal() {
        let signing_key = b"shared-key";
        let issuer = CredentialAuthority::new(registry(), signing_key, 1800);
        let issued = issuer.authenticate_at(DEVICE, SECRET, T0).unwrap();

        // Same key, device no longer registered.
        let verifier =
            CredentialAuthority::new(Arc::new(StaticRegistry::default()), signing_key, 1800);
        let device = verifier.validate_at(&issued.token, T0 + 10).unwrap();

        assert_eq!(device.as_str(), DEVICE);
        assert!(!verifier.is_trusted(&device));
        assert!(issuer.is_trusted(&device));
    }

    #[test]
    fn registry_from_config_rejects_empty_id() {
        let mut config = AuthConfig::default();
        config.devices.insert(String::new(), "x".into());
        assert!(StaticRegistry::from_config(&config).is_err());

        let mut config = AuthConfig::default();
        config.devices.insert(DEVICE.into(), SECRET.into());
        let registry = StaticRegistry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&DeviceId::parse(DEVICE).unwrap()));
    }

    #[test]
    fn admin_credentials_require_both_fields() {
        let admin = AdminCredentials::new("admin", "hunter2");
        assert!(admin.verify("admin", "hunter2"));
        assert!(!admin.verify("admin", "hunter3"));
        assert!(!admin.verify("root", "hunter2"));
        assert!(!admin.verify("", ""));
        assert!(!format!("{:?}", admin).contains("hunter2"));
    }
}
