//! Identity types for GuardianT.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// Longest accepted device identifier, in bytes.
pub const MAX_DEVICE_ID_LEN: usize = 256;

/// Identifier of a device registered with the relay.
///
/// Opaque to the relay. Devices usually use their MAC address
/// (`AA:BB:CC:DD:EE:FF`), but any non-empty string up to
/// [`MAX_DEVICE_ID_LEN`] bytes is accepted.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Parse a device identifier, rejecting empty or over-long values.
    pub fn parse(value: impl Into<String>) -> Result<Self, TypesError> {
        let value = value.into();
        if value.is_empty() || value.len() > MAX_DEVICE_ID_LEN {
            return Err(TypesError::InvalidDeviceId(value));
        }
        Ok(Self(value))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeviceId {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

/// Identifier of an uploaded blob.
///
/// UUID v4, so ids are unguessable. Only the canonical hyphenated form is
/// accepted when parsing, which keeps ids safe to use as file names.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobId(uuid::Uuid);

impl BlobId {
    /// Create a new random BlobId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse a BlobId from its canonical hyphenated text form.
    pub fn parse(value: &str) -> Result<Self, TypesError> {
        if value.len() != 36 {
            return Err(TypesError::InvalidBlobId(value.to_string()));
        }
        uuid::Uuid::try_parse(value)
            .map(Self)
            .map_err(|_| TypesError::InvalidBlobId(value.to_string()))
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_accepts_mac_address() {
        let id = DeviceId::parse("AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(id.as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(id.to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn device_id_rejects_empty() {
        assert_eq!(
            DeviceId::parse(""),
            Err(TypesError::InvalidDeviceId(String::new()))
        );
    }

    #[test]
    fn device_id_rejects_over_long() {
        let long = "x".repeat(MAX_DEVICE_ID_LEN + 1);
        assert!(DeviceId::parse(long).is_err());
        assert!(DeviceId::parse("x".repeat(MAX_DEVICE_ID_LEN)).is_ok());
    }

    #[test]
    fn device_id_serializes_as_plain_string() {
        let id = DeviceId::parse("target1").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"target1\"");

        let empty: Result<DeviceId, _> = serde_json::from_str("\"\"");
        assert!(empty.is_err());
    }

    #[test]
    fn blob_id_is_uuid_v4() {
        let id = BlobId::new();
        assert_eq!(id.as_uuid().get_version_num(), 4);
        assert_ne!(id, BlobId::new());
    }

    #[test]
    fn blob_id_parses_display_form() {
        let original = BlobId::new();
        let restored = BlobId::parse(&original.to_string()).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn blob_id_rejects_path_like_input() {
        assert!(BlobId::parse("../uploads/secret").is_err());
        assert!(BlobId::parse("").is_err());
        // simple (unhyphenated) form is not canonical
        assert!(BlobId::parse(&BlobId::new().as_uuid().simple().to_string()).is_err());
    }
}
