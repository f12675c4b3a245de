//! Directory identifiers
//!
//! Validated newtypes for directory object ids and credential key ids, plus
//! the composite [`CredentialId`] token that addresses one credential on one
//! owner object. The token format `<owner id>/<key id>` is persisted by
//! callers as an import id and must keep decoding across versions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ReconcileError, ReconcileResult};

/// Separator between the owner id and the key id in a [`CredentialId`].
///
/// Never valid inside a directory-style identifier.
pub const CREDENTIAL_ID_DELIMITER: char = '/';

/// Check that `value` is a directory-style identifier: hex digits and
/// hyphens, with at least one hex digit.
#[must_use]
pub fn is_directory_id(value: &str) -> bool {
    !value.is_empty()
        && value.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
        && value.chars().any(|c| c.is_ascii_hexdigit())
}

fn validate(value: &str, what: &str) -> ReconcileResult<()> {
    if value.is_empty() {
        return Err(ReconcileError::malformed(value, format!("{what} is empty")));
    }
    if !is_directory_id(value) {
        return Err(ReconcileError::malformed(
            value,
            format!("{what} must contain only hex digits and hyphens"),
        ));
    }
    Ok(())
}

/// Directory-assigned object id (application, service principal, group, user).
///
/// Compared exactly: ids are canonical GUIDs so no case folding is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId(String);

impl ObjectId {
    /// Parse and validate an object id.
    pub fn parse(s: &str) -> ReconcileResult<Self> {
        validate(s, "object id")?;
        Ok(Self(s.to_string()))
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ObjectId {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = ReconcileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate(&value, "object id")?;
        Ok(Self(value))
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

impl From<Uuid> for ObjectId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

/// Credential key id, unique only within its owner object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyId(String);

impl KeyId {
    /// Generate a random v4 key id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse and validate a key id.
    pub fn parse(s: &str) -> ReconcileResult<Self> {
        validate(s, "key id")?;
        Ok(Self(s.to_string()))
    }

    /// Parse a caller-supplied key id, which must additionally be a UUID in
    /// hyphenated form.
    pub fn parse_uuid(s: &str) -> ReconcileResult<Self> {
        let key = Self::parse(s)?;
        match Uuid::parse_str(s) {
            Ok(uuid) if uuid.hyphenated().to_string().eq_ignore_ascii_case(s) => Ok(key),
            _ => Err(ReconcileError::malformed(s, "key id must be a hyphenated UUID")),
        }
    }

    /// Get the key id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for KeyId {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for KeyId {
    type Error = ReconcileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate(&value, "key id")?;
        Ok(Self(value))
    }
}

impl From<KeyId> for String {
    fn from(id: KeyId) -> Self {
        id.0
    }
}

/// Composite identity of a credential: owner object id plus key id.
///
/// This is the only externally visible identity of a credential. It is
/// created with the credential and never reused after removal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CredentialId {
    owner_id: ObjectId,
    key_id: KeyId,
}

impl CredentialId {
    /// Combine an owner id and a key id.
    #[must_use]
    pub fn new(owner_id: ObjectId, key_id: KeyId) -> Self {
        Self { owner_id, key_id }
    }

    /// The owner object id.
    #[must_use]
    pub fn owner_id(&self) -> &ObjectId {
        &self.owner_id
    }

    /// The credential key id.
    #[must_use]
    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// Split into owner id and key id.
    #[must_use]
    pub fn into_parts(self) -> (ObjectId, KeyId) {
        (self.owner_id, self.key_id)
    }

    /// Encode as `<owner id>/<key id>`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{}{}{}",
            self.owner_id, CREDENTIAL_ID_DELIMITER, self.key_id
        )
    }

    /// Decode a token produced by [`CredentialId::encode`].
    ///
    /// Fails if the delimiter is missing or repeated, or if either part is
    /// not a directory-style identifier.
    pub fn decode(token: &str) -> ReconcileResult<Self> {
        let mut parts = token.split(CREDENTIAL_ID_DELIMITER);
        let (Some(owner), Some(key)) = (parts.next(), parts.next()) else {
            return Err(ReconcileError::malformed(
                token,
                format!("expected <owner id>{CREDENTIAL_ID_DELIMITER}<key id>"),
            ));
        };
        if parts.next().is_some() {
            return Err(ReconcileError::malformed(
                token,
                format!("delimiter {CREDENTIAL_ID_DELIMITER:?} appears more than once"),
            ));
        }

        let owner_id =
            ObjectId::parse(owner).map_err(|e| ReconcileError::malformed(token, e.to_string()))?;
        let key_id =
            KeyId::parse(key).map_err(|e| ReconcileError::malformed(token, e.to_string()))?;
        Ok(Self { owner_id, key_id })
    }
}

/// Encode raw owner and key ids, validating both first.
pub fn encode(owner_id: &str, key_id: &str) -> ReconcileResult<String> {
    Ok(CredentialId::new(ObjectId::parse(owner_id)?, KeyId::parse(key_id)?).encode())
}

/// Decode a composite token into its owner id and key id.
pub fn decode(token: &str) -> ReconcileResult<(ObjectId, KeyId)> {
    CredentialId::decode(token).map(CredentialId::into_parts)
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for CredentialId {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl TryFrom<String> for CredentialId {
    type Error = ReconcileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::decode(&value)
    }
}

impl From<CredentialId> for String {
    fn from(id: CredentialId) -> Self {
        id.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const OWNER: &str = "2b3f7a4e-61c2-4f9e-9d0b-6a1c5e8f0d21";
    const KEY: &str = "a9c0e5d1-3b7f-4c2a-8e6d-0f1b2c3d4e5f";

    #[test]
    fn test_encode_is_owner_slash_key() {
        assert_eq!(encode(OWNER, KEY).unwrap(), format!("{OWNER}/{KEY}"));
    }

    #[test]
    fn test_decode_recovers_parts() {
        let (owner, key) = decode(&format!("{OWNER}/{KEY}")).unwrap();
        assert_eq!(owner.as_str(), OWNER);
        assert_eq!(key.as_str(), KEY);
    }

    #[test]
    fn test_decode_preserves_case() {
        let upper = KEY.to_uppercase();
        let id = CredentialId::decode(&format!("{OWNER}/{upper}")).unwrap();
        assert_eq!(id.key_id().as_str(), upper);
    }

    #[test]
    fn test_decode_missing_delimiter() {
        let err = CredentialId::decode(OWNER).unwrap_err();
        assert!(matches!(err, ReconcileError::MalformedIdentifier { .. }));
    }

    #[test]
    fn test_decode_repeated_delimiter() {
        let err = CredentialId::decode(&format!("{OWNER}/{KEY}/{KEY}")).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_decode_rejects_bad_parts() {
        assert!(CredentialId::decode(&format!("/{KEY}")).is_err());
        assert!(CredentialId::decode(&format!("{OWNER}/")).is_err());
        assert!(CredentialId::decode(&format!("not-an-id/{KEY}")).is_err());
        assert!(CredentialId::decode(&format!("{OWNER}/----")).is_err());
    }

    #[test]
    fn test_encode_rejects_delimiter_in_part() {
        assert!(encode("abc/def", KEY).is_err());
        assert!(encode(OWNER, "").is_err());
    }

    #[test]
    fn test_parse_uuid_key_id() {
        assert!(KeyId::parse_uuid(KEY).is_ok());
        assert!(KeyId::parse_uuid("abcdef").is_err());
        assert!(KeyId::parse_uuid("a9c0e5d13b7f4c2a8e6d0f1b2c3d4e5f").is_err());
    }

    #[test]
    fn test_credential_id_serialization() {
        let id = CredentialId::decode(&format!("{OWNER}/{KEY}")).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{OWNER}/{KEY}\""));

        let parsed: CredentialId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
        assert!(serde_json::from_str::<CredentialId>("\"nope\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_round_trip(owner in "[0-9a-fA-F]{1,8}(-[0-9a-fA-F]{1,12}){0,4}",
                           key in "[0-9a-fA-F]{1,8}(-[0-9a-fA-F]{1,12}){0,4}") {
            let token = encode(&owner, &key).unwrap();
            let (o, k) = decode(&token).unwrap();
            prop_assert_eq!(o.as_str(), owner.as_str());
            prop_assert_eq!(k.as_str(), key.as_str());
            prop_assert_eq!(encode(&owner, &key).unwrap(), token);
        }
    }
}
