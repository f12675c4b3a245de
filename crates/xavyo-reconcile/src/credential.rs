//! Credential model
//!
//! Desired credentials ([`CredentialSpec`]) are validated and resolved into a
//! [`NewCredential`] before any remote call. What the directory reports back
//! is a [`CredentialRecord`], which never carries secret material.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ReconcileError, ReconcileResult};
use crate::ids::{KeyId, ObjectId};
use crate::window::{self, TimeWindow};

/// Kind of object a credential is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    Application,
    ServicePrincipal,
}

impl OwnerKind {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::Application => "application",
            OwnerKind::ServicePrincipal => "service_principal",
        }
    }
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OwnerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "application" => Ok(OwnerKind::Application),
            "service_principal" | "serviceprincipal" => Ok(OwnerKind::ServicePrincipal),
            _ => Err(format!("Unknown owner kind: {s}")),
        }
    }
}

/// Password or certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Password,
    Certificate,
}

impl CredentialKind {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::Password => "password",
            CredentialKind::Certificate => "certificate",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Certificate key type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertificateType {
    AsymmetricX509Cert,
    Symmetric,
}

impl CertificateType {
    /// Directory wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateType::AsymmetricX509Cert => "AsymmetricX509Cert",
            CertificateType::Symmetric => "Symmetric",
        }
    }
}

impl FromStr for CertificateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AsymmetricX509Cert" => Ok(CertificateType::AsymmetricX509Cert),
            "Symmetric" => Ok(CertificateType::Symmetric),
            _ => Err(format!("Unknown certificate type: {s}")),
        }
    }
}

/// Certificate key usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum KeyUsage {
    #[default]
    Verify,
    Sign,
}

impl KeyUsage {
    /// Directory wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyUsage::Verify => "Verify",
            KeyUsage::Sign => "Sign",
        }
    }
}

impl FromStr for KeyUsage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Verify" => Ok(KeyUsage::Verify),
            "Sign" => Ok(KeyUsage::Sign),
            _ => Err(format!("Unknown key usage: {s}")),
        }
    }
}

/// How certificate key material is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateEncoding {
    #[default]
    Pem,
    Base64,
}

/// A credential as reported by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Key id as returned, compared exactly.
    pub key_id: String,
    pub kind: CredentialKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_type: Option<CertificateType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<KeyUsage>,
}

impl CredentialRecord {
    /// The record a directory is expected to report for `credential`.
    #[must_use]
    pub fn from_new(credential: &NewCredential) -> Self {
        let (certificate_type, usage) = match &credential.material {
            PreparedMaterial::Password(_) => (None, None),
            PreparedMaterial::Certificate { key_type, usage, .. } => (Some(*key_type), Some(*usage)),
        };
        Self {
            key_id: credential.key_id.to_string(),
            kind: credential.kind(),
            description: credential.description.clone(),
            start: credential.window.start,
            end: credential.window.end,
            certificate_type,
            usage,
        }
    }

    /// Validity window of the record.
    #[must_use]
    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start,
            end: self.end,
        }
    }
}

/// Secret material of a desired credential.
#[derive(Debug)]
pub enum CredentialMaterial {
    /// Password value. Never returned by the directory after creation.
    Password { value: SecretString },
    /// Certificate or symmetric key.
    Certificate {
        key_type: CertificateType,
        usage: KeyUsage,
        encoding: CertificateEncoding,
        value: String,
    },
}

/// A desired credential as declared by configuration.
#[derive(Debug)]
pub struct CredentialSpec {
    pub owner_kind: OwnerKind,
    pub owner_id: ObjectId,
    /// Caller-supplied key id; generated when absent.
    pub key_id: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub end_date_relative: Option<String>,
    pub material: CredentialMaterial,
}

impl CredentialSpec {
    /// Desired password credential.
    pub fn password(owner_kind: OwnerKind, owner_id: ObjectId, value: impl Into<String>) -> Self {
        Self::with_material(
            owner_kind,
            owner_id,
            CredentialMaterial::Password {
                value: SecretString::new(value.into()),
            },
        )
    }

    /// Desired certificate credential.
    pub fn certificate(
        owner_kind: OwnerKind,
        owner_id: ObjectId,
        key_type: CertificateType,
        encoding: CertificateEncoding,
        value: impl Into<String>,
    ) -> Self {
        Self::with_material(
            owner_kind,
            owner_id,
            CredentialMaterial::Certificate {
                key_type,
                usage: KeyUsage::default(),
                encoding,
                value: value.into(),
            },
        )
    }

    fn with_material(owner_kind: OwnerKind, owner_id: ObjectId, material: CredentialMaterial) -> Self {
        Self {
            owner_kind,
            owner_id,
            key_id: None,
            description: None,
            start_date: None,
            end_date: None,
            end_date_relative: None,
            material,
        }
    }

    /// Set a caller-supplied key id.
    #[must_use]
    pub fn key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set an absolute RFC3339 start.
    #[must_use]
    pub fn start_date(mut self, start: impl Into<String>) -> Self {
        self.start_date = Some(start.into());
        self
    }

    /// Set an absolute RFC3339 end.
    #[must_use]
    pub fn end_date(mut self, end: impl Into<String>) -> Self {
        self.end_date = Some(end.into());
        self
    }

    /// Set an end relative to creation time, e.g. `"8760h"`.
    #[must_use]
    pub fn end_date_relative(mut self, relative: impl Into<String>) -> Self {
        self.end_date_relative = Some(relative.into());
        self
    }

    /// Password or certificate.
    #[must_use]
    pub fn kind(&self) -> CredentialKind {
        match self.material {
            CredentialMaterial::Password { .. } => CredentialKind::Password,
            CredentialMaterial::Certificate { .. } => CredentialKind::Certificate,
        }
    }

    /// Validate and resolve into the payload sent to the directory.
    pub fn prepare(&self, now: DateTime<Utc>) -> ReconcileResult<NewCredential> {
        let key_id = match &self.key_id {
            Some(raw) => KeyId::parse_uuid(raw)?,
            None => KeyId::generate(),
        };

        let end_relative = self
            .end_date_relative
            .as_deref()
            .map(window::parse_relative_duration)
            .transpose()?;
        let window = window::resolve(
            self.start_date.as_deref(),
            self.end_date.as_deref(),
            end_relative,
            now,
        )?;

        let material = match &self.material {
            CredentialMaterial::Password { value } => {
                if value.expose_secret().is_empty() {
                    return Err(ReconcileError::invalid_credential("password value is empty"));
                }
                PreparedMaterial::Password(SecretString::new(value.expose_secret().clone()))
            }
            CredentialMaterial::Certificate {
                key_type,
                usage,
                encoding,
                value,
            } => PreparedMaterial::Certificate {
                key_type: *key_type,
                usage: *usage,
                key: normalize_key_material(*encoding, value)?,
            },
        };

        Ok(NewCredential {
            key_id,
            description: self.description.clone(),
            window,
            material,
        })
    }
}

/// Validated material ready to send.
#[derive(Debug)]
pub enum PreparedMaterial {
    Password(SecretString),
    Certificate {
        key_type: CertificateType,
        usage: KeyUsage,
        /// Standard base64 of the DER bytes.
        key: String,
    },
}

/// Resolved credential payload for a create call.
#[derive(Debug)]
pub struct NewCredential {
    pub key_id: KeyId,
    pub description: Option<String>,
    pub window: TimeWindow,
    pub material: PreparedMaterial,
}

impl NewCredential {
    /// Password or certificate.
    #[must_use]
    pub fn kind(&self) -> CredentialKind {
        match self.material {
            PreparedMaterial::Password(_) => CredentialKind::Password,
            PreparedMaterial::Certificate { .. } => CredentialKind::Certificate,
        }
    }
}

/// Decode key material and re-encode it as standard base64.
pub fn normalize_key_material(encoding: CertificateEncoding, value: &str) -> ReconcileResult<String> {
    let bytes = match encoding {
        CertificateEncoding::Pem => decode_pem(value)?,
        CertificateEncoding::Base64 => {
            let compact: String = value.split_whitespace().collect();
            STANDARD
                .decode(compact)
                .map_err(|e| ReconcileError::invalid_credential(format!("invalid base64: {e}")))?
        }
    };
    if bytes.is_empty() {
        return Err(ReconcileError::invalid_credential("key material is empty"));
    }
    Ok(STANDARD.encode(bytes))
}

/// DER bytes of a PEM block.
fn decode_pem(value: &str) -> ReconcileResult<Vec<u8>> {
    let block = ::pem::parse(value.trim())
        .map_err(|e| ReconcileError::invalid_credential(format!("failed to parse PEM: {e}")))?;
    Ok(block.contents().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const PEM: &str = "-----BEGIN CERTIFICATE-----\nAAECAwQF\nBgcICQ==\n-----END CERTIFICATE-----\n";

    fn owner() -> ObjectId {
        ObjectId::parse("11111111-2222-3333-4444-555555555555").unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_prepare_password_generates_key_id() {
        let spec = CredentialSpec::password(OwnerKind::Application, owner(), "s3cret")
            .end_date("2099-01-01T01:02:03Z");
        let first = spec.prepare(now()).unwrap();
        let second = spec.prepare(now()).unwrap();

        assert_ne!(first.key_id, second.key_id);
        assert_eq!(first.kind(), CredentialKind::Password);
        assert_eq!(first.window.start, now());
    }

    #[test]
    fn test_prepare_keeps_supplied_key_id() {
        let key = "8c2b1f0e-4d3a-4b59-9e7d-6a5c4b3a2f10";
        let spec = CredentialSpec::password(OwnerKind::Application, owner(), "s3cret").key_id(key);
        assert_eq!(spec.prepare(now()).unwrap().key_id.as_str(), key);
    }

    #[test]
    fn test_prepare_rejects_non_uuid_key_id() {
        let spec = CredentialSpec::password(OwnerKind::Application, owner(), "s3cret").key_id("abc");
        assert!(spec.prepare(now()).unwrap_err().is_validation());
    }

    #[test]
    fn test_prepare_relative_end() {
        let spec = CredentialSpec::password(OwnerKind::ServicePrincipal, owner(), "s3cret")
            .end_date_relative("8760h");
        let prepared = spec.prepare(now()).unwrap();
        assert_eq!(prepared.window.end, now() + chrono::Duration::hours(8760));
    }

    #[test]
    fn test_prepare_conflicting_end() {
        let spec = CredentialSpec::password(OwnerKind::Application, owner(), "s3cret")
            .end_date("2099-01-01T01:02:03Z")
            .end_date_relative("8760h");
        assert!(matches!(
            spec.prepare(now()).unwrap_err(),
            ReconcileError::ConflictingConfiguration { .. }
        ));
    }

    #[test]
    fn test_prepare_empty_password() {
        let spec = CredentialSpec::password(OwnerKind::Application, owner(), "");
        assert!(matches!(
            spec.prepare(now()).unwrap_err(),
            ReconcileError::InvalidCredential { .. }
        ));
    }

    #[test]
    fn test_prepare_pem_certificate() {
        let spec = CredentialSpec::certificate(
            OwnerKind::ServicePrincipal,
            owner(),
            CertificateType::AsymmetricX509Cert,
            CertificateEncoding::Pem,
            PEM,
        );
        let prepared = spec.prepare(now()).unwrap();
        match prepared.material {
            PreparedMaterial::Certificate { key, key_type, usage } => {
                assert_eq!(key, STANDARD.encode([0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9]));
                assert_eq!(key_type, CertificateType::AsymmetricX509Cert);
                assert_eq!(usage, KeyUsage::Verify);
            }
            PreparedMaterial::Password(_) => panic!("expected certificate"),
        }
    }

    #[test]
    fn test_normalize_pem_ignores_surrounding_text() {
        let armored = format!("  \n{PEM}\n");
        let key = normalize_key_material(CertificateEncoding::Pem, &armored).unwrap();
        assert_eq!(key, STANDARD.encode([0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9]));

        let empty = "-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----\n";
        assert!(normalize_key_material(CertificateEncoding::Pem, empty).is_err());
    }

    #[test]
    fn test_normalize_base64_with_whitespace() {
        let key = normalize_key_material(CertificateEncoding::Base64, "AAEC\nAwQF").unwrap();
        assert_eq!(key, "AAECAwQF");
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_key_material(CertificateEncoding::Pem, "AAECAwQF").is_err());
        assert!(normalize_key_material(
            CertificateEncoding::Pem,
            "-----BEGIN CERTIFICATE-----\nAAEC"
        )
        .is_err());
        assert!(normalize_key_material(
            CertificateEncoding::Pem,
            "-----BEGIN CERTIFICATE-----\nAAEC\n-----END PRIVATE KEY-----\n"
        )
        .is_err());
        assert!(normalize_key_material(CertificateEncoding::Base64, "!!!").is_err());
        assert!(normalize_key_material(CertificateEncoding::Base64, "").is_err());
    }

    #[test]
    fn test_record_from_new_has_no_secret() {
        let spec = CredentialSpec::password(OwnerKind::Application, owner(), "s3cret")
            .description("terraform");
        let prepared = spec.prepare(now()).unwrap();
        let record = CredentialRecord::from_new(&prepared);

        assert_eq!(record.key_id, prepared.key_id.as_str());
        assert_eq!(record.description.as_deref(), Some("terraform"));
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("s3cret"));
    }
}
