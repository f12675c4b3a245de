//! Credential matching by key id.

use crate::credential::CredentialRecord;

/// A record that carries a credential key id.
pub trait KeyedCredential {
    /// The key id as reported by the directory.
    fn key_id(&self) -> &str;
}

impl KeyedCredential for CredentialRecord {
    fn key_id(&self) -> &str {
        &self.key_id
    }
}

/// Find the credential whose key id equals `key_id`.
///
/// Comparison is exact and case-sensitive. If the directory ever reports the
/// same key id twice, the first record in list order wins.
pub fn find_by_key_id<'a, T>(records: &'a [T], key_id: &str) -> Option<&'a T>
where
    T: KeyedCredential,
{
    records.iter().find(|r| r.key_id() == key_id)
}

/// Check if any record carries `key_id`.
pub fn contains_key_id<T: KeyedCredential>(records: &[T], key_id: &str) -> bool {
    find_by_key_id(records, key_id).is_some()
}
