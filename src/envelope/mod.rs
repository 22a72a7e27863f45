//! Envelope encryption
//!
//! Keys form a three-level hierarchy: a system key per service/product is wrapped by the
//! KMS, an intermediate key per partition is wrapped by the system key, and every payload
//! gets its own data row key wrapped by the intermediate key.

pub mod cipher;
pub mod encryption;
pub mod manager;

pub use cipher::{EnvelopeCipher, EnvelopeEncryptResult};
pub use encryption::EnvelopeEncryption;
pub use manager::{EnvelopeKeyManager, ExpiredKeyObserver};

use serde::{Deserialize, Serialize};

/// Metadata for a key including its ID and creation timestamp
///
/// Ordered by id, then creation time, so the newest key of an id sorts last.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyMeta {
    #[serde(rename = "KeyId")]
    pub id: String,
    #[serde(rename = "Created")]
    pub created: i64,
}

impl KeyMeta {
    /// Creates a new KeyMeta
    pub fn new(id: impl Into<String>, created: i64) -> Self {
        KeyMeta {
            id: id.into(),
            created,
        }
    }

    /// Returns true if this refers to the latest version of the key (created == 0)
    pub fn is_latest(&self) -> bool {
        self.created == 0
    }

    /// Range covering every version of `id`, for latest-key lookups
    pub(crate) fn all_versions(id: &str) -> std::ops::RangeInclusive<KeyMeta> {
        KeyMeta::new(id, i64::MIN)..=KeyMeta::new(id, i64::MAX)
    }
}

impl std::fmt::Display for KeyMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.id, self.created)
    }
}

/// A wrapped key and the metadata needed to unwrap it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvelopeKeyRecord {
    #[serde(rename = "Revoked", default, skip_serializing_if = "Option::is_none")]
    pub revoked: Option<bool>,
    #[serde(rename = "Created")]
    pub created: i64,
    #[serde(rename = "Key", with = "serde_base64")]
    pub encrypted_key: Vec<u8>,
    #[serde(rename = "ParentKeyMeta", default, skip_serializing_if = "Option::is_none")]
    pub parent_key_meta: Option<KeyMeta>,
}

impl EnvelopeKeyRecord {
    /// Creates an unrevoked record
    pub fn new(created: i64, encrypted_key: Vec<u8>, parent_key_meta: Option<KeyMeta>) -> Self {
        Self {
            revoked: None,
            created,
            encrypted_key,
            parent_key_meta,
        }
    }

    /// Whether the record is flagged revoked
    pub fn is_revoked(&self) -> bool {
        self.revoked.unwrap_or(false)
    }
}

/// Encrypted payload plus the wrapped data row key needed to decrypt it
///
/// This is the unit callers persist. Its JSON form is stable:
///
/// ```
/// use rowcrypt::{DataRowRecord, EnvelopeKeyRecord, KeyMeta};
///
/// let drr = DataRowRecord {
///     data: b"ct".to_vec(),
///     key: EnvelopeKeyRecord::new(1, b"wk".to_vec(), Some(KeyMeta::new("_IK_p_s_p", 2))),
/// };
///
/// assert_eq!(
///     serde_json::to_string(&drr).unwrap(),
///     r#"{"Data":"Y3Q=","Key":{"Created":1,"Key":"d2s=","ParentKeyMeta":{"KeyId":"_IK_p_s_p","Created":2}}}"#
/// );
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataRowRecord {
    #[serde(rename = "Data", with = "serde_base64")]
    pub data: Vec<u8>,
    #[serde(rename = "Key")]
    pub key: EnvelopeKeyRecord,
}

impl DataRowRecord {
    /// Serializes the record to its JSON form
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a record from its JSON form
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

mod serde_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
