//! Records of a GenesisGraph provenance document
//!
//! These are immutable snapshots handed to the validators by whoever parsed
//! the document. Nothing in this crate mutates them.

use crate::delegation::DelegationChain;
use crate::error::{GenesisError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;

/// Point in time used for every temporal check
pub type Timestamp = DateTime<Utc>;

/// Length of a SHA-256 digest
pub const HASH_LEN: usize = 32;

/// A SHA-256 digest
///
/// Serialized as lowercase hex. Deserialization also accepts the
/// `sha256:` prefix used in GenesisGraph documents.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// Wrap raw digest bytes
    pub const fn new(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Copy from a slice; anything other than 32 bytes is rejected
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; HASH_LEN] = bytes.try_into().map_err(|_| {
            GenesisError::InvalidHash(format!(
                "expected {} bytes, got {}",
                HASH_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Parse hex, with or without a `sha256:` prefix
    pub fn from_hex(s: &str) -> Result<Self> {
        let hex_str = s.strip_prefix("sha256:").unwrap_or(s);
        let bytes = hex::decode(hex_str)?;
        Self::from_slice(&bytes)
    }

    /// SHA-256 of arbitrary bytes (no domain separation)
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Comparison whose timing does not depend on where the bytes differ
    pub fn ct_eq(&self, other: &Hash) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<[u8; HASH_LEN]> for Hash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Reference to a versioned entity, written `id@version`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub id: String,
    pub version: String,
}

impl EntityRef {
    /// Create a reference
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }

    /// Parse `id@version`
    ///
    /// The version is taken after the last `@`, so ids such as
    /// `did:web:user@example.com` keep their own `@`.
    pub fn parse(s: &str) -> Result<Self> {
        let (id, version) = s
            .rsplit_once('@')
            .ok_or_else(|| GenesisError::InvalidReference(format!("expected 'id@version', got '{}'", s)))?;
        if id.is_empty() || version.is_empty() {
            return Err(GenesisError::InvalidReference(format!(
                "empty id or version in '{}'",
                s
            )));
        }
        Ok(Self::new(id, version))
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

impl FromStr for EntityRef {
    type Err = GenesisError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for EntityRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EntityRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        EntityRef::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Lifecycle timestamps shared by entities and tools
///
/// Evaluated against a caller supplied time; see [`crate::lifecycle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    /// When the record came into existence
    pub created_at: Timestamp,

    /// Activation time (Created → Active)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<Timestamp>,

    /// Deprecation mark; still usable with a warning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_at: Option<Timestamp>,

    /// Revocation event (terminal, not retroactive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<Timestamp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<String>,

    /// Expiry (terminal)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<Timestamp>,

    /// Suggested substitute once revoked or expired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<EntityRef>,
}

impl Lifecycle {
    /// Lifecycle of a record created at `created_at` with no other events
    pub fn created(created_at: Timestamp) -> Self {
        Self {
            created_at,
            valid_from: None,
            deprecated_at: None,
            revoked_at: None,
            revocation_reason: None,
            valid_until: None,
            replacement: None,
        }
    }

    pub fn with_valid_from(mut self, at: Timestamp) -> Self {
        self.valid_from = Some(at);
        self
    }

    pub fn with_deprecation(mut self, at: Timestamp) -> Self {
        self.deprecated_at = Some(at);
        self
    }

    pub fn with_revocation(mut self, at: Timestamp, reason: impl Into<String>) -> Self {
        self.revoked_at = Some(at);
        self.revocation_reason = Some(reason.into());
        self
    }

    pub fn with_expiry(mut self, at: Timestamp) -> Self {
        self.valid_until = Some(at);
        self
    }

    pub fn with_replacement(mut self, replacement: EntityRef) -> Self {
        self.replacement = Some(replacement);
        self
    }
}

/// A versioned artifact in the provenance graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub version: String,

    /// SHA-256 of the artifact content
    pub content_hash: Hash,

    /// Parents in the derivation DAG
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub derived_from: Vec<EntityRef>,

    pub lifecycle: Lifecycle,
}

impl Entity {
    /// Create an entity with no parents
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        content_hash: Hash,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            content_hash,
            derived_from: Vec::new(),
            lifecycle: Lifecycle::created(created_at),
        }
    }

    /// Add a parent; repeated parents are kept once
    pub fn derived_from(mut self, parent: EntityRef) -> Self {
        if !self.derived_from.contains(&parent) {
            self.derived_from.push(parent);
        }
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// `id@version` reference to this entity
    pub fn reference(&self) -> EntityRef {
        EntityRef::new(self.id.clone(), self.version.clone())
    }

    /// Check artifact bytes against the declared content hash
    pub fn verify_content(&self, content: &[u8]) -> bool {
        Hash::digest(content).ct_eq(&self.content_hash)
    }
}

/// Kind of agent that performed an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolKind {
    Software,
    Machine,
    Human,
    #[serde(rename = "AIModel")]
    AiModel,
    Service,
}

/// Optional licensing window of a tool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<Timestamp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<Timestamp>,
}

/// Software, human, or model that performed operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    pub id: String,
    pub version: String,

    #[serde(rename = "type")]
    pub kind: ToolKind,

    /// `created_at` is the release time
    pub lifecycle: Lifecycle,

    /// CVEs that motivated a revocation or deprecation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cve_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_window: Option<ValidityWindow>,
}

impl Tool {
    /// Create a tool released at `released_at`
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        kind: ToolKind,
        released_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            kind,
            lifecycle: Lifecycle::created(released_at),
            cve_ids: Vec::new(),
            license_window: None,
        }
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_cve(mut self, cve: impl Into<String>) -> Self {
        self.cve_ids.push(cve.into());
        self
    }

    pub fn with_license_window(mut self, window: ValidityWindow) -> Self {
        self.license_window = Some(window);
        self
    }

    pub fn reference(&self) -> EntityRef {
        EntityRef::new(self.id.clone(), self.version.clone())
    }
}

/// Reference into a transparency log proving an attestation was logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransparencyLogRef {
    /// DID or URL of the log
    pub log_id: String,

    /// Leaf index of the entry
    pub entry_index: u64,

    /// Tree size the inclusion proof was computed against
    pub tree_size: u64,

    /// Audit path, leaf to root
    #[serde(default)]
    pub inclusion_proof: Vec<Hash>,

    /// Consistency proof from the previously known tree state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency_proof: Option<Vec<Hash>>,

    /// Root of the tree at `tree_size`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_hash: Option<Hash>,
}

/// A signed tree head observed for a log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeState {
    pub tree_size: u64,
    pub root_hash: Hash,
}

impl TreeState {
    pub fn new(tree_size: u64, root_hash: Hash) -> Self {
        Self {
            tree_size,
            root_hash,
        }
    }
}

/// A signed claim about an operation or entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub signer_id: String,

    /// Signature over `payload`; verified by an external [`crate::crypto::SignatureVerifier`]
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,

    /// Bytes that were signed and submitted to the transparency logs
    #[serde(default, with = "base64_bytes")]
    pub payload: Vec<u8>,

    pub issued_at: Timestamp,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<Timestamp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transparency_entries: Vec<TransparencyLogRef>,
}

impl Attestation {
    /// Create an unsigned attestation over `payload`
    pub fn new(signer_id: impl Into<String>, payload: Vec<u8>, issued_at: Timestamp) -> Self {
        Self {
            signer_id: signer_id.into(),
            signature: Vec::new(),
            payload,
            issued_at,
            expires_at: None,
            revoked_at: None,
            revocation_reason: None,
            transparency_entries: Vec::new(),
        }
    }

    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = signature;
        self
    }

    pub fn with_expiry(mut self, at: Timestamp) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn with_revocation(mut self, at: Timestamp, reason: impl Into<String>) -> Self {
        self.revoked_at = Some(at);
        self.revocation_reason = Some(reason.into());
        self
    }

    pub fn with_transparency_entry(mut self, entry: TransparencyLogRef) -> Self {
        self.transparency_entries.push(entry);
        self
    }

    /// RFC 6962 leaf hash of the logged payload
    pub fn leaf_hash(&self) -> Hash {
        crate::merkle::hash_leaf(&self.payload)
    }

    /// Human readable label used in findings
    pub fn label(&self) -> String {
        format!("attestation:{}@{}", self.signer_id, self.issued_at.to_rfc3339())
    }
}

/// Everything a caller hands over for validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_version: Option<String>,

    #[serde(default)]
    pub entities: Vec<Entity>,

    #[serde(default)]
    pub tools: Vec<Tool>,

    #[serde(default)]
    pub attestations: Vec<Attestation>,

    #[serde(default)]
    pub delegations: Vec<DelegationChain>,
}

impl ProvenanceDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_attestation(mut self, attestation: Attestation) -> Self {
        self.attestations.push(attestation);
        self
    }

    pub fn with_delegation(mut self, chain: DelegationChain) -> Self {
        self.delegations.push(chain);
        self
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(GenesisError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(GenesisError::from)
    }
}

/// Base64 serialization for opaque byte fields
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("base64:").unwrap_or(&s);
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
