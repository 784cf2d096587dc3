//! Release capabilities.
//!
//! A [`ReleaseCapability`] is minted exactly once, when a message moves from
//! `Active` to `Delivering`, and is persisted atomically with that
//! transition. The content vault refuses to reveal a payload without a
//! capability signed by the engine's [`ReleaseAuthority`] and bound to the
//! payload's integrity digest.

use serde::{Deserialize, Serialize};

use crate::crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair};
use crate::error::CoreError;
use crate::types::{MessageId, Timestamp};

/// Domain separator for capability signatures.
pub const CAPABILITY_DOMAIN: &[u8] = b"lastword-release-capability-v1:";

/// A signed permission to reveal one message's payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseCapability {
    pub message_id: MessageId,
    /// Integrity digest of the sealed payload this capability unlocks.
    pub payload_digest: Blake3Hash,
    pub issued_at: Timestamp,
    pub signature: Ed25519Signature,
}

impl ReleaseCapability {
    /// The bytes covered by the signature.
    pub fn signed_message(
        message_id: &MessageId,
        payload_digest: &Blake3Hash,
        issued_at: Timestamp,
    ) -> Vec<u8> {
        let mut msg = Vec::with_capacity(CAPABILITY_DOMAIN.len() + 16 + 32 + 8);
        msg.extend_from_slice(CAPABILITY_DOMAIN);
        msg.extend_from_slice(message_id.as_bytes());
        msg.extend_from_slice(payload_digest.as_bytes());
        msg.extend_from_slice(&issued_at.to_be_bytes());
        msg
    }

    /// Verify the capability against the authority's public key.
    pub fn verify(&self, authority: &Ed25519PublicKey) -> Result<(), CoreError> {
        let msg = Self::signed_message(&self.message_id, &self.payload_digest, self.issued_at);
        authority.verify(&msg, &self.signature)
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}

/// The signing key the lifecycle uses to mint release capabilities.
#[derive(Debug, Clone)]
pub struct ReleaseAuthority {
    keypair: Keypair,
}

impl ReleaseAuthority {
    /// Wrap an existing keypair.
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// Generate a fresh authority.
    pub fn generate() -> Self {
        Self::new(Keypair::generate())
    }

    /// The key vaults verify capabilities against.
    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    /// Mint a capability for `message_id`.
    pub fn mint(
        &self,
        message_id: MessageId,
        payload_digest: Blake3Hash,
        issued_at: Timestamp,
    ) -> ReleaseCapability {
        let msg = ReleaseCapability::signed_message(&message_id, &payload_digest, issued_at);
        ReleaseCapability {
            message_id,
            payload_digest,
            issued_at,
            signature: self.keypair.sign(&msg),
        }
    }
}
