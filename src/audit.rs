//! Non-repudiation audit bindings
//!
//! A serving node signs `hreq || hres` with its Ed25519 audit key. The
//! requester checks the signature against the node's key from the PKI
//! keyring and keeps verified bindings in an [`AuditLedger`] for dispute
//! resolution.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::directory::NodeId;
use crate::error::{JodiError, Result};
use crate::utils::{from_base64, random_bytes, to_base64};

/// A node's audit signing identity.
pub struct AuditKey {
    node_id: NodeId,
    signing: SigningKey,
}

impl fmt::Debug for AuditKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditKey")
            .field("node_id", &hex::encode(self.node_id))
            .finish_non_exhaustive()
    }
}

impl AuditKey {
    pub fn generate(node_id: NodeId) -> Self {
        Self {
            node_id,
            signing: SigningKey::from_bytes(&random_bytes::<32>()),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Base64 signature over `hreq || hres`.
    pub fn sign(&self, hreq: &[u8], hres: &[u8]) -> String {
        let sig = self.signing.sign(&binding_message(hreq, hres));
        to_base64(&sig.to_bytes())
    }
}

fn binding_message(hreq: &[u8], hres: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(hreq.len() + hres.len());
    msg.extend_from_slice(hreq);
    msg.extend_from_slice(hres);
    msg
}

/// Check one audit signature. Any mismatch is a `VerificationFailure`.
pub fn verify(vk: &VerifyingKey, hreq: &[u8], hres: &[u8], sig_r: &str) -> Result<()> {
    let bytes = from_base64(sig_r)
        .map_err(|_| JodiError::VerificationFailure("audit signature is not base64".to_string()))?;
    let sig = Signature::from_slice(&bytes)
        .map_err(|_| JodiError::VerificationFailure("audit signature has wrong length".to_string()))?;
    vk.verify(&binding_message(hreq, hres), &sig)
        .map_err(|_| JodiError::VerificationFailure("audit signature does not match".to_string()))
}

/// Node id to audit verifying key, as published by the PKI.
#[derive(Clone, Debug, Default)]
pub struct AuditKeyring {
    keys: HashMap<NodeId, VerifyingKey>,
}

impl AuditKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `{"<node id hex>": "<verifying key hex>", ...}` as published by the PKI.
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: HashMap<String, String> = serde_json::from_str(json)?;
        let mut keyring = Self::new();
        for (id, vk) in &entries {
            let node_id: NodeId = decode_hex_array(id)?;
            let vk = VerifyingKey::from_bytes(&decode_hex_array::<32>(vk)?)
                .map_err(|e| JodiError::Crypto(format!("invalid audit key for node {}: {}", id, e)))?;
            keyring.insert(node_id, vk);
        }
        Ok(keyring)
    }

    pub fn insert(&mut self, node_id: NodeId, vk: VerifyingKey) {
        self.keys.insert(node_id, vk);
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&VerifyingKey> {
        self.keys.get(node_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Verify a binding produced by `node_id`; unknown nodes fail verification.
    pub fn verify(&self, node_id: &NodeId, hreq: &[u8], hres: &[u8], sig_r: &str) -> Result<AuditBinding> {
        let vk = self.get(node_id).ok_or_else(|| {
            JodiError::VerificationFailure(format!("no audit key for node {}", hex::encode(node_id)))
        })?;
        verify(vk, hreq, hres, sig_r)?;
        Ok(AuditBinding {
            node_id: *node_id,
            hreq: hreq.to_vec(),
            hres: hres.to_vec(),
            sig_r: sig_r.to_string(),
        })
    }
}

fn decode_hex_array<const N: usize>(encoded: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(encoded)
        .map_err(|e| JodiError::Serialization(format!("{:?} is not hex: {}", encoded, e)))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| JodiError::Serialization(format!("expected {} bytes, got {}", N, bytes.len())))
}

/// Verified proof that a node produced `hres` for a request matching `hreq`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditBinding {
    pub node_id: NodeId,
    pub hreq: Vec<u8>,
    pub hres: Vec<u8>,
    pub sig_r: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuditOperation {
    Evaluate,
    Publish,
    Retrieve,
}

#[derive(Clone, Debug)]
pub struct AuditRecord {
    pub operation: AuditOperation,
    pub binding: AuditBinding,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only in-memory ledger of verified bindings.
#[derive(Clone, Debug, Default)]
pub struct AuditLedger {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl AuditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, operation: AuditOperation, binding: AuditBinding) {
        self.records.lock().await.push(AuditRecord {
            operation,
            binding,
            recorded_at: Utc::now(),
        });
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn snapshot(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }

    /// Hand every record to the dispute-resolution side and clear the ledger.
    pub async fn drain(&self) -> Vec<AuditRecord> {
        std::mem::take(&mut *self.records.lock().await)
    }
}
