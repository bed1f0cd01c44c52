//! Encrypted publish/retrieve against message stores
//!
//! A record lives at `idx = base64(sha256(call_id))` on the `n_ms` stores
//! closest to the call id. Publishing writes to all of them. Retrieval
//! races the replicas of each candidate index and stops at the first
//! record that verifies and decrypts.

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{CallId, ProtocolContext, Timing};
use crate::audit::{AuditBinding, AuditOperation};
use crate::billing::billing_hash;
use crate::crypto::cipher::{self, Ciphertext};
use crate::crypto::groupsig::GroupSignature;
use crate::dht::{self, peers_string};
use crate::directory::Node;
use crate::error::{JodiError, Result};
use crate::messages::{
    not_found_digest, publish_pp, retrieve_pp, storage_signed_bytes, NodeRequest, NodeResponse, PublishRequest,
    RetrieveRequest, StoredRecord, PUBLISH_OK,
};
use crate::utils::{sha256, to_base64};

/// Outcome of a publish fan-out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishReceipt {
    pub idx: String,
    /// Stores asked to hold the record
    pub contacted: usize,
    /// Stores whose acknowledgement carried a valid audit binding
    pub acknowledged: usize,
    pub timing: Timing,
}

/// Outcome of a retrieval; `plaintext` is `None` when nothing decrypted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Retrieval {
    pub plaintext: Option<Vec<u8>>,
    pub timing: Timing,
}

pub struct StorageProtocol {
    ctx: Arc<ProtocolContext>,
}

/// Storage index for a call id.
pub fn storage_index(call_id: &CallId) -> String {
    to_base64(&sha256(&[call_id]))
}

impl StorageProtocol {
    pub fn new(ctx: Arc<ProtocolContext>) -> Self {
        Self { ctx }
    }

    pub async fn publish(&self, call_id: &CallId, plaintext: &[u8]) -> Result<PublishReceipt> {
        let started = Instant::now();
        let directory = self.ctx.directory.snapshot().await;
        let stores = dht::select(&directory.stores, call_id, self.ctx.config.n_ms)?;

        let idx = storage_index(call_id);
        let ctx = cipher::encrypt(call_id, plaintext)?.encode();
        let bt = self.ctx.credentials.bt.as_str().to_string();
        let peers = peers_string(&stores);
        let signed = storage_signed_bytes(&publish_pp(&idx, &ctx), &billing_hash(&bt, &peers));
        let sig = self.ctx.credentials.gsk.sign(&signed)?.encode()?;
        let request = PublishRequest {
            idx: idx.clone(),
            ctx,
            sig,
            bt,
            peers,
        };

        let network_started = Instant::now();
        let responses = join_all(stores.iter().map(|node| self.publish_one(node, request.clone(), &signed))).await;
        let network = network_started.elapsed();

        let mut acknowledged = 0;
        for (node, response) in stores.iter().zip(responses) {
            match response {
                Ok(binding) => {
                    self.ctx.ledger.record(AuditOperation::Publish, binding).await;
                    acknowledged += 1;
                }
                Err(e) => warn!(node = %node.fqdn, "publish not acknowledged: {}", e),
            }
        }

        if acknowledged == 0 {
            return Err(JodiError::ProtocolFailure(format!(
                "no store acknowledged the publish of {}",
                idx
            )));
        }
        info!(%idx, acknowledged, contacted = stores.len(), "published record");

        Ok(PublishReceipt {
            idx,
            contacted: stores.len(),
            acknowledged,
            timing: Timing::from_elapsed(started.elapsed(), network),
        })
    }

    async fn publish_one(&self, node: &Node, request: PublishRequest, signed: &[u8]) -> Result<AuditBinding> {
        let send = self.ctx.transport.send(node, NodeRequest::Publish(request));
        let body = tokio::time::timeout(self.ctx.config.retrieve_timeout, send)
            .await
            .map_err(|_| JodiError::TransportFailure(format!("store {} timed out", node.fqdn)))??
            .into_published()?;
        self.ctx.keyring.verify(&node.id, signed, PUBLISH_OK, &body.sig_r)
    }

    pub async fn retrieve(&self, call_ids: &[CallId]) -> Result<Retrieval> {
        let started = Instant::now();
        let directory = self.ctx.directory.snapshot().await;
        if directory.stores.is_empty() {
            return Err(JodiError::ProtocolFailure("node directory is empty".to_string()));
        }
        let per_candidate = self.ctx.config.stores_per_candidate(call_ids.len());
        let call_id_by_idx: HashMap<String, CallId> =
            call_ids.iter().map(|cid| (storage_index(cid), *cid)).collect();

        let mut lookups = FuturesUnordered::new();
        for call_id in call_ids {
            let stores = dht::select(&directory.stores, call_id, per_candidate)?;
            let request = self.retrieve_request(&storage_index(call_id), &stores)?;
            lookups.push(self.race_replicas(stores, request));
        }

        let network_started = Instant::now();
        let mut network = None;
        let search = async {
            while let Some(found) = lookups.next().await {
                let Some(record) = found else { continue };
                match open_record(&call_id_by_idx, &record) {
                    Ok(plaintext) => {
                        network = Some(network_started.elapsed());
                        return Some(plaintext);
                    }
                    Err(e) => warn!(idx = %record.idx, "record did not decrypt: {}", e),
                }
            }
            None
        };
        let plaintext = match tokio::time::timeout(self.ctx.config.retrieve_timeout, search).await {
            Ok(plaintext) => plaintext,
            Err(_) => {
                warn!(candidates = call_ids.len(), "retrieval timed out");
                None
            }
        };
        let network = network.unwrap_or_else(|| network_started.elapsed());

        debug!(candidates = call_ids.len(), found = plaintext.is_some(), "retrieve finished");
        Ok(Retrieval {
            plaintext,
            timing: Timing::from_elapsed(started.elapsed(), network),
        })
    }

    fn retrieve_request(&self, idx: &str, stores: &[Node]) -> Result<RetrieveRequest> {
        let bt = self.ctx.credentials.bt.as_str().to_string();
        let peers = peers_string(stores);
        let signed = storage_signed_bytes(&retrieve_pp(idx), &billing_hash(&bt, &peers));
        Ok(RetrieveRequest {
            idx: idx.to_string(),
            sig: self.ctx.credentials.gsk.sign(&signed)?.encode()?,
            bt,
            peers,
        })
    }

    /// Ask every replica for one index and keep the first verified record.
    /// Dropping the returned future cancels the outstanding requests.
    async fn race_replicas(&self, stores: Vec<Node>, request: RetrieveRequest) -> Option<StoredRecord> {
        let mut pending: FuturesUnordered<_> = stores
            .iter()
            .map(|node| {
                let request = request.clone();
                async move { (node, self.retrieve_one(node, request).await) }
            })
            .collect();

        while let Some((node, outcome)) = pending.next().await {
            match outcome {
                Ok(Some(record)) => return Some(record),
                Ok(None) => debug!(node = %node.fqdn, idx = %request.idx, "record not held"),
                Err(e) => debug!(node = %node.fqdn, idx = %request.idx, "replica failed: {}", e),
            }
        }
        None
    }

    async fn retrieve_one(&self, node: &Node, request: RetrieveRequest) -> Result<Option<StoredRecord>> {
        let idx = request.idx.clone();
        let hreq = sha256(&[idx.as_bytes()]);
        let send = self.ctx.transport.send(node, NodeRequest::Retrieve(request));
        let response = send.await?;

        match response {
            NodeResponse::Retrieved(body) => {
                let binding = self
                    .ctx
                    .keyring
                    .verify(&node.id, &hreq, &body.res.digest()?, &body.sig_r)?;
                if body.res.idx != idx {
                    return Err(JodiError::VerificationFailure(format!(
                        "asked for {} but got {}",
                        idx, body.res.idx
                    )));
                }
                self.verify_record_signature(&body.res)?;
                self.ctx.ledger.record(AuditOperation::Retrieve, binding).await;
                Ok(Some(body.res))
            }
            NodeResponse::NotFound(body) => {
                let binding = self
                    .ctx
                    .keyring
                    .verify(&node.id, &hreq, &not_found_digest(&body.message), &body.sig_r)?;
                self.ctx.ledger.record(AuditOperation::Retrieve, binding).await;
                Ok(None)
            }
            other => Err(other.into_error("retrieve")),
        }
    }

    /// The publisher's group signature must cover `pp(idx, ctx) || bb`.
    fn verify_record_signature(&self, record: &StoredRecord) -> Result<()> {
        let signed = storage_signed_bytes(&publish_pp(&record.idx, &record.ctx), &record.bb);
        let sig = GroupSignature::decode(&record.sig)
            .map_err(|_| JodiError::VerificationFailure("record signature is malformed".to_string()))?;
        if !self.ctx.credentials.gsk.public_key().verify(&signed, &sig)? {
            return Err(JodiError::VerificationFailure("record signature does not verify".to_string()));
        }
        Ok(())
    }
}

/// Decrypt a verified record with the candidate call id it was stored under.
fn open_record(call_id_by_idx: &HashMap<String, CallId>, record: &StoredRecord) -> Result<Vec<u8>> {
    let call_id = call_id_by_idx
        .get(&record.idx)
        .ok_or_else(|| JodiError::NotFound(format!("no candidate for index {}", record.idx)))?;
    cipher::decrypt(call_id, &Ciphertext::decode(&record.ctx)?)
}
