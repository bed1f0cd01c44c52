//! Message-store node
//!
//! Holds `(idx, ctx, sig, bb)` records for `T_MAX_SECONDS`. A publish to an
//! existing index overwrites the record and restarts its TTL. Expired records
//! answer exactly like missing ones.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use super::{reject, RequestAuthorizer};
use crate::audit::AuditKey;
use crate::billing::billing_hash;
use crate::error::Result;
use crate::messages::{
    not_found_digest, publish_pp, retrieve_pp, storage_signed_bytes, NodeRequest, NodeResponse, NodeType,
    NotFoundResponse, PublishRequest, PublishResponse, RetrieveRequest, RetrieveResponse, StoredRecord, PUBLISH_OK,
};
use crate::transport::NodeHandler;
use crate::utils::sha256;

const NOT_FOUND: &str = "Not Found";

struct CachedRecord {
    record: StoredRecord,
    expires_at: Instant,
}

pub struct MessageStoreNode {
    audit: AuditKey,
    authorizer: RequestAuthorizer,
    ttl: Duration,
    records: RwLock<HashMap<String, CachedRecord>>,
}

/// Outcome of a retrieve that passed authorization.
enum Lookup {
    Found(RetrieveResponse),
    Missing(NotFoundResponse),
}

impl MessageStoreNode {
    pub fn new(audit: AuditKey, authorizer: RequestAuthorizer, ttl: Duration) -> Self {
        Self {
            audit,
            authorizer,
            ttl,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn publish(&self, req: &PublishRequest) -> Result<PublishResponse> {
        let pp = publish_pp(&req.idx, &req.ctx);
        let bb = billing_hash(&req.bt, &req.peers);
        let signed = storage_signed_bytes(&pp, &bb);
        self.authorizer.authorize(&req.bt, &signed, &req.sig)?;

        let record = StoredRecord {
            idx: req.idx.clone(),
            ctx: req.ctx.clone(),
            sig: req.sig.clone(),
            bb,
        };
        let expires_at = Instant::now() + self.ttl;
        let replaced = self
            .records
            .write()
            .await
            .insert(req.idx.clone(), CachedRecord { record, expires_at })
            .is_some();
        debug!(idx = %req.idx, replaced, "stored record");

        Ok(PublishResponse {
            message: "Created".to_string(),
            sig_r: self.audit.sign(&signed, PUBLISH_OK),
        })
    }

    async fn retrieve(&self, req: &RetrieveRequest) -> Result<Lookup> {
        let pp = retrieve_pp(&req.idx);
        let bb = billing_hash(&req.bt, &req.peers);
        self.authorizer
            .authorize(&req.bt, &storage_signed_bytes(&pp, &bb), &req.sig)?;

        let hreq = sha256(&[req.idx.as_bytes()]);
        match self.live_record(&req.idx).await {
            Some(record) => {
                let sig_r = self.audit.sign(&hreq, &record.digest()?);
                Ok(Lookup::Found(RetrieveResponse { res: record, sig_r }))
            }
            None => Ok(Lookup::Missing(NotFoundResponse {
                message: NOT_FOUND.to_string(),
                sig_r: self.audit.sign(&hreq, &not_found_digest(NOT_FOUND)),
            })),
        }
    }

    async fn live_record(&self, idx: &str) -> Option<StoredRecord> {
        let now = Instant::now();
        {
            let records = self.records.read().await;
            match records.get(idx) {
                Some(cached) if now < cached.expires_at => return Some(cached.record.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // expired: drop it unless a republish raced in
        let mut records = self.records.write().await;
        if records.get(idx).is_some_and(|cached| cached.expires_at <= now) {
            records.remove(idx);
        }
        None
    }

    /// Drop every expired record; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, cached| now < cached.expires_at);
        before - records.len()
    }

    /// Number of records held, expired or not.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl NodeHandler for MessageStoreNode {
    fn node_type(&self) -> NodeType {
        NodeType::MessageStore
    }

    async fn handle(&self, request: NodeRequest) -> NodeResponse {
        match request {
            NodeRequest::Publish(req) => match self.publish(&req).await {
                Ok(body) => NodeResponse::Published(body),
                Err(e) => reject("publish", e),
            },
            NodeRequest::Retrieve(req) => match self.retrieve(&req).await {
                Ok(Lookup::Found(body)) => NodeResponse::Retrieved(body),
                Ok(Lookup::Missing(body)) => NodeResponse::NotFound(body),
                Err(e) => reject("retrieve", e),
            },
            NodeRequest::Health => NodeResponse::Health {
                node_type: self.node_type(),
            },
            other => NodeResponse::BadRequest {
                message: format!("message store does not serve {}", other.name()),
            },
        }
    }
}
