//! Evaluator node: answers blinded VOPRF queries with every live key at the
//! requested index and signs the answer for the audit trail.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{reject, RequestAuthorizer};
use crate::audit::AuditKey;
use crate::crypto::voprf::BlindedElement;
use crate::error::Result;
use crate::keyrotation::KeyRotationManager;
use crate::messages::{evals_digest, evaluate_hreq, EvalShare, EvaluateRequest, EvaluateResponse, NodeRequest, NodeResponse, NodeType};
use crate::transport::NodeHandler;
use crate::utils::{from_base64, to_base64};

pub struct EvaluatorNode {
    audit: AuditKey,
    keys: Arc<KeyRotationManager>,
    authorizer: RequestAuthorizer,
}

impl EvaluatorNode {
    pub fn new(audit: AuditKey, keys: Arc<KeyRotationManager>, authorizer: RequestAuthorizer) -> Self {
        Self {
            audit,
            keys,
            authorizer,
        }
    }

    pub fn keys(&self) -> &Arc<KeyRotationManager> {
        &self.keys
    }

    pub async fn evaluate(&self, req: &EvaluateRequest) -> Result<EvaluateResponse> {
        let hreq = evaluate_hreq(&req.x, req.i_k, &req.bt, &req.peers);
        self.authorizer.authorize(&req.bt, &hreq, &req.sig)?;

        let x = BlindedElement::from_bytes(&from_base64(&req.x)?)?;
        let epochs = self.keys.lookup(req.i_k).await?;

        let mut evals = Vec::with_capacity(epochs.len());
        for epoch in &epochs {
            let eval = epoch.keypair.evaluate(&x);
            evals.push(EvalShare {
                fx: to_base64(&eval.fx_bytes()?),
                vk: to_base64(&eval.vk_bytes()?),
            });
        }

        let sig_r = self.audit.sign(&hreq, &evals_digest(&evals)?);
        debug!(
            node = %hex::encode(self.audit.node_id()),
            i_k = req.i_k,
            shares = evals.len(),
            "evaluated blinded element"
        );
        Ok(EvaluateResponse { evals, sig_r })
    }
}

#[async_trait]
impl NodeHandler for EvaluatorNode {
    fn node_type(&self) -> NodeType {
        NodeType::Evaluator
    }

    async fn handle(&self, request: NodeRequest) -> NodeResponse {
        match request {
            NodeRequest::Evaluate(req) => match self.evaluate(&req).await {
                Ok(body) => NodeResponse::Evaluated(body),
                Err(e) => reject("evaluate", e),
            },
            NodeRequest::Health => NodeResponse::Health {
                node_type: self.node_type(),
            },
            other => NodeResponse::BadRequest {
                message: format!("evaluator does not serve {}", other.name()),
            },
        }
    }
}
