//! Wire messages exchanged between providers and nodes
//!
//! Every endpoint has its own request/response struct. Unknown fields are
//! rejected at deserialization so a payload either matches exactly or never
//! reaches protocol code. The digest helpers at the bottom are shared by the
//! signing and the verifying side.

use serde::{Deserialize, Serialize};

use crate::error::{JodiError, Result};
use crate::utils::{sha256, to_base64};

/// Response body a store signs for a successful publish.
pub const PUBLISH_OK: &[u8] = b"ok";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Evaluator,
    MessageStore,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EvaluateRequest {
    pub i_k: usize,
    /// base64 blinded element
    pub x: String,
    pub sig: String,
    pub bt: String,
    pub peers: String,
}

/// One VOPRF evaluation, both points base64-encoded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EvalShare {
    pub fx: String,
    pub vk: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EvaluateResponse {
    pub evals: Vec<EvalShare>,
    pub sig_r: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PublishRequest {
    pub idx: String,
    /// `base64(nonce):base64(ciphertext)`
    pub ctx: String,
    pub sig: String,
    pub bt: String,
    pub peers: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PublishResponse {
    pub message: String,
    pub sig_r: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RetrieveRequest {
    pub idx: String,
    pub sig: String,
    pub bt: String,
    pub peers: String,
}

/// A record as held by a store and returned on retrieve.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StoredRecord {
    pub idx: String,
    pub ctx: String,
    pub sig: String,
    pub bb: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RetrieveResponse {
    pub res: StoredRecord,
    pub sig_r: String,
}

/// Signed `404` body.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NotFoundResponse {
    pub message: String,
    pub sig_r: String,
}

/// Request envelope, one variant per endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "op", content = "body", rename_all = "snake_case")]
pub enum NodeRequest {
    Evaluate(EvaluateRequest),
    Publish(PublishRequest),
    Retrieve(RetrieveRequest),
    Health,
}

/// Response envelope. [`NodeResponse::status`] gives the HTTP-style code.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum NodeResponse {
    Evaluated(EvaluateResponse),
    Published(PublishResponse),
    Retrieved(RetrieveResponse),
    NotFound(NotFoundResponse),
    Unauthorized { message: String },
    BadRequest { message: String },
    Health { node_type: NodeType },
}

impl NodeRequest {
    pub fn name(&self) -> &'static str {
        match self {
            NodeRequest::Evaluate(_) => "evaluate",
            NodeRequest::Publish(_) => "publish",
            NodeRequest::Retrieve(_) => "retrieve",
            NodeRequest::Health => "health",
        }
    }
}

impl NodeResponse {
    pub fn status(&self) -> u16 {
        match self {
            NodeResponse::Evaluated(_) => 201,
            NodeResponse::Published(_) | NodeResponse::Retrieved(_) | NodeResponse::Health { .. } => 200,
            NodeResponse::NotFound(_) => 404,
            NodeResponse::Unauthorized { .. } => 401,
            NodeResponse::BadRequest { .. } => 400,
        }
    }

    /// Map error statuses onto the error taxonomy.
    pub(crate) fn into_error(self, expected: &str) -> JodiError {
        match self {
            NodeResponse::Unauthorized { message } => JodiError::AuthorizationFailure(message),
            NodeResponse::BadRequest { message } => JodiError::Serialization(message),
            NodeResponse::NotFound(body) => JodiError::NotFound(body.message),
            other => JodiError::ProtocolFailure(format!(
                "expected {} response, got status {}",
                expected,
                other.status()
            )),
        }
    }

    pub fn into_evaluated(self) -> Result<EvaluateResponse> {
        match self {
            NodeResponse::Evaluated(body) => Ok(body),
            other => Err(other.into_error("evaluate")),
        }
    }

    pub fn into_published(self) -> Result<PublishResponse> {
        match self {
            NodeResponse::Published(body) => Ok(body),
            other => Err(other.into_error("publish")),
        }
    }

    pub fn into_health(self) -> Result<NodeType> {
        match self {
            NodeResponse::Health { node_type } => Ok(node_type),
            other => Err(other.into_error("health")),
        }
    }
}

/// `hreq = sha256(x || decimal(i_k) || bt || peers)` for an evaluate request.
pub fn evaluate_hreq(x: &str, i_k: usize, bt: &str, peers: &str) -> [u8; 32] {
    sha256(&[
        x.as_bytes(),
        i_k.to_string().as_bytes(),
        bt.as_bytes(),
        peers.as_bytes(),
    ])
}

/// `pp = base64(sha256(idx || ctx))` for a publish request.
pub fn publish_pp(idx: &str, ctx: &str) -> String {
    to_base64(&sha256(&[idx.as_bytes(), ctx.as_bytes()]))
}

/// `pp = base64(sha256(idx))` for a retrieve request.
pub fn retrieve_pp(idx: &str) -> String {
    to_base64(&sha256(&[idx.as_bytes()]))
}

/// The bytes a storage request's group signature covers: `pp || bb`.
pub fn storage_signed_bytes(pp: &str, bb: &str) -> Vec<u8> {
    [pp.as_bytes(), bb.as_bytes()].concat()
}

/// Digest of the evaluations as they appear on the wire.
pub fn evals_digest(evals: &[EvalShare]) -> Result<[u8; 32]> {
    Ok(sha256(&[&serde_json::to_vec(evals)?]))
}

impl StoredRecord {
    /// Digest of the record as it appears on the wire.
    pub fn digest(&self) -> Result<[u8; 32]> {
        Ok(sha256(&[&serde_json::to_vec(self)?]))
    }
}

/// Audit `hres` for a `404` answer.
pub fn not_found_digest(message: &str) -> [u8; 32] {
    sha256(&[message.as_bytes()])
}
