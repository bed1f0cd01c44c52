//! Evaluator and message-store node behaviour
//!
//! Both node types authorize a request the same way: the billing token must
//! be endorsed by the billing key, and the group signature must cover the
//! request digest. Everything else is node specific.

pub mod evaluator;
pub mod store;

use ark_bls12_381::G2Affine;
use tracing::debug;

use crate::billing::verify_token;
use crate::crypto::groupsig::{GroupPublicKey, GroupSignature};
use crate::error::{JodiError, Result};
use crate::messages::NodeResponse;

pub use evaluator::EvaluatorNode;
pub use store::MessageStoreNode;

/// Keys a node needs to accept provider requests.
#[derive(Clone, Copy, Debug)]
pub struct RequestAuthorizer {
    pub gpk: GroupPublicKey,
    pub billing_vk: G2Affine,
}

impl RequestAuthorizer {
    pub fn new(gpk: GroupPublicKey, billing_vk: G2Affine) -> Self {
        Self { gpk, billing_vk }
    }

    /// Check the billing token, then the group signature over `signed`.
    pub fn authorize(&self, bt: &str, signed: &[u8], sig: &str) -> Result<()> {
        verify_token(&self.billing_vk, bt)?;
        let sig = GroupSignature::decode(sig)?;
        if !self.gpk.verify(signed, &sig)? {
            return Err(JodiError::AuthorizationFailure("invalid group signature".to_string()));
        }
        Ok(())
    }
}

/// Turn a handler error into the response sent back to the requester.
pub(crate) fn reject(op: &str, err: JodiError) -> NodeResponse {
    debug!(op, "request rejected: {}", err);
    match err {
        JodiError::AuthorizationFailure(message) => NodeResponse::Unauthorized { message },
        other => NodeResponse::BadRequest {
            message: other.to_string(),
        },
    }
}
