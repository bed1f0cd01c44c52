//! Provider-facing entry points: publish a passport for a call, retrieve
//! the passport for a call.

use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::AuditLedger;
use crate::calldetails::CallDetails;
use crate::error::{JodiError, Result};
use crate::protocol::{CallIdProtocol, ProtocolContext, PublishReceipt, StorageProtocol, Timing};

/// Result of [`ProtocolEngine::retrieve`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRetrieval {
    /// `None` when no candidate record could be found and decrypted
    pub token: Option<String>,
    pub candidates: usize,
    pub timing: Timing,
}

/// Composes call-id agreement with encrypted storage.
pub struct ProtocolEngine {
    ctx: Arc<ProtocolContext>,
    callid: CallIdProtocol,
    storage: StorageProtocol,
}

impl ProtocolEngine {
    pub fn new(ctx: ProtocolContext) -> Result<Self> {
        ctx.config.validate()?;
        let ctx = Arc::new(ctx);
        Ok(Self {
            callid: CallIdProtocol::new(Arc::clone(&ctx)),
            storage: StorageProtocol::new(Arc::clone(&ctx)),
            ctx,
        })
    }

    /// Verified audit bindings collected by this provider.
    pub fn ledger(&self) -> &AuditLedger {
        &self.ctx.ledger
    }

    pub fn context(&self) -> &ProtocolContext {
        &self.ctx
    }

    /// Publish `token` for the call `src -> dst` placed today.
    pub async fn publish(&self, src: &str, dst: &str, token: &str) -> Result<PublishReceipt> {
        self.publish_call(&CallDetails::new(src, dst), token).await
    }

    /// Retrieve the token for the call `src -> dst` placed today.
    pub async fn retrieve(&self, src: &str, dst: &str) -> Result<TokenRetrieval> {
        self.retrieve_call(&CallDetails::new(src, dst)).await
    }

    pub async fn publish_call(&self, call: &CallDetails, token: &str) -> Result<PublishReceipt> {
        let derivation = self.callid.derive(call).await?;
        // a fresh publish always uses the active keys
        let call_id = derivation
            .candidates
            .first()
            .ok_or_else(|| JodiError::ProtocolFailure("no call id could be agreed".to_string()))?;

        let mut receipt = self.storage.publish(call_id, token.as_bytes()).await?;
        receipt.timing += derivation.timing;
        info!(
            compute_ms = receipt.timing.compute.as_millis() as u64,
            network_ms = receipt.timing.network.as_millis() as u64,
            stores = receipt.acknowledged,
            "publish complete"
        );
        Ok(receipt)
    }

    pub async fn retrieve_call(&self, call: &CallDetails) -> Result<TokenRetrieval> {
        let derivation = self.callid.derive(call).await?;
        if derivation.candidates.is_empty() {
            return Err(JodiError::ProtocolFailure("no call id could be agreed".to_string()));
        }

        let retrieval = self.storage.retrieve(&derivation.candidates).await?;
        let mut timing = derivation.timing;
        timing += retrieval.timing;

        let token = match retrieval.plaintext {
            Some(bytes) => Some(String::from_utf8(bytes).map_err(|_| {
                JodiError::Serialization("retrieved token is not UTF-8".to_string())
            })?),
            None => {
                warn!(candidates = derivation.candidates.len(), "no token available");
                None
            }
        };
        info!(
            compute_ms = timing.compute.as_millis() as u64,
            network_ms = timing.network.as_millis() as u64,
            found = token.is_some(),
            "retrieve complete"
        );
        Ok(TokenRetrieval {
            token,
            candidates: derivation.candidates.len(),
            timing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditOperation;
    use crate::config::ProtocolConfig;
    use crate::testing::TestNetwork;
    use std::time::Duration;

    const SRC: &str = "+12025550123";
    const DST: &str = "+14155550123";

    async fn scenario() -> (TestNetwork, ProtocolEngine, ProtocolEngine) {
        let net = TestNetwork::new(5, 5, ProtocolConfig::default()).await;
        let originating = ProtocolEngine::new(net.provider()).unwrap();
        let terminating = ProtocolEngine::new(net.provider()).unwrap();
        (net, originating, terminating)
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_then_retrieve() {
        let (_net, originating, terminating) = scenario().await;
        let receipt = originating.publish(SRC, DST, "tok-A").await.unwrap();
        assert_eq!(receipt.acknowledged, 3);

        let retrieval = terminating.retrieve(SRC, DST).await.unwrap();
        assert_eq!(retrieval.token.as_deref(), Some("tok-A"));
        assert_eq!(retrieval.candidates, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_number_formatting_does_not_matter() {
        let (_net, originating, terminating) = scenario().await;
        originating.publish("+1 (202) 555-0123", DST, "tok-A").await.unwrap();
        let retrieval = terminating.retrieve(SRC, "1-415-555-0123").await.unwrap();
        assert_eq!(retrieval.token.as_deref(), Some("tok-A"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrieve_within_liveness_window_after_rotation() {
        let (net, originating, terminating) = scenario().await;
        originating.publish(SRC, DST, "tok-A").await.unwrap();

        let i_k = CallDetails::new(SRC, DST).key_index(net.config.keylist_size);
        net.rotate_all(i_k).await;
        tokio::time::advance(Duration::from_secs(2)).await;

        let retrieval = terminating.retrieve(SRC, DST).await.unwrap();
        assert_eq!(retrieval.candidates, 8);
        assert_eq!(retrieval.token.as_deref(), Some("tok-A"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotated_key_unusable_after_liveness_window() {
        let (net, originating, terminating) = scenario().await;
        originating.publish(SRC, DST, "tok-A").await.unwrap();

        let i_k = CallDetails::new(SRC, DST).key_index(net.config.keylist_size);
        net.rotate_all(i_k).await;
        tokio::time::advance(Duration::from_secs(5)).await;

        let retrieval = terminating.retrieve(SRC, DST).await.unwrap();
        assert_eq!(retrieval.candidates, 1);
        assert!(retrieval.token.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_expires_after_ttl() {
        let (_net, originating, terminating) = scenario().await;
        originating.publish(SRC, DST, "tok-A").await.unwrap();

        tokio::time::advance(Duration::from_secs(16)).await;
        let retrieval = terminating.retrieve(SRC, DST).await.unwrap();
        assert!(retrieval.token.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_republish_keeps_latest_token() {
        let (_net, originating, terminating) = scenario().await;
        originating.publish(SRC, DST, "tok-A").await.unwrap();
        originating.publish(SRC, DST, "tok-B").await.unwrap();

        let retrieval = terminating.retrieve(SRC, DST).await.unwrap();
        assert_eq!(retrieval.token.as_deref(), Some("tok-B"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_call_sees_nothing() {
        let (_net, originating, terminating) = scenario().await;
        originating.publish(SRC, DST, "tok-A").await.unwrap();
        let retrieval = terminating.retrieve(DST, SRC).await.unwrap();
        assert!(retrieval.token.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_down_evaluator_is_protocol_failure() {
        let (net, originating, _) = scenario().await;
        for i in 0..5 {
            net.set_available(&format!("ev-{}.jodi.local", i), false).await;
        }
        let err = originating.publish(SRC, DST, "tok-A").await.unwrap_err();
        assert!(matches!(err, JodiError::ProtocolFailure(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ledger_records_each_step() {
        let (_net, originating, terminating) = scenario().await;
        originating.publish(SRC, DST, "tok-A").await.unwrap();
        terminating.retrieve(SRC, DST).await.unwrap();

        let published = originating.ledger().snapshot().await;
        assert_eq!(
            published.iter().filter(|r| r.operation == AuditOperation::Evaluate).count(),
            3
        );
        assert_eq!(
            published.iter().filter(|r| r.operation == AuditOperation::Publish).count(),
            3
        );

        let retrieved = terminating.ledger().snapshot().await;
        assert!(retrieved.iter().any(|r| r.operation == AuditOperation::Retrieve));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let net = TestNetwork::new(1, 1, ProtocolConfig::default()).await;
        let mut ctx = net.provider();
        ctx.config.liveness_window = ctx.config.rotation_interval;
        assert!(ProtocolEngine::new(ctx).is_err());
    }
}
