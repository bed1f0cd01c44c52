//! Call-identifier derivation
//!
//! The provider blinds the call details, asks `n_ev` evaluators to apply
//! their OPRF key for index `i_k`, and unblinds and verifies every share.
//! The call id is `sha256` of the XOR of one share per evaluator.
//!
//! An evaluator that is mid-rotation answers with two shares (active key
//! first, then the expiring one). Every combination is then a candidate,
//! bounded by `2^n_ev`; candidate 0 always combines the active keys.

use futures::future::join_all;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{CallId, ProtocolContext, Timing};
use crate::audit::{AuditBinding, AuditKeyring, AuditOperation};
use crate::calldetails::CallDetails;
use crate::crypto::voprf::{self, BlindingMask, Evaluation};
use crate::crypto::{encode_point, G1_BYTES};
use crate::dht::{self, peers_string};
use crate::directory::Node;
use crate::error::{JodiError, Result};
use crate::messages::{evals_digest, evaluate_hreq, EvaluateRequest, EvaluateResponse, NodeRequest};
use crate::utils::{fresh_rng, from_base64, sha256, to_base64, xor_in_place};

/// Upper bound on live keys per index, hence on shares per evaluator.
pub const MAX_SHARES_PER_EVALUATOR: usize = 2;

/// Unblinded, verified VOPRF output.
pub type Share = [u8; G1_BYTES];

/// Result of one derivation.
#[derive(Clone, Debug)]
pub struct Derivation {
    pub call_details: CallDetails,
    /// Empty when the evaluator set was incomplete
    pub candidates: Vec<CallId>,
    pub timing: Timing,
}

pub struct CallIdProtocol {
    ctx: Arc<ProtocolContext>,
}

impl CallIdProtocol {
    pub fn new(ctx: Arc<ProtocolContext>) -> Self {
        Self { ctx }
    }

    pub async fn derive(&self, call: &CallDetails) -> Result<Derivation> {
        let started = Instant::now();
        let config = &self.ctx.config;
        let directory = self.ctx.directory.snapshot().await;

        let evaluators = dht::select(&directory.evaluators, &call.lookup_key(), config.n_ev)?;
        let i_k = call.key_index(config.keylist_size);
        let (x, mask) = voprf::blind(call.as_bytes(), &mut fresh_rng())?;

        let x = to_base64(&x.to_bytes()?);
        let bt = self.ctx.credentials.bt.as_str().to_string();
        let peers = peers_string(&evaluators);
        let hreq = evaluate_hreq(&x, i_k, &bt, &peers);
        let sig = self.ctx.credentials.gsk.sign(&hreq)?.encode()?;
        let request = EvaluateRequest { i_k, x, sig, bt, peers };

        debug!(i_k, evaluators = evaluators.len(), "requesting evaluations");
        let network_started = Instant::now();
        let responses = join_all(
            evaluators
                .iter()
                .map(|node| self.request_evaluation(node, request.clone())),
        )
        .await;
        let network = network_started.elapsed();

        let mut share_sets = Vec::with_capacity(evaluators.len());
        for (node, response) in evaluators.iter().zip(responses) {
            let verified = response.and_then(|body| {
                verify_evaluation(&self.ctx.keyring, node, &hreq, &body, &mask, call.as_bytes())
            });
            match verified {
                Ok((binding, shares)) => {
                    self.ctx.ledger.record(AuditOperation::Evaluate, binding).await;
                    if shares.is_empty() {
                        warn!(node = %node.fqdn, "evaluator returned no verifiable share");
                    }
                    share_sets.push(shares);
                }
                Err(e) => {
                    warn!(node = %node.fqdn, "dropping evaluator response: {}", e);
                    share_sets.push(Vec::new());
                }
            }
        }

        let candidates = combine_shares(&share_sets)?;
        if candidates.is_empty() {
            warn!(i_k, "incomplete evaluator set, no call id agreed");
        } else {
            info!(i_k, candidates = candidates.len(), "derived call id candidates");
        }

        Ok(Derivation {
            call_details: call.clone(),
            candidates,
            timing: Timing::from_elapsed(started.elapsed(), network),
        })
    }

    async fn request_evaluation(&self, node: &Node, request: EvaluateRequest) -> Result<EvaluateResponse> {
        let send = self.ctx.transport.send(node, NodeRequest::Evaluate(request));
        tokio::time::timeout(self.ctx.config.eval_timeout, send)
            .await
            .map_err(|_| JodiError::TransportFailure(format!("evaluator {} timed out", node.fqdn)))??
            .into_evaluated()
    }
}

/// Check an evaluator's audit binding, then unblind and verify each share.
///
/// Unverifiable shares are dropped. More than [`MAX_SHARES_PER_EVALUATOR`]
/// shares, or a bad audit signature, rejects the whole response.
pub fn verify_evaluation(
    keyring: &AuditKeyring,
    node: &Node,
    hreq: &[u8],
    body: &EvaluateResponse,
    mask: &BlindingMask,
    input: &[u8],
) -> Result<(AuditBinding, Vec<Share>)> {
    let binding = keyring.verify(&node.id, hreq, &evals_digest(&body.evals)?, &body.sig_r)?;
    if body.evals.len() > MAX_SHARES_PER_EVALUATOR {
        return Err(JodiError::VerificationFailure(format!(
            "{} returned {} shares",
            node.fqdn,
            body.evals.len()
        )));
    }

    let mut shares = Vec::with_capacity(body.evals.len());
    for (i, share) in body.evals.iter().enumerate() {
        match unblind_and_verify(&share.fx, &share.vk, mask, input) {
            Ok(y) => shares.push(y),
            Err(e) => debug!(node = %node.fqdn, share = i, "dropping share: {}", e),
        }
    }
    Ok((binding, shares))
}

fn unblind_and_verify(fx: &str, vk: &str, mask: &BlindingMask, input: &[u8]) -> Result<Share> {
    let eval = Evaluation::from_bytes(&from_base64(fx)?, &from_base64(vk)?)?;
    let y = voprf::unblind(&eval.fx, mask)?;
    if !voprf::verify(&eval.vk, input, &y)? {
        return Err(JodiError::VerificationFailure("VOPRF output does not verify".to_string()));
    }
    encode_point(&y)?
        .as_slice()
        .try_into()
        .map_err(|_| JodiError::Serialization("unexpected G1 encoding length".to_string()))
}

/// Every call id obtainable by picking one share per evaluator.
///
/// Ordered like a Cartesian product with the last evaluator varying
/// fastest, so index 0 combines every evaluator's first share. Returns
/// nothing if any evaluator has no share, and an error if the number of
/// combinations does not fit in a `usize`.
pub fn combine_shares(sets: &[Vec<Share>]) -> Result<Vec<CallId>> {
    if sets.is_empty() || sets.iter().any(Vec::is_empty) {
        return Ok(Vec::new());
    }
    let total = sets
        .iter()
        .try_fold(1usize, |acc, set| acc.checked_mul(set.len()))
        .ok_or_else(|| {
            JodiError::VerificationFailure(format!("{} share sets have too many combinations", sets.len()))
        })?;

    Ok((0..total)
        .into_par_iter()
        .map(|mut n| {
            let mut acc = [0u8; G1_BYTES];
            for set in sets.iter().rev() {
                xor_in_place(&mut acc, &set[n % set.len()]);
                n /= set.len();
            }
            sha256(&[&acc])
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditKey;
    use crate::config::ProtocolConfig;
    use crate::crypto::voprf::OprfKeyPair;
    use crate::messages::EvalShare;
    use crate::testing::TestNetwork;
    use chrono::NaiveDate;

    fn call() -> CallDetails {
        CallDetails::on_date(
            "+12025550123",
            "+14155550123",
            NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
        )
    }

    fn share(byte: u8) -> Share {
        [byte; G1_BYTES]
    }

    #[test]
    fn test_combine_single_candidate() {
        let sets = vec![vec![share(1)], vec![share(2)], vec![share(4)]];
        let ids = combine_shares(&sets).unwrap();
        assert_eq!(ids, vec![sha256(&[&share(7)])]);
    }

    #[test]
    fn test_combine_cartesian_order() {
        let sets = vec![vec![share(1), share(8)], vec![share(2)], vec![share(4), share(16)]];
        let ids = combine_shares(&sets).unwrap();
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[0], sha256(&[&share(1 ^ 2 ^ 4)]));
        assert_eq!(ids[1], sha256(&[&share(1 ^ 2 ^ 16)]));
        assert_eq!(ids[2], sha256(&[&share(8 ^ 2 ^ 4)]));
        assert_eq!(ids[3], sha256(&[&share(8 ^ 2 ^ 16)]));
    }

    #[test]
    fn test_combine_incomplete_set() {
        assert!(combine_shares(&[vec![share(1)], vec![]]).unwrap().is_empty());
        assert!(combine_shares(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_combine_rejects_unbounded_product() {
        let sets = vec![vec![share(1), share(2)]; 64];
        assert!(matches!(
            combine_shares(&sets),
            Err(JodiError::VerificationFailure(_))
        ));
    }

    fn signed_response(audit: &AuditKey, hreq: &[u8], evals: Vec<EvalShare>) -> EvaluateResponse {
        let sig_r = audit.sign(hreq, &evals_digest(&evals).unwrap());
        EvaluateResponse { evals, sig_r }
    }

    fn eval_share(key: &OprfKeyPair, x: &voprf::BlindedElement) -> EvalShare {
        let eval = key.evaluate(x);
        EvalShare {
            fx: to_base64(&eval.fx_bytes().unwrap()),
            vk: to_base64(&eval.vk_bytes().unwrap()),
        }
    }

    #[test]
    fn test_verify_evaluation_drops_forged_share() {
        let mut rng = ark_std::test_rng();
        let node = Node::new("ev-0", "ev-0");
        let audit = AuditKey::generate(node.id);
        let mut keyring = AuditKeyring::new();
        keyring.insert(node.id, audit.verifying_key());

        let honest = OprfKeyPair::generate(&mut rng);
        let other = OprfKeyPair::generate(&mut rng);
        let (x, mask) = voprf::blind(b"input", &mut rng).unwrap();

        let mut forged = eval_share(&other, &x);
        forged.vk = eval_share(&honest, &x).vk;
        let body = signed_response(&audit, b"hreq", vec![eval_share(&honest, &x), forged]);

        let (binding, shares) = verify_evaluation(&keyring, &node, b"hreq", &body, &mask, b"input").unwrap();
        assert_eq!(binding.node_id, node.id);
        assert_eq!(shares.len(), 1);
    }

    #[test]
    fn test_verify_evaluation_rejects_bad_audit_and_too_many_shares() {
        let mut rng = ark_std::test_rng();
        let node = Node::new("ev-0", "ev-0");
        let audit = AuditKey::generate(node.id);
        let mut keyring = AuditKeyring::new();
        keyring.insert(node.id, audit.verifying_key());
        let key = OprfKeyPair::generate(&mut rng);
        let (x, mask) = voprf::blind(b"input", &mut rng).unwrap();

        let body = signed_response(&audit, b"other hreq", vec![eval_share(&key, &x)]);
        let err = verify_evaluation(&keyring, &node, b"hreq", &body, &mask, b"input").unwrap_err();
        assert!(matches!(err, JodiError::VerificationFailure(_)));

        let three = vec![eval_share(&key, &x), eval_share(&key, &x), eval_share(&key, &x)];
        let body = signed_response(&audit, b"hreq", three);
        let err = verify_evaluation(&keyring, &node, b"hreq", &body, &mask, b"input").unwrap_err();
        assert!(matches!(err, JodiError::VerificationFailure(_)));
    }

    #[tokio::test]
    async fn test_both_sides_agree() {
        let net = TestNetwork::new(5, 5, ProtocolConfig::default()).await;
        let publisher = CallIdProtocol::new(Arc::new(net.provider()));
        let retriever = CallIdProtocol::new(Arc::new(net.provider()));

        let a = publisher.derive(&call()).await.unwrap();
        let b = retriever.derive(&call()).await.unwrap();
        assert_eq!(a.candidates.len(), 1);
        assert_eq!(a.candidates, b.candidates);

        let other = CallDetails::on_date("+12025550123", "+14155550199", NaiveDate::from_ymd_opt(2026, 10, 16).unwrap());
        let c = retriever.derive(&other).await.unwrap();
        assert_ne!(c.candidates, a.candidates);
    }

    #[tokio::test]
    async fn test_rotation_race_yields_both_identifiers() {
        let net = TestNetwork::new(5, 5, ProtocolConfig::default()).await;
        let ctx = Arc::new(net.provider());
        let protocol = CallIdProtocol::new(Arc::clone(&ctx));

        let before = protocol.derive(&call()).await.unwrap();
        net.rotate_all(call().key_index(ctx.config.keylist_size)).await;
        let after = protocol.derive(&call()).await.unwrap();

        // three selected evaluators, each with two live keys
        assert_eq!(after.candidates.len(), 8);
        assert_ne!(after.candidates[0], before.candidates[0]);
        assert_eq!(after.candidates[7], before.candidates[0]);
    }

    #[tokio::test]
    async fn test_unavailable_evaluator_means_no_candidates() {
        let net = TestNetwork::new(3, 3, ProtocolConfig::default()).await;
        net.set_available("ev-1.jodi.local", false).await;
        let protocol = CallIdProtocol::new(Arc::new(net.provider()));

        let derivation = protocol.derive(&call()).await.unwrap();
        assert!(derivation.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_empty_directory_is_protocol_failure() {
        let net = TestNetwork::new(0, 3, ProtocolConfig::default()).await;
        let protocol = CallIdProtocol::new(Arc::new(net.provider()));
        let err = protocol.derive(&call()).await.unwrap_err();
        assert!(matches!(err, JodiError::ProtocolFailure(_)));
    }

    #[tokio::test]
    async fn test_unendorsed_token_gets_no_shares() {
        let net = TestNetwork::new(3, 3, ProtocolConfig::default()).await;
        let mut ctx = net.provider();
        let rogue_issuer = crate::billing::BillingIssuer::generate(&mut fresh_rng());
        ctx.credentials.bt = rogue_issuer.create_endorsed_token(&mut fresh_rng()).unwrap();
        let protocol = CallIdProtocol::new(Arc::new(ctx));

        assert!(protocol.derive(&call()).await.unwrap().candidates.is_empty());
    }

    #[tokio::test]
    async fn test_verified_bindings_reach_the_ledger() {
        let net = TestNetwork::new(4, 3, ProtocolConfig::default()).await;
        let ctx = Arc::new(net.provider());
        CallIdProtocol::new(Arc::clone(&ctx)).derive(&call()).await.unwrap();
        assert_eq!(ctx.ledger.len().await, 3);
    }
}
