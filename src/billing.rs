//! Anonymous billing tokens
//!
//! A token is a VOPRF output `y = F(sk_bill, p)` on a random preimage `p`,
//! encoded as `base64(p) "." base64(y)`. The issuer sees only a blinded `p`
//! in the blinded flow, so issued tokens cannot be linked back to issuance.
//! A token becomes request-specific once hashed together with the ordered
//! peer set it is sent to (see [`billing_hash`]).

use ark_bls12_381::G2Affine;
use ark_std::rand::Rng;
use std::fmt;

use crate::crypto::voprf::{self, BlindedElement, BlindingMask, Evaluation, OprfKeyPair};
use crate::crypto::{decode_g1, encode_point};
use crate::error::{JodiError, Result};
use crate::utils::{from_base64, sha256, to_base64};

const PREIMAGE_LEN: usize = 32;

/// Endorsed billing token.
#[derive(Clone, PartialEq, Eq)]
pub struct BillingToken(String);

impl BillingToken {
    /// Wrap a token string received off the wire. Validity is checked by
    /// [`verify_token`], not here.
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BillingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // tokens are bearer credentials
        f.write_str("BillingToken([REDACTED])")
    }
}

/// Holder of the billing OPRF key.
#[derive(Debug, Clone)]
pub struct BillingIssuer {
    key: OprfKeyPair,
}

impl BillingIssuer {
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        Self {
            key: OprfKeyPair::generate(rng),
        }
    }

    /// Key that nodes use to check tokens.
    pub fn verification_key(&self) -> G2Affine {
        *self.key.verification_key()
    }

    /// Endorse a blinded preimage.
    pub fn endorse(&self, blinded: &BlindedElement) -> Evaluation {
        self.key.evaluate(blinded)
    }

    /// Mint a token locally, without a blinded round trip.
    pub fn create_endorsed_token<R: Rng>(&self, rng: &mut R) -> Result<BillingToken> {
        let mut preimage = [0u8; PREIMAGE_LEN];
        rng.fill_bytes(&mut preimage);
        let y = self.key.evaluate_plain(&preimage)?;
        encode_token(&preimage, &y)
    }
}

/// Client state between sending a blinded preimage and receiving the endorsement.
#[derive(Debug)]
pub struct TokenRequest {
    preimage: [u8; PREIMAGE_LEN],
    mask: BlindingMask,
    blinded: BlindedElement,
}

impl TokenRequest {
    pub fn new<R: Rng>(rng: &mut R) -> Result<Self> {
        let mut preimage = [0u8; PREIMAGE_LEN];
        rng.fill_bytes(&mut preimage);
        let (blinded, mask) = voprf::blind(&preimage, rng)?;
        Ok(Self {
            preimage,
            mask,
            blinded,
        })
    }

    /// What the issuer gets to see.
    pub fn blinded(&self) -> &BlindedElement {
        &self.blinded
    }

    /// Unblind the issuer's answer and check it against the issuer key.
    pub fn finalize(self, endorsement: &Evaluation, issuer_vk: &G2Affine) -> Result<BillingToken> {
        let y = voprf::unblind(&endorsement.fx, &self.mask)?;
        if !voprf::verify(issuer_vk, &self.preimage, &y)? {
            return Err(JodiError::VerificationFailure(
                "billing endorsement does not verify".to_string(),
            ));
        }
        encode_token(&self.preimage, &y)
    }
}

fn encode_token(preimage: &[u8], y: &ark_bls12_381::G1Affine) -> Result<BillingToken> {
    Ok(BillingToken(format!(
        "{}.{}",
        to_base64(preimage),
        to_base64(&encode_point(y)?)
    )))
}

/// Check that `token` was endorsed by the billing key behind `vk`.
///
/// Any malformed or unendorsed token is an `AuthorizationFailure`.
pub fn verify_token(vk: &G2Affine, token: &str) -> Result<()> {
    let unauthorized = |reason: &str| JodiError::AuthorizationFailure(format!("billing token {}", reason));

    let (p_b64, y_b64) = token
        .split_once('.')
        .ok_or_else(|| unauthorized("is not p.y"))?;
    let preimage = from_base64(p_b64).map_err(|_| unauthorized("preimage is not base64"))?;
    let y_bytes = from_base64(y_b64).map_err(|_| unauthorized("output is not base64"))?;
    let y = decode_g1(&y_bytes).map_err(|_| unauthorized("output is not a G1 point"))?;

    if voprf::verify(vk, &preimage, &y)? {
        Ok(())
    } else {
        Err(unauthorized("is not endorsed"))
    }
}

/// `bb = base64(sha256(token || peers))`, binding a token to one peer set.
pub fn billing_hash(token: &str, peers: &str) -> String {
    to_base64(&sha256(&[token.as_bytes(), peers.as_bytes()]))
}
