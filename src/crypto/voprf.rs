//! Verifiable oblivious PRF over BLS12-381 (2HashDH with pairing verification)
//!
//! A requester blinds its input as `x = r * H(m)`, an evaluator answers with
//! `fx = sk * x` together with its verification key `vk = sk * G2`, and the
//! requester recovers `y = r^-1 * fx = sk * H(m)`. Anyone holding `vk` can
//! check `y` with a single pairing equation, so a misbehaving evaluator is
//! caught without trusting it.

use ark_bls12_381::{Fr, G1Affine, G2Affine, G2Projective};
use ark_ec::{CurveGroup, PrimeGroup};
use ark_ff::Field;
use ark_std::rand::Rng;
use ark_std::UniformRand;

use super::{decode_g1, decode_g2, encode_point, hash_to_g1, pairing_check};
use crate::error::{JodiError, Result};
use crate::security::SensitiveScalar;

const VOPRF_DOMAIN: &[u8] = b"JODI-VOPRF-BLS12381G1-V1";

/// Blinded input sent to evaluators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlindedElement(pub G1Affine);

/// Blinding factor for one derivation attempt. Never leaves the requester.
#[derive(Debug)]
pub struct BlindingMask(SensitiveScalar<Fr>);

/// Evaluator output for one key: `fx = sk * x` and `vk = sk * G2`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evaluation {
    pub fx: G1Affine,
    pub vk: G2Affine,
}

/// An OPRF key pair.
#[derive(Clone, Debug)]
pub struct OprfKeyPair {
    sk: SensitiveScalar<Fr>,
    vk: G2Affine,
}

impl OprfKeyPair {
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let sk = Fr::rand(rng);
        let vk = (G2Projective::generator() * sk).into_affine();
        Self {
            sk: SensitiveScalar::new(sk),
            vk,
        }
    }

    pub fn verification_key(&self) -> &G2Affine {
        &self.vk
    }

    /// Evaluate the PRF on a blinded element.
    pub fn evaluate(&self, x: &BlindedElement) -> Evaluation {
        Evaluation {
            fx: (x.0 * *self.sk.expose_secret()).into_affine(),
            vk: self.vk,
        }
    }

    /// Evaluate the PRF directly on an unblinded input.
    pub fn evaluate_plain(&self, input: &[u8]) -> Result<G1Affine> {
        let point = hash_to_g1(VOPRF_DOMAIN, input)?;
        Ok((point * *self.sk.expose_secret()).into_affine())
    }
}

/// Blind `input` with a fresh random mask.
pub fn blind<R: Rng>(input: &[u8], rng: &mut R) -> Result<(BlindedElement, BlindingMask)> {
    let point = hash_to_g1(VOPRF_DOMAIN, input)?;
    let mut r = Fr::rand(rng);
    while r.inverse().is_none() {
        r = Fr::rand(rng);
    }
    let x = (point * r).into_affine();
    Ok((BlindedElement(x), BlindingMask(SensitiveScalar::new(r))))
}

/// Remove the blinding mask from an evaluation.
pub fn unblind(fx: &G1Affine, mask: &BlindingMask) -> Result<G1Affine> {
    let inv = mask
        .0
        .expose_secret()
        .inverse()
        .ok_or_else(|| JodiError::Crypto("blinding mask is not invertible".to_string()))?;
    Ok((*fx * inv).into_affine())
}

/// Check that `output` is the PRF value of `input` under the key behind `vk`.
pub fn verify(vk: &G2Affine, input: &[u8], output: &G1Affine) -> Result<bool> {
    let point = hash_to_g1(VOPRF_DOMAIN, input)?;
    Ok(pairing_check(output, &point, vk))
}

impl BlindedElement {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode_point(&self.0)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self(decode_g1(bytes)?))
    }
}

impl Evaluation {
    pub fn fx_bytes(&self) -> Result<Vec<u8>> {
        encode_point(&self.fx)
    }

    pub fn vk_bytes(&self) -> Result<Vec<u8>> {
        encode_point(&self.vk)
    }

    pub fn from_bytes(fx: &[u8], vk: &[u8]) -> Result<Self> {
        Ok(Self {
            fx: decode_g1(fx)?,
            vk: decode_g2(vk)?,
        })
    }
}
