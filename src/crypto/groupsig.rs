//! Group signatures for request authorization
//!
//! Every authorized provider holds the group signing key and every node holds
//! the group public key. Members sign identically, so a signature proves group
//! membership without identifying the signer. Signatures travel as base64
//! strings and are opaque to the protocol layer.

use ark_bls12_381::{Fr, G1Affine, G2Affine, G2Projective};
use ark_ec::{CurveGroup, PrimeGroup};
use ark_std::rand::Rng;
use ark_std::UniformRand;

use super::{decode_g1, decode_g2, encode_point, hash_to_g1, pairing_check};
use crate::error::{JodiError, Result};
use crate::security::SensitiveScalar;
use crate::utils::{from_base64, to_base64};

const GROUPSIG_DOMAIN: &[u8] = b"JODI-GROUPSIG-BLS12381G1-V1";

/// Member signing key.
#[derive(Clone, Debug)]
pub struct GroupSecretKey {
    sk: SensitiveScalar<Fr>,
    gpk: GroupPublicKey,
}

/// Key used by nodes to check that a request came from a group member.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupPublicKey(G2Affine);

/// Detached group signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupSignature(G1Affine);

/// Create a fresh group and return the member key (which embeds the group key).
pub fn setup<R: Rng>(rng: &mut R) -> GroupSecretKey {
    let sk = Fr::rand(rng);
    let gpk = GroupPublicKey((G2Projective::generator() * sk).into_affine());
    GroupSecretKey {
        sk: SensitiveScalar::new(sk),
        gpk,
    }
}

impl GroupSecretKey {
    pub fn public_key(&self) -> GroupPublicKey {
        self.gpk
    }

    pub fn sign(&self, msg: &[u8]) -> Result<GroupSignature> {
        let point = hash_to_g1(GROUPSIG_DOMAIN, msg)?;
        Ok(GroupSignature((point * *self.sk.expose_secret()).into_affine()))
    }
}

impl GroupPublicKey {
    /// Returns `Ok(false)` for a well-formed but invalid signature.
    pub fn verify(&self, msg: &[u8], sig: &GroupSignature) -> Result<bool> {
        let point = hash_to_g1(GROUPSIG_DOMAIN, msg)?;
        Ok(pairing_check(&sig.0, &point, &self.0))
    }

    pub fn to_base64(&self) -> Result<String> {
        Ok(to_base64(&encode_point(&self.0)?))
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        Ok(Self(decode_g2(&from_base64(encoded)?)?))
    }
}

impl GroupSignature {
    pub fn encode(&self) -> Result<String> {
        Ok(to_base64(&encode_point(&self.0)?))
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = from_base64(encoded)
            .map_err(|_| JodiError::AuthorizationFailure("malformed group signature".to_string()))?;
        let point = decode_g1(&bytes)
            .map_err(|_| JodiError::AuthorizationFailure("malformed group signature".to_string()))?;
        Ok(Self(point))
    }
}
