//! Opaque cryptographic primitives used by the protocol
//!
//! The protocol layer only relies on the contracts exposed here:
//! `blind/unblind/evaluate/verify` for the VOPRF, `sign/verify` for group
//! signatures, and authenticated encryption keyed by a call identifier.
//! All pairing-based pieces live on BLS12-381.

pub mod cipher;
pub mod groupsig;
pub mod voprf;

use ark_bls12_381::{g1, Bls12_381, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ec::{
    hashing::{curve_maps::wb::WBMap, map_to_curve_hasher::MapToCurveBasedHasher, HashToCurve},
    pairing::Pairing,
    PrimeGroup,
};
use ark_ff::field_hashers::DefaultFieldHasher;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use sha2::Sha256;

use crate::error::{JodiError, Result};
use crate::security::constant_time_eq_pairing;

type G1Hasher = MapToCurveBasedHasher<G1Projective, DefaultFieldHasher<Sha256, 128>, WBMap<g1::Config>>;

/// Compressed size of a G1 point in bytes.
pub const G1_BYTES: usize = 48;

/// Hash an arbitrary message onto G1 under a domain separation tag.
pub fn hash_to_g1(domain: &[u8], msg: &[u8]) -> Result<G1Affine> {
    let hasher = G1Hasher::new(domain)
        .map_err(|e| JodiError::Crypto(format!("hash-to-curve setup failed: {:?}", e)))?;
    hasher
        .hash(msg)
        .map_err(|e| JodiError::Crypto(format!("hash-to-curve failed: {:?}", e)))
}

pub fn encode_point<P: CanonicalSerialize>(point: &P) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    point.serialize_compressed(&mut bytes)?;
    Ok(bytes)
}

/// Decode a compressed G1 point, checking it lies in the prime-order subgroup.
pub fn decode_g1(bytes: &[u8]) -> Result<G1Affine> {
    Ok(G1Affine::deserialize_compressed(bytes)?)
}

pub fn decode_g2(bytes: &[u8]) -> Result<G2Affine> {
    Ok(G2Affine::deserialize_compressed(bytes)?)
}

/// Check `e(sig, G2) == e(msg_point, pk)`, i.e. `sig = sk * msg_point` for `pk = sk * G2`.
pub(crate) fn pairing_check(sig: &G1Affine, msg_point: &G1Affine, pk: &G2Affine) -> bool {
    let lhs = Bls12_381::pairing(*sig, G2Projective::generator());
    let rhs = Bls12_381::pairing(*msg_point, *pk);
    constant_time_eq_pairing::<Bls12_381>(&lhs, &rhs)
}
