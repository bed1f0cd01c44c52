use ark_std::rand::{rngs::StdRng, SeedableRng};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use blake2::{digest::consts::U20, Blake2b, Digest};
use rand::RngCore;
use sha2::Sha256;

use crate::error::Result;

type Blake2b160 = Blake2b<U20>;

/// SHA-256 over the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// 160-bit digest used for node identities and key-epoch indexing.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let mut hasher = Blake2b160::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// XOR two byte strings, truncated to the shorter one.
pub fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

/// XOR `other` into `acc` in place. Both must be the same length.
pub fn xor_in_place(acc: &mut [u8], other: &[u8]) {
    debug_assert_eq!(acc.len(), other.len());
    for (a, b) in acc.iter_mut().zip(other.iter()) {
        *a ^= b;
    }
}

/// Reduce a big-endian integer modulo `m` (m > 0).
pub fn be_bytes_mod(bytes: &[u8], m: usize) -> usize {
    debug_assert!(m > 0);
    let m = m as u128;
    let mut acc: u128 = 0;
    for &b in bytes {
        acc = ((acc << 8) | b as u128) % m;
    }
    acc as usize
}

pub fn to_base64(data: &[u8]) -> String {
    BASE64.encode(data)
}

pub fn from_base64(data: &str) -> Result<Vec<u8>> {
    Ok(BASE64.decode(data)?)
}

/// Fresh random bytes from the thread RNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::rng().fill_bytes(&mut out);
    out
}

/// Arkworks-compatible RNG seeded from the OS-backed thread RNG.
pub fn fresh_rng() -> StdRng {
    StdRng::from_seed(random_bytes::<32>())
}
