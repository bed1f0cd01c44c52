//! Protection for secret protocol material
//!
//! This module provides:
//! - A zeroizing wrapper for secret scalars (OPRF keys, blinding masks,
//!   group signing keys)
//! - Constant-time comparison for pairing outputs and byte strings

use ark_ec::pairing::{Pairing, PairingOutput};
use ark_ff::Field;
use ark_serialize::CanonicalSerialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Secret scalar that is wiped on drop and never printed.
#[derive(Clone)]
pub struct SensitiveScalar<F: Field> {
    value: F,
}

impl<F: Field> SensitiveScalar<F> {
    pub fn new(value: F) -> Self {
        Self { value }
    }

    /// Borrow the secret. The caller must not copy it anywhere long-lived.
    pub fn expose_secret(&self) -> &F {
        &self.value
    }
}

impl<F: Field> Zeroize for SensitiveScalar<F> {
    fn zeroize(&mut self) {
        // arkworks fields do not expose their limbs, so overwrite the value
        self.value = F::zero();
    }
}

impl<F: Field> ZeroizeOnDrop for SensitiveScalar<F> {}

impl<F: Field> Drop for SensitiveScalar<F> {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl<F: Field> std::fmt::Debug for SensitiveScalar<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SensitiveScalar([REDACTED])")
    }
}

/// Constant-time byte slice comparison. Length is not treated as secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }

    result == 0
}

/// Compare two pairing outputs through their canonical encodings.
///
/// The pairing itself is not constant-time; only the final comparison is.
pub fn constant_time_eq_pairing<E: Pairing>(a: &PairingOutput<E>, b: &PairingOutput<E>) -> bool {
    let mut a_bytes = Vec::new();
    let mut b_bytes = Vec::new();

    if a.serialize_compressed(&mut a_bytes).is_err() {
        return false;
    }
    if b.serialize_compressed(&mut b_bytes).is_err() {
        return false;
    }

    constant_time_eq(&a_bytes, &b_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_bls12_381::{Bls12_381, Fr, G1Projective, G2Projective};
    use ark_ec::PrimeGroup;
    use ark_std::{UniformRand, Zero};

    #[test]
    fn test_sensitive_scalar_zeroization() {
        let mut rng = ark_std::test_rng();
        let secret = Fr::rand(&mut rng);

        let mut sensitive = SensitiveScalar::new(secret);
        assert_eq!(sensitive.expose_secret(), &secret);

        sensitive.zeroize();
        assert!(sensitive.expose_secret().is_zero());
    }

    #[test]
    fn test_sensitive_scalar_debug_is_redacted() {
        let mut rng = ark_std::test_rng();
        let secret = Fr::rand(&mut rng);
        let sensitive = SensitiveScalar::new(secret);

        let debug_str = format!("{:?}", sensitive);
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains(&format!("{:?}", secret)));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(&[1, 2, 3, 4], &[1, 2, 3, 4]));
        assert!(!constant_time_eq(&[1, 2, 3, 4], &[1, 2, 3, 5]));
        assert!(!constant_time_eq(&[1, 2, 3], &[1, 2, 3, 4]));
    }

    #[test]
    fn test_constant_time_eq_pairing() {
        let mut rng = ark_std::test_rng();
        let s = Fr::rand(&mut rng);
        let g1 = G1Projective::generator();
        let g2 = G2Projective::generator();

        let lhs = Bls12_381::pairing(g1 * s, g2);
        let rhs = Bls12_381::pairing(g1, g2 * s);
        let other = Bls12_381::pairing(g1, g2);

        assert!(constant_time_eq_pairing::<Bls12_381>(&lhs, &rhs));
        assert!(!constant_time_eq_pairing::<Bls12_381>(&lhs, &other));
    }
}
