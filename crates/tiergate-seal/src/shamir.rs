//! Shamir secret sharing over the Ed25519 scalar field.
//!
//! The data key of every ciphertext is a scalar split into one share per
//! key server. Share `i` is the polynomial evaluated at `x = i + 1`.

use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};

use crate::error::{Result, SealError};

/// f(x) = a_0 + a_1*x + ... + a_{t-1}*x^{t-1}, with a_0 the secret.
pub struct ShamirPolynomial {
    coefficients: Vec<Scalar>,
}

impl ShamirPolynomial {
    /// Random polynomial of degree `threshold - 1` hiding `secret`.
    pub fn from_secret<R: RngCore + CryptoRng>(
        secret: Scalar,
        threshold: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if threshold == 0 {
            return Err(SealError::InvalidThreshold {
                threshold: 0,
                servers: 0,
            });
        }

        let mut coefficients = Vec::with_capacity(threshold);
        coefficients.push(secret);
        for _ in 1..threshold {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes);
            coefficients.push(Scalar::from_bytes_mod_order(bytes));
        }

        Ok(Self { coefficients })
    }

    /// Horner evaluation.
    pub fn evaluate(&self, x: Scalar) -> Scalar {
        self.coefficients
            .iter()
            .rev()
            .fold(Scalar::ZERO, |acc, coeff| acc * x + coeff)
    }

    /// Share for the server at `index`.
    pub fn share(&self, index: u8) -> SharePoint {
        let x = share_x(index);
        SharePoint {
            x,
            y: self.evaluate(x),
        }
    }
}

/// x-coordinate for the server at `index`; never zero.
pub fn share_x(index: u8) -> Scalar {
    Scalar::from(u64::from(index) + 1)
}

/// A point (x, f(x)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharePoint {
    pub x: Scalar,
    pub y: Scalar,
}

/// Lagrange interpolation of f(0).
///
/// With fewer than `t` points the result is an unrelated scalar, which is
/// why the data key is always checked by AEAD afterwards.
pub fn interpolate_at_zero(points: &[SharePoint]) -> Result<Scalar> {
    if points.is_empty() {
        return Err(SealError::NotEnoughShares { have: 0, need: 1 });
    }
    for (i, a) in points.iter().enumerate() {
        if points[i + 1..].iter().any(|b| b.x == a.x) {
            return Err(SealError::MetadataCorruption(
                "duplicate share index".into(),
            ));
        }
    }

    let mut secret = Scalar::ZERO;
    for (i, pi) in points.iter().enumerate() {
        let mut basis = Scalar::ONE;
        for (j, pj) in points.iter().enumerate() {
            if i != j {
                basis *= -pj.x * (pi.x - pj.x).invert();
            }
        }
        secret += pi.y * basis;
    }

    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_evaluate_at_zero_is_secret() {
        let secret = Scalar::from(123u64);
        let poly = ShamirPolynomial::from_secret(secret, 3, &mut OsRng).unwrap();
        assert_eq!(poly.evaluate(Scalar::ZERO), secret);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        assert!(ShamirPolynomial::from_secret(Scalar::ONE, 0, &mut OsRng).is_err());
    }

    #[test]
    fn test_one_short_does_not_recover() {
        let secret = Scalar::from(888u64);
        let poly = ShamirPolynomial::from_secret(secret, 3, &mut OsRng).unwrap();
        let points = [poly.share(0), poly.share(1)];

        assert_ne!(interpolate_at_zero(&points).unwrap(), secret);
    }

    #[test]
    fn test_duplicate_points_rejected() {
        let poly = ShamirPolynomial::from_secret(Scalar::ONE, 2, &mut OsRng).unwrap();
        assert!(interpolate_at_zero(&[poly.share(0), poly.share(0)]).is_err());
    }

    proptest! {
        #[test]
        fn test_any_threshold_subset_recovers(
            seed in any::<[u8; 32]>(),
            threshold in 1usize..5,
            extra in 0usize..3,
            rotate in 0usize..8,
        ) {
            let secret = Scalar::from_bytes_mod_order(seed);
            let n = threshold + extra;
            let poly = ShamirPolynomial::from_secret(secret, threshold, &mut OsRng).unwrap();

            let mut points: Vec<SharePoint> = (0..n as u8).map(|i| poly.share(i)).collect();
            points.rotate_left(rotate % n);
            points.truncate(threshold);

            prop_assert_eq!(interpolate_at_zero(&points).unwrap(), secret);
        }
    }
}
