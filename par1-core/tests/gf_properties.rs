use par1_core::gf::GaloisField;
use par1_core::matrix::{build_recovery_matrix, vandermonde};
use proptest::prelude::*;

proptest! {
    /// `gf_div(gf_mul(a, b), b) = a` for every `a` and every nonzero `b`
    /// (spec.md §8).
    #[test]
    fn mul_then_div_is_identity(a in 0u8..=255, b in 1u8..=255) {
        let gf = GaloisField::new();
        let product = gf.mul(a, b);
        prop_assert_eq!(gf.div(product, b).unwrap(), a);
    }

    /// `gf_pow(a, 0) = 1` and `gf_pow(a, 1) = a` for nonzero `a`.
    #[test]
    fn pow_zero_and_one(a in 1u8..=255) {
        let gf = GaloisField::new();
        prop_assert_eq!(gf.pow(a, 0), 1);
        prop_assert_eq!(gf.pow(a, 1), a);
    }
}

/// The Vandermonde matrix is invertible on any M-row selection for
/// representative M up to 255 (spec.md §8): build a full N=M Vandermonde
/// square and confirm a recovery matrix treating all columns as missing
/// with parity ids 1..=M is solvable.
#[test]
fn vandermonde_square_is_always_invertible() {
    let gf = GaloisField::new();
    for &m in &[1usize, 3, 16, 64, 128, 255] {
        let v = vandermonde(&gf, m, m);
        assert_eq!(v.len(), m);
        let valid = vec![false; m];
        let parity_ids: Vec<u32> = (1..=m as u32).collect();
        let result = build_recovery_matrix(&gf, &valid, &parity_ids);
        assert!(result.is_ok(), "expected Vandermonde square invertible at m={m}");
    }
}
