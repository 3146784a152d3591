//! Vandermonde encoding matrix and Gauss-elimination recovery matrix
//! builder. The exhaustive search over parity-volume combinations when a
//! selection proves singular lives in `set.rs`, which owns the directory
//! of available parity volumes; this module only ever attempts one
//! selection per call and reports `Singular` when it fails.

use crate::error::{ParError, Result};
use crate::gf::GaloisField;

/// `V[m][n] = pow(n + 1, m)` for `m` in `[0, parity_count)`, `n` in
/// `[0, data_count)`. Rows are parity volumes (excluding volume 0); columns
/// are recoverable data files in serialisation order.
pub fn vandermonde(gf: &GaloisField, data_count: usize, parity_count: usize) -> Vec<Vec<u8>> {
    let mut v = vec![vec![0u8; data_count]; parity_count];
    for (m, row) in v.iter_mut().enumerate() {
        for (n, cell) in row.iter_mut().enumerate() {
            *cell = gf.pow((n + 1) as u8, m as u32);
        }
    }
    v
}

/// The K x N recovery matrix: row `y` gives, for every data column, the
/// coefficient to XOR-accumulate from surviving data (first N-K entries)
/// and a synthetic "identity completion" over the missing columns
/// themselves (last K entries), permuted to match the order the missing
/// columns appear in `valid`.
#[derive(Debug, Clone)]
pub struct RecoveryMatrix {
    /// One row per missing data column, one coefficient per data column
    /// (`valid.len()` wide).
    pub rows: Vec<Vec<u8>>,
    /// Indices (into `valid`) of the missing columns, in the order the
    /// rows of `rows` correspond to.
    pub missing_columns: Vec<usize>,
}

/// Attempt to build a recovery matrix for the given validity mask and
/// choice of parity volume numbers (1-based, matching `volume_number`).
/// Returns `ParError::Singular` if this selection of parity volumes does
/// not yield an invertible system; the caller (set manager) is expected to
/// retry with a different combination.
pub fn build_recovery_matrix(
    gf: &GaloisField,
    valid: &[bool],
    parity_ids: &[u32],
) -> Result<RecoveryMatrix> {
    let n = valid.len();
    let missing_columns: Vec<usize> = (0..n).filter(|&x| !valid[x]).collect();
    let k = missing_columns.len();
    if k == 0 {
        return Ok(RecoveryMatrix {
            rows: Vec::new(),
            missing_columns,
        });
    }
    if parity_ids.len() != k {
        return Err(ParError::input(format!(
            "recovery matrix needs exactly {} parity volume(s), got {}",
            k,
            parity_ids.len()
        )));
    }

    let surviving_columns: Vec<usize> = (0..n).filter(|&x| valid[x]).collect();

    // Scratch W is K rows x 2N columns. Left half: coefficient at missing
    // columns, else 0. Right half: coefficient at surviving columns
    // (packed left), identity over the K missing positions (packed right).
    let mut w = vec![vec![0u8; 2 * n]; k];
    for (y, &pid) in parity_ids.iter().enumerate() {
        let exponent = pid - 1;
        for &col in &missing_columns {
            w[y][col] = gf.pow((col + 1) as u8, exponent);
        }
        for (packed_idx, &col) in surviving_columns.iter().enumerate() {
            w[y][n + packed_idx] = gf.pow((col + 1) as u8, exponent);
        }
        // Identity completion block, k x k, starting at column n + (n - k).
        w[y][n + (n - k) + y] = 1;
    }

    // Gauss-eliminate the left K x K block (columns `missing_columns`) to
    // the identity, tracking which output row each pivot belongs to.
    let mut order: Vec<usize> = vec![0; k];
    let mut used_rows = vec![false; k];

    for pivot_col_idx in 0..k {
        let col = missing_columns[pivot_col_idx];
        let pivot_row = (0..k)
            .find(|&r| !used_rows[r] && w[r][col] != 0)
            .ok_or(ParError::Singular)?;
        used_rows[pivot_row] = true;
        order[pivot_col_idx] = pivot_row;

        let scalar = w[pivot_row][col];
        if scalar != 1 {
            for cell in w[pivot_row].iter_mut() {
                *cell = gf.div(*cell, scalar)?;
            }
        }
        for r in 0..k {
            if r == pivot_row {
                continue;
            }
            let factor = w[r][col];
            if factor == 0 {
                continue;
            }
            let lut = gf.make_lut(factor);
            let (pivot_vals, row_vals) = {
                let pivot_row_clone = w[pivot_row].clone();
                (pivot_row_clone, &mut w[r])
            };
            GaloisField::xor_scaled_into(&lut, &pivot_vals, row_vals);
        }
    }

    // Emit rows in the order of `missing_columns`: row i of the output
    // corresponds to missing_columns[i], and is the right half of the
    // scratch row that pivoted on missing_columns[i].
    let mut rows = vec![vec![0u8; n]; k];
    for (missing_idx, &pivot_row) in order.iter().enumerate() {
        let right = &w[pivot_row][n..2 * n];
        if right.iter().all(|&b| b == 0) {
            return Err(ParError::Singular);
        }
        for (packed_idx, &col) in surviving_columns.iter().enumerate() {
            rows[missing_idx][col] = right[packed_idx];
        }
        for (k_idx, &col) in missing_columns.iter().enumerate() {
            rows[missing_idx][col] = right[(n - k) + k_idx];
        }
    }

    Ok(RecoveryMatrix {
        rows,
        missing_columns,
    })
}
