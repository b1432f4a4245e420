//! # Erasure Codec Engine
//!
//! Systematic erasure coding over GF(2^8) on fixed-size blocks. A group of
//! `k` data blocks yields `m` parity blocks; any `k` of the `k + m` blocks
//! reconstruct the original data byte-identically.
//!
//! Two constructions are available as tagged variants:
//!
//! - [`CodecKind::CauchyRs`] — Cauchy-matrix Reed-Solomon. MDS: tolerates
//!   any `m` losses exactly. This is the production codec.
//! - [`CodecKind::XorParity`] — plain XOR parity. Recovers at most one
//!   missing data block regardless of `m`; kept as a cheap reference
//!   construction for development and tests.
//!
//! ## GF(2^8) Arithmetic
//!
//! Field operations use the primitive polynomial x^8 + x^4 + x^3 + x^2 + 1
//! (0x11D) with generator 2, via compile-time log/antilog tables.

use crate::error::FecError;

// ─── GF(2^8) Arithmetic ─────────────────────────────────────────────────────

mod gf256 {
    /// Multiplication in GF(256).
    #[inline]
    pub fn mul(a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            return 0;
        }
        let log_sum = (LOG_TABLE[a as usize] as u16 + LOG_TABLE[b as usize] as u16) % 255;
        EXP_TABLE[log_sum as usize]
    }

    /// Multiplicative inverse in GF(256). `a` must be nonzero.
    #[inline]
    pub fn inv(a: u8) -> u8 {
        debug_assert_ne!(a, 0, "inverse of zero in GF(256)");
        EXP_TABLE[(255 - LOG_TABLE[a as usize] as u16) as usize]
    }

    // Generate both tables together. Primitive polynomial 0x11D, generator 2.
    const fn gen_tables() -> ([u8; 256], [u8; 512]) {
        let mut log = [0u8; 256];
        let mut exp = [0u8; 512];
        let mut x: u16 = 1;
        let mut i = 0usize;
        while i < 255 {
            exp[i] = x as u8;
            exp[i + 255] = x as u8; // duplicate for easy modular lookup
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= 0x11D;
            }
            i += 1;
        }
        // log[0] is unused (0 has no logarithm)
        log[0] = 0;
        (log, exp)
    }

    const TABLES: ([u8; 256], [u8; 512]) = gen_tables();
    const LOG_TABLE: [u8; 256] = TABLES.0;
    const EXP_TABLE: [u8; 512] = TABLES.1;
}

/// `acc[b] ^= coeff * src[b]` over the whole block.
#[inline]
fn mul_acc(acc: &mut [u8], coeff: u8, src: &[u8]) {
    if coeff == 0 {
        return;
    }
    for (a, &s) in acc.iter_mut().zip(src) {
        *a ^= gf256::mul(coeff, s);
    }
}

// ─── Codec ──────────────────────────────────────────────────────────────────

/// Which erasure construction a [`BlockCodec`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecKind {
    /// Cauchy-matrix Reed-Solomon (MDS).
    #[default]
    CauchyRs,
    /// XOR parity reference construction (single-loss recovery only).
    XorParity,
}

/// Systematic block erasure codec configured for one (k, m, block_size).
#[derive(Debug, Clone)]
pub struct BlockCodec {
    k: usize,
    m: usize,
    block_size: usize,
    kind: CodecKind,
}

impl BlockCodec {
    /// Create a codec. Fails with [`FecError::InvalidParameter`] when k or m
    /// is zero, the block size is zero, or k + m exceeds the GF(2^8) field
    /// limit of the Cauchy construction.
    pub fn new(k: usize, m: usize, block_size: usize, kind: CodecKind) -> Result<Self, FecError> {
        if k == 0 || m == 0 {
            return Err(FecError::InvalidParameter(
                "k and m must be greater than 0".into(),
            ));
        }
        if block_size == 0 {
            return Err(FecError::InvalidParameter(
                "block size must be greater than 0".into(),
            ));
        }
        if kind == CodecKind::CauchyRs && k + m > 255 {
            return Err(FecError::InvalidParameter(format!(
                "k + m = {} exceeds GF(2^8) limit of 255",
                k + m
            )));
        }
        Ok(BlockCodec {
            k,
            m,
            block_size,
            kind,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    /// Cauchy generator entry for parity row `j`, data column `i`:
    /// `1 / (x_j + y_i)` with `x_j = k + j`, `y_i = i`. The x and y sets are
    /// disjoint for k + m <= 255, so the denominator is never zero and every
    /// square submatrix of the generator is invertible.
    #[inline]
    fn cauchy_coeff(&self, j: usize, i: usize) -> u8 {
        gf256::inv(((self.k + j) as u8) ^ (i as u8))
    }

    /// Encode `k` data blocks into `m` parity blocks.
    pub fn encode(&self, data: &[Vec<u8>]) -> Result<Vec<Vec<u8>>, FecError> {
        if data.len() != self.k {
            return Err(FecError::InvalidParameter(format!(
                "expected {} data blocks, got {}",
                self.k,
                data.len()
            )));
        }
        for block in data {
            if block.len() != self.block_size {
                return Err(FecError::BlockSizeMismatch {
                    expected: self.block_size,
                    actual: block.len(),
                });
            }
        }

        let mut parity = vec![vec![0u8; self.block_size]; self.m];
        match self.kind {
            CodecKind::CauchyRs => {
                for (j, out) in parity.iter_mut().enumerate() {
                    for (i, block) in data.iter().enumerate() {
                        mul_acc(out, self.cauchy_coeff(j, i), block);
                    }
                }
            }
            CodecKind::XorParity => {
                for out in parity.iter_mut() {
                    for block in data {
                        for (o, &b) in out.iter_mut().zip(block) {
                            *o ^= b;
                        }
                    }
                }
            }
        }
        Ok(parity)
    }

    /// Reconstruct the original `k` data blocks from any `k` received blocks
    /// and their original indices (`0..k` data, `k..k+m` parity).
    ///
    /// Duplicate indices are ignored beyond the first occurrence. With the
    /// XOR reference kind, more than one missing data block is unsolvable
    /// and reported as [`FecError::InsufficientBlocks`].
    pub fn decode(&self, blocks: &[Vec<u8>], ids: &[u32]) -> Result<Vec<Vec<u8>>, FecError> {
        if blocks.len() != ids.len() {
            return Err(FecError::InvalidParameter(format!(
                "{} blocks but {} indices",
                blocks.len(),
                ids.len()
            )));
        }

        let total = (self.k + self.m) as u32;
        let mut seen = vec![false; self.k + self.m];
        let mut received: Vec<(u32, &Vec<u8>)> = Vec::with_capacity(self.k);
        for (block, &id) in blocks.iter().zip(ids) {
            if id >= total {
                return Err(FecError::InvalidParameter(format!(
                    "block index {id} out of range for {total} total blocks"
                )));
            }
            if block.len() != self.block_size {
                return Err(FecError::BlockSizeMismatch {
                    expected: self.block_size,
                    actual: block.len(),
                });
            }
            if !seen[id as usize] {
                seen[id as usize] = true;
                received.push((id, block));
            }
        }

        if received.len() < self.k {
            return Err(FecError::InsufficientBlocks {
                have: received.len(),
                need: self.k,
            });
        }
        received.sort_by_key(|(id, _)| *id);

        // Fast path: all k data blocks arrived.
        if received
            .iter()
            .take(self.k)
            .enumerate()
            .all(|(i, (id, _))| *id as usize == i)
        {
            return Ok(received
                .iter()
                .take(self.k)
                .map(|(_, b)| (*b).clone())
                .collect());
        }

        match self.kind {
            CodecKind::XorParity => self.decode_xor(&received),
            CodecKind::CauchyRs => self.solve(&received),
        }
    }

    /// XOR reference recovery: at most one missing data block.
    fn decode_xor(&self, received: &[(u32, &Vec<u8>)]) -> Result<Vec<Vec<u8>>, FecError> {
        let data: Vec<Option<&Vec<u8>>> = (0..self.k as u32)
            .map(|i| {
                received
                    .iter()
                    .find(|(id, _)| *id == i)
                    .map(|(_, b)| *b)
            })
            .collect();
        let missing: Vec<usize> = data
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_none())
            .map(|(i, _)| i)
            .collect();
        let have = self.k - missing.len();

        if missing.len() > 1 {
            return Err(FecError::InsufficientBlocks { have, need: self.k });
        }
        let parity = received
            .iter()
            .find(|(id, _)| *id as usize >= self.k)
            .map(|(_, b)| *b)
            .ok_or(FecError::InsufficientBlocks { have, need: self.k })?;

        let mut recovered = parity.clone();
        for block in data.iter().flatten() {
            for (r, &b) in recovered.iter_mut().zip(*block) {
                *r ^= b;
            }
        }

        Ok(data
            .into_iter()
            .map(|b| b.cloned().unwrap_or_else(|| recovered.clone()))
            .collect())
    }

    /// Gauss-Jordan elimination over GF(2^8) on the first k distinct
    /// received blocks. Each row is the generator row for that block's
    /// index, augmented with the block data.
    fn solve(&self, received: &[(u32, &Vec<u8>)]) -> Result<Vec<Vec<u8>>, FecError> {
        let mut coeffs: Vec<Vec<u8>> = Vec::with_capacity(self.k);
        let mut rhs: Vec<Vec<u8>> = Vec::with_capacity(self.k);
        for &(id, block) in received.iter().take(self.k) {
            let mut row = vec![0u8; self.k];
            let id = id as usize;
            if id < self.k {
                row[id] = 1;
            } else {
                for (i, c) in row.iter_mut().enumerate() {
                    *c = self.cauchy_coeff(id - self.k, i);
                }
            }
            coeffs.push(row);
            rhs.push(block.clone());
        }

        for col in 0..self.k {
            let pivot = (col..self.k)
                .find(|&r| coeffs[r][col] != 0)
                .ok_or_else(|| {
                    // Unreachable for a true Cauchy generator; guards the
                    // solver against a future non-MDS construction.
                    FecError::InvalidParameter("singular decode matrix".into())
                })?;
            coeffs.swap(col, pivot);
            rhs.swap(col, pivot);

            let inv = gf256::inv(coeffs[col][col]);
            for c in coeffs[col].iter_mut() {
                *c = gf256::mul(*c, inv);
            }
            for d in rhs[col].iter_mut() {
                *d = gf256::mul(*d, inv);
            }

            for row in 0..self.k {
                if row == col || coeffs[row][col] == 0 {
                    continue;
                }
                let factor = coeffs[row][col];
                let (pivot_coeffs, pivot_rhs) = (coeffs[col].clone(), rhs[col].clone());
                for (c, &p) in coeffs[row].iter_mut().zip(&pivot_coeffs) {
                    *c ^= gf256::mul(factor, p);
                }
                mul_acc(&mut rhs[row], factor, &pivot_rhs);
            }
        }

        Ok(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_data(k: usize, block_size: usize) -> Vec<Vec<u8>> {
        (0..k)
            .map(|i| {
                (0..block_size)
                    .map(|j| ((i * 37 + j * 13 + 5) % 256) as u8)
                    .collect()
            })
            .collect()
    }

    // ─── GF(2^8) Tests ──────────────────────────────────────────────────

    #[test]
    fn gf256_identity() {
        for a in 1u8..=255 {
            assert_eq!(gf256::mul(a, 1), a);
            assert_eq!(gf256::mul(1, a), a);
        }
    }

    #[test]
    fn gf256_zero() {
        for a in 0u8..=255 {
            assert_eq!(gf256::mul(a, 0), 0);
            assert_eq!(gf256::mul(0, a), 0);
        }
    }

    #[test]
    fn gf256_inverse() {
        for a in 1u8..=255 {
            assert_eq!(gf256::mul(a, gf256::inv(a)), 1, "a={a}");
        }
    }

    // ─── Parameter validation ───────────────────────────────────────────

    #[test]
    fn rejects_zero_params() {
        assert!(BlockCodec::new(0, 2, 8, CodecKind::CauchyRs).is_err());
        assert!(BlockCodec::new(4, 0, 8, CodecKind::CauchyRs).is_err());
        assert!(BlockCodec::new(4, 2, 0, CodecKind::CauchyRs).is_err());
    }

    #[test]
    fn rejects_field_overflow() {
        assert!(BlockCodec::new(200, 60, 8, CodecKind::CauchyRs).is_err());
        assert!(BlockCodec::new(200, 55, 8, CodecKind::CauchyRs).is_ok());
    }

    // ─── Encode/decode ──────────────────────────────────────────────────

    #[test]
    fn roundtrip_no_loss() {
        let codec = BlockCodec::new(4, 2, 16, CodecKind::CauchyRs).unwrap();
        let data = test_data(4, 16);
        let parity = codec.encode(&data).unwrap();
        assert_eq!(parity.len(), 2);

        let mut blocks = data.clone();
        blocks.extend(parity);
        let ids: Vec<u32> = (0..6).collect();
        assert_eq!(codec.decode(&blocks, &ids).unwrap(), data);
    }

    #[test]
    fn recovers_two_dropped_data_blocks() {
        // k=4, m=2, block_size=8; drop data[0] and data[2], present
        // data[1], data[3], parity[0], parity[1] with ids (1,3,4,5).
        let codec = BlockCodec::new(4, 2, 8, CodecKind::CauchyRs).unwrap();
        let data: Vec<Vec<u8>> = (0..4).map(|i| vec![(i + 1) as u8; 8]).collect();
        let parity = codec.encode(&data).unwrap();

        let blocks = vec![
            data[1].clone(),
            data[3].clone(),
            parity[0].clone(),
            parity[1].clone(),
        ];
        let recovered = codec.decode(&blocks, &[1, 3, 4, 5]).unwrap();
        assert_eq!(recovered, data);
    }

    #[test]
    fn recovers_from_parity_only() {
        let codec = BlockCodec::new(3, 3, 12, CodecKind::CauchyRs).unwrap();
        let data = test_data(3, 12);
        let parity = codec.encode(&data).unwrap();
        let recovered = codec.decode(&parity, &[3, 4, 5]).unwrap();
        assert_eq!(recovered, data);
    }

    #[test]
    fn any_k_subset_recovers() {
        let k = 5;
        let m = 3;
        let codec = BlockCodec::new(k, m, 6, CodecKind::CauchyRs).unwrap();
        let data = test_data(k, 6);
        let parity = codec.encode(&data).unwrap();
        let mut all = data.clone();
        all.extend(parity);

        // Every contiguous window of k indices out of k+m.
        for start in 0..=m {
            let ids: Vec<u32> = (start as u32..(start + k) as u32).collect();
            let blocks: Vec<Vec<u8>> = ids.iter().map(|&i| all[i as usize].clone()).collect();
            assert_eq!(codec.decode(&blocks, &ids).unwrap(), data, "window {start}");
        }
    }

    #[test]
    fn insufficient_blocks() {
        let codec = BlockCodec::new(4, 2, 8, CodecKind::CauchyRs).unwrap();
        let data = test_data(4, 8);
        let err = codec.decode(&data[..3].to_vec(), &[0, 1, 2]).unwrap_err();
        assert!(matches!(
            err,
            FecError::InsufficientBlocks { have: 3, need: 4 }
        ));
    }

    #[test]
    fn duplicate_indices_do_not_count() {
        let codec = BlockCodec::new(3, 1, 8, CodecKind::CauchyRs).unwrap();
        let data = test_data(3, 8);
        let blocks = vec![data[0].clone(), data[0].clone(), data[1].clone()];
        let err = codec.decode(&blocks, &[0, 0, 1]).unwrap_err();
        assert!(matches!(
            err,
            FecError::InsufficientBlocks { have: 2, need: 3 }
        ));
    }

    #[test]
    fn block_size_mismatch() {
        let codec = BlockCodec::new(2, 1, 8, CodecKind::CauchyRs).unwrap();
        let err = codec.encode(&[vec![0u8; 8], vec![0u8; 7]]).unwrap_err();
        assert!(matches!(
            err,
            FecError::BlockSizeMismatch {
                expected: 8,
                actual: 7
            }
        ));
    }

    #[test]
    fn exactly_k_blocks_solves() {
        let codec = BlockCodec::new(4, 4, 8, CodecKind::CauchyRs).unwrap();
        let data = test_data(4, 8);
        let parity = codec.encode(&data).unwrap();
        // Mixed data/parity, exactly k, unsorted ids.
        let blocks = vec![
            parity[2].clone(),
            data[1].clone(),
            parity[0].clone(),
            data[2].clone(),
        ];
        assert_eq!(codec.decode(&blocks, &[6, 1, 4, 2]).unwrap(), data);
    }

    // ─── XOR reference kind ─────────────────────────────────────────────

    #[test]
    fn xor_recovers_single_loss() {
        let codec = BlockCodec::new(4, 1, 8, CodecKind::XorParity).unwrap();
        let data = test_data(4, 8);
        let parity = codec.encode(&data).unwrap();

        let blocks = vec![
            data[0].clone(),
            data[1].clone(),
            data[3].clone(),
            parity[0].clone(),
        ];
        assert_eq!(codec.decode(&blocks, &[0, 1, 3, 4]).unwrap(), data);
    }

    #[test]
    fn xor_cannot_recover_double_loss() {
        let codec = BlockCodec::new(4, 2, 8, CodecKind::XorParity).unwrap();
        let data = test_data(4, 8);
        let parity = codec.encode(&data).unwrap();

        let blocks = vec![
            data[0].clone(),
            data[1].clone(),
            parity[0].clone(),
            parity[1].clone(),
        ];
        let err = codec.decode(&blocks, &[0, 1, 4, 5]).unwrap_err();
        assert!(matches!(err, FecError::InsufficientBlocks { .. }));
    }
}
