//! L4 Manifold — witness chains and universal-number operations (§4.5)
//!
//! Applications consume a committed domain's witnessed buffer to compute
//! trace-invariant scalars, extract boundary shards, or project the buffer
//! into smaller algebraic summaries. Every operation here emits a
//! [`WitnessFragment`] that chains to the caller-supplied domain's root
//! witness and consumes budget from that domain (§4.5, §9 "cyclic graphs").

use crate::conservation::{witness_merge, Domain, Witness};
use crate::error::{record, AtlasError, AtlasResult};
use crate::resonance::page_resonance_class;
use crate::types::{PAGE_SIZE, R96_CLASSES};

#[cfg(feature = "std")]
use std::vec::Vec;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

fn sha256_concat(parts: &[&[u8]]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Tag identifying which L4 operation produced a [`WitnessFragment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpTag {
    /// [`linear_projection`]
    LinearProjection,
    /// [`r96_fourier`]
    R96Fourier,
    /// [`shard_extract`]
    ShardExtraction,
    /// [`trace_invariant`]
    TraceInvariant,
    /// [`reconstruct_verify`]
    Reconstruction,
}

/// One link in a [`WitnessChain`] (§3.2, §4.5.1): binds the domain state
/// before and after an L4 operation, the operation's own sub-witness digest,
/// and the budget it consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WitnessFragment {
    /// Digest of the domain's witness chain before this operation
    pub pre_hash: [u8; 32],
    /// Digest of the domain's witness chain after this operation
    pub post_hash: [u8; 32],
    /// Which L4 operation produced this fragment
    pub op_tag: OpTag,
    /// The operation's own sub-witness digest
    pub local_digest: [u8; 32],
    /// Budget consumed from the domain to perform this operation
    pub budget_consumed: u8,
}

/// An ordered sequence of fragments (§3.2 Witness chain). Chain invariant:
/// `fragment[i].post_hash == fragment[i+1].pre_hash`.
#[derive(Debug, Clone, Default)]
pub struct WitnessChain {
    fragments: Vec<WitnessFragment>,
}

impl WitnessChain {
    /// An empty chain
    #[must_use]
    pub fn new() -> Self {
        Self { fragments: Vec::new() }
    }

    /// Fragments recorded so far, in order
    #[must_use]
    pub fn fragments(&self) -> &[WitnessFragment] {
        &self.fragments
    }

    /// Perform `op`, charging `budget_cost` to `domain` and appending the
    /// resulting fragment to this chain. `payload` is the byte region the
    /// sub-witness is generated over. Fails with whatever
    /// [`Domain::budget_alloc`] fails with if the budget is insufficient.
    pub fn record_operation(
        &mut self,
        domain: &Domain,
        op_tag: OpTag,
        budget_cost: u8,
        payload: &[u8],
    ) -> AtlasResult<WitnessFragment> {
        domain.budget_alloc(budget_cost)?;
        let pre_hash = self
            .fragments
            .last()
            .map_or([0u8; 32], |f| f.post_hash);
        let local = crate::conservation::witness_generate(
            payload,
            crate::conservation::HashAlgorithm::Sha256,
        )?;
        let post_hash = sha256_concat(&[&pre_hash, &local.digest]);
        let fragment = WitnessFragment {
            pre_hash,
            post_hash,
            op_tag,
            local_digest: local.digest,
            budget_consumed: budget_cost,
        };
        self.fragments.push(fragment);
        Ok(fragment)
    }
}

/// Verify a witness chain end to end (§4.5.1): every fragment's `post_hash`
/// matches the next fragment's `pre_hash`, the first fragment's `pre_hash`
/// matches `initial`, the last fragment's `post_hash` matches `final_hash`,
/// and total budget consumption does not exceed `budget_ceiling`. An empty
/// chain verifies iff `initial == final_hash`.
#[must_use]
pub fn verify_chain(
    chain: &WitnessChain,
    initial: [u8; 32],
    final_hash: [u8; 32],
    budget_ceiling: u32,
) -> bool {
    let fragments = chain.fragments();
    if fragments.is_empty() {
        return initial == final_hash;
    }
    if fragments[0].pre_hash != initial {
        return false;
    }
    if fragments.last().expect("non-empty").post_hash != final_hash {
        return false;
    }
    if fragments.windows(2).any(|w| w[0].post_hash != w[1].pre_hash) {
        return false;
    }
    let total_budget: u32 = fragments.iter().map(|f| u32::from(f.budget_consumed)).sum();
    total_budget <= budget_ceiling
}

/// Linear projection (§4.5.2): reduce a 12288-byte state to a 96-entry
/// histogram-weighted vector. Equal to the buffer's global R96 histogram,
/// i.e. the element-wise sum of every page's histogram — and therefore
/// invariant under any permutation of bytes that preserves each page's
/// class multiset, in particular under R96-class-preserving permutations.
pub fn linear_projection(data: &[u8]) -> AtlasResult<[u32; R96_CLASSES]> {
    if data.is_empty() || data.len() % PAGE_SIZE != 0 {
        return Err(record(AtlasError::InvalidArgument));
    }
    let mut totals = [0u32; R96_CLASSES];
    for page in data.chunks_exact(PAGE_SIZE) {
        for &byte in page {
            totals[usize::from(crate::atlas::r96_classify(byte))] += 1;
        }
    }
    Ok(totals)
}

/// One frequency-domain coefficient of [`r96_fourier`]: `(real, imag)`
pub type FourierCoefficient = (f64, f64);

/// R96 Fourier transform (§4.5.2): a discrete transform of the 96-bin
/// histogram vector using modular twiddles (`exp(-2πi·k·n/96)`), producing
/// 96 complex coefficients. Preserves total mass in the discrete-modular
/// sense: `coefficients[0].0 == Σ histogram` and the sum of squared
/// magnitudes equals `96 · Σ histogram[n]^2` (a Parseval identity for the
/// unnormalized DFT), checked in this module's tests.
#[cfg(feature = "std")]
#[must_use]
pub fn r96_fourier(histogram: &[u32; R96_CLASSES]) -> [FourierCoefficient; R96_CLASSES] {
    let n = R96_CLASSES as f64;
    let mut out = [(0.0f64, 0.0f64); R96_CLASSES];
    for (k, slot) in out.iter_mut().enumerate() {
        let mut re = 0.0f64;
        let mut im = 0.0f64;
        for (idx, &count) in histogram.iter().enumerate() {
            let angle = -2.0 * core::f64::consts::PI * (k as f64) * (idx as f64) / n;
            re += f64::from(count) * angle.cos();
            im += f64::from(count) * angle.sin();
        }
        *slot = (re, im);
    }
    out
}

/// A contiguous byte-coordinate range naming a boundary shard (§4.5.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    /// Inclusive lower coordinate, must be page-aligned
    pub start_coord: u32,
    /// Exclusive upper coordinate, must be page-aligned
    pub end_coord: u32,
    /// The dominant resonance class pages must have to be included
    pub resonance_class: u8,
}

/// Shard extraction (§4.5.2): the page indices within `[start_coord,
/// end_coord)` whose dominant R96 class is `resonance_class`. Requires
/// `start_coord < end_coord`, both page-boundary aligned, and
/// `resonance_class < 96`.
pub fn shard_extract(base: &[u8], spec: ShardSpec) -> AtlasResult<Vec<u32>> {
    if spec.start_coord >= spec.end_coord
        || spec.start_coord % PAGE_SIZE as u32 != 0
        || spec.end_coord % PAGE_SIZE as u32 != 0
        || usize::from(spec.resonance_class) >= R96_CLASSES
        || spec.end_coord as usize > base.len()
    {
        return Err(record(AtlasError::InvalidArgument));
    }
    let start_page = spec.start_coord / PAGE_SIZE as u32;
    let end_page = spec.end_coord / PAGE_SIZE as u32;
    let mut out = Vec::new();
    for page_idx in start_page..end_page {
        let offset = page_idx as usize * PAGE_SIZE;
        let page_bytes = &base[offset..offset + PAGE_SIZE];
        let page: &[u8; PAGE_SIZE] = page_bytes.try_into().expect("page slice is exactly PAGE_SIZE bytes");
        if page_resonance_class(page) == spec.resonance_class {
            out.push(page_idx);
        }
    }
    Ok(out)
}

/// A 96x96 class-adjacency matrix: entry `(i, j)` counts byte-pairs of
/// classes `(i, j)` observed in consecutive positions of a window (§4.5.2).
pub type AdjacencyMatrix = [[u32; R96_CLASSES]; R96_CLASSES];

/// Build the class-adjacency matrix for a byte window: for every adjacent
/// pair `(data[i], data[i+1])`, increment `adjacency[r96(data[i])][r96(data[i+1])]`.
#[must_use]
pub fn build_adjacency(data: &[u8]) -> AdjacencyMatrix {
    let mut adjacency = [[0u32; R96_CLASSES]; R96_CLASSES];
    for pair in data.windows(2) {
        let a = usize::from(crate::atlas::r96_classify(pair[0]));
        let b = usize::from(crate::atlas::r96_classify(pair[1]));
        adjacency[a][b] += 1;
    }
    adjacency
}

fn matmul(a: &AdjacencyMatrix, b: &AdjacencyMatrix) -> AdjacencyMatrix {
    let mut out = [[0u32; R96_CLASSES]; R96_CLASSES];
    for i in 0..R96_CLASSES {
        for k in 0..R96_CLASSES {
            if a[i][k] == 0 {
                continue;
            }
            for j in 0..R96_CLASSES {
                out[i][j] = out[i][j].wrapping_add(a[i][k].wrapping_mul(b[k][j]));
            }
        }
    }
    out
}

/// `Tr(A^k) mod 96` over the class-adjacency matrix (§4.5.2). `k == 0`
/// yields `Tr(I) mod 96 == R96_CLASSES mod 96 == 0`. Commutes with any
/// permutation of classes that preserves adjacency, since trace is
/// invariant under similarity transforms.
#[must_use]
pub fn trace_invariant(adjacency: &AdjacencyMatrix, k: u32) -> u8 {
    if k == 0 {
        return (R96_CLASSES % 96) as u8;
    }
    let mut power = *adjacency;
    for _ in 1..k {
        power = matmul(&power, adjacency);
    }
    let trace: u64 = (0..R96_CLASSES).map(|i| u64::from(power[i][i])).sum();
    (trace % 96) as u8
}

/// Reconstruction (§4.5.2): fold a set of shard witnesses that collectively
/// cover the buffer with no overlap into a single merged witness (in
/// ascending digest order, so the result is independent of input order —
/// `witness_merge` is commutative but this fixes a canonical associativity),
/// and check it matches `root`.
#[must_use]
pub fn reconstruct_verify(shard_witnesses: &[Witness], root: &Witness) -> bool {
    if shard_witnesses.is_empty() {
        return false;
    }
    let mut sorted: Vec<Witness> = shard_witnesses.to_vec();
    sorted.sort_by(|a, b| a.digest.cmp(&b.digest));
    let mut merged = sorted[0];
    for w in &sorted[1..] {
        merged = witness_merge(&merged, w);
    }
    merged.digest == root.digest && merged.resonance_class == root.resonance_class
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conservation::HashAlgorithm;
    use crate::types::ATLAS_SIZE;

    #[test]
    fn linear_projection_totals_match_global_histogram() {
        let mut data = vec![0u8; ATLAS_SIZE];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let totals = linear_projection(&data).unwrap();
        let sum: u32 = totals.iter().sum();
        assert_eq!(sum, ATLAS_SIZE as u32);
    }

    #[test]
    fn linear_projection_rejects_non_page_aligned_length() {
        assert_eq!(linear_projection(&[0u8; 10]), Err(AtlasError::InvalidArgument));
    }

    #[cfg(feature = "std")]
    #[test]
    fn fourier_preserves_total_mass() {
        let mut hist = [0u32; R96_CLASSES];
        hist[0] = 10;
        hist[5] = 20;
        hist[95] = 5;
        let coeffs = r96_fourier(&hist);
        let dc: u32 = hist.iter().sum();
        assert!((coeffs[0].0 - f64::from(dc)).abs() < 1e-6);
        assert!(coeffs[0].1.abs() < 1e-6);

        let energy: f64 = coeffs.iter().map(|(re, im)| re * re + im * im).sum();
        let time_energy: f64 = hist.iter().map(|&c| f64::from(c) * f64::from(c)).sum();
        assert!((energy - time_energy * R96_CLASSES as f64).abs() < 1e-3);
    }

    #[test]
    fn shard_extraction_respects_bounds_and_class() {
        let mut base = vec![0u8; 4 * PAGE_SIZE];
        base[PAGE_SIZE..2 * PAGE_SIZE].fill(1); // class 1
        base[2 * PAGE_SIZE..3 * PAGE_SIZE].fill(1); // class 1

        let spec = ShardSpec { start_coord: 0, end_coord: 4 * PAGE_SIZE as u32, resonance_class: 1 };
        let pages = shard_extract(&base, spec).unwrap();
        assert_eq!(pages, vec![1, 2]);
    }

    #[test]
    fn shard_extraction_rejects_misaligned_or_inverted_range() {
        let base = vec![0u8; 2 * PAGE_SIZE];
        assert_eq!(
            shard_extract(&base, ShardSpec { start_coord: 10, end_coord: 256, resonance_class: 0 }),
            Err(AtlasError::InvalidArgument)
        );
        assert_eq!(
            shard_extract(&base, ShardSpec { start_coord: 256, end_coord: 0, resonance_class: 0 }),
            Err(AtlasError::InvalidArgument)
        );
        assert_eq!(
            shard_extract(&base, ShardSpec { start_coord: 0, end_coord: 256, resonance_class: 96 }),
            Err(AtlasError::InvalidArgument)
        );
    }

    #[test]
    fn trace_invariant_of_identity_power_is_zero() {
        let adjacency = [[0u32; R96_CLASSES]; R96_CLASSES];
        assert_eq!(trace_invariant(&adjacency, 0), 0);
    }

    #[test]
    fn trace_invariant_tracks_self_loops() {
        let data = vec![5u8; 200]; // every adjacent pair is (5, 5)
        let adjacency = build_adjacency(&data);
        assert_eq!(adjacency[5][5], 199);
        let trace1 = trace_invariant(&adjacency, 1);
        assert_eq!(trace1, (199u64 % 96) as u8);
    }

    #[test]
    fn reconstruction_round_trip() {
        let a = crate::conservation::witness_generate(b"shard-a", HashAlgorithm::Sha256).unwrap();
        let b = crate::conservation::witness_generate(b"shard-b", HashAlgorithm::Sha256).unwrap();
        let c = crate::conservation::witness_generate(b"shard-c", HashAlgorithm::Sha256).unwrap();

        let mut sorted = [a, b, c];
        sorted.sort_by(|x, y| x.digest.cmp(&y.digest));
        let root = witness_merge(&witness_merge(&sorted[0], &sorted[1]), &sorted[2]);

        assert!(reconstruct_verify(&[a, b, c], &root));
        assert!(reconstruct_verify(&[c, a, b], &root)); // order-independent
    }

    #[test]
    fn reconstruction_rejects_wrong_root() {
        let a = crate::conservation::witness_generate(b"alpha", HashAlgorithm::Sha256).unwrap();
        let b = crate::conservation::witness_generate(b"beta", HashAlgorithm::Sha256).unwrap();
        let wrong_root = crate::conservation::witness_generate(b"not-the-root", HashAlgorithm::Sha256).unwrap();
        assert!(!reconstruct_verify(&[a, b], &wrong_root));
    }

    #[test]
    fn chain_records_and_verifies() {
        let domain = Domain::create(1024, 50).unwrap();
        let mut chain = WitnessChain::new();

        let f1 = chain
            .record_operation(&domain, OpTag::LinearProjection, 3, b"payload-one")
            .unwrap();
        let f2 = chain
            .record_operation(&domain, OpTag::ShardExtraction, 2, b"payload-two")
            .unwrap();

        assert_eq!(domain.budget(), 50 - 3 - 2);
        assert_eq!(f1.post_hash, f2.pre_hash);
        assert!(verify_chain(&chain, [0u8; 32], f2.post_hash, 10));
        assert!(!verify_chain(&chain, [0u8; 32], f2.post_hash, 1)); // exceeds ceiling
        assert!(!verify_chain(&chain, [1u8; 32], f2.post_hash, 10)); // wrong initial
    }

    #[test]
    fn empty_chain_verifies_only_when_initial_equals_final() {
        let chain = WitnessChain::new();
        assert!(verify_chain(&chain, [0u8; 32], [0u8; 32], 0));
        assert!(!verify_chain(&chain, [0u8; 32], [1u8; 32], 0));
    }
}
