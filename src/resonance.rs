//! L3 Resonance — page classification, histograms, CSR clustering by
//! dominant class, and harmonic-window scheduling (§4.4)

use crate::atlas::{r96_classify, r96_dominant, r96_histogram};
use crate::error::{record, AtlasError, AtlasResult};
use crate::types::{PAGE_SIZE, R96_CLASSES};

#[cfg(feature = "std")]
use std::vec::Vec;

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

/// Map each byte of a 256-byte page to its R96 class (§4.4.1)
pub fn r96_classify_page(page: &[u8; PAGE_SIZE], out: &mut [u8; PAGE_SIZE]) {
    for i in 0..PAGE_SIZE {
        out[i] = r96_classify(page[i]);
    }
}

/// Dense 96-bin histogram of a 256-byte page; `Σ bins == 256` (§4.4.1)
#[must_use]
pub fn r96_histogram_page(page: &[u8; PAGE_SIZE]) -> [u16; R96_CLASSES] {
    r96_histogram(page)
}

/// The dominant resonance class of a 256-byte page (§4.4.1)
#[must_use]
pub fn page_resonance_class(page: &[u8; PAGE_SIZE]) -> u8 {
    r96_dominant(&r96_histogram_page(page))
}

/// A compressed-sparse-row index mapping R96 classes to the page indices
/// whose dominant class they are (§3.2, §4.4.2). Owns its `offsets` and
/// `indices` arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterView {
    /// Prefix-sum boundaries; class `r` occupies `indices[offsets[r]..offsets[r+1]]`
    pub offsets: [u32; R96_CLASSES + 1],
    /// Page indices sorted by dominant class, stable within class
    pub indices: Vec<u32>,
}

impl ClusterView {
    /// Number of pages whose dominant class is `c`
    #[must_use]
    pub fn count_for_resonance(&self, c: u8) -> u32 {
        let c = usize::from(c);
        self.offsets[c + 1] - self.offsets[c]
    }

    /// Page indices whose dominant class is `c`
    #[must_use]
    pub fn pages_for_resonance(&self, c: u8) -> &[u32] {
        let c = usize::from(c);
        &self.indices[self.offsets[c] as usize..self.offsets[c + 1] as usize]
    }
}

/// Build a CSR cluster view over `page_count` contiguous 256-byte pages in
/// `base`, grouping page indices by dominant resonance class via a two-pass
/// counting sort (§4.4.2). Fails with `InvalidArgument` if `base.len() !=
/// page_count * 256`.
pub fn cluster_by_resonance(base: &[u8], page_count: usize) -> AtlasResult<ClusterView> {
    if base.len() != page_count * PAGE_SIZE {
        return Err(record(AtlasError::InvalidArgument));
    }

    let mut classes = Vec::with_capacity(page_count);
    for page_idx in 0..page_count {
        let page_bytes = &base[page_idx * PAGE_SIZE..(page_idx + 1) * PAGE_SIZE];
        let page: &[u8; PAGE_SIZE] = page_bytes.try_into().expect("page slice is exactly PAGE_SIZE bytes");
        classes.push(page_resonance_class(page));
    }

    build_cluster_view(&classes)
}

/// Parallel variant of [`cluster_by_resonance`] for large page counts, using
/// `rayon` to classify pages concurrently before the inherently-sequential
/// counting-sort scatter pass (§9: "an explicit, feature-gated rayon-parallel
/// path for bulk classification and clustering on large page counts").
#[cfg(feature = "parallel")]
pub fn cluster_by_resonance_parallel(base: &[u8], page_count: usize) -> AtlasResult<ClusterView> {
    use rayon::prelude::*;

    if base.len() != page_count * PAGE_SIZE {
        return Err(record(AtlasError::InvalidArgument));
    }

    let classes: Vec<u8> = base
        .par_chunks_exact(PAGE_SIZE)
        .map(|page_bytes| {
            let page: &[u8; PAGE_SIZE] =
                page_bytes.try_into().expect("page slice is exactly PAGE_SIZE bytes");
            page_resonance_class(page)
        })
        .collect();

    build_cluster_view(&classes)
}

/// Shared counting-sort scatter pass: count occurrences per class, prefix-sum
/// into `offsets`, then place each page index at its class's cursor (§4.4.2).
fn build_cluster_view(classes: &[u8]) -> AtlasResult<ClusterView> {
    let page_count = classes.len();
    let mut count = [0u32; R96_CLASSES];
    for &c in classes {
        count[usize::from(c)] += 1;
    }

    let mut offsets = [0u32; R96_CLASSES + 1];
    for c in 0..R96_CLASSES {
        offsets[c + 1] = offsets[c] + count[c];
    }
    debug_assert_eq!(offsets[R96_CLASSES], page_count as u32);

    let mut cursor = offsets;
    let mut indices = vec![0u32; page_count];
    for (page_idx, &c) in classes.iter().enumerate() {
        let slot = &mut cursor[usize::from(c)];
        indices[*slot as usize] = page_idx as u32;
        *slot += 1;
    }

    Ok(ClusterView { offsets, indices })
}

/// Compute the next time `t > now` at which resonance class `r` is
/// phase-locked in the C768 schedule, i.e. `(t + r) mod 96 == 0` (§4.4.3)
#[must_use]
pub fn next_harmonic_window(now: u64, r: u8) -> u64 {
    let phase = (now + u64::from(r)) % 96;
    let offset = if phase == 0 { 96 } else { 96 - phase };
    now + offset
}

/// `true` iff `(r1 + r2) mod 96 == 0` (§4.4.3)
#[must_use]
pub fn resonance_harmonizes(r1: u8, r2: u8) -> bool {
    crate::atlas::r96_harmonizes(r1, r2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_csr_correctness() {
        let mut base = Vec::with_capacity(3 * PAGE_SIZE);
        base.extend(core::iter::repeat(0x00u8).take(PAGE_SIZE)); // class 0
        base.extend(core::iter::repeat(0x60u8).take(PAGE_SIZE)); // 0x60 % 96 == 0
        base.extend(core::iter::repeat(0x01u8).take(PAGE_SIZE)); // class 1

        let view = cluster_by_resonance(&base, 3).unwrap();
        assert_eq!(view.offsets[0], 0);
        assert_eq!(view.offsets[1], 2);
        assert_eq!(view.offsets[2], 3);
        assert_eq!(view.offsets[96], 3);
        assert_eq!(view.indices, vec![0, 1, 2]);
        assert_eq!(view.pages_for_resonance(0), &[0, 1]);
        assert_eq!(view.pages_for_resonance(1), &[2]);
        assert_eq!(view.count_for_resonance(0), 2);
    }

    #[test]
    fn csr_offsets_monotonic_and_cover_all_pages() {
        // invariant 10 (§8.1)
        let mut base = Vec::with_capacity(8 * PAGE_SIZE);
        for p in 0u8..8 {
            base.extend(core::iter::repeat(p.wrapping_mul(7)).take(PAGE_SIZE));
        }
        let view = cluster_by_resonance(&base, 8).unwrap();
        assert_eq!(view.offsets[0], 0);
        assert_eq!(view.offsets[96], 8);
        assert!(view.offsets.windows(2).all(|w| w[0] <= w[1]));
        for c in 0u8..96 {
            for &page_idx in view.pages_for_resonance(c) {
                let page_bytes = &base[page_idx as usize * PAGE_SIZE..(page_idx as usize + 1) * PAGE_SIZE];
                let page: &[u8; PAGE_SIZE] = page_bytes.try_into().unwrap();
                assert_eq!(page_resonance_class(page), c);
            }
        }
    }

    #[test]
    fn cluster_rejects_mismatched_length() {
        assert_eq!(cluster_by_resonance(&[0u8; 10], 1), Err(AtlasError::InvalidArgument));
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_cluster_matches_scalar() {
        let mut base = Vec::with_capacity(16 * PAGE_SIZE);
        for p in 0u8..16 {
            base.extend(core::iter::repeat(p.wrapping_mul(11)).take(PAGE_SIZE));
        }
        let scalar = cluster_by_resonance(&base, 16).unwrap();
        let parallel = cluster_by_resonance_parallel(&base, 16).unwrap();
        assert_eq!(scalar, parallel);
    }

    #[test]
    fn s6_harmonic_window() {
        let t = next_harmonic_window(100, 42);
        assert_eq!(t, 150);
        assert_eq!((t + 42) % 96, 0);
        assert!(t > 100);
    }

    #[test]
    fn harmonic_alignment_invariant() {
        // invariant 11 (§8.1)
        for now in [0u64, 1, 95, 96, 1000, 123_456] {
            for r in 0u8..96 {
                let t = next_harmonic_window(now, r);
                assert_eq!((t + u64::from(r)) % 96, 0);
                assert!(t > now);
            }
        }
    }
}
