//! # atlas-core
//!
//! A layered, conservation-verified computational substrate over a fixed
//! 12288-byte state space. Every byte region classifies into one of 96
//! resonance classes (R96); every mutation preserves a modular conservation
//! invariant; every committed content block carries a cryptographic witness
//! independently verifiable without global history.
//!
//! Five cooperating layers, each built only on the ones below it:
//! - [`atlas`] — L0: coordinate constants and the R96 byte classifier.
//! - [`boundary`] — L1: Φ coordinate isomorphism and Klein orbit canonicalization.
//! - [`conservation`] — L2: domain lifecycle, budget arithmetic, conserved
//!   memory operations, and witnesses.
//! - [`resonance`] — L3: page classification, histograms, CSR clustering,
//!   and harmonic-window scheduling.
//! - [`manifold`] — L4: witness chains and universal-number operations.
//!
//! This crate has no persistent wire format, no network transport, and no
//! distributed consensus (§1 Non-goals); it is an in-memory substrate that
//! callers attach their own buffers to.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod atlas;
pub mod boundary;
pub mod conservation;
pub mod error;
pub mod ffi;
pub mod manifold;
pub mod resonance;
pub mod types;

pub use error::{AtlasError, AtlasResult};
pub use types::{ATLAS_SIZE, C768, CONSERVATION_MOD, PAGE_COUNT, PAGE_SIZE, R96_CLASSES};

/// Crate version, exposed to FFI consumers that want to assert ABI compatibility
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conservation::{Domain, HashAlgorithm};
    use crate::manifold::{shard_extract, verify_chain, OpTag, ShardSpec, WitnessChain};
    use crate::resonance::cluster_by_resonance;

    /// End-to-end walk through every layer: attach a conserved buffer,
    /// commit it, cluster it by resonance class, extract a shard, and
    /// record an L4 operation chaining off the domain's budget.
    #[test]
    fn full_layer_pipeline() {
        let mut buf = vec![0u8; ATLAS_SIZE];
        buf[PAGE_SIZE..2 * PAGE_SIZE].fill(3); // second page dominated by class 3
        assert!(conservation::conserved_check(&buf));

        let domain = Domain::create(ATLAS_SIZE, 80).unwrap();
        // SAFETY: `buf` outlives every use of `domain` in this test.
        unsafe { domain.attach(buf.as_mut_ptr(), buf.len()).unwrap() };
        assert!(domain.verify());
        domain.commit().unwrap();
        let root = domain.witness().unwrap();
        assert_eq!(root.algorithm, HashAlgorithm::Sha256);

        let view = cluster_by_resonance(&buf, PAGE_COUNT).unwrap();
        assert!(view.pages_for_resonance(3).contains(&1));

        let shard = shard_extract(
            &buf,
            ShardSpec { start_coord: 0, end_coord: 2 * PAGE_SIZE as u32, resonance_class: 3 },
        )
        .unwrap();
        assert_eq!(shard, vec![1]);

        let mut chain = WitnessChain::new();
        let fragment = chain
            .record_operation(&domain, OpTag::ShardExtraction, 5, &buf[0..PAGE_SIZE])
            .unwrap();
        assert!(verify_chain(&chain, [0u8; 32], fragment.post_hash, 10));
        assert_eq!(domain.budget(), 75);
    }

    #[test]
    fn version_is_non_empty() {
        assert!(!VERSION.is_empty());
    }
}
