//! Cross-layer integration tests: domain lifecycle with structured logging
//! installed, concurrent budget arithmetic, and a multi-layer pipeline that
//! exercises clustering, shard extraction, and witness chaining together.

use atlas_core::conservation::{conserved_check, Domain, HashAlgorithm};
use atlas_core::manifold::{shard_extract, verify_chain, OpTag, ShardSpec, WitnessChain};
use atlas_core::resonance::cluster_by_resonance;
use atlas_core::types::{ATLAS_SIZE, PAGE_COUNT, PAGE_SIZE};
use std::sync::Arc;
use std::thread;

fn install_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn conservation_violation_is_logged_and_leaves_state_unchanged() {
    install_tracing();

    let domain = Domain::create(ATLAS_SIZE, 50).unwrap();
    let mut buf = vec![0u8; ATLAS_SIZE];
    // SAFETY: `buf` outlives every use of `domain` in this test.
    unsafe { domain.attach(buf.as_mut_ptr(), buf.len()).unwrap() };
    buf[0] ^= 0x01;

    assert!(!domain.verify());
    assert_eq!(
        atlas_core::error::last_error(),
        atlas_core::error::error_to_code(atlas_core::error::AtlasError::ConservationViolation)
    );
}

#[test]
fn concurrent_budget_operations_stay_within_bounds() {
    // §5 thread-safety matrix: budget alloc/release is fully concurrent via
    // CAS loops and must never leave the budget outside `0..96`.
    let domain = Arc::new(Domain::create(1024, 0).unwrap());
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let domain = Arc::clone(&domain);
            thread::spawn(move || {
                for _ in 0..200 {
                    domain.budget_release(1).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert!(u32::from(domain.budget()) < 96);
}

#[test]
fn multi_layer_pipeline_commits_clusters_and_chains() {
    install_tracing();

    let mut buf = vec![0u8; ATLAS_SIZE];
    // Make page 2 dominated by class 7, keep everything else conserved.
    buf[2 * PAGE_SIZE..3 * PAGE_SIZE].fill(7);
    let partial: u32 = buf[..ATLAS_SIZE - 1].iter().map(|&b| u32::from(b)).sum();
    buf[ATLAS_SIZE - 1] = ((96 - partial % 96) % 96) as u8;
    assert!(conserved_check(&buf));

    let domain = Domain::create(ATLAS_SIZE, 90).unwrap();
    // SAFETY: `buf` outlives every use of `domain` in this test.
    unsafe { domain.attach(buf.as_mut_ptr(), buf.len()).unwrap() };
    domain.commit().unwrap();
    let root = domain.witness().unwrap();
    assert_eq!(root.algorithm, HashAlgorithm::Sha256);

    let view = cluster_by_resonance(&buf, PAGE_COUNT).unwrap();
    assert!(view.pages_for_resonance(7).contains(&2));

    let shard = shard_extract(
        &buf,
        ShardSpec { start_coord: 2 * PAGE_SIZE as u32, end_coord: 3 * PAGE_SIZE as u32, resonance_class: 7 },
    )
    .unwrap();
    assert_eq!(shard, vec![2]);

    let mut chain = WitnessChain::new();
    let f1 = chain
        .record_operation(&domain, OpTag::ShardExtraction, 4, &buf[2 * PAGE_SIZE..3 * PAGE_SIZE])
        .unwrap();
    let f2 = chain
        .record_operation(&domain, OpTag::LinearProjection, 6, &buf)
        .unwrap();
    assert!(verify_chain(&chain, [0u8; 32], f2.post_hash, 20));
    assert_eq!(domain.budget(), 90 - 4 - 6);
    let _ = f1;
}
