//! L2 Conservation — domain lifecycle, budget arithmetic, conserved memory
//! operations, and witnesses. The core of the core (§4.3): roughly a third
//! of the implementation lives here.

use crate::error::{clear_last_error, record, AtlasError, AtlasResult};
use crate::types::CONSERVATION_MOD;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, AtomicU8, Ordering};

#[cfg(feature = "std")]
use std::vec::Vec;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// Domain header magic (§6.3)
pub const DOMAIN_MAGIC: u32 = 0xA71A_5D0C;

/// Witness header magic (§6.3)
pub const WITNESS_MAGIC: u32 = 0xA71A_5117;

/// Bound on compare-and-swap retries before yielding the thread (§5:
/// "implementers should bound retries or fall back to yielding after a
/// threshold")
const CAS_RETRY_LIMIT: u32 = 1024;

fn cas_backoff(tries: u32) {
    if tries > CAS_RETRY_LIMIT {
        #[cfg(feature = "std")]
        std::thread::yield_now();
        #[cfg(not(feature = "std"))]
        core::hint::spin_loop();
    } else {
        core::hint::spin_loop();
    }
}

/// Retry `f` against `atomic` until it either computes a new value that wins
/// the CAS race, or signals failure by returning `None`.
fn cas_u8_loop(atomic: &AtomicU8, mut f: impl FnMut(u8) -> Option<u8>) -> Option<u8> {
    let mut tries = 0u32;
    loop {
        let current = atomic.load(Ordering::Acquire);
        let new = f(current)?;
        match atomic.compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return Some(new),
            Err(_) => {
                tries += 1;
                cas_backoff(tries);
            }
        }
    }
}

/// A minimal spinlock-guarded cell, used for the rare, short critical
/// sections (witness storage) that don't warrant a full mutex dependency and
/// must remain usable without `std`.
struct SpinCell<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is only ever performed while `locked` is held
// exclusively, established by `with`.
unsafe impl<T: Send> Sync for SpinCell<T> {}

impl<T> SpinCell<T> {
    const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut tries = 0u32;
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            tries += 1;
            cas_backoff(tries);
        }
        // SAFETY: the compare_exchange above established exclusive access;
        // the lock is released unconditionally below before returning.
        let result = f(unsafe { &mut *self.value.get() });
        self.locked.store(false, Ordering::Release);
        result
    }
}

static NEXT_DOMAIN_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonic witness/fragment clock. Per §9, the only other required global
/// state besides the domain-id counter and per-thread error cell is a
/// monotonic timestamp source; wall-clock time is unavailable under
/// `no_std`, so this crate uses a process-wide tick counter, which satisfies
/// every ordering property the specification asks of `monotonic_now()`.
static WITNESS_CLOCK: AtomicU64 = AtomicU64::new(1);

fn next_timestamp() -> u64 {
    WITNESS_CLOCK.fetch_add(1, Ordering::Relaxed)
}

/// Domain lifecycle states (§4.3.1). Ordinal order matches the monotonicity
/// invariant (invariant 12, §8.1): `Destroyed` is absorbing and the highest
/// ordinal.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DomainState {
    /// Created but not yet attached to a buffer
    Created = 0,
    /// Attached to a caller-owned buffer
    Attached = 1,
    /// Most recently observed to be conserved
    Verified = 2,
    /// Committed with a generated witness
    Committed = 3,
    /// Terminal; rejects all further mutation
    Destroyed = 4,
}

impl DomainState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => DomainState::Created,
            1 => DomainState::Attached,
            2 => DomainState::Verified,
            3 => DomainState::Committed,
            _ => DomainState::Destroyed,
        }
    }
}

/// Witness hash strategy (§9 Polymorphism), selected at `witness_generate`
/// time and embedded in the witness so verification can dispatch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    /// SHA-256 (the reference default, §4.3.4)
    #[default]
    Sha256,
    /// BLAKE3
    Blake3,
    /// CRC32, stored left-aligned in the 32-byte digest slot, zero-padded
    Crc32,
}

fn compute_digest(algorithm: HashAlgorithm, data: &[u8]) -> [u8; 32] {
    match algorithm {
        HashAlgorithm::Sha256 => {
            use sha2::{Digest, Sha256};
            let mut out = [0u8; 32];
            out.copy_from_slice(&Sha256::digest(data));
            out
        }
        HashAlgorithm::Blake3 => *blake3::hash(data).as_bytes(),
        HashAlgorithm::Crc32 => {
            let mut out = [0u8; 32];
            out[0..4].copy_from_slice(&crc32fast::hash(data).to_le_bytes());
            out
        }
    }
}

/// An immutable record binding a byte region to a cryptographic digest
/// (§3.2 Witness, §4.3.4). Never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Witness {
    /// Header tag (§6.3), always [`WITNESS_MAGIC`]
    pub magic: u32,
    /// Hash strategy used to compute `digest`
    pub algorithm: HashAlgorithm,
    /// Length of the witnessed region in bytes
    pub data_len: u64,
    /// Fixed-size digest (32 bytes regardless of algorithm; CRC32 is
    /// zero-padded)
    pub digest: [u8; 32],
    /// `(Σ bytes) mod 96` of the witnessed region
    pub resonance_class: u8,
    /// Monotonic creation order (see [`next_timestamp`])
    pub timestamp: u64,
}

impl Witness {
    /// `true` iff `self.magic == WITNESS_MAGIC`, a cheap sanity check before
    /// trusting a handle that crossed the FFI boundary
    #[must_use]
    pub fn is_valid_header(&self) -> bool {
        self.magic == WITNESS_MAGIC
    }
}

/// Compute the byte sum of a region (§4.3.3). `ATLAS_SIZE` bytes of `0xFF`
/// sum to well under `u32::MAX`, so no overflow handling is needed.
#[must_use]
pub fn conserved_sum(data: &[u8]) -> u32 {
    data.iter().map(|&b| u32::from(b)).sum()
}

/// `true` iff `conserved_sum(data) mod 96 == 0`
#[must_use]
pub fn conserved_check(data: &[u8]) -> bool {
    conserved_sum(data) % CONSERVATION_MOD == 0
}

/// As [`conserved_check`], for an arbitrary-length sliding window rather than
/// a full 12288-byte region
#[must_use]
pub fn conserved_window_check(data: &[u8]) -> bool {
    conserved_check(data)
}

/// `(sum(after) − sum(before)) mod 96`, computed with modular subtraction to
/// avoid signed underflow. Zero means the modification preserved
/// conservation.
#[must_use]
pub fn conserved_delta(before: &[u8], after: &[u8]) -> u8 {
    let sum_before = i64::from(conserved_sum(before));
    let sum_after = i64::from(conserved_sum(after));
    (sum_after - sum_before).rem_euclid(i64::from(CONSERVATION_MOD)) as u8
}

/// Stream `chunk` into a running sum stored in the first 8 bytes of `state`
/// (little-endian `i64`); after the call those 8 bytes hold
/// `(running_sum + Σ chunk) mod 96`, so conservation of arbitrarily large
/// streams can be checked online without re-scanning prior chunks.
pub fn conserved_update(state: &mut [u8], chunk: &[u8]) -> AtlasResult<()> {
    if state.len() < 8 {
        return Err(record(AtlasError::InvalidArgument));
    }
    let mut running_bytes = [0u8; 8];
    running_bytes.copy_from_slice(&state[0..8]);
    let running = i64::from_le_bytes(running_bytes);
    let chunk_sum: i64 = chunk.iter().map(|&b| i64::from(b)).sum();
    let updated = (running + chunk_sum).rem_euclid(i64::from(CONSERVATION_MOD));
    state[0..8].copy_from_slice(&updated.to_le_bytes());
    clear_last_error();
    Ok(())
}

/// Copy `src` into `dst`; the destination's conservation class is inherited
/// from the source because the bytes are identical.
pub fn memcpy_conserved(dst: &mut [u8], src: &[u8]) -> AtlasResult<()> {
    if src.is_empty() || dst.len() != src.len() {
        return Err(record(AtlasError::InvalidArgument));
    }
    dst.copy_from_slice(src);
    clear_last_error();
    Ok(())
}

/// Fill `dst[0..len-1]` with `val`, then choose a fixup byte for
/// `dst[len-1]` so the total sum is conserved (`≡ 0 mod 96`). A zero-length
/// `dst` is a no-op, not an error (§4.3.3).
pub fn memset_conserved(dst: &mut [u8], val: u8) -> AtlasResult<()> {
    if dst.is_empty() {
        return Ok(());
    }
    let (body, last) = dst.split_at_mut(dst.len() - 1);
    body.fill(val);
    let partial: u32 = body.iter().map(|&b| u32::from(b)).sum();
    last[0] = ((CONSERVATION_MOD - partial % CONSERVATION_MOD) % CONSERVATION_MOD) as u8;
    clear_last_error();
    Ok(())
}

/// Copy `src` into `dst`, then reduce `dst[len-1]` by `delta` so the final
/// buffer sum mod 96 matches the attach-time baseline. `delta` is the
/// caller-computed deviation (typically from [`conserved_delta`]).
///
/// The correction is applied in steps of 96 rather than 256: subtracting a
/// multiple of 256 from a single byte would itself shift the buffer's sum by
/// a multiple of 256, and `256 mod 96 == 64 != 0`, so a naive mod-256
/// wraparound would silently break conservation whenever the fixup
/// underflows the byte. Stepping by 96 (`96 mod 96 == 0`) keeps the
/// correction exact regardless of wraparound.
pub fn memcpy_fixup(dst: &mut [u8], src: &[u8], delta: u8) -> AtlasResult<()> {
    if src.is_empty() || dst.len() != src.len() {
        return Err(record(AtlasError::InvalidArgument));
    }
    dst.copy_from_slice(src);
    let last = dst.len() - 1;
    let mut adjusted = i32::from(dst[last]) - i32::from(delta);
    while adjusted < 0 {
        adjusted += CONSERVATION_MOD as i32;
    }
    while adjusted > i32::from(u8::MAX) {
        adjusted -= CONSERVATION_MOD as i32;
    }
    dst[last] = adjusted as u8;
    clear_last_error();
    Ok(())
}

/// `(a * b) mod 96` under the RL-96 semiring (§9 Open Questions)
#[must_use]
pub fn budget_mul(a: u8, b: u8) -> u8 {
    ((u32::from(a) * u32::from(b)) % CONSERVATION_MOD) as u8
}

/// Modular multiplicative inverse of `a` mod 96, where it exists (i.e.
/// `gcd(a, 96) == 1`); `InvalidArgument` otherwise (§9 Open Questions)
pub fn budget_inv(a: u8) -> AtlasResult<u8> {
    let (a, m) = (i64::from(a), i64::from(CONSERVATION_MOD));
    let (mut old_r, mut r) = (a, m);
    let (mut old_s, mut s) = (1i64, 0i64);
    while r != 0 {
        let q = old_r / r;
        let next_r = old_r - q * r;
        old_r = r;
        r = next_r;
        let next_s = old_s - q * s;
        old_s = s;
        s = next_s;
    }
    if old_r != 1 {
        return Err(record(AtlasError::InvalidArgument));
    }
    clear_last_error();
    Ok(old_s.rem_euclid(m) as u8)
}

/// Generate a witness over `data` using the given hash strategy (§4.3.4)
pub fn witness_generate(data: &[u8], algorithm: HashAlgorithm) -> AtlasResult<Witness> {
    if data.is_empty() {
        return Err(record(AtlasError::InvalidArgument));
    }
    let digest = compute_digest(algorithm, data);
    let resonance_class = (conserved_sum(data) % CONSERVATION_MOD) as u8;
    let witness = Witness {
        magic: WITNESS_MAGIC,
        algorithm,
        data_len: data.len() as u64,
        digest,
        resonance_class,
        timestamp: next_timestamp(),
    };
    clear_last_error();
    Ok(witness)
}

/// Verify that `witness` certifies `data` (§4.3.4)
pub fn witness_verify(witness: &Witness, data: &[u8]) -> bool {
    if witness.data_len as usize != data.len() {
        tracing::warn!(expected = witness.data_len, actual = data.len(), "witness length mismatch");
        record(AtlasError::WitnessInvalid);
        return false;
    }
    let digest = compute_digest(witness.algorithm, data);
    if digest != witness.digest {
        tracing::warn!("witness digest mismatch");
        record(AtlasError::WitnessInvalid);
        return false;
    }
    if (conserved_sum(data) % CONSERVATION_MOD) as u8 != witness.resonance_class {
        tracing::error!("witness resonance class mismatch");
        record(AtlasError::ConservationViolation);
        return false;
    }
    clear_last_error();
    true
}

/// Chain `current` onto `previous`: `digest = H(previous.digest ||
/// current.digest)`, `resonance_class = (previous.r + current.r) mod 96`
#[must_use]
pub fn witness_chain(current: &Witness, previous: &Witness) -> Witness {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&previous.digest);
    buf.extend_from_slice(&current.digest);
    Witness {
        magic: WITNESS_MAGIC,
        algorithm: current.algorithm,
        data_len: current.data_len,
        digest: compute_digest(current.algorithm, &buf),
        resonance_class: (u32::from(previous.resonance_class) + u32::from(current.resonance_class))
            as u8
            % CONSERVATION_MOD as u8,
        timestamp: next_timestamp(),
    }
}

/// Symmetric merge of two witnesses: `H(sort_pair(w1.digest, w2.digest))`.
/// Commutative by construction (invariant 8, §8.1).
#[must_use]
pub fn witness_merge(w1: &Witness, w2: &Witness) -> Witness {
    let (lo, hi) = if w1.digest <= w2.digest { (w1, w2) } else { (w2, w1) };
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&lo.digest);
    buf.extend_from_slice(&hi.digest);
    Witness {
        magic: WITNESS_MAGIC,
        algorithm: w1.algorithm,
        data_len: w1.data_len.max(w2.data_len),
        digest: compute_digest(w1.algorithm, &buf),
        resonance_class: (u32::from(w1.resonance_class) + u32::from(w2.resonance_class)) as u8
            % CONSERVATION_MOD as u8,
        timestamp: next_timestamp(),
    }
}

/// The central L2 entity (§3.2 Domain): a stateful handle binding a
/// caller-owned byte buffer to a budget and, eventually, a witness. All
/// state changes are atomic (§4.3.1).
pub struct Domain {
    magic: u32,
    id: u64,
    state: AtomicU8,
    budget: AtomicU8,
    base_ptr: AtomicPtr<u8>,
    attached_len: core::sync::atomic::AtomicUsize,
    conservation_sum: AtomicU32,
    algorithm: HashAlgorithm,
    witness: SpinCell<Option<Witness>>,
}

impl Domain {
    /// Create a new domain (§4.3.1 `create`). Fails with `InvalidArgument`
    /// if `bytes == 0` or `budget_class >= 96`.
    pub fn create(bytes: usize, budget_class: u8) -> AtlasResult<Self> {
        if bytes == 0 || budget_class >= CONSERVATION_MOD as u8 {
            return Err(record(AtlasError::InvalidArgument));
        }
        clear_last_error();
        Ok(Self {
            magic: DOMAIN_MAGIC,
            id: NEXT_DOMAIN_ID.fetch_add(1, Ordering::Relaxed),
            state: AtomicU8::new(DomainState::Created as u8),
            budget: AtomicU8::new(budget_class),
            base_ptr: AtomicPtr::new(core::ptr::null_mut()),
            attached_len: core::sync::atomic::AtomicUsize::new(0),
            conservation_sum: AtomicU32::new(0),
            algorithm: HashAlgorithm::Sha256,
            witness: SpinCell::new(None),
        })
    }

    /// `true` iff the header tag is intact; a cheap sanity check for handles
    /// that crossed the FFI boundary
    #[must_use]
    pub fn is_valid_header(&self) -> bool {
        self.magic == DOMAIN_MAGIC
    }

    /// Monotonic domain identifier assigned at creation
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> DomainState {
        DomainState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Current budget, always in `0..96`
    #[must_use]
    pub fn budget(&self) -> u8 {
        self.budget.load(Ordering::Acquire)
    }

    /// Select the hash strategy used by a later `commit`'s witness
    /// generation. Must be called before `commit`.
    pub fn set_hash_algorithm(&mut self, algorithm: HashAlgorithm) {
        self.algorithm = algorithm;
    }

    fn attached_slice(&self) -> Option<&[u8]> {
        let ptr = self.base_ptr.load(Ordering::Acquire);
        let len = self.attached_len.load(Ordering::Acquire);
        if ptr.is_null() || len == 0 {
            return None;
        }
        // SAFETY: `attach` requires the caller to guarantee `base` remains
        // valid for as long as the domain stays in Attached/Verified/
        // Committed (§3.3 Ownership); those are exactly the states from
        // which this accessor is ever reached.
        Some(unsafe { core::slice::from_raw_parts(ptr, len) })
    }

    /// Attach a caller-owned buffer (§4.3.1 `attach`). Fails with
    /// `InvalidArgument` if `base` is null or `len == 0`, with `InvalidState`
    /// if the domain isn't `Created`.
    ///
    /// # Safety
    /// `base` must be valid for reads of `len` bytes and must remain valid
    /// for as long as this domain remains `Attached`, `Verified`, or
    /// `Committed` (§3.3). The caller retains ownership of the buffer.
    pub unsafe fn attach(&self, base: *mut u8, len: usize) -> AtlasResult<()> {
        if base.is_null() || len == 0 {
            return Err(record(AtlasError::InvalidArgument));
        }
        let transitioned = cas_u8_loop(&self.state, |current| {
            (current == DomainState::Created as u8).then_some(DomainState::Attached as u8)
        });
        if transitioned.is_none() {
            tracing::warn!(domain_id = self.id, "attach attempted from non-Created state");
            return Err(record(AtlasError::InvalidState));
        }
        // SAFETY: forwarded from this function's safety contract.
        let sum = conserved_sum(unsafe { core::slice::from_raw_parts(base, len) });
        self.base_ptr.store(base, Ordering::Release);
        self.attached_len.store(len, Ordering::Release);
        self.conservation_sum.store(sum, Ordering::Release);
        clear_last_error();
        tracing::debug!(domain_id = self.id, len, "domain attached");
        Ok(())
    }

    fn verify_internal(&self) -> AtlasResult<()> {
        let state = self.state();
        if !matches!(
            state,
            DomainState::Attached | DomainState::Verified | DomainState::Committed
        ) {
            return Err(record(AtlasError::InvalidState));
        }
        let data = self
            .attached_slice()
            .ok_or_else(|| record(AtlasError::InvalidState))?;
        let sum = conserved_sum(data);
        if sum != self.conservation_sum.load(Ordering::Acquire) {
            tracing::error!(domain_id = self.id, sum, baseline = self.conservation_sum.load(Ordering::Acquire), "conservation drift from attach-time baseline");
            return Err(record(AtlasError::ConservationViolation));
        }
        if sum % CONSERVATION_MOD != 0 {
            tracing::error!(domain_id = self.id, sum, "attached region is not conserved");
            return Err(record(AtlasError::ConservationViolation));
        }
        let witness_ok = self.witness.with(|w| w.as_ref().map(|w| witness_verify(w, data)));
        if witness_ok == Some(false) {
            tracing::warn!(domain_id = self.id, "stored witness failed re-verification");
            return Err(record(AtlasError::WitnessInvalid));
        }
        Ok(())
    }

    /// Verify the attached buffer is still conserved and, if a witness was
    /// generated, that it still verifies (§4.3.5 `verify`). On success,
    /// opportunistically advances `Attached -> Verified`.
    pub fn verify(&self) -> bool {
        match self.verify_internal() {
            Ok(()) => {
                let _ = cas_u8_loop(&self.state, |current| {
                    (current == DomainState::Attached as u8).then_some(DomainState::Verified as u8)
                });
                clear_last_error();
                true
            }
            Err(_) => false,
        }
    }

    /// Verify then commit, generating a witness if one doesn't already
    /// exist (§4.3.5 `commit`)
    pub fn commit(&self) -> AtlasResult<()> {
        self.verify_internal()?;
        let data = self
            .attached_slice()
            .ok_or_else(|| record(AtlasError::InvalidState))?;
        let needs_witness = self.witness.with(|w| w.is_none());
        if needs_witness {
            let generated = witness_generate(data, self.algorithm)?;
            self.witness.with(|w| *w = Some(generated));
        }
        let transitioned = cas_u8_loop(&self.state, |current| {
            matches!(
                DomainState::from_u8(current),
                DomainState::Attached | DomainState::Verified
            )
            .then_some(DomainState::Committed as u8)
        });
        if transitioned.is_none() {
            return Err(record(AtlasError::InvalidState));
        }
        clear_last_error();
        tracing::debug!(domain_id = self.id, "domain committed");
        Ok(())
    }

    /// Fetch the witness generated at commit, if any
    #[must_use]
    pub fn witness(&self) -> Option<Witness> {
        self.witness.with(|w| *w)
    }

    /// Allocate `amount` from the budget (§4.3.2). CAS retry loop; fails
    /// with `BudgetInsufficient` if `current < amount`, `InvalidArgument` if
    /// `amount >= 96`, `DomainDestroyed` if the domain was destroyed.
    pub fn budget_alloc(&self, amount: u8) -> AtlasResult<()> {
        if amount >= CONSERVATION_MOD as u8 {
            return Err(record(AtlasError::InvalidArgument));
        }
        if self.state() == DomainState::Destroyed {
            return Err(record(AtlasError::DomainDestroyed));
        }
        let result = cas_u8_loop(&self.budget, |current| {
            (current >= amount).then(|| current - amount)
        });
        match result {
            Some(_) => {
                clear_last_error();
                Ok(())
            }
            None => {
                tracing::warn!(domain_id = self.id, amount, budget = self.budget(), "budget allocation exceeds availability");
                Err(record(AtlasError::BudgetInsufficient))
            }
        }
    }

    /// Release `amount` back to the budget (§4.3.2), modulo 96
    pub fn budget_release(&self, amount: u8) -> AtlasResult<()> {
        if amount >= CONSERVATION_MOD as u8 {
            return Err(record(AtlasError::InvalidArgument));
        }
        if self.state() == DomainState::Destroyed {
            return Err(record(AtlasError::DomainDestroyed));
        }
        cas_u8_loop(&self.budget, |current| {
            Some(((u32::from(current) + u32::from(amount)) % CONSERVATION_MOD) as u8)
        });
        clear_last_error();
        Ok(())
    }

    /// Destroy the domain: always succeeds, idempotent, terminal (§4.3.1)
    pub fn destroy(&self) {
        self.state.store(DomainState::Destroyed as u8, Ordering::Release);
        self.witness.with(|w| *w = None);
        clear_last_error();
    }
}
