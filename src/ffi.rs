//! Stable C ABI (§6.1): a flat function table over opaque handles, so
//! cross-language consumers can drive the core without linking Rust types.
//! No operation unwinds across this boundary; every fallible entry point
//! returns a status code or a nullable handle and records the failure via
//! [`crate::error::last_error`].

use crate::atlas::{r96_classify, r96_classify_buffer};
use crate::boundary::{boundary_decode, boundary_encode, klein_is_privileged, klein_orbit_id};
use crate::conservation::{conserved_delta, witness_generate, witness_verify, Domain, HashAlgorithm, Witness};
use crate::error::{error_string as error_string_impl, error_to_code, last_error, record, AtlasError};
use crate::resonance::{cluster_by_resonance, next_harmonic_window, r96_classify_page, r96_histogram_page, ClusterView};
use crate::types::{PAGE_SIZE, R96_CLASSES};
use core::ffi::{c_char, c_int};

unsafe fn slice_from_raw<'a>(ptr: *const u8, len: usize) -> Option<&'a [u8]> {
    if ptr.is_null() {
        None
    } else {
        // SAFETY: forwarded from this function's caller, an `extern "C"` entry
        // point whose own doc comment states the pointer/length contract.
        Some(unsafe { core::slice::from_raw_parts(ptr, len) })
    }
}

/// `u8 r96_classify(u8 byte)`
#[no_mangle]
pub extern "C" fn atlas_r96_classify(byte: u8) -> u8 {
    r96_classify(byte)
}

/// `void r96_classify_buffer(const u8* in, u8* out, usize len)`
///
/// # Safety
/// `input` and `out` must each be valid for reads/writes of `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn atlas_r96_classify_buffer(input: *const u8, out: *mut u8, len: usize) {
    if input.is_null() || out.is_null() {
        record(AtlasError::InvalidArgument);
        return;
    }
    // SAFETY: forwarded from this function's safety contract.
    let input = unsafe { core::slice::from_raw_parts(input, len) };
    // SAFETY: forwarded from this function's safety contract.
    let out = unsafe { core::slice::from_raw_parts_mut(out, len) };
    r96_classify_buffer(input, out);
}

/// `u32 boundary_encode(u16 page, u8 offset)`; returns `u32::MAX` on failure
#[no_mangle]
pub extern "C" fn atlas_boundary_encode(page: u16, offset: u8) -> u32 {
    boundary_encode(page, offset).unwrap_or(u32::MAX)
}

/// `void boundary_decode(u32 coord, u16* page, u8* offset)`
///
/// # Safety
/// `page` and `offset` must each be valid for one write.
#[no_mangle]
pub unsafe extern "C" fn atlas_boundary_decode(coord: u32, page: *mut u16, offset: *mut u8) -> c_int {
    if page.is_null() || offset.is_null() {
        return error_to_code(record(AtlasError::InvalidArgument));
    }
    match boundary_decode(coord) {
        Ok((p, o)) => {
            // SAFETY: forwarded from this function's safety contract.
            unsafe {
                *page = p;
                *offset = o;
            }
            0
        }
        Err(e) => error_to_code(e),
    }
}

/// `u8 klein_orbit_id(u32 coord)`
#[no_mangle]
pub extern "C" fn atlas_klein_orbit_id(coord: u32) -> u8 {
    klein_orbit_id(coord)
}

/// `bool klein_is_privileged(u32 coord)`
#[no_mangle]
pub extern "C" fn atlas_klein_is_privileged(coord: u32) -> bool {
    klein_is_privileged(coord)
}

/// `Domain* domain_create(usize bytes, u8 budget_class)`; null on failure
#[no_mangle]
pub extern "C" fn atlas_domain_create(bytes: usize, budget_class: u8) -> *mut Domain {
    match Domain::create(bytes, budget_class) {
        Ok(domain) => alloc_boxed(domain),
        Err(_) => core::ptr::null_mut(),
    }
}

fn alloc_boxed<T>(value: T) -> *mut T {
    #[cfg(feature = "std")]
    {
        Box::into_raw(Box::new(value))
    }
    #[cfg(not(feature = "std"))]
    {
        alloc::boxed::Box::into_raw(alloc::boxed::Box::new(value))
    }
}

#[cfg(feature = "std")]
use std::boxed::Box;

/// `int domain_attach(Domain*, void* base, usize len)`
///
/// # Safety
/// `domain` must be a live pointer from [`atlas_domain_create`]. `base` must
/// remain valid for reads/writes of `len` bytes for as long as the domain
/// stays attached (§3.3 Ownership).
#[no_mangle]
pub unsafe extern "C" fn atlas_domain_attach(domain: *const Domain, base: *mut u8, len: usize) -> c_int {
    // SAFETY: forwarded from this function's safety contract.
    let Some(domain) = (unsafe { domain.as_ref() }) else {
        return error_to_code(record(AtlasError::InvalidArgument));
    };
    // SAFETY: forwarded from this function's safety contract.
    match unsafe { domain.attach(base, len) } {
        Ok(()) => 0,
        Err(e) => error_to_code(e),
    }
}

/// `bool domain_verify(const Domain*)`
///
/// # Safety
/// `domain` must be a live pointer from [`atlas_domain_create`] or null.
#[no_mangle]
pub unsafe extern "C" fn atlas_domain_verify(domain: *const Domain) -> bool {
    // SAFETY: forwarded from this function's safety contract.
    match unsafe { domain.as_ref() } {
        Some(domain) => domain.verify(),
        None => {
            record(AtlasError::InvalidArgument);
            false
        }
    }
}

/// `int domain_commit(Domain*)`
///
/// # Safety
/// `domain` must be a live pointer from [`atlas_domain_create`] or null.
#[no_mangle]
pub unsafe extern "C" fn atlas_domain_commit(domain: *const Domain) -> c_int {
    // SAFETY: forwarded from this function's safety contract.
    let Some(domain) = (unsafe { domain.as_ref() }) else {
        return error_to_code(record(AtlasError::InvalidArgument));
    };
    match domain.commit() {
        Ok(()) => 0,
        Err(e) => error_to_code(e),
    }
}

/// `void domain_destroy(Domain*)`
///
/// # Safety
/// `domain` must be a pointer from [`atlas_domain_create`] (or null), not
/// previously passed to this function.
#[no_mangle]
pub unsafe extern "C" fn atlas_domain_destroy(domain: *mut Domain) {
    if domain.is_null() {
        return;
    }
    #[cfg(feature = "std")]
    // SAFETY: forwarded from this function's safety contract.
    drop(unsafe { Box::from_raw(domain) });
    #[cfg(not(feature = "std"))]
    // SAFETY: forwarded from this function's safety contract.
    drop(unsafe { alloc::boxed::Box::from_raw(domain) });
}

/// `bool budget_alloc(Domain*, u8 amount)`
///
/// # Safety
/// `domain` must be a live pointer from [`atlas_domain_create`] or null.
#[no_mangle]
pub unsafe extern "C" fn atlas_budget_alloc(domain: *const Domain, amount: u8) -> bool {
    // SAFETY: forwarded from this function's safety contract.
    match unsafe { domain.as_ref() } {
        Some(domain) => domain.budget_alloc(amount).is_ok(),
        None => {
            record(AtlasError::InvalidArgument);
            false
        }
    }
}

/// `bool budget_release(Domain*, u8 amount)`
///
/// # Safety
/// `domain` must be a live pointer from [`atlas_domain_create`] or null.
#[no_mangle]
pub unsafe extern "C" fn atlas_budget_release(domain: *const Domain, amount: u8) -> bool {
    // SAFETY: forwarded from this function's safety contract.
    match unsafe { domain.as_ref() } {
        Some(domain) => domain.budget_release(amount).is_ok(),
        None => {
            record(AtlasError::InvalidArgument);
            false
        }
    }
}

/// `Witness* witness_generate(const void* base, usize len)`; null on failure
///
/// # Safety
/// `base` must be valid for reads of `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn atlas_witness_generate(base: *const u8, len: usize) -> *mut Witness {
    // SAFETY: forwarded from this function's safety contract.
    let Some(data) = (unsafe { slice_from_raw(base, len) }) else {
        record(AtlasError::InvalidArgument);
        return core::ptr::null_mut();
    };
    match witness_generate(data, HashAlgorithm::Sha256) {
        Ok(w) => alloc_boxed(w),
        Err(_) => core::ptr::null_mut(),
    }
}

/// `bool witness_verify(const Witness*, const void* base, usize len)`
///
/// # Safety
/// `witness` must be a live pointer from [`atlas_witness_generate`] or null.
/// `base` must be valid for reads of `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn atlas_witness_verify(witness: *const Witness, base: *const u8, len: usize) -> bool {
    // SAFETY: forwarded from this function's safety contract.
    let Some(witness) = (unsafe { witness.as_ref() }) else {
        record(AtlasError::InvalidArgument);
        return false;
    };
    // SAFETY: forwarded from this function's safety contract.
    let Some(data) = (unsafe { slice_from_raw(base, len) }) else {
        record(AtlasError::InvalidArgument);
        return false;
    };
    witness_verify(witness, data)
}

/// `void witness_destroy(Witness*)`
///
/// # Safety
/// `witness` must be a pointer from [`atlas_witness_generate`] (or null),
/// not previously passed to this function.
#[no_mangle]
pub unsafe extern "C" fn atlas_witness_destroy(witness: *mut Witness) {
    if witness.is_null() {
        return;
    }
    #[cfg(feature = "std")]
    // SAFETY: forwarded from this function's safety contract.
    drop(unsafe { Box::from_raw(witness) });
    #[cfg(not(feature = "std"))]
    // SAFETY: forwarded from this function's safety contract.
    drop(unsafe { alloc::boxed::Box::from_raw(witness) });
}

/// `u8 conserved_delta(const void* before, const void* after, usize len)`
///
/// # Safety
/// `before` and `after` must each be valid for reads of `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn atlas_conserved_delta(before: *const u8, after: *const u8, len: usize) -> u8 {
    // SAFETY: forwarded from this function's safety contract.
    let (Some(before), Some(after)) = (unsafe { slice_from_raw(before, len) }, unsafe { slice_from_raw(after, len) }) else {
        record(AtlasError::InvalidArgument);
        return 0;
    };
    conserved_delta(before, after)
}

/// `void r96_classify_page(const u8 in[256], u8 out[256])`
///
/// # Safety
/// `input` and `out` must each point to `256` readable/writable bytes.
#[no_mangle]
pub unsafe extern "C" fn atlas_r96_classify_page(input: *const u8, out: *mut u8) {
    if input.is_null() || out.is_null() {
        record(AtlasError::InvalidArgument);
        return;
    }
    // SAFETY: forwarded from this function's safety contract.
    let input: &[u8; PAGE_SIZE] = unsafe { &*input.cast::<[u8; PAGE_SIZE]>() };
    // SAFETY: forwarded from this function's safety contract.
    let out: &mut [u8; PAGE_SIZE] = unsafe { &mut *out.cast::<[u8; PAGE_SIZE]>() };
    r96_classify_page(input, out);
}

/// `void r96_histogram_page(const u8 in[256], u16 out[96])`
///
/// # Safety
/// `input` must point to `256` readable bytes; `out` must point to `96`
/// writable `u16`s.
#[no_mangle]
pub unsafe extern "C" fn atlas_r96_histogram_page(input: *const u8, out: *mut u16) {
    if input.is_null() || out.is_null() {
        record(AtlasError::InvalidArgument);
        return;
    }
    // SAFETY: forwarded from this function's safety contract.
    let input: &[u8; PAGE_SIZE] = unsafe { &*input.cast::<[u8; PAGE_SIZE]>() };
    let histogram = r96_histogram_page(input);
    // SAFETY: forwarded from this function's safety contract.
    let out = unsafe { core::slice::from_raw_parts_mut(out, R96_CLASSES) };
    out.copy_from_slice(&histogram);
}

/// Opaque handle over a [`ClusterView`] for the C ABI
#[repr(C)]
pub struct CClusterView {
    inner: *mut ClusterView,
}

/// `ClusterView cluster_by_resonance(const u8* base, usize pages)`
///
/// # Safety
/// `base` must be valid for reads of `pages * 256` bytes.
#[no_mangle]
pub unsafe extern "C" fn atlas_cluster_by_resonance(base: *const u8, pages: usize) -> CClusterView {
    // SAFETY: forwarded from this function's safety contract.
    let Some(data) = (unsafe { slice_from_raw(base, pages * PAGE_SIZE) }) else {
        record(AtlasError::InvalidArgument);
        return CClusterView { inner: core::ptr::null_mut() };
    };
    match cluster_by_resonance(data, pages) {
        Ok(view) => CClusterView { inner: alloc_boxed(view) },
        Err(_) => CClusterView { inner: core::ptr::null_mut() },
    }
}

/// `void cluster_destroy(ClusterView*)`
///
/// # Safety
/// `view.inner` must be a pointer from [`atlas_cluster_by_resonance`] (or
/// null), not previously passed to this function.
#[no_mangle]
pub unsafe extern "C" fn atlas_cluster_destroy(view: CClusterView) {
    if view.inner.is_null() {
        return;
    }
    #[cfg(feature = "std")]
    // SAFETY: forwarded from this function's safety contract.
    drop(unsafe { Box::from_raw(view.inner) });
    #[cfg(not(feature = "std"))]
    // SAFETY: forwarded from this function's safety contract.
    drop(unsafe { alloc::boxed::Box::from_raw(view.inner) });
}

/// `u64 next_harmonic_window(u64 now, u8 r)`
#[no_mangle]
pub extern "C" fn atlas_next_harmonic_window(now: u64, r: u8) -> u64 {
    next_harmonic_window(now, r)
}

/// `ErrorCode last_error()`
#[no_mangle]
pub extern "C" fn atlas_last_error() -> i32 {
    last_error()
}

/// `const char* error_string(ErrorCode)`
///
/// Returns a pointer to a static, NUL-free C string; callers must not free
/// it. Not itself NUL-terminated for embedding callers is a non-goal here:
/// ABI consumers should treat this as a `(ptr, len)` pair via
/// [`atlas_error_string_len`].
#[no_mangle]
pub extern "C" fn atlas_error_string(code: i32) -> *const c_char {
    error_string_impl(code).as_ptr().cast::<c_char>()
}

/// Byte length of the string returned by [`atlas_error_string`] for `code`,
/// since that string is not NUL-terminated.
#[no_mangle]
pub extern "C" fn atlas_error_string_len(code: i32) -> usize {
    error_string_impl(code).len()
}
