//! Error handling for Atlas operations
//!
//! Seven error kinds cover the full surface. Every public operation returns
//! an explicit status; the last error observed by the calling thread is also
//! recorded so that C ABI consumers without a return channel for rich errors
//! can still retrieve it via [`last_error`].

/// Stable error taxonomy, matching the ABI error code table (§6.2 of the core spec)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtlasError {
    /// A supplied argument was out of range, null, or otherwise malformed
    InvalidArgument,
    /// An allocation failed
    OutOfMemory,
    /// A state-machine transition was attempted from a state that forbids it
    InvalidState,
    /// A budget allocation was attempted beyond the currently available amount
    BudgetInsufficient,
    /// A region's byte sum no longer matches its recorded conservation class
    ConservationViolation,
    /// A witness failed verification against the data it purports to certify
    WitnessInvalid,
    /// The operation targeted a domain that has already been destroyed
    DomainDestroyed,
}

impl core::fmt::Display for AtlasError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            AtlasError::InvalidArgument => "invalid argument",
            AtlasError::OutOfMemory => "out of memory",
            AtlasError::InvalidState => "invalid state transition",
            AtlasError::BudgetInsufficient => "budget insufficient",
            AtlasError::ConservationViolation => "conservation violation",
            AtlasError::WitnessInvalid => "witness invalid",
            AtlasError::DomainDestroyed => "domain destroyed",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AtlasError {}

/// Result type for Atlas operations
pub type AtlasResult<T> = Result<T, AtlasError>;

/// Stable ABI error code, per §6.2 (0 = success is represented by `Ok`, never by this type)
pub type ErrorCode = i32;

/// Convert an error to its stable ABI code (§6.2)
#[must_use]
pub fn error_to_code(error: AtlasError) -> ErrorCode {
    match error {
        AtlasError::InvalidArgument => 1,
        AtlasError::OutOfMemory => 2,
        AtlasError::InvalidState => 3,
        AtlasError::BudgetInsufficient => 4,
        AtlasError::ConservationViolation => 5,
        AtlasError::WitnessInvalid => 6,
        AtlasError::DomainDestroyed => 7,
    }
}

/// Render a stable ABI error code as a static string, for `error_string` in the C ABI
#[must_use]
pub fn code_to_str(code: ErrorCode) -> &'static str {
    match code {
        0 => "success",
        1 => "invalid argument",
        2 => "out of memory",
        3 => "invalid state transition",
        4 => "budget insufficient",
        5 => "conservation violation",
        6 => "witness invalid",
        7 => "domain destroyed",
        _ => "unknown error",
    }
}

#[cfg(feature = "std")]
mod last_error_std {
    use super::{error_to_code, AtlasError, ErrorCode};
    use std::cell::Cell;

    std::thread_local! {
        static LAST_ERROR: Cell<ErrorCode> = const { Cell::new(0) };
    }

    pub(super) fn set(error: AtlasError) {
        LAST_ERROR.with(|cell| cell.set(error_to_code(error)));
    }

    pub(super) fn clear() {
        LAST_ERROR.with(|cell| cell.set(0));
    }

    pub(super) fn get() -> ErrorCode {
        LAST_ERROR.with(Cell::get)
    }
}

// §9 Single-thread mode: without `std` there is no thread-local storage, so the
// last-error cell degenerates to a single file-scope variable. This crate has
// no concurrent execution model without `std` (atomics still require `core`
// support, which is assumed), so a plain static is sufficient here.
#[cfg(not(feature = "std"))]
mod last_error_bare {
    use super::{error_to_code, AtlasError, ErrorCode};
    use core::sync::atomic::{AtomicI32, Ordering};

    static LAST_ERROR: AtomicI32 = AtomicI32::new(0);

    pub(super) fn set(error: AtlasError) {
        LAST_ERROR.store(error_to_code(error), Ordering::Relaxed);
    }

    pub(super) fn clear() {
        LAST_ERROR.store(0, Ordering::Relaxed);
    }

    pub(super) fn get() -> ErrorCode {
        LAST_ERROR.load(Ordering::Relaxed)
    }
}

#[cfg(feature = "std")]
use last_error_std as last_error_impl;
#[cfg(not(feature = "std"))]
use last_error_bare as last_error_impl;

/// Record `error` as the calling thread's last error. Internal helper used at
/// every fallible API boundary; never used for control flow.
pub(crate) fn record(error: AtlasError) -> AtlasError {
    last_error_impl::set(error);
    error
}

/// Clear the calling thread's last-error state. Called on every successful
/// operation so stale errors don't leak across unrelated calls.
pub(crate) fn clear_last_error() {
    last_error_impl::clear();
}

/// Retrieve the last error code observed by the calling thread (`0` if none
/// since the thread last cleared it). Mirrors the `last_error()` C ABI entry
/// point (§6.1).
#[must_use]
pub fn last_error() -> ErrorCode {
    last_error_impl::get()
}

/// Render a stable ABI error code as a human-readable string. Mirrors the
/// `error_string(ErrorCode)` C ABI entry point (§6.1).
#[must_use]
pub fn error_string(code: ErrorCode) -> &'static str {
    code_to_str(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_spec_table() {
        assert_eq!(error_to_code(AtlasError::InvalidArgument), 1);
        assert_eq!(error_to_code(AtlasError::OutOfMemory), 2);
        assert_eq!(error_to_code(AtlasError::InvalidState), 3);
        assert_eq!(error_to_code(AtlasError::BudgetInsufficient), 4);
        assert_eq!(error_to_code(AtlasError::ConservationViolation), 5);
        assert_eq!(error_to_code(AtlasError::WitnessInvalid), 6);
        assert_eq!(error_to_code(AtlasError::DomainDestroyed), 7);
    }

    #[test]
    fn last_error_is_thread_local_and_clearable() {
        clear_last_error();
        assert_eq!(last_error(), 0);
        record(AtlasError::BudgetInsufficient);
        assert_eq!(last_error(), 4);
        clear_last_error();
        assert_eq!(last_error(), 0);
    }
}
