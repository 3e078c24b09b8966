//! L0 Atlas — coordinate constants and the R96 byte classifier
//!
//! Pure functions over the fixed 12288-byte state space. No error
//! conditions other than boundary-length checks; every operation here is
//! fully concurrent (§5).

use crate::types::{CONSERVATION_MOD, R96_CLASSES};

/// `r96(byte) = byte mod 96`, always in `0..96`
#[must_use]
#[inline]
pub fn r96_classify(byte: u8) -> u8 {
    byte % CONSERVATION_MOD as u8
}

/// Lane-parallel application of [`r96_classify`] over a buffer
///
/// `out` must be at least as long as `input`; excess `out` bytes are left
/// untouched. This is the scalar fallback; the `parallel` feature additionally
/// exposes [`r96_classify_buffer_parallel`] for bulk workloads.
pub fn r96_classify_buffer(input: &[u8], out: &mut [u8]) {
    let len = input.len().min(out.len());
    for i in 0..len {
        out[i] = r96_classify(input[i]);
    }
}

/// Parallel variant of [`r96_classify_buffer`] for large buffers, using `rayon`
#[cfg(feature = "parallel")]
pub fn r96_classify_buffer_parallel(input: &[u8], out: &mut [u8]) {
    use rayon::prelude::*;
    let len = input.len().min(out.len());
    out[..len]
        .par_iter_mut()
        .zip(input[..len].par_iter())
        .for_each(|(o, &b)| *o = r96_classify(b));
}

/// Scan 256 bytes and produce a dense 96-bin histogram of R96 classes
///
/// `Σ histogram == 256` always holds (invariant 4, §8.1).
#[must_use]
pub fn r96_histogram(page: &[u8]) -> [u16; R96_CLASSES] {
    let mut hist = [0u16; R96_CLASSES];
    for &byte in page {
        hist[r96_classify(byte) as usize] += 1;
    }
    hist
}

/// Dominant class of a histogram: argmax, ties broken by smallest class index
#[must_use]
pub fn r96_dominant(histogram: &[u16; R96_CLASSES]) -> u8 {
    let mut best_class = 0usize;
    let mut best_count = histogram[0];
    for (class, &count) in histogram.iter().enumerate().skip(1) {
        if count > best_count {
            best_count = count;
            best_class = class;
        }
    }
    best_class as u8
}

/// `true` iff `(c1 + c2) mod 96 == 0`
#[must_use]
#[inline]
pub fn r96_harmonizes(c1: u8, c2: u8) -> bool {
    (u32::from(c1) + u32::from(c2)) % CONSERVATION_MOD == 0
}

/// The harmonic conjugate of a class: the unique `c'` such that `r96_harmonizes(c, c')`
#[must_use]
#[inline]
pub fn r96_harmonic_conjugate(class: u8) -> u8 {
    let c = u32::from(class) % CONSERVATION_MOD;
    (if c == 0 { 0 } else { CONSERVATION_MOD - c }) as u8
}
