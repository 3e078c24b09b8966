//! Core type definitions shared across the Atlas layers

use bytemuck::{Pod, Zeroable};

/// Size of the fixed Atlas state space in bytes (`48 * 256 == 96 * 128`)
pub const ATLAS_SIZE: usize = 12288;

/// Bytes per page
pub const PAGE_SIZE: usize = 256;

/// Pages per Atlas
pub const PAGE_COUNT: usize = 48;

/// Number of R96 resonance classes
pub const R96_CLASSES: usize = 96;

/// Triple-cycle length underlying harmonic scheduling (`16 * 48 == 3 * 256`)
pub const C768: usize = 768;

/// Conservation modulus: a byte region is conserved iff its sum is 0 mod this value
pub const CONSERVATION_MOD: u32 = 96;

/// Coordinates considered structurally privileged under the Klein boundary test
pub const KLEIN_PRIVILEGED: [u32; 4] = [0, 1, 48, 49];

/// A linear coordinate into the 12288-byte Atlas, encoding `(page, offset)`
///
/// `coord == page * PAGE_SIZE + offset`. Immutable value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Coordinate(pub u32);

// SAFETY: `Coordinate` is `#[repr(transparent)]` over a single `u32` with no
// padding or invalid bit patterns, so every bit pattern is a valid `u32` and
// the type may be freely reinterpreted as bytes.
unsafe impl Pod for Coordinate {}
// SAFETY: the all-zero bit pattern is a valid `u32` (0), hence a valid `Coordinate`.
unsafe impl Zeroable for Coordinate {}

impl Coordinate {
    /// Construct from a raw linear offset without bounds checking
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw linear offset
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// A classified resonance class, always in `0..R96_CLASSES`
pub type ResonanceClass = u8;

/// A page index, always in `0..PAGE_COUNT`
pub type PageIndex = u32;

/// Dense 96-bin histogram of R96 class occurrences
pub type Histogram = [u16; R96_CLASSES];

/// Result type used throughout this crate
pub type AtlasResult<T> = Result<T, crate::error::AtlasError>;
