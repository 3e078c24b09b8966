//! L1 Boundary — Φ coordinate isomorphism and Klein orbit canonicalization
//!
//! Invalid coordinates are reported via the [`AtlasError`] taxonomy; they
//! never trap (§4.2).

use crate::atlas::r96_classify;
use crate::error::{record, AtlasError, AtlasResult};
use crate::types::{ATLAS_SIZE, KLEIN_PRIVILEGED, PAGE_COUNT, PAGE_SIZE};

/// Encode `(page, offset)` into a linear coordinate
///
/// Fails with `InvalidArgument` if `page >= 48` or `offset >= 256`.
pub fn boundary_encode(page: u16, offset: u8) -> AtlasResult<u32> {
    if usize::from(page) >= PAGE_COUNT {
        return Err(record(AtlasError::InvalidArgument));
    }
    Ok(u32::from(page) * PAGE_SIZE as u32 + u32::from(offset))
}

/// Decode a linear coordinate back into `(page, offset)`
///
/// Fails with `InvalidArgument` if `coord >= 12288`.
pub fn boundary_decode(coord: u32) -> AtlasResult<(u16, u8)> {
    if coord as usize >= ATLAS_SIZE {
        return Err(record(AtlasError::InvalidArgument));
    }
    let page = coord / PAGE_SIZE as u32;
    let offset = coord % PAGE_SIZE as u32;
    Ok((page as u16, offset as u8))
}

/// Klein orbit identifier in `0..16`
///
/// Chosen formula (Open Question resolution, see `DESIGN.md`):
/// `orbit_id = ((page & 0b11) << 2) | (offset & 0b11)`. Page has 48 values
/// (48 / 4 == 12 per low-bit class) and offset has 256 values (256 / 4 == 64
/// per low-bit class), so every one of the 16 combinations contains exactly
/// `12 * 64 == 768` coordinates — the Klein partition invariant (invariant 3,
/// §8.1).
#[must_use]
pub fn klein_orbit_id(coord: u32) -> u8 {
    let page = coord / PAGE_SIZE as u32;
    let offset = coord % PAGE_SIZE as u32;
    (((page & 0b11) << 2) | (offset & 0b11)) as u8
}

/// `true` iff `coord` is one of the four structurally privileged positions
#[must_use]
pub fn klein_is_privileged(coord: u32) -> bool {
    KLEIN_PRIVILEGED.contains(&coord)
}

/// The lexically smallest coordinate sharing `coord`'s Klein orbit
#[must_use]
pub fn klein_canonicalize(coord: u32) -> u32 {
    let page = coord / PAGE_SIZE as u32;
    let offset = coord % PAGE_SIZE as u32;
    (page & 0b11) * PAGE_SIZE as u32 + (offset & 0b11)
}

/// Verify that the 16 Klein orbits each contain exactly 768 coordinates and
/// together partition `0..12288` (invariant 3, §8.1)
#[must_use]
pub fn klein_verify_coset_partition() -> bool {
    let mut counts = [0u32; 16];
    for coord in 0..ATLAS_SIZE as u32 {
        counts[klein_orbit_id(coord) as usize] += 1;
    }
    counts.iter().all(|&c| c == 768)
}

/// Fast structural acceptance test run before expensive validation
///
/// `true` iff `data.len() == 12288` and the four privileged positions
/// pairwise harmonize under R96: `r96(data[0]) + r96(data[1]) ≡ 0` and
/// `r96(data[48]) + r96(data[49]) ≡ 0` (mod 96).
#[must_use]
pub fn klein_quick_accept(data: &[u8]) -> bool {
    if data.len() != ATLAS_SIZE {
        return false;
    }
    let pair_harmonizes = |a: usize, b: usize| {
        (u32::from(r96_classify(data[a])) + u32::from(r96_classify(data[b]))) % 96 == 0
    };
    pair_harmonizes(0, 1) && pair_harmonizes(48, 49)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phi_bijection_invariant() {
        // invariant 2 (§8.1)
        for page in 0u16..48 {
            for offset in 0u16..256 {
                #[allow(clippy::cast_possible_truncation)]
                let encoded = boundary_encode(page, offset as u8).unwrap();
                let (p, o) = boundary_decode(encoded).unwrap();
                assert_eq!(p, page);
                assert_eq!(o, offset as u8);
            }
        }
        for coord in 0u32..12288 {
            let (p, o) = boundary_decode(coord).unwrap();
            assert_eq!(boundary_encode(p, o).unwrap(), coord);
        }
    }

    #[test]
    fn boundary_encode_rejects_out_of_range_page() {
        assert_eq!(boundary_encode(48, 0), Err(AtlasError::InvalidArgument));
    }

    #[test]
    fn boundary_decode_rejects_out_of_range_coord() {
        assert_eq!(boundary_decode(12288), Err(AtlasError::InvalidArgument));
    }

    #[test]
    fn klein_partition_invariant() {
        assert!(klein_verify_coset_partition());
    }

    #[test]
    fn klein_privileged_positions() {
        for &coord in &KLEIN_PRIVILEGED {
            assert!(klein_is_privileged(coord));
        }
        assert!(!klein_is_privileged(2));
        assert!(!klein_is_privileged(12287));
    }

    #[test]
    fn klein_canonicalize_is_idempotent_and_in_orbit() {
        for coord in [0u32, 1, 48, 49, 12287, 5000] {
            let canon = klein_canonicalize(coord);
            assert_eq!(klein_orbit_id(canon), klein_orbit_id(coord));
            assert_eq!(klein_canonicalize(canon), canon);
            assert!(canon <= coord);
        }
    }

    #[test]
    fn quick_accept_requires_full_length_and_harmonizing_privileged_bytes() {
        let mut data = vec![0u8; 12288];
        assert!(klein_quick_accept(&data));
        data[0] = 1;
        assert!(!klein_quick_accept(&data));
        data[1] = 95; // 1 + 95 == 96 ≡ 0 mod 96
        assert!(klein_quick_accept(&data));

        let short = vec![0u8; 100];
        assert!(!klein_quick_accept(&short));
    }
}
