//! Rolling checksum and basis derivation for frame integrity.
//!
//! Every frame carries a 64-bit basis derived from the payload length and
//! hashes of the destination/source paths, followed by a rolling hash of
//! the payload seeded from that basis. The mixing defends against
//! accidental frame misalignment: a reader that slips even one byte out of
//! phase recomputes a different basis and rejects the frame.

/// Multiplier for the rolling payload hash.
const CHECKSUM_MULTIPLIER: i64 = 43;

/// Multiplier for the path string hash.
const STRING_HASH_MULTIPLIER: i32 = 31;

/// Compute the rolling checksum of `data` seeded from `basis`.
///
/// Payload bytes contribute as signed values so that the same byte stream
/// always hashes identically regardless of platform char signedness.
pub fn checksum(data: &[u8], basis: i64) -> i64 {
    data.iter().fold(basis, |h, &b| {
        h.wrapping_mul(CHECKSUM_MULTIPLIER)
            .wrapping_add(b as i8 as i64)
    })
}

/// 32-bit hash of a path string over its UTF-16 code units.
pub fn string_hash(s: &str) -> i32 {
    s.encode_utf16().fold(0i32, |h, unit| {
        h.wrapping_mul(STRING_HASH_MULTIPLIER)
            .wrapping_add(unit as i32)
    })
}

/// Derive the checksum basis from a frame's length and path fields.
///
/// Absent paths contribute zero so that broadcast and anonymous frames
/// hash consistently on both ends.
pub fn checksum_basis(payload_len: usize, dest: Option<&str>, source: Option<&str>) -> i64 {
    let dest_part = match dest {
        Some(d) => (string_hash(d) as i64) << 16,
        None => 0,
    };
    let source_part = match source {
        Some(s) => {
            let h = string_hash(s) as i64;
            h ^ (h << 48)
        }
        None => 0,
    };
    ((payload_len as i64) << 32) ^ dest_part ^ source_part
}
