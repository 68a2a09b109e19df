//! Offset algebra for stream addressing.
//!
//! An offset names a position in a stream as `{append_count}_{byte_position}`
//! with each half rendered as 16 lowercase hex digits, so canonical offsets
//! sort lexicographically in the same order as their numeric value. The
//! literal `-1` is accepted on input as "start of stream".

use std::fmt;

/// Sentinel accepted on input and normalized to [`Offset::INITIAL`].
pub const SENTINEL_OFFSET: &str = "-1";

/// A parsed stream offset: number of completed appends plus byte position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset {
    /// Number of appends committed so far.
    pub seq: u64,
    /// Byte position after the last committed byte.
    pub pos: u64,
}

impl Offset {
    /// The offset of an empty stream.
    pub const INITIAL: Offset = Offset { seq: 0, pos: 0 };

    /// Parse a canonical offset string. Returns `None` for anything that is
    /// not exactly `[0-9a-f]{16}_[0-9a-f]{16}`.
    pub fn parse(offset: &str) -> Option<Offset> {
        let bytes = offset.as_bytes();
        if bytes.len() != 33 || bytes[16] != b'_' {
            return None;
        }
        let (seq_half, pos_half) = (&offset[..16], &offset[17..]);
        if !is_lower_hex(seq_half) || !is_lower_hex(pos_half) {
            return None;
        }
        let seq = u64::from_str_radix(seq_half, 16).ok()?;
        let pos = u64::from_str_radix(pos_half, 16).ok()?;
        Some(Offset { seq, pos })
    }

    /// Parse with sentinel handling: `-1` maps to the initial offset.
    pub fn normalize(offset: &str) -> Option<Offset> {
        if offset == SENTINEL_OFFSET {
            Some(Offset::INITIAL)
        } else {
            Offset::parse(offset)
        }
    }

    /// Whether the string is the sentinel or a well-formed canonical offset.
    pub fn is_valid(offset: &str) -> bool {
        Offset::normalize(offset).is_some()
    }

    /// The offset `n` bytes further into the same append generation.
    pub fn advance(&self, n: u64) -> Offset {
        Offset {
            seq: self.seq,
            pos: self.pos + n,
        }
    }

    /// The offset after one more completed append.
    pub fn increment_seq(&self) -> Offset {
        Offset {
            seq: self.seq + 1,
            pos: self.pos,
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}_{:016x}", self.seq, self.pos)
    }
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Format an offset from its halves.
pub fn format_offset(seq: u64, pos: u64) -> String {
    Offset { seq, pos }.to_string()
}

/// Total order over canonical offsets, comparing the parsed halves.
/// Unparseable inputs compare as the initial offset.
pub fn compare_offsets(a: &str, b: &str) -> std::cmp::Ordering {
    let a = Offset::normalize(a).unwrap_or(Offset::INITIAL);
    let b = Offset::normalize(b).unwrap_or(Offset::INITIAL);
    a.cmp(&b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn format_is_zero_padded_hex() {
        assert_eq!(
            format_offset(0, 0),
            "0000000000000000_0000000000000000"
        );
        assert_eq!(
            format_offset(1, 5),
            "0000000000000001_0000000000000005"
        );
        assert_eq!(
            format_offset(2, 11),
            "0000000000000002_000000000000000b"
        );
    }

    #[test]
    fn parse_roundtrips_canonical_forms() {
        for (seq, pos) in [(0, 0), (1, 5), (7, 0xdead_beef), (u64::MAX, u64::MAX)] {
            let s = format_offset(seq, pos);
            assert_eq!(Offset::parse(&s), Some(Offset { seq, pos }));
        }
    }

    #[test]
    fn parse_rejects_malformed_input() {
        for bad in [
            "",
            "-1", // sentinel is normalize()'s job, not parse()'s
            "0000000000000000",
            "0000000000000000_000000000000000", // short half
            "0000000000000000_00000000000000000", // long half
            "000000000000000G_0000000000000000",
            "000000000000000A_0000000000000000", // uppercase hex
            "0000000000000000 0000000000000000",
        ] {
            assert_eq!(Offset::parse(bad), None, "accepted {bad:?}");
        }
    }

    #[test]
    fn normalize_maps_sentinel_to_initial() {
        assert_eq!(Offset::normalize("-1"), Some(Offset::INITIAL));
        assert!(Offset::is_valid("-1"));
        assert!(Offset::is_valid("0000000000000000_0000000000000000"));
        assert!(!Offset::is_valid("-2"));
    }

    #[test]
    fn ordering_is_by_seq_then_pos() {
        let a = format_offset(0, 100);
        let b = format_offset(0, 200);
        let c = format_offset(1, 0);
        assert_eq!(compare_offsets(&a, &b), Ordering::Less);
        assert_eq!(compare_offsets(&b, &c), Ordering::Less);
        assert_eq!(compare_offsets(&c, &c), Ordering::Equal);
    }

    #[test]
    fn advance_and_increment() {
        let o = Offset { seq: 3, pos: 10 };
        assert_eq!(o.advance(4), Offset { seq: 3, pos: 14 });
        assert_eq!(o.increment_seq(), Offset { seq: 4, pos: 10 });
        assert_eq!(
            o.increment_seq().advance(2).to_string(),
            format_offset(4, 12)
        );
    }
}
