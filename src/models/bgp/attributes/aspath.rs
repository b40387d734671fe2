use crate::models::network::Asn;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use smallvec::SmallVec;
use std::fmt::{Display, Formatter};

/// Maximum ASN count for one segment when writing four-octet ASNs.
pub const MAX_SEGMENT_LEN_4B: usize = 127;
/// Maximum ASN count for one segment when writing two-octet ASNs.
pub const MAX_SEGMENT_LEN_2B: usize = 255;

/// AS path segment types (RFC 4271 §4.3).
#[allow(non_camel_case_types)]
#[derive(Debug, TryFromPrimitive, IntoPrimitive, PartialEq, Eq, Hash, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum AsSegmentType {
    AS_SET = 1,
    AS_SEQUENCE = 2,
}

/// One AS path segment: a typed run of ASNs.
///
/// A segment never mixes two- and four-octet encodings on the wire; the
/// width is a property of the enclosing attribute and session, not of the
/// individual ASN.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AsPathSegment {
    pub seg_type: AsSegmentType,
    pub asns: SmallVec<[Asn; 8]>,
}

impl AsPathSegment {
    pub fn sequence<I: IntoIterator<Item = u32>>(asns: I) -> Self {
        AsPathSegment {
            seg_type: AsSegmentType::AS_SEQUENCE,
            asns: asns.into_iter().map(Asn::new_32bit).collect(),
        }
    }

    pub fn set<I: IntoIterator<Item = u32>>(asns: I) -> Self {
        AsPathSegment {
            seg_type: AsSegmentType::AS_SET,
            asns: asns.into_iter().map(Asn::new_32bit).collect(),
        }
    }

    pub fn is_sequence(&self) -> bool {
        self.seg_type == AsSegmentType::AS_SEQUENCE
    }
}

/// An ordered list of AS path segments.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AsPath {
    pub segments: Vec<AsPathSegment>,
}

impl AsPath {
    pub fn new() -> Self {
        AsPath::default()
    }

    pub fn from_sequence<I: IntoIterator<Item = u32>>(asns: I) -> Self {
        AsPath {
            segments: vec![AsPathSegment::sequence(asns)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Route length used in best-path selection: only AS_SEQUENCE segments
    /// contribute, one per ASN.
    pub fn route_len(&self) -> usize {
        self.segments
            .iter()
            .filter(|seg| seg.is_sequence())
            .map(|seg| seg.asns.len())
            .sum()
    }

    /// Number of times `asn` occurs anywhere in the path.
    pub fn count_asn(&self, asn: Asn) -> usize {
        self.segments
            .iter()
            .flat_map(|seg| seg.asns.iter())
            .filter(|a| **a == asn)
            .count()
    }

    /// True when every ASN in the path fits in two octets.
    pub fn is_two_byte_clean(&self) -> bool {
        self.segments
            .iter()
            .flat_map(|seg| seg.asns.iter())
            .all(|asn| asn.to_u32() <= u16::MAX as u32)
    }

    /// Prepends `asn` to the path.
    ///
    /// If the first segment is an AS_SEQUENCE with room left, the ASN is
    /// inserted at its head; otherwise a fresh single-ASN AS_SEQUENCE
    /// becomes the first segment. `four_byte` selects the segment size
    /// bound (127 four-octet ASNs, 255 two-octet ones).
    pub fn prepend(&mut self, asn: Asn, four_byte: bool) {
        let limit = if four_byte {
            MAX_SEGMENT_LEN_4B
        } else {
            MAX_SEGMENT_LEN_2B
        };

        if let Some(first) = self.segments.first_mut() {
            if first.is_sequence() && first.asns.len() < limit {
                first.asns.insert(0, asn);
                return;
            }
        }

        self.segments.insert(
            0,
            AsPathSegment {
                seg_type: AsSegmentType::AS_SEQUENCE,
                asns: SmallVec::from_elem(asn, 1),
            },
        );
    }

    /// All ASNs of AS_SEQUENCE segments, leftmost first. This is the pool
    /// AS_TRANS restoration draws from.
    pub fn sequence_asns(&self) -> impl Iterator<Item = Asn> + '_ {
        self.segments
            .iter()
            .filter(|seg| seg.is_sequence())
            .flat_map(|seg| seg.asns.iter().copied())
    }
}

impl Display for AsPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for seg in &self.segments {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            match seg.seg_type {
                AsSegmentType::AS_SEQUENCE => {
                    let mut inner_first = true;
                    for asn in &seg.asns {
                        if !inner_first {
                            write!(f, " ")?;
                        }
                        inner_first = false;
                        write!(f, "{}", asn)?;
                    }
                }
                AsSegmentType::AS_SET => {
                    write!(f, "{{")?;
                    let mut inner_first = true;
                    for asn in &seg.asns {
                        if !inner_first {
                            write!(f, ",")?;
                        }
                        inner_first = false;
                        write!(f, "{}", asn)?;
                    }
                    write!(f, "}}")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_len_ignores_sets() {
        let path = AsPath {
            segments: vec![
                AsPathSegment::sequence([65001, 65002]),
                AsPathSegment::set([65010, 65011, 65012]),
                AsPathSegment::sequence([65003]),
            ],
        };
        assert_eq!(path.route_len(), 3);
    }

    #[test]
    fn test_prepend_into_first_sequence() {
        let mut path = AsPath::from_sequence([65002, 65003]);
        path.prepend(Asn::new_32bit(65001), true);
        assert_eq!(path, AsPath::from_sequence([65001, 65002, 65003]));
    }

    #[test]
    fn test_prepend_creates_segment_when_first_is_set() {
        let mut path = AsPath {
            segments: vec![AsPathSegment::set([65010])],
        };
        path.prepend(Asn::new_32bit(65001), true);
        assert_eq!(path.segments.len(), 2);
        assert_eq!(path.segments[0], AsPathSegment::sequence([65001]));
    }

    #[test]
    fn test_prepend_splits_full_segment() {
        let mut path = AsPath {
            segments: vec![AsPathSegment::sequence(
                (0..MAX_SEGMENT_LEN_4B as u32).map(|i| 65000 + i),
            )],
        };
        path.prepend(Asn::new_32bit(64999), true);
        assert_eq!(path.segments.len(), 2);
        assert_eq!(path.segments[0].asns.len(), 1);
    }

    #[test]
    fn test_count_asn() {
        let path = AsPath::from_sequence([65001, 65002, 65001]);
        assert_eq!(path.count_asn(Asn::new_32bit(65001)), 2);
        assert_eq!(path.count_asn(Asn::new_32bit(65009)), 0);
    }

    #[test]
    fn test_display() {
        let path = AsPath {
            segments: vec![
                AsPathSegment::sequence([65001, 65002]),
                AsPathSegment::set([65010, 65011]),
            ],
        };
        assert_eq!(path.to_string(), "65001 65002 {65010,65011}");
    }
}
