use bytes::{BufMut, Bytes, BytesMut};
use ipnet::{Ipv4Net, Ipv6Net};
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Prefix operations shared by the RIB and the filter engine, implemented
/// for both address families.
///
/// Containment follows the masked comparison of §4.1 of RFC 4271 usage:
/// `a.includes(b)` iff `len(a) <= len(b)` and the top `len(a)` bits of the
/// two network addresses agree. Host bits beyond the prefix length never
/// participate.
pub trait RoutedPrefix: Copy + Eq + Hash + Debug + Display {
    type Addr: Copy + Debug;

    fn includes(&self, other: &Self) -> bool;
    fn contains_addr(&self, addr: &Self::Addr) -> bool;
    fn bits(&self) -> u8;
}

impl RoutedPrefix for Ipv4Net {
    type Addr = Ipv4Addr;

    fn includes(&self, other: &Self) -> bool {
        self.contains(other)
    }

    fn contains_addr(&self, addr: &Self::Addr) -> bool {
        self.contains(addr)
    }

    fn bits(&self) -> u8 {
        self.prefix_len()
    }
}

impl RoutedPrefix for Ipv6Net {
    type Addr = Ipv6Addr;

    fn includes(&self, other: &Self) -> bool {
        self.contains(other)
    }

    fn contains_addr(&self, addr: &Self::Addr) -> bool {
        self.contains(addr)
    }

    fn bits(&self) -> u8 {
        self.prefix_len()
    }
}

/// Length-delimited wire form shared by NLRI, withdrawn-routes and the
/// MP-BGP prefix lists: one length octet in bits, then `ceil(len/8)` address
/// octets, zero-padded on the right.
pub trait NlriEncode {
    /// Encodes the prefix into its wire form.
    fn encode_nlri(&self) -> Bytes;

    /// Number of octets the wire form occupies.
    fn nlri_len(&self) -> usize;
}

impl NlriEncode for Ipv4Net {
    fn encode_nlri(&self) -> Bytes {
        let bit_len = self.prefix_len();
        let byte_len = (bit_len as usize).div_ceil(8);
        let mut bytes = BytesMut::with_capacity(1 + byte_len);
        bytes.put_u8(bit_len);
        bytes.put_slice(&self.network().octets()[0..byte_len]);
        bytes.freeze()
    }

    fn nlri_len(&self) -> usize {
        1 + (self.prefix_len() as usize).div_ceil(8)
    }
}

impl NlriEncode for Ipv6Net {
    fn encode_nlri(&self) -> Bytes {
        let bit_len = self.prefix_len();
        let byte_len = (bit_len as usize).div_ceil(8);
        let mut bytes = BytesMut::with_capacity(1 + byte_len);
        bytes.put_u8(bit_len);
        bytes.put_slice(&self.network().octets()[0..byte_len]);
        bytes.freeze()
    }

    fn nlri_len(&self) -> usize {
        1 + (self.prefix_len() as usize).div_ceil(8)
    }
}
