//! BGP path attribute structs
mod aspath;
mod nlri;
mod origin;

use crate::models::network::Asn;
use bitflags::bitflags;
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use std::ops::Deref;

pub use aspath::*;
pub use nlri::*;
pub use origin::*;

bitflags! {
    /// The Attribute Flags octet (RFC 4271 §4.3).
    ///
    /// The high-order bit is the Optional bit: the attribute is optional
    /// (1) or well-known (0). The second bit is the Transitive bit; for
    /// well-known attributes it MUST be 1. The third bit is the Partial
    /// bit; for well-known and for optional non-transitive attributes it
    /// MUST be 0. The fourth bit selects a one- or two-octet length field.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct AttrFlags: u8 {
        const OPTIONAL   = 0b1000_0000;
        const TRANSITIVE = 0b0100_0000;
        const PARTIAL    = 0b0010_0000;
        const EXTENDED   = 0b0001_0000;
    }
}

/// Attribute type codes handled by this crate.
///
/// <https://www.iana.org/assignments/bgp-parameters/bgp-parameters.xhtml#bgp-parameters-2>
#[allow(non_camel_case_types)]
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AttrType {
    ORIGIN,
    AS_PATH,
    NEXT_HOP,
    MULTI_EXIT_DISCRIMINATOR,
    LOCAL_PREFERENCE,
    ATOMIC_AGGREGATE,
    AGGREGATOR,
    COMMUNITIES,
    /// <https://datatracker.ietf.org/doc/html/rfc4760>
    MP_REACHABLE_NLRI,
    MP_UNREACHABLE_NLRI,
    /// <https://datatracker.ietf.org/doc/html/rfc6793>
    AS4_PATH,
    AS4_AGGREGATOR,
    /// Catch all for any other attribute type
    Unknown(u8),
}

impl From<u8> for AttrType {
    fn from(value: u8) -> Self {
        match value {
            1 => AttrType::ORIGIN,
            2 => AttrType::AS_PATH,
            3 => AttrType::NEXT_HOP,
            4 => AttrType::MULTI_EXIT_DISCRIMINATOR,
            5 => AttrType::LOCAL_PREFERENCE,
            6 => AttrType::ATOMIC_AGGREGATE,
            7 => AttrType::AGGREGATOR,
            8 => AttrType::COMMUNITIES,
            14 => AttrType::MP_REACHABLE_NLRI,
            15 => AttrType::MP_UNREACHABLE_NLRI,
            17 => AttrType::AS4_PATH,
            18 => AttrType::AS4_AGGREGATOR,
            x => AttrType::Unknown(x),
        }
    }
}

impl From<AttrType> for u8 {
    fn from(value: AttrType) -> Self {
        match value {
            AttrType::ORIGIN => 1,
            AttrType::AS_PATH => 2,
            AttrType::NEXT_HOP => 3,
            AttrType::MULTI_EXIT_DISCRIMINATOR => 4,
            AttrType::LOCAL_PREFERENCE => 5,
            AttrType::ATOMIC_AGGREGATE => 6,
            AttrType::AGGREGATOR => 7,
            AttrType::COMMUNITIES => 8,
            AttrType::MP_REACHABLE_NLRI => 14,
            AttrType::MP_UNREACHABLE_NLRI => 15,
            AttrType::AS4_PATH => 17,
            AttrType::AS4_AGGREGATOR => 18,
            AttrType::Unknown(x) => x,
        }
    }
}

/// A regular (RFC 1997) community: a 32-bit opaque tag, conventionally
/// printed as `asn:value`.
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Community(pub u32);

impl Display for Community {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.0 >> 16, self.0 & 0xffff)
    }
}

/// Raw bytes of an attribute this crate does not interpret.
#[derive(Debug, PartialEq, Clone, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttrRaw {
    pub attr_type: AttrType,
    pub bytes: Vec<u8>,
}

/// The `AttributeValue` enum represents the different kinds of attribute
/// payloads. Unrecognized attributes are preserved as [AttrRaw] so they can
/// round-trip unchanged.
#[derive(Debug, PartialEq, Clone, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AttributeValue {
    Origin(Origin),
    AsPath {
        path: AsPath,
        /// True for an AS4_PATH (type 17) carrying four-octet ASNs
        /// regardless of the session's negotiated width.
        is_as4: bool,
    },
    NextHop(Ipv4Addr),
    MultiExitDiscriminator(u32),
    LocalPreference(u32),
    AtomicAggregate,
    Aggregator {
        asn: Asn,
        id: Ipv4Addr,
        /// True for an AS4_AGGREGATOR (type 18).
        is_as4: bool,
    },
    Communities(Vec<Community>),
    MpReachNlri(MpReachNlri),
    MpUnreachNlri(MpUnreachNlri),
    Unknown(AttrRaw),
}

impl AttributeValue {
    pub fn attr_type(&self) -> AttrType {
        match self {
            AttributeValue::Origin(_) => AttrType::ORIGIN,
            AttributeValue::AsPath { is_as4: false, .. } => AttrType::AS_PATH,
            AttributeValue::AsPath { is_as4: true, .. } => AttrType::AS4_PATH,
            AttributeValue::NextHop(_) => AttrType::NEXT_HOP,
            AttributeValue::MultiExitDiscriminator(_) => AttrType::MULTI_EXIT_DISCRIMINATOR,
            AttributeValue::LocalPreference(_) => AttrType::LOCAL_PREFERENCE,
            AttributeValue::AtomicAggregate => AttrType::ATOMIC_AGGREGATE,
            AttributeValue::Aggregator { is_as4: false, .. } => AttrType::AGGREGATOR,
            AttributeValue::Aggregator { is_as4: true, .. } => AttrType::AS4_AGGREGATOR,
            AttributeValue::Communities(_) => AttrType::COMMUNITIES,
            AttributeValue::MpReachNlri(_) => AttrType::MP_REACHABLE_NLRI,
            AttributeValue::MpUnreachNlri(_) => AttrType::MP_UNREACHABLE_NLRI,
            AttributeValue::Unknown(x) => x.attr_type,
        }
    }

    /// Canonical flag octet for attributes built locally.
    pub fn default_flags(&self) -> AttrFlags {
        match self.attr_type() {
            AttrType::ORIGIN
            | AttrType::AS_PATH
            | AttrType::NEXT_HOP
            | AttrType::LOCAL_PREFERENCE
            | AttrType::ATOMIC_AGGREGATE => AttrFlags::TRANSITIVE,
            AttrType::MULTI_EXIT_DISCRIMINATOR
            | AttrType::MP_REACHABLE_NLRI
            | AttrType::MP_UNREACHABLE_NLRI => AttrFlags::OPTIONAL,
            AttrType::AGGREGATOR
            | AttrType::AS4_PATH
            | AttrType::AS4_AGGREGATOR
            | AttrType::COMMUNITIES => AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
            AttrType::Unknown(_) => AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
        }
    }
}

/// A path attribute: payload plus its wire flag octet.
#[derive(Debug, PartialEq, Clone, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Attribute {
    pub value: AttributeValue,
    pub flag: AttrFlags,
}

impl Attribute {
    /// Wraps a value with its canonical flags.
    pub fn from_value(value: AttributeValue) -> Self {
        let flag = value.default_flags();
        Attribute { value, flag }
    }

    pub fn is_optional(&self) -> bool {
        self.flag.contains(AttrFlags::OPTIONAL)
    }

    pub fn is_transitive(&self) -> bool {
        self.flag.contains(AttrFlags::TRANSITIVE)
    }

    pub fn is_extended(&self) -> bool {
        self.flag.contains(AttrFlags::EXTENDED)
    }
}

impl Deref for Attribute {
    type Target = AttributeValue;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/// Convenience wrapper for a list of attributes.
///
/// One `Attributes` bundle is shared (`Arc`) by every RIB entry that came
/// out of the same UPDATE; it is treated as immutable after construction.
/// Egress rewriting always clones first.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Attributes {
    inner: Vec<Attribute>,
}

impl Attributes {
    pub fn has_attr(&self, ty: AttrType) -> bool {
        self.inner.iter().any(|x| x.value.attr_type() == ty)
    }

    pub fn get(&self, ty: AttrType) -> Option<&Attribute> {
        self.inner.iter().find(|x| x.value.attr_type() == ty)
    }

    pub fn origin(&self) -> Option<Origin> {
        self.inner.iter().find_map(|x| match &x.value {
            AttributeValue::Origin(o) => Some(*o),
            _ => None,
        })
    }

    /// The AS_PATH attribute (type 2), not AS4_PATH.
    pub fn as_path(&self) -> Option<&AsPath> {
        self.inner.iter().find_map(|x| match &x.value {
            AttributeValue::AsPath {
                path,
                is_as4: false,
            } => Some(path),
            _ => None,
        })
    }

    pub fn as4_path(&self) -> Option<&AsPath> {
        self.inner.iter().find_map(|x| match &x.value {
            AttributeValue::AsPath { path, is_as4: true } => Some(path),
            _ => None,
        })
    }

    pub fn next_hop(&self) -> Option<Ipv4Addr> {
        self.inner.iter().find_map(|x| match &x.value {
            AttributeValue::NextHop(addr) => Some(*addr),
            _ => None,
        })
    }

    pub fn med(&self) -> Option<u32> {
        self.inner.iter().find_map(|x| match &x.value {
            AttributeValue::MultiExitDiscriminator(v) => Some(*v),
            _ => None,
        })
    }

    pub fn local_pref(&self) -> Option<u32> {
        self.inner.iter().find_map(|x| match &x.value {
            AttributeValue::LocalPreference(v) => Some(*v),
            _ => None,
        })
    }

    pub fn get_reachable(&self) -> Option<&MpReachNlri> {
        self.inner.iter().find_map(|x| match &x.value {
            AttributeValue::MpReachNlri(v) => Some(v),
            _ => None,
        })
    }

    pub fn get_unreachable(&self) -> Option<&MpUnreachNlri> {
        self.inner.iter().find_map(|x| match &x.value {
            AttributeValue::MpUnreachNlri(v) => Some(v),
            _ => None,
        })
    }

    /// Replaces the attribute of the value's type, or appends it.
    pub fn upsert(&mut self, value: AttributeValue) {
        let ty = value.attr_type();
        match self.inner.iter_mut().find(|x| x.value.attr_type() == ty) {
            Some(slot) => slot.value = value,
            None => self.inner.push(Attribute::from_value(value)),
        }
    }

    pub fn remove(&mut self, ty: AttrType) -> Option<Attribute> {
        let idx = self.inner.iter().position(|x| x.value.attr_type() == ty)?;
        Some(self.inner.remove(idx))
    }

    /// Drops attributes that must not cross an EBGP boundary: everything
    /// flagged optional non-transitive (MED, MP_REACH/MP_UNREACH, ...).
    pub fn drop_non_transitive(&mut self) {
        self.inner.retain(|attr| attr.is_transitive());
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.inner.iter()
    }
}

impl FromIterator<Attribute> for Attributes {
    fn from_iter<T: IntoIterator<Item = Attribute>>(iter: T) -> Self {
        Attributes {
            inner: iter.into_iter().collect(),
        }
    }
}

impl FromIterator<AttributeValue> for Attributes {
    fn from_iter<T: IntoIterator<Item = AttributeValue>>(iter: T) -> Self {
        Attributes {
            inner: iter.into_iter().map(Attribute::from_value).collect(),
        }
    }
}

impl From<Vec<Attribute>> for Attributes {
    fn from(value: Vec<Attribute>) -> Self {
        Attributes { inner: value }
    }
}

impl Deref for Attributes {
    type Target = Vec<Attribute>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}
