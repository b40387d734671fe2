use crate::models::network::{Afi, Asn, Safi};
use num_enum::{FromPrimitive, IntoPrimitive};

/// BGP capability codes (RFC 5492).
///
/// <https://www.iana.org/assignments/capability-codes/capability-codes.xhtml>
#[allow(non_camel_case_types)]
#[derive(Debug, FromPrimitive, IntoPrimitive, PartialEq, Eq, Hash, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum BgpCapabilityType {
    MULTIPROTOCOL_EXTENSIONS_FOR_BGP_4 = 1,
    SUPPORT_FOR_4_OCTET_AS_NUMBER_CAPABILITY = 65,
    /// Catch-all for any other capability code
    #[num_enum(catch_all)]
    Unknown(u8),
}

/// A single capability TLV from an OPEN optional parameter.
///
/// Only the two capabilities this crate negotiates are decoded; everything
/// else round-trips opaquely.
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Capability {
    /// RFC 4760. AFI/SAFI kept raw so unknown families survive re-encoding.
    Multiprotocol { afi: u16, safi: u8 },
    /// RFC 6793, carries the speaker's true 32-bit ASN.
    FourOctetAs(Asn),
    Unknown { code: u8, value: Vec<u8> },
}

impl Capability {
    pub fn multiprotocol(afi: Afi, safi: Safi) -> Self {
        Capability::Multiprotocol {
            afi: afi as u16,
            safi: safi as u8,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Capability::Multiprotocol { .. } => {
                BgpCapabilityType::MULTIPROTOCOL_EXTENSIONS_FOR_BGP_4.into()
            }
            Capability::FourOctetAs(_) => {
                BgpCapabilityType::SUPPORT_FOR_4_OCTET_AS_NUMBER_CAPABILITY.into()
            }
            Capability::Unknown { code, .. } => *code,
        }
    }

    /// The recognized address family of a multiprotocol capability.
    pub fn family(&self) -> Option<(Afi, Safi)> {
        match self {
            Capability::Multiprotocol { afi, safi } => {
                let afi = Afi::try_from(*afi).ok()?;
                let safi = Safi::try_from(*safi).ok()?;
                Some((afi, safi))
            }
            _ => None,
        }
    }
}

/// An OPEN message optional parameter (RFC 4271 §4.2).
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OptParam {
    /// Parameter type 2: a list of capability TLVs.
    Capabilities(Vec<Capability>),
    /// Any other parameter type, preserved opaquely.
    Raw { param_type: u8, value: Vec<u8> },
}

impl OptParam {
    pub fn param_type(&self) -> u8 {
        match self {
            OptParam::Capabilities(_) => 2,
            OptParam::Raw { param_type, .. } => *param_type,
        }
    }
}
