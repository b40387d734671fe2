use crate::error::{BgpError, UpdateSubcode};
use crate::models::*;
use crate::parser::{ReadError, ReadUtils};
use bytes::{BufMut, Bytes, BytesMut};

fn map_prefix_err(err: ReadError) -> BgpError {
    match err {
        ReadError::Truncated => BgpError::update(UpdateSubcode::AttributeLengthError),
        ReadError::InvalidPrefixLength(len) => {
            BgpError::update_with_data(UpdateSubcode::InvalidNetworkField, vec![len])
        }
    }
}

/// Parses an MP_REACH_NLRI body (RFC 4760 §3).
///
/// ```text
/// +---------------------------------------------------------+
/// | Address Family Identifier (2 octets)                    |
/// +---------------------------------------------------------+
/// | Subsequent Address Family Identifier (1 octet)          |
/// +---------------------------------------------------------+
/// | Length of Next Hop Network Address (1 octet)            |
/// +---------------------------------------------------------+
/// | Network Address of Next Hop (variable)                  |
/// +---------------------------------------------------------+
/// | Reserved (1 octet)                                      |
/// +---------------------------------------------------------+
/// | Network Layer Reachability Information (variable)       |
/// +---------------------------------------------------------+
/// ```
pub fn parse_mp_reach(mut input: Bytes) -> Result<AttributeValue, BgpError> {
    let truncated = || BgpError::update(UpdateSubcode::AttributeLengthError);

    let afi = input.read_u16().map_err(|_| truncated())?;
    let safi = input.read_u8().map_err(|_| truncated())?;

    if (afi, safi) != (Afi::Ipv6 as u16, Safi::Unicast as u8) {
        return Ok(AttributeValue::MpReachNlri(MpReachNlri::Opaque {
            afi,
            safi,
            value: input.to_vec(),
        }));
    }

    let nh_len = input.read_u8().map_err(|_| truncated())?;
    let next_hop = match nh_len {
        16 => MpNextHop::Ipv6(input.read_ipv6_address().map_err(|_| truncated())?),
        32 => MpNextHop::Ipv6LinkLocal(
            input.read_ipv6_address().map_err(|_| truncated())?,
            input.read_ipv6_address().map_err(|_| truncated())?,
        ),
        v => {
            return Err(BgpError::update_with_data(
                UpdateSubcode::OptionalAttributeError,
                vec![v],
            ))
        }
    };

    // reserved octet
    input.read_u8().map_err(|_| truncated())?;

    let prefixes = input.read_v6_nlri_list().map_err(map_prefix_err)?;
    Ok(AttributeValue::MpReachNlri(MpReachNlri::Ipv6Unicast {
        next_hop,
        prefixes,
    }))
}

/// Parses an MP_UNREACH_NLRI body: AFI, SAFI, withdrawn prefix list.
pub fn parse_mp_unreach(mut input: Bytes) -> Result<AttributeValue, BgpError> {
    let truncated = || BgpError::update(UpdateSubcode::AttributeLengthError);

    let afi = input.read_u16().map_err(|_| truncated())?;
    let safi = input.read_u8().map_err(|_| truncated())?;

    if (afi, safi) != (Afi::Ipv6 as u16, Safi::Unicast as u8) {
        return Ok(AttributeValue::MpUnreachNlri(MpUnreachNlri::Opaque {
            afi,
            safi,
            value: input.to_vec(),
        }));
    }

    let prefixes = input.read_v6_nlri_list().map_err(map_prefix_err)?;
    Ok(AttributeValue::MpUnreachNlri(MpUnreachNlri::Ipv6Unicast {
        prefixes,
    }))
}

pub fn encode_mp_reach(nlri: &MpReachNlri) -> Bytes {
    let mut bytes = BytesMut::new();
    match nlri {
        MpReachNlri::Ipv6Unicast { next_hop, prefixes } => {
            bytes.put_u16(Afi::Ipv6 as u16);
            bytes.put_u8(Safi::Unicast as u8);
            bytes.put_u8(next_hop.wire_len());
            bytes.put_slice(&next_hop.global().octets());
            if let Some(ll) = next_hop.link_local() {
                bytes.put_slice(&ll.octets());
            }
            bytes.put_u8(0); // reserved
            for prefix in prefixes {
                bytes.put_slice(&prefix.encode_nlri());
            }
        }
        MpReachNlri::Opaque { afi, safi, value } => {
            bytes.put_u16(*afi);
            bytes.put_u8(*safi);
            bytes.put_slice(value);
        }
    }
    bytes.freeze()
}

pub fn encode_mp_unreach(nlri: &MpUnreachNlri) -> Bytes {
    let mut bytes = BytesMut::new();
    match nlri {
        MpUnreachNlri::Ipv6Unicast { prefixes } => {
            bytes.put_u16(Afi::Ipv6 as u16);
            bytes.put_u8(Safi::Unicast as u8);
            for prefix in prefixes {
                bytes.put_slice(&prefix.encode_nlri());
            }
        }
        MpUnreachNlri::Opaque { afi, safi, value } => {
            bytes.put_u16(*afi);
            bytes.put_u8(*safi);
            bytes.put_slice(value);
        }
    }
    bytes.freeze()
}
