use crate::error::{BgpError, UpdateSubcode};
use crate::models::*;
use crate::parser::ReadUtils;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::Ipv4Addr;

/// Parses an AGGREGATOR (or AS4_AGGREGATOR) body: an ASN followed by the
/// aggregating speaker's identifier. Length is 6 or 8 depending on the ASN
/// width in effect.
pub fn parse_aggregator(
    mut input: Bytes,
    asn_len: AsnLength,
) -> Result<(Asn, Ipv4Addr), BgpError> {
    let expected = match asn_len {
        AsnLength::Bits16 => 6,
        AsnLength::Bits32 => 8,
    };
    if input.remaining() != expected {
        return Err(BgpError::update(UpdateSubcode::AttributeLengthError));
    }

    let asn = match asn_len {
        AsnLength::Bits16 => Asn::new_16bit(input.read_u16().unwrap()),
        AsnLength::Bits32 => Asn::new_32bit(input.read_u32().unwrap()),
    };
    let id = input.read_ipv4_address().unwrap();
    Ok((asn, id))
}

pub fn encode_aggregator(asn: &Asn, id: &Ipv4Addr, asn_len: AsnLength) -> Bytes {
    let mut bytes = BytesMut::new();
    match asn_len {
        AsnLength::Bits16 => bytes.put_u16(asn.to_u32() as u16),
        AsnLength::Bits32 => bytes.put_u32(asn.to_u32()),
    }
    bytes.put_slice(&id.octets());
    bytes.freeze()
}
