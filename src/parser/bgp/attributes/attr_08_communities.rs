use crate::error::{BgpError, UpdateSubcode};
use crate::models::*;
use crate::parser::ReadUtils;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Parses a COMMUNITIES body: any multiple of four octets (RFC 1997), each
/// four-octet group one opaque tag.
pub fn parse_communities(mut input: Bytes) -> Result<AttributeValue, BgpError> {
    if input.remaining() % 4 != 0 {
        return Err(BgpError::update(UpdateSubcode::AttributeLengthError));
    }
    let mut communities = Vec::with_capacity(input.remaining() / 4);
    while input.remaining() > 0 {
        communities.push(Community(input.read_u32().unwrap()));
    }
    Ok(AttributeValue::Communities(communities))
}

pub fn encode_communities(communities: &[Community]) -> Bytes {
    let mut bytes = BytesMut::with_capacity(communities.len() * 4);
    for community in communities {
        bytes.put_u32(community.0);
    }
    bytes.freeze()
}
