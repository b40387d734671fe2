use crate::error::{BgpError, UpdateSubcode};
use crate::models::*;
use crate::parser::ReadUtils;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::Ipv4Addr;

pub fn parse_next_hop(mut input: Bytes) -> Result<AttributeValue, BgpError> {
    if input.remaining() != 4 {
        return Err(BgpError::update(UpdateSubcode::AttributeLengthError));
    }
    Ok(AttributeValue::NextHop(input.read_ipv4_address().unwrap()))
}

pub fn encode_next_hop(addr: &Ipv4Addr) -> Bytes {
    let mut bytes = BytesMut::with_capacity(4);
    bytes.put_slice(&addr.octets());
    bytes.freeze()
}
