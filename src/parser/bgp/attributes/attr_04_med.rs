use crate::error::{BgpError, UpdateSubcode};
use crate::models::*;
use crate::parser::ReadUtils;
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub fn parse_med(mut input: Bytes) -> Result<AttributeValue, BgpError> {
    if input.remaining() != 4 {
        return Err(BgpError::update(UpdateSubcode::AttributeLengthError));
    }
    Ok(AttributeValue::MultiExitDiscriminator(
        input.read_u32().unwrap(),
    ))
}

pub fn encode_med(med: u32) -> Bytes {
    let mut bytes = BytesMut::with_capacity(4);
    bytes.put_u32(med);
    bytes.freeze()
}
