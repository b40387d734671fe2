use crate::error::{BgpError, UpdateSubcode};
use crate::models::*;
use crate::parser::ReadUtils;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use smallvec::SmallVec;

/// Parses an AS_PATH (or AS4_PATH) body. `asn_len` is the negotiated ASN
/// width for AS_PATH; AS4_PATH callers pass [`AsnLength::Bits32`].
pub fn parse_as_path(mut input: Bytes, asn_len: AsnLength) -> Result<AsPath, BgpError> {
    let mut segments = Vec::with_capacity(1);
    while input.remaining() > 0 {
        segments.push(parse_as_path_segment(&mut input, asn_len)?);
    }
    Ok(AsPath { segments })
}

fn parse_as_path_segment(
    input: &mut Bytes,
    asn_len: AsnLength,
) -> Result<AsPathSegment, BgpError> {
    let malformed = || BgpError::update(UpdateSubcode::MalformedAsPath);

    let seg_type_raw = input.read_u8().map_err(|_| malformed())?;
    let seg_type = AsSegmentType::try_from(seg_type_raw).map_err(|_| malformed())?;
    let count = input.read_u8().map_err(|_| malformed())? as usize;

    let mut asns: SmallVec<[Asn; 8]> = SmallVec::with_capacity(count);
    for _ in 0..count {
        let asn = match asn_len {
            AsnLength::Bits16 => Asn::new_16bit(input.read_u16().map_err(|_| malformed())?),
            AsnLength::Bits32 => Asn::new_32bit(input.read_u32().map_err(|_| malformed())?),
        };
        asns.push(asn);
    }

    Ok(AsPathSegment { seg_type, asns })
}

pub fn encode_as_path(path: &AsPath, asn_len: AsnLength) -> Bytes {
    let mut bytes = BytesMut::new();
    for seg in &path.segments {
        bytes.put_u8(seg.seg_type.into());
        bytes.put_u8(seg.asns.len() as u8);
        for asn in &seg.asns {
            match asn_len {
                AsnLength::Bits16 => bytes.put_u16(asn.to_u32() as u16),
                AsnLength::Bits32 => bytes.put_u32(asn.to_u32()),
            }
        }
    }
    bytes.freeze()
}
