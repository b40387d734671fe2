use crate::error::{BgpError, UpdateSubcode};
use crate::models::*;
use crate::parser::ReadUtils;
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub fn parse_origin(mut input: Bytes) -> Result<AttributeValue, BgpError> {
    if input.remaining() != 1 {
        return Err(BgpError::update(UpdateSubcode::AttributeLengthError));
    }
    let value = input.read_u8().unwrap();
    match Origin::try_from(value) {
        Ok(origin) => Ok(AttributeValue::Origin(origin)),
        Err(_) => Err(BgpError::update_with_data(
            UpdateSubcode::InvalidOrigin,
            vec![value],
        )),
    }
}

pub fn encode_origin(origin: &Origin) -> Bytes {
    let mut bytes = BytesMut::with_capacity(1);
    bytes.put_u8((*origin).into());
    bytes.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ```text
    /// ORIGIN is a well-known mandatory attribute that defines the
    ///        origin of the path information.  The data octet can assume
    ///        the following values:
    ///
    ///           Value      Meaning
    ///           0         IGP
    ///           1         EGP
    ///           2         INCOMPLETE
    /// ```
    #[test]
    fn test_parse_origin() {
        assert_eq!(
            parse_origin(Bytes::from_static(&[0])).unwrap(),
            AttributeValue::Origin(Origin::IGP)
        );
        assert_eq!(
            parse_origin(Bytes::from_static(&[1])).unwrap(),
            AttributeValue::Origin(Origin::EGP)
        );
        assert_eq!(
            parse_origin(Bytes::from_static(&[2])).unwrap(),
            AttributeValue::Origin(Origin::INCOMPLETE)
        );

        let err = parse_origin(Bytes::from_static(&[3])).unwrap_err();
        assert_eq!(err.subcode, u8::from(UpdateSubcode::InvalidOrigin));
        assert_eq!(err.data, vec![3]);

        let err = parse_origin(Bytes::from_static(&[0, 0])).unwrap_err();
        assert_eq!(err.subcode, u8::from(UpdateSubcode::AttributeLengthError));
    }

    #[test]
    fn test_encode_origin() {
        assert_eq!(encode_origin(&Origin::EGP).as_ref(), &[1]);
    }
}
