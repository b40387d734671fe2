mod attr_01_origin;
mod attr_02_17_as_path;
mod attr_03_next_hop;
mod attr_04_med;
mod attr_05_local_pref;
mod attr_07_18_aggregator;
mod attr_08_communities;
mod attr_14_15_nlri;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::debug;

use crate::error::{BgpError, UpdateSubcode};
use crate::models::*;
use crate::parser::bgp::attributes::attr_01_origin::{encode_origin, parse_origin};
use crate::parser::bgp::attributes::attr_02_17_as_path::{encode_as_path, parse_as_path};
use crate::parser::bgp::attributes::attr_03_next_hop::{encode_next_hop, parse_next_hop};
use crate::parser::bgp::attributes::attr_04_med::{encode_med, parse_med};
use crate::parser::bgp::attributes::attr_05_local_pref::{encode_local_pref, parse_local_pref};
use crate::parser::bgp::attributes::attr_07_18_aggregator::{
    encode_aggregator, parse_aggregator,
};
use crate::parser::bgp::attributes::attr_08_communities::{
    encode_communities, parse_communities,
};
use crate::parser::bgp::attributes::attr_14_15_nlri::{
    encode_mp_reach, encode_mp_unreach, parse_mp_reach, parse_mp_unreach,
};
use crate::parser::ReadUtils;

/// Checks the attribute flag octet against RFC 4271 §4.3 / §6.3:
/// well-known attributes must be transitive, and the partial bit must be
/// clear on well-known and optional non-transitive attributes.
fn validate_attribute_flags(
    attr_type: AttrType,
    flags: AttrFlags,
    header: &[u8],
) -> Result<(), BgpError> {
    let expected = match attr_type {
        AttrType::ORIGIN
        | AttrType::AS_PATH
        | AttrType::NEXT_HOP
        | AttrType::LOCAL_PREFERENCE
        | AttrType::ATOMIC_AGGREGATE => AttrFlags::TRANSITIVE,
        AttrType::MULTI_EXIT_DISCRIMINATOR
        | AttrType::MP_REACHABLE_NLRI
        | AttrType::MP_UNREACHABLE_NLRI => AttrFlags::OPTIONAL,
        AttrType::AGGREGATOR
        | AttrType::COMMUNITIES
        | AttrType::AS4_PATH
        | AttrType::AS4_AGGREGATOR => AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
        AttrType::Unknown(code) => {
            if !flags.contains(AttrFlags::OPTIONAL) {
                // a well-known attribute we do not recognize
                return Err(BgpError::update_with_data(
                    UpdateSubcode::UnrecognizedWellKnownAttribute,
                    vec![code],
                ));
            }
            if !flags.contains(AttrFlags::TRANSITIVE) && flags.contains(AttrFlags::PARTIAL) {
                return Err(BgpError::update_with_data(
                    UpdateSubcode::AttributeFlagsError,
                    header.to_vec(),
                ));
            }
            return Ok(());
        }
    };

    let relevant = flags & (AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE);
    if relevant != expected {
        return Err(BgpError::update_with_data(
            UpdateSubcode::AttributeFlagsError,
            header.to_vec(),
        ));
    }

    // partial must be clear unless the attribute is optional transitive
    if flags.contains(AttrFlags::PARTIAL) && expected != (AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE)
    {
        return Err(BgpError::update_with_data(
            UpdateSubcode::AttributeFlagsError,
            header.to_vec(),
        ));
    }

    Ok(())
}

/// Parses the path-attributes section of an UPDATE. `data` must span the
/// entire section; `asn_len` is the ASN width negotiated at OPEN.
pub fn parse_attributes(mut data: Bytes, asn_len: AsnLength) -> Result<Attributes, BgpError> {
    let mut attributes: Vec<Attribute> = Vec::with_capacity(8);
    // duplicate detection per type code, small dataset in a hot loop
    let mut seen_attributes = [false; 256];

    while data.remaining() > 0 {
        // flag(1) + type(1) + length(1 or 2)
        data.has_n_remaining(3)
            .map_err(|_| BgpError::update(UpdateSubcode::MalformedAttributeList))?;
        let flag_raw = data.get_u8();
        let flag = AttrFlags::from_bits_retain(flag_raw);
        let type_raw = data.get_u8();
        let attr_length = if flag.contains(AttrFlags::EXTENDED) {
            data.read_u16()
                .map_err(|_| BgpError::update(UpdateSubcode::MalformedAttributeList))?
                as usize
        } else {
            data.get_u8() as usize
        };

        let attr_type = AttrType::from(type_raw);
        debug!(
            "reading attribute: type -- {:?}, length -- {}",
            attr_type, attr_length
        );

        if seen_attributes[type_raw as usize] {
            return Err(BgpError::update_with_data(
                UpdateSubcode::MalformedAttributeList,
                vec![type_raw],
            ));
        }
        seen_attributes[type_raw as usize] = true;

        // the offending attribute header, in its wire form, for error data
        let mut header = vec![flag_raw, type_raw];
        if flag.contains(AttrFlags::EXTENDED) {
            header.extend_from_slice(&(attr_length as u16).to_be_bytes());
        } else {
            header.push(attr_length as u8);
        }
        validate_attribute_flags(attr_type, flag, &header)?;

        if data.remaining() < attr_length {
            return Err(BgpError::update(UpdateSubcode::AttributeLengthError));
        }
        let attr_data = data.split_to(attr_length);

        let value = match attr_type {
            AttrType::ORIGIN => parse_origin(attr_data)?,
            AttrType::AS_PATH => AttributeValue::AsPath {
                path: parse_as_path(attr_data, asn_len)?,
                is_as4: false,
            },
            AttrType::NEXT_HOP => parse_next_hop(attr_data)?,
            AttrType::MULTI_EXIT_DISCRIMINATOR => parse_med(attr_data)?,
            AttrType::LOCAL_PREFERENCE => parse_local_pref(attr_data)?,
            AttrType::ATOMIC_AGGREGATE => {
                if attr_length != 0 {
                    return Err(BgpError::update(UpdateSubcode::AttributeLengthError));
                }
                AttributeValue::AtomicAggregate
            }
            AttrType::AGGREGATOR => {
                let (asn, id) = parse_aggregator(attr_data, asn_len)?;
                AttributeValue::Aggregator {
                    asn,
                    id,
                    is_as4: false,
                }
            }
            AttrType::COMMUNITIES => parse_communities(attr_data)?,
            AttrType::MP_REACHABLE_NLRI => parse_mp_reach(attr_data)?,
            AttrType::MP_UNREACHABLE_NLRI => parse_mp_unreach(attr_data)?,
            AttrType::AS4_PATH => AttributeValue::AsPath {
                path: parse_as_path(attr_data, AsnLength::Bits32)?,
                is_as4: true,
            },
            AttrType::AS4_AGGREGATOR => {
                let (asn, id) = parse_aggregator(attr_data, AsnLength::Bits32)?;
                AttributeValue::Aggregator {
                    asn,
                    id,
                    is_as4: true,
                }
            }
            AttrType::Unknown(_) => AttributeValue::Unknown(AttrRaw {
                attr_type,
                bytes: attr_data.to_vec(),
            }),
        };

        attributes.push(Attribute { value, flag });
    }

    Ok(Attributes::from(attributes))
}

impl Attribute {
    /// Encodes flag octet, type octet, length, and body. The extended-length
    /// bit is honored when set on the flag, and forced when the body does
    /// not fit a one-octet length.
    pub fn encode(&self, asn_len: AsnLength) -> Bytes {
        let value_bytes = match &self.value {
            AttributeValue::Origin(v) => encode_origin(v),
            AttributeValue::AsPath { path, is_as4 } => {
                let width = if *is_as4 { AsnLength::Bits32 } else { asn_len };
                encode_as_path(path, width)
            }
            AttributeValue::NextHop(v) => encode_next_hop(v),
            AttributeValue::MultiExitDiscriminator(v) => encode_med(*v),
            AttributeValue::LocalPreference(v) => encode_local_pref(*v),
            AttributeValue::AtomicAggregate => Bytes::default(),
            AttributeValue::Aggregator { asn, id, is_as4 } => {
                let width = if *is_as4 { AsnLength::Bits32 } else { asn_len };
                encode_aggregator(asn, id, width)
            }
            AttributeValue::Communities(v) => encode_communities(v),
            AttributeValue::MpReachNlri(v) => encode_mp_reach(v),
            AttributeValue::MpUnreachNlri(v) => encode_mp_unreach(v),
            AttributeValue::Unknown(v) => Bytes::from(v.bytes.clone()),
        };

        let mut flag = self.flag;
        if value_bytes.len() > u8::MAX as usize {
            flag |= AttrFlags::EXTENDED;
        }

        let mut bytes = BytesMut::with_capacity(4 + value_bytes.len());
        bytes.put_u8(flag.bits());
        bytes.put_u8(self.value.attr_type().into());
        if flag.contains(AttrFlags::EXTENDED) {
            bytes.put_u16(value_bytes.len() as u16);
        } else {
            bytes.put_u8(value_bytes.len() as u8);
        }
        bytes.extend(value_bytes);
        bytes.freeze()
    }
}

impl Attributes {
    /// Encodes the whole path-attributes section.
    pub fn encode(&self, asn_len: AsnLength) -> Bytes {
        let mut bytes = BytesMut::new();
        for attr in self.iter() {
            bytes.extend(attr.encode(asn_len));
        }
        bytes.freeze()
    }
}
