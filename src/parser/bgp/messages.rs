/*!
BGP message body codecs and packet framing.

Every message starts with the 19-octet header:

```text
0                   1                   2                   3
0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
|                                                               |
+                                                               +
|                                                               |
+                                                               +
|                           Marker                              |
+                                                               +
|                                                               |
+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
|          Length               |      Type     |
+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
```

Splitting a byte stream into framed messages is the job of
[`MessageSink`](crate::session::MessageSink); the codecs here turn message
bodies into typed [`BgpMessage`]s and back.
*/
use crate::error::{BgpError, BgpErrorCode, EncodeError, HeaderSubcode, UpdateSubcode};
use crate::models::*;
use crate::parser::bgp::attributes::parse_attributes;
use crate::parser::{ReadError, ReadUtils};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// All-ones synchronization marker.
pub const BGP_MARKER: [u8; 16] = [0xff; 16];
/// Smallest legal message: bare header.
pub const BGP_MIN_MESSAGE_SIZE: usize = 19;
/// Largest legal message (RFC 4271 §4.1).
pub const BGP_MAX_MESSAGE_SIZE: usize = 4096;

/// Parses a message body (header already stripped) of the given type.
pub fn parse_message_body(
    msg_type: BgpMessageType,
    body: Bytes,
    asn_len: AsnLength,
) -> Result<BgpMessage, BgpError> {
    match msg_type {
        BgpMessageType::Open => Ok(BgpMessage::Open(parse_open_body(body)?)),
        BgpMessageType::Update => Ok(BgpMessage::Update(parse_update_body(body, asn_len)?)),
        BgpMessageType::Notification => {
            Ok(BgpMessage::Notification(parse_notification_body(body)?))
        }
        BgpMessageType::KeepAlive => {
            if body.has_remaining() {
                // KEEPALIVE is header-only
                return Err(BgpError::header(HeaderSubcode::BadMessageLength));
            }
            Ok(BgpMessage::KeepAlive)
        }
    }
}

fn open_unspec() -> BgpError {
    BgpError::new(BgpErrorCode::Open, 0, Vec::new())
}

fn parse_open_body(mut input: Bytes) -> Result<BgpOpenMessage, BgpError> {
    let version = input.read_u8().map_err(|_| open_unspec())?;
    let asn = input.read_u16().map_err(|_| open_unspec())?;
    let hold_time = input.read_u16().map_err(|_| open_unspec())?;
    let bgp_id = input.read_ipv4_address().map_err(|_| open_unspec())?;
    let opt_params_len = input.read_u8().map_err(|_| open_unspec())? as usize;

    if input.remaining() != opt_params_len {
        return Err(open_unspec());
    }

    let mut opt_params = Vec::new();
    while input.remaining() > 0 {
        let param_type = input.read_u8().map_err(|_| open_unspec())?;
        let param_len = input.read_u8().map_err(|_| open_unspec())? as usize;
        input.has_n_remaining(param_len).map_err(|_| open_unspec())?;
        let value = input.split_to(param_len);

        match param_type {
            2 => opt_params.push(OptParam::Capabilities(parse_capabilities(value)?)),
            _ => opt_params.push(OptParam::Raw {
                param_type,
                value: value.to_vec(),
            }),
        }
    }

    Ok(BgpOpenMessage {
        version,
        asn,
        hold_time,
        bgp_id,
        opt_params,
    })
}

fn parse_capabilities(mut input: Bytes) -> Result<Vec<Capability>, BgpError> {
    let mut caps = Vec::new();
    while input.remaining() > 0 {
        let code = input.read_u8().map_err(|_| open_unspec())?;
        let len = input.read_u8().map_err(|_| open_unspec())? as usize;
        input.has_n_remaining(len).map_err(|_| open_unspec())?;
        let mut value = input.split_to(len);

        let cap = match BgpCapabilityType::from(code) {
            BgpCapabilityType::SUPPORT_FOR_4_OCTET_AS_NUMBER_CAPABILITY => {
                if len != 4 {
                    return Err(open_unspec());
                }
                Capability::FourOctetAs(Asn::new_32bit(value.read_u32().unwrap()))
            }
            BgpCapabilityType::MULTIPROTOCOL_EXTENSIONS_FOR_BGP_4 => {
                if len != 4 {
                    return Err(open_unspec());
                }
                let afi = value.read_u16().unwrap();
                let _reserved = value.read_u8().unwrap();
                let safi = value.read_u8().unwrap();
                Capability::Multiprotocol { afi, safi }
            }
            BgpCapabilityType::Unknown(code) => Capability::Unknown {
                code,
                value: value.to_vec(),
            },
        };
        caps.push(cap);
    }
    Ok(caps)
}

fn map_v4_nlri_err(err: ReadError) -> BgpError {
    match err {
        ReadError::Truncated => BgpError::update(UpdateSubcode::MalformedAttributeList),
        ReadError::InvalidPrefixLength(len) => {
            BgpError::update_with_data(UpdateSubcode::InvalidNetworkField, vec![len])
        }
    }
}

fn parse_update_body(mut input: Bytes, asn_len: AsnLength) -> Result<BgpUpdateMessage, BgpError> {
    let list_err = || BgpError::update(UpdateSubcode::MalformedAttributeList);

    let withdrawn_len = input.read_u16().map_err(|_| list_err())? as usize;
    input.has_n_remaining(withdrawn_len).map_err(|_| list_err())?;
    let mut withdrawn_bytes = input.split_to(withdrawn_len);
    let withdrawn = withdrawn_bytes
        .read_v4_nlri_list()
        .map_err(map_v4_nlri_err)?;

    let attr_len = input.read_u16().map_err(|_| list_err())? as usize;
    input.has_n_remaining(attr_len).map_err(|_| list_err())?;
    let attr_bytes = input.split_to(attr_len);
    let attributes = parse_attributes(attr_bytes, asn_len)?;

    let announced = input.read_v4_nlri_list().map_err(map_v4_nlri_err)?;

    Ok(BgpUpdateMessage {
        withdrawn,
        attributes,
        announced,
    })
}

fn parse_notification_body(mut input: Bytes) -> Result<BgpNotificationMessage, BgpError> {
    let bad_len = || BgpError::header(HeaderSubcode::BadMessageLength);
    let code = BgpErrorCode::from(input.read_u8().map_err(|_| bad_len())?);
    let subcode = input.read_u8().map_err(|_| bad_len())?;
    let data = input.to_vec();
    Ok(BgpNotificationMessage {
        error: BgpError::new(code, subcode, data),
    })
}

impl BgpOpenMessage {
    pub fn encode_body(&self) -> Bytes {
        let mut params = BytesMut::new();
        for param in &self.opt_params {
            match param {
                OptParam::Capabilities(caps) => {
                    let mut caps_bytes = BytesMut::new();
                    for cap in caps {
                        let value = encode_capability_value(cap);
                        caps_bytes.put_u8(cap.code());
                        caps_bytes.put_u8(value.len() as u8);
                        caps_bytes.extend(value);
                    }
                    params.put_u8(2);
                    params.put_u8(caps_bytes.len() as u8);
                    params.extend(caps_bytes);
                }
                OptParam::Raw { param_type, value } => {
                    params.put_u8(*param_type);
                    params.put_u8(value.len() as u8);
                    params.put_slice(value);
                }
            }
        }

        let mut bytes = BytesMut::with_capacity(10 + params.len());
        bytes.put_u8(self.version);
        bytes.put_u16(self.asn);
        bytes.put_u16(self.hold_time);
        bytes.put_slice(&self.bgp_id.octets());
        bytes.put_u8(params.len() as u8);
        bytes.extend(params);
        bytes.freeze()
    }
}

fn encode_capability_value(cap: &Capability) -> Bytes {
    let mut bytes = BytesMut::new();
    match cap {
        Capability::Multiprotocol { afi, safi } => {
            bytes.put_u16(*afi);
            bytes.put_u8(0); // reserved
            bytes.put_u8(*safi);
        }
        Capability::FourOctetAs(asn) => bytes.put_u32(asn.to_u32()),
        Capability::Unknown { value, .. } => bytes.put_slice(value),
    }
    bytes.freeze()
}

impl BgpUpdateMessage {
    pub fn encode_body(&self, asn_len: AsnLength) -> Bytes {
        let mut withdrawn = BytesMut::new();
        for prefix in &self.withdrawn {
            withdrawn.put_slice(&prefix.encode_nlri());
        }

        let attrs = self.attributes.encode(asn_len);

        let mut bytes = BytesMut::new();
        bytes.put_u16(withdrawn.len() as u16);
        bytes.extend(withdrawn);
        bytes.put_u16(attrs.len() as u16);
        bytes.extend(attrs);
        for prefix in &self.announced {
            bytes.put_slice(&prefix.encode_nlri());
        }
        bytes.freeze()
    }
}

impl BgpNotificationMessage {
    pub fn encode_body(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(2 + self.error.data.len());
        bytes.put_u8(self.error.code.into());
        bytes.put_u8(self.error.subcode);
        bytes.put_slice(&self.error.data);
        bytes.freeze()
    }
}

/// Encodes a complete framed message: marker, length, type, body.
pub fn encode_message(msg: &BgpMessage, asn_len: AsnLength) -> Result<Bytes, EncodeError> {
    let body = match msg {
        BgpMessage::Open(open) => open.encode_body(),
        BgpMessage::Update(update) => update.encode_body(asn_len),
        BgpMessage::Notification(notification) => notification.encode_body(),
        BgpMessage::KeepAlive => Bytes::new(),
    };

    let total = BGP_MIN_MESSAGE_SIZE + body.len();
    if total > BGP_MAX_MESSAGE_SIZE {
        return Err(EncodeError::MessageTooLong(total));
    }

    let mut bytes = BytesMut::with_capacity(total);
    bytes.put_slice(&BGP_MARKER);
    bytes.put_u16(total as u16);
    bytes.put_u8(msg.msg_type().into());
    bytes.extend(body);
    Ok(bytes.freeze())
}
