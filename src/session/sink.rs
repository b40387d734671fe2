/*!
The byte sink: reassembles the peer's TCP byte stream into framed BGP
messages.

Bytes go in with [`MessageSink::fill`] in whatever chunking the transport
produced; [`MessageSink::pour`] yields one typed message at a time once a
complete frame is buffered. A marker or length violation desynchronizes
the sink permanently (there is no way to find the next frame boundary);
the error is sticky until [`MessageSink::drain`].
*/
use crate::error::{BgpError, HeaderSubcode};
use crate::models::{AsnLength, BgpMessage, BgpMessageType};
use crate::parser::bgp::messages::{
    parse_message_body, BGP_MARKER, BGP_MAX_MESSAGE_SIZE, BGP_MIN_MESSAGE_SIZE,
};
use bytes::{Buf, BytesMut};
use log::error;

/// Default sink capacity, enough for a burst of maximum-size messages.
pub const DEFAULT_SINK_SIZE: usize = 65536;

/// A pour that failed. `msg_type` is present when the frame header was
/// intact and only the body failed to parse; header-level failures leave
/// it `None` and stick until the sink is drained.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SinkError {
    pub msg_type: Option<BgpMessageType>,
    pub error: BgpError,
}

/// Sink overflow: the transport outran the consumer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SinkFull {
    pub needed: usize,
    pub capacity: usize,
}

pub struct MessageSink {
    buffer: BytesMut,
    capacity: usize,
    desynced: bool,
}

impl MessageSink {
    pub fn new(capacity: usize) -> Self {
        MessageSink {
            buffer: BytesMut::with_capacity(capacity.min(DEFAULT_SINK_SIZE)),
            capacity,
            desynced: false,
        }
    }

    /// Appends transport bytes to the sink.
    pub fn fill(&mut self, data: &[u8]) -> Result<(), SinkFull> {
        if self.buffer.len() + data.len() > self.capacity {
            error!(
                "sink overflow: {} buffered + {} incoming > {} capacity",
                self.buffer.len(),
                data.len(),
                self.capacity
            );
            return Err(SinkFull {
                needed: self.buffer.len() + data.len(),
                capacity: self.capacity,
            });
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Extracts the next complete message. `four_byte` is the negotiated
    /// ASN width applied to AS_PATH parsing.
    ///
    /// Returns `Ok(None)` when no complete frame is buffered yet.
    pub fn pour(&mut self, four_byte: bool) -> Result<Option<BgpMessage>, SinkError> {
        if self.desynced {
            return Err(SinkError {
                msg_type: None,
                error: BgpError::header(HeaderSubcode::ConnectionNotSynchronized),
            });
        }

        if self.buffer.len() < BGP_MIN_MESSAGE_SIZE {
            return Ok(None);
        }

        if self.buffer[0..16] != BGP_MARKER {
            error!("invalid BGP marker, sink desynchronized");
            self.desynced = true;
            return Err(SinkError {
                msg_type: None,
                error: BgpError::header(HeaderSubcode::ConnectionNotSynchronized),
            });
        }

        let length = u16::from_be_bytes([self.buffer[16], self.buffer[17]]) as usize;
        if !(BGP_MIN_MESSAGE_SIZE..=BGP_MAX_MESSAGE_SIZE).contains(&length) {
            error!("invalid BGP message length {length}, sink desynchronized");
            self.desynced = true;
            return Err(SinkError {
                msg_type: None,
                error: BgpError::new(
                    crate::error::BgpErrorCode::Header,
                    HeaderSubcode::BadMessageLength.into(),
                    vec![self.buffer[16], self.buffer[17]],
                ),
            });
        }

        if self.buffer.len() < length {
            // incomplete message, wait for more
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(length).freeze();
        frame.advance(18); // marker + length already validated
        let type_raw = frame.get_u8();
        let msg_type = match BgpMessageType::try_from(type_raw) {
            Ok(t) => t,
            Err(_) => {
                return Err(SinkError {
                    msg_type: None,
                    error: BgpError::new(
                        crate::error::BgpErrorCode::Header,
                        HeaderSubcode::BadMessageType.into(),
                        vec![type_raw],
                    ),
                })
            }
        };

        let asn_len = if four_byte {
            AsnLength::Bits32
        } else {
            AsnLength::Bits16
        };
        match parse_message_body(msg_type, frame, asn_len) {
            Ok(msg) => Ok(Some(msg)),
            Err(error) => Err(SinkError {
                msg_type: Some(msg_type),
                error,
            }),
        }
    }

    /// Discards everything buffered and clears a desync.
    pub fn drain(&mut self) {
        self.buffer.clear();
        self.desynced = false;
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for MessageSink {
    fn default() -> Self {
        MessageSink::new(DEFAULT_SINK_SIZE)
    }
}
