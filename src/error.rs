/*!
Protocol error codes and the error types used across the crate.

Every error a BGP peer can observe maps onto a NOTIFICATION payload, so the
central type here is [`BgpError`]: an RFC 4271 §6 `(code, subcode, data)`
triple. Parsers return `Result<T, BgpError>` and the session layer forwards
the triple verbatim when synthesizing a NOTIFICATION.
*/
use num_enum::{FromPrimitive, IntoPrimitive};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Top-level NOTIFICATION error codes (RFC 4271 §4.5).
#[derive(Debug, FromPrimitive, IntoPrimitive, PartialEq, Eq, Hash, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum BgpErrorCode {
    Reserved = 0,
    Header = 1,
    Open = 2,
    Update = 3,
    HoldTimerExpired = 4,
    Fsm = 5,
    Cease = 6,
    #[num_enum(catch_all)]
    Unknown(u8),
}

/// Message header error subcodes.
#[derive(Debug, IntoPrimitive, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum HeaderSubcode {
    ConnectionNotSynchronized = 1,
    BadMessageLength = 2,
    BadMessageType = 3,
}

/// OPEN message error subcodes.
#[derive(Debug, IntoPrimitive, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum OpenSubcode {
    UnsupportedVersionNumber = 1,
    BadPeerAs = 2,
    BadBgpIdentifier = 3,
    UnsupportedOptionalParameter = 4,
    UnacceptableHoldTime = 6,
    UnsupportedCapability = 7,
}

/// UPDATE message error subcodes.
#[derive(Debug, IntoPrimitive, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum UpdateSubcode {
    MalformedAttributeList = 1,
    UnrecognizedWellKnownAttribute = 2,
    MissingWellKnownAttribute = 3,
    AttributeFlagsError = 4,
    AttributeLengthError = 5,
    InvalidOrigin = 6,
    InvalidNextHop = 8,
    OptionalAttributeError = 9,
    InvalidNetworkField = 10,
    MalformedAsPath = 11,
}

/// FSM error subcodes (RFC 6608).
#[derive(Debug, IntoPrimitive, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum FsmSubcode {
    UnexpectedInOpenSent = 1,
    UnexpectedInOpenConfirm = 2,
    UnexpectedInEstablished = 3,
}

/// Cease subcodes (RFC 4486).
#[derive(Debug, IntoPrimitive, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum CeaseSubcode {
    MaximumPrefixesReached = 1,
    AdministrativeShutdown = 2,
    PeerDeconfigured = 3,
    AdministrativeReset = 4,
    ConnectionRejected = 5,
    OtherConfigurationChange = 6,
    ConnectionCollisionResolution = 7,
    OutOfResources = 8,
}

/// A wire-observable protocol error: the `(code, subcode, data)` triple
/// carried by a NOTIFICATION message.
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BgpError {
    pub code: BgpErrorCode,
    pub subcode: u8,
    pub data: Vec<u8>,
}

impl BgpError {
    pub fn new(code: BgpErrorCode, subcode: u8, data: Vec<u8>) -> Self {
        BgpError {
            code,
            subcode,
            data,
        }
    }

    pub fn header(subcode: HeaderSubcode) -> Self {
        Self::new(BgpErrorCode::Header, subcode.into(), Vec::new())
    }

    pub fn open(subcode: OpenSubcode) -> Self {
        Self::new(BgpErrorCode::Open, subcode.into(), Vec::new())
    }

    pub fn update(subcode: UpdateSubcode) -> Self {
        Self::new(BgpErrorCode::Update, subcode.into(), Vec::new())
    }

    /// Update error with the offending attribute header attached as data.
    pub fn update_with_data(subcode: UpdateSubcode, data: Vec<u8>) -> Self {
        Self::new(BgpErrorCode::Update, subcode.into(), data)
    }

    pub fn hold_timer_expired() -> Self {
        Self::new(BgpErrorCode::HoldTimerExpired, 0, Vec::new())
    }

    pub fn fsm(subcode: FsmSubcode) -> Self {
        Self::new(BgpErrorCode::Fsm, subcode.into(), Vec::new())
    }

    pub fn cease(subcode: CeaseSubcode) -> Self {
        Self::new(BgpErrorCode::Cease, subcode.into(), Vec::new())
    }

    fn code_str(&self) -> &'static str {
        match self.code {
            BgpErrorCode::Reserved => "Unspecific",
            BgpErrorCode::Header => "Message Header Error",
            BgpErrorCode::Open => "OPEN Message Error",
            BgpErrorCode::Update => "UPDATE Message Error",
            BgpErrorCode::HoldTimerExpired => "Hold Timer Expired",
            BgpErrorCode::Fsm => "Finite State Machine Error",
            BgpErrorCode::Cease => "Cease",
            BgpErrorCode::Unknown(_) => "Unknown",
        }
    }

    fn subcode_str(&self) -> &'static str {
        match (self.code, self.subcode) {
            (BgpErrorCode::Header, 1) => "Connection Not Synchronized",
            (BgpErrorCode::Header, 2) => "Bad Message Length",
            (BgpErrorCode::Header, 3) => "Bad Message Type",
            (BgpErrorCode::Open, 1) => "Unsupported Version Number",
            (BgpErrorCode::Open, 2) => "Bad Peer AS",
            (BgpErrorCode::Open, 3) => "Bad BGP Identifier",
            (BgpErrorCode::Open, 4) => "Unsupported Optional Parameter",
            (BgpErrorCode::Open, 6) => "Unacceptable Hold Time",
            (BgpErrorCode::Open, 7) => "Unsupported Capability",
            (BgpErrorCode::Update, 1) => "Malformed Attribute List",
            (BgpErrorCode::Update, 2) => "Unrecognized Well-known Attribute",
            (BgpErrorCode::Update, 3) => "Missing Well-known Attribute",
            (BgpErrorCode::Update, 4) => "Attribute Flags Error",
            (BgpErrorCode::Update, 5) => "Attribute Length Error",
            (BgpErrorCode::Update, 6) => "Invalid ORIGIN Attribute",
            (BgpErrorCode::Update, 8) => "Invalid NEXT_HOP Attribute",
            (BgpErrorCode::Update, 9) => "Optional Attribute Error",
            (BgpErrorCode::Update, 10) => "Invalid Network Field",
            (BgpErrorCode::Update, 11) => "Malformed AS_PATH",
            (BgpErrorCode::Fsm, 1) => "Unexpected Message in OpenSent State",
            (BgpErrorCode::Fsm, 2) => "Unexpected Message in OpenConfirm State",
            (BgpErrorCode::Fsm, 3) => "Unexpected Message in Established State",
            (BgpErrorCode::Cease, 1) => "Maximum Number of Prefixes Reached",
            (BgpErrorCode::Cease, 2) => "Administrative Shutdown",
            (BgpErrorCode::Cease, 3) => "Peer De-configured",
            (BgpErrorCode::Cease, 4) => "Administrative Reset",
            (BgpErrorCode::Cease, 5) => "Connection Rejected",
            (BgpErrorCode::Cease, 6) => "Other Configuration Change",
            (BgpErrorCode::Cease, 7) => "Connection Collision Resolution",
            (BgpErrorCode::Cease, 8) => "Out of Resources",
            _ => "Unspecific",
        }
    }
}

impl Display for BgpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}): {} ({})",
            self.code_str(),
            u8::from(self.code),
            self.subcode_str(),
            self.subcode
        )
    }
}

impl Error for BgpError {}

/// Serialization refused to produce a message. This is a local invariant
/// violation rather than a protocol error; the FSM reacts by going `Broken`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum EncodeError {
    /// Body would push the framed message past the 4096-octet bound.
    MessageTooLong(usize),
}

impl Display for EncodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeError::MessageTooLong(len) => {
                write!(f, "message length {len} exceeds 4096 octets")
            }
        }
    }
}

impl Error for EncodeError {}
