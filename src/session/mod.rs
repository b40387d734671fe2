/*!
The per-session machinery: configuration, the byte-stream sink, the clock
abstraction, and the finite state machine itself.
*/
mod clock;
mod config;
mod fsm;
mod sink;

pub use clock::*;
pub use config::*;
pub use fsm::*;
pub use sink::*;

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Session states.
///
/// `Broken` is terminal and entered only on a local invariant violation
/// (the serializer refused to produce a message, or the output handler
/// failed); the sole way out is [`BgpFsm::reset_hard`].
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BgpState {
    Idle,
    OpenSent,
    OpenConfirm,
    Established,
    Broken,
}

impl Display for BgpState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BgpState::Idle => "Idle",
            BgpState::OpenSent => "Open Sent",
            BgpState::OpenConfirm => "Open Confirm",
            BgpState::Established => "Established",
            BgpState::Broken => "Broken",
        };
        write!(f, "{s}")
    }
}

/// Errors surfaced by the FSM's public operations.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum FsmError {
    /// The FSM is (or just became) broken; reset it.
    Broken,
    /// The operation is not legal in the current state.
    InvalidState(BgpState),
}

impl Display for FsmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FsmError::Broken => write!(f, "FSM is broken, reset required"),
            FsmError::InvalidState(state) => {
                write!(f, "operation not valid in state {state}")
            }
        }
    }
}

impl Error for FsmError {}

/// Receives serialized messages the FSM wants on the wire.
///
/// The callback runs synchronously on the thread that triggered the send
/// and must not block indefinitely. It also must not call back into the
/// FSM that invoked it; queue the bytes and feed them from the host's own
/// loop instead. Returning false drives the FSM to [`BgpState::Broken`].
pub trait OutHandler: Send + Sync {
    fn handle_out(&self, buf: &[u8]) -> bool;
}
