/*!
Bidirectional wire codecs over [`bytes::Bytes`].

Reads are bounds-checked: running out of bytes surfaces as a [`ReadError`]
that each codec maps onto the protocol error appropriate for its context
(nothing on the wire path panics).
*/
pub mod bgp;
pub mod utils;

pub use bgp::*;
pub use utils::*;
