/*!
Data models for BGP messages, path attributes, and network primitives.

The types here are wire-independent; the bidirectional codecs live in
[`crate::parser`].
*/
pub mod bgp;
pub mod network;

pub use bgp::*;
pub use network::*;
