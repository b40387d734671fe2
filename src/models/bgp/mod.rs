//! BGP message and attribute models.
pub mod attributes;
pub mod capabilities;
pub mod messages;

pub use attributes::*;
pub use capabilities::*;
pub use messages::*;
