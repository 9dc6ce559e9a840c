//! PPP wire formats
//!
//! Packet codecs for the control protocols. Everything here is pure
//! parsing and building; the negotiation logic lives in `control` and
//! `auth`.

pub mod chap;
pub mod codec;
pub mod ipcp;
pub mod lcp;
pub mod packet;
pub mod pap;
pub mod ppp;

pub use packet::{Ci, ControlBuilder, ControlPacket};
