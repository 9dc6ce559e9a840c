//! Control protocol negotiation
//!
//! The generic option-negotiation automaton and its LCP and IPCP
//! instances.

pub mod ci;
pub mod fsm;
pub mod ipcp;
pub mod lcp;

pub use fsm::{ControlProtocol, Fsm, FsmConfig, NakOutcome, State};
pub use ipcp::{IpConfig, IpUpError, Ipcp, IpcpOptions, IpcpSettings, VjParams};
pub use lcp::{FramingParams, Lcp, LcpOptions, LcpSettings};
