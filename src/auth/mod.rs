//! Authentication
//!
//! CHAP and PAP engines, the secrets files they consult, peer address
//! authorization and the phase orchestrator that sequences them.

pub mod addrs;
pub mod chap;
pub mod digest;
pub mod orchestrator;
pub mod pap;
pub mod secrets;

pub use addrs::{auth_ip_addr, AllowedAddrs};
pub use chap::{Chap, ChapConfig};
pub use digest::{ChapDigest, DigestRegistry, Md5Digest};
pub use orchestrator::{AuthSettings, Layers, Orchestrator, Phase};
pub use pap::{Pap, PapConfig, SystemLogin};
pub use secrets::{InlineSecrets, SecretEntry, SecretKind, SecretSource, SecretsFiles};

/// What an authentication engine may consult while handling a packet
#[derive(Clone, Copy)]
pub struct AuthContext<'a> {
    pub secrets: &'a dyn SecretSource,
    pub login: Option<&'a dyn SystemLogin>,
}
