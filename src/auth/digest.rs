//! CHAP digest strategies
//!
//! The LCP Authentication-Protocol option names a digest by its algorithm
//! byte. MD5 is built in; other algorithms (MS-CHAP) plug in through
//! [`ChapDigest`] and a [`DigestRegistry`].

use crate::protocol::chap::{algorithms, md5_digest, MD5_DIGEST_SIZE};
use subtle::ConstantTimeEq;

/// One CHAP digest algorithm
pub trait ChapDigest: Send + Sync {
    /// Algorithm byte carried in the LCP option
    fn code(&self) -> u8;

    fn name(&self) -> &'static str;

    /// Response value sent for a challenge
    fn make_response(&self, id: u8, secret: &[u8], challenge: &[u8]) -> Vec<u8>;

    /// Check a response value received for our challenge
    fn verify_response(&self, id: u8, secret: &[u8], challenge: &[u8], response: &[u8]) -> bool;
}

/// MD5(id ‖ secret ‖ challenge), RFC 1994
#[derive(Debug, Default, Clone, Copy)]
pub struct Md5Digest;

impl ChapDigest for Md5Digest {
    fn code(&self) -> u8 {
        algorithms::MD5
    }

    fn name(&self) -> &'static str {
        "MD5"
    }

    fn make_response(&self, id: u8, secret: &[u8], challenge: &[u8]) -> Vec<u8> {
        md5_digest(id, secret, challenge).to_vec()
    }

    fn verify_response(&self, id: u8, secret: &[u8], challenge: &[u8], response: &[u8]) -> bool {
        if response.len() != MD5_DIGEST_SIZE {
            return false;
        }
        let expected = md5_digest(id, secret, challenge);
        expected[..].ct_eq(response).into()
    }
}

/// Digests we can use, in preference order
pub struct DigestRegistry {
    digests: Vec<Box<dyn ChapDigest>>,
}

impl DigestRegistry {
    pub fn empty() -> Self {
        Self { digests: Vec::new() }
    }

    /// Register a digest, replacing any with the same code
    pub fn register(&mut self, digest: Box<dyn ChapDigest>) {
        self.digests.retain(|d| d.code() != digest.code());
        self.digests.push(digest);
    }

    pub fn get(&self, code: u8) -> Option<&dyn ChapDigest> {
        self.digests
            .iter()
            .find(|d| d.code() == code)
            .map(|d| d.as_ref())
    }

    pub fn supports(&self, code: u8) -> bool {
        self.get(code).is_some()
    }

    /// Algorithm codes in preference order
    pub fn codes(&self) -> Vec<u8> {
        self.digests.iter().map(|d| d.code()).collect()
    }
}

impl Default for DigestRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(Md5Digest));
        registry
    }
}

impl std::fmt::Debug for DigestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.digests.iter().map(|d| d.name()))
            .finish()
    }
}
