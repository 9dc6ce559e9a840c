use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("packet truncated: need {needed} bytes, have {available}")]
    TruncatedPacket { needed: usize, available: usize },

    #[error("length mismatch: header declares {declared} bytes, buffer holds {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("secrets file {path}: {message}")]
    Secrets { path: String, message: String },

    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("session registry full ({capacity} sessions)")]
    RegistryFull { capacity: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
