//! Error types for the resolution service

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Parameters email or phone required.")]
    MissingIdentity,

    #[error("Parameters url or title required.")]
    MissingPage,

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Could not parse phone number: {0}")]
    InvalidPhone(String),

    #[error("Unknown region code: {0}")]
    UnknownRegion(String),

    #[error("URL {url} must start with {prefix}")]
    UrlPrefix { url: String, prefix: String },

    #[error("Could not decode URL: {0}")]
    InvalidUrl(String),

    #[error("{url} not found. HTTP Code: {status}")]
    PageUnreachable { url: String, status: u16 },

    #[error("Reachability check failed: {0}")]
    Probe(#[from] reqwest::Error),

    #[error("Graph transaction failed: {0}")]
    Store(String),

    #[error("Write queue is closed")]
    WriterClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
