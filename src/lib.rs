// kvbridge - ticket-correlated bridge over a callback-driven key-value engine
// Synchronous and batched-asynchronous access on top of a single event loop

#![warn(rust_2018_idioms)]

pub mod client;
pub mod config;
pub mod connection;
pub mod metrics;
pub mod pool;
pub mod shared;
pub mod status;
pub mod ticket;
pub mod transport;

// Re-exports for convenience
pub use client::Client;
pub use config::{ClientConfig, TimerPolicy};
pub use connection::{
    Connection, ConnectionOptions, Fetched, GetOptions, Outcome, RemoveOptions, SetOptions,
    StoreMode,
};
pub use error::{Error, Result};
pub use shared::SharedConnection;
pub use status::{ErrorKind, StatusCode};
pub use ticket::TicketId;
pub use transport::memory::{MemoryStore, MemoryTransport};
pub use transport::{ConnectParams, Transport};

/// kvbridge error types
///
/// Every public operation fails with exactly one of these. Operation-level
/// kinds come out of [`status::classify`]; `AdmissionLimitExceeded` only ever
/// surfaces from async submissions.
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("operation timed out")]
        Timeout,

        #[error("out of memory: {0}")]
        OutOfMemory(String),

        #[error("connection failure: {0}")]
        ConnectionFailure(String),

        #[error("key already exists: {0}")]
        KeyAlreadyExists(String),

        #[error("failure: {0}")]
        Failure(String),

        #[error("admission limit exceeded: {0}")]
        AdmissionLimitExceeded(String),

        #[error("invalid argument: {0}")]
        InvalidArgument(String),

        #[error("configuration error: {0}")]
        Config(String),

        #[error("serialization error: {0}")]
        Serialization(String),
    }

    impl From<serde_json::Error> for Error {
        fn from(e: serde_json::Error) -> Self {
            Error::Serialization(e.to_string())
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_format() {
        assert!(VERSION.split('.').count() >= 3);
    }

    #[test]
    fn test_error_display_carries_message() {
        let e = Error::Failure("NOT_STORED".to_string());
        assert_eq!(e.to_string(), "failure: NOT_STORED");
        assert_eq!(Error::Timeout.to_string(), "operation timed out");
    }
}
