//! Key-value store seam
//!
//! Writers talk to shards through [`StoreConnector`] and [`KvStore`], so the
//! pool runs unchanged against memcached or an in-memory test double.

pub mod memcache;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use memcache::{MemcacheConnection, MemcacheConnector};

/// Why a single write did not land
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    /// Negative acknowledgement: the server kept the connection but refused the value
    #[error("value not stored")]
    NotStored,

    #[error("server error: {0}")]
    Server(String),

    #[error("invalid key '{0}'")]
    InvalidKey(String),

    #[error("unexpected reply: {0}")]
    Protocol(String),
}

impl StoreError {
    /// Worth another attempt on a fresh connection
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Connect { .. }
                | StoreError::Io(_)
                | StoreError::Timeout(_)
                | StoreError::Protocol(_)
        )
    }

    /// The connection is still in step with the server after this error.
    ///
    /// A negative ack is a complete reply and an invalid key is refused before
    /// anything is sent. After any other failure unread reply lines may be
    /// left on the stream.
    pub fn keeps_connection(&self) -> bool {
        matches!(self, StoreError::NotStored | StoreError::InvalidKey(_))
    }

    /// Short label for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Connect { .. } => "connect",
            StoreError::Io(_) => "io",
            StoreError::Timeout(_) => "timeout",
            StoreError::NotStored => "not_stored",
            StoreError::Server(_) => "server",
            StoreError::InvalidKey(_) => "invalid_key",
            StoreError::Protocol(_) => "protocol",
        }
    }
}

/// An open connection to one shard
#[async_trait]
pub trait KvStore: Send {
    /// Store `value` under `key`; `Ok` only on a positive acknowledgement
    async fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError>;
}

/// Opens connections to shard addresses
#[async_trait]
pub trait StoreConnector: Send + Sync + 'static {
    type Store: KvStore + 'static;

    async fn connect(&self, addr: &str) -> Result<Self::Store, StoreError>;
}
