//! ==============================================================================
//! error.rs - error taxonomy shared by node and leader
//! ==============================================================================
//!
//! purpose:
//!     one enum per failure domain. everything here is either transient
//!     (logged and absorbed where it happens) or fatal at startup
//!     (InvalidHost, sensor Init when the binary chooses so).
//!
//! relationships:
//!     - FrameError:   wire.rs (decode), leader/server.rs (drop connection)
//!     - SensorError:  sensor/* (init + stream), node/mod.rs (fan-in)
//!     - NodeError:    node/mod.rs (destination + per-packet framing/send)
//!     - StorageError: store.rs, leader/server.rs, api.rs
//!     - LeaderError:  leader/server.rs (listener)
//!
//! ==============================================================================

use std::io;

/// Malformed or truncated packet on the wire.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Stream ended (or body was shorter) before a full packet was available
    #[error("truncated frame: needed {needed} bytes")]
    Truncated { needed: usize },

    /// Packet kind byte is not one we know how to read
    #[error("unknown packet kind: {0:#04x}")]
    UnknownKind(u8),

    /// Body length exceeds the protocol limit (declared on read, computed on encode)
    #[error("frame too large: {len} bytes (max {max})")]
    Oversized { len: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Sensor adapter failures.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    /// Backing resource could not be acquired
    #[error("{sensor} sensor failed to initialize: {source}")]
    Init {
        sensor: &'static str,
        #[source]
        source: io::Error,
    },

    /// data_stream() called before init(), or the stream was already taken
    #[error("{0} sensor is not initialized")]
    NotInitialized(&'static str),

    /// Transient read failure on the adapter's stream
    #[error("sensor read error: {0}")]
    Read(#[from] io::Error),
}

/// Node-side networking failures.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Leader host is neither an IP literal nor "localhost"
    #[error("invalid leader host: {0:?}")]
    InvalidHost(String),

    /// Packet could not be framed (too large for the wire)
    #[error("cannot frame packet: {0}")]
    Frame(#[from] FrameError),

    /// Could not connect to / write to the leader
    #[error("connection to leader {addr} failed: {source}")]
    Connection {
        addr: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Persistence sink failures. Readings are lost when this happens.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database path cannot be blank")]
    BlankPath,

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Leader listener failures.
#[derive(Debug, thiserror::Error)]
pub enum LeaderError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("listener error: {0}")]
    Io(#[from] io::Error),
}
