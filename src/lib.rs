//! ==============================================================================
//! quill - sensor nodes and the leader that collects their readings
//! ==============================================================================
//!
//! modules:
//!     - domain:  sensor kinds, raw readings, atmospheric line parsing
//!     - wire:    length-prefixed packet codec shared by node and leader
//!     - sensor:  adapters (fake, atmospheric subprocess)
//!     - node:    per-device agent: heartbeat, bounded outbound queue
//!     - leader:  liveness registry with aging, tcp accept loop
//!     - store:   persistence sink for atmospheric readings
//!     - api:     read-only dashboard http api
//!     - config, logging, shutdown, error: ambient plumbing
//!
//! ==============================================================================

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod leader;
pub mod logging;
pub mod node;
pub mod sensor;
pub mod shutdown;
pub mod store;
pub mod wire;
