//! leader side: liveness registry and the connection accept loop.

pub mod registry;
pub mod server;

pub use registry::{LeaderRegistry, NodeRecord, NodeStatus, Transition};
pub use server::{CloseHandle, InboundReading, LeaderServer};
