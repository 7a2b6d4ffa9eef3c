//! PXE boot negotiation server.
//!
//! Answers DHCPv4 requests from pre-boot firmware: classifies the client's
//! firmware, hands out a transient address from a bounded pool and points the
//! firmware at the next-stage boot program.

pub mod config;
pub mod error;
pub mod interface;
pub mod leasedb;
pub mod logging;
pub mod mgmt;
pub mod notify;
pub mod signal;
pub mod v4;

pub use error::{
    ClassifyError, ConfigError, InterfaceError, NotifyError, PoolError, TransportError,
};
pub use leasedb::LeasePool;
