//! Error types for the boot negotiation server
//!
//! Only [`TransportError`] is fatal to a worker loop. Every other error is
//! contained by the handler of the packet that caused it.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the address allocator
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("invalid lease pool range: {begin} is after {end}")]
    InvalidRange { begin: Ipv4Addr, end: Ipv4Addr },

    #[error("lease pool {begin}-{end} is exhausted")]
    Exhausted { begin: Ipv4Addr, end: Ipv4Addr },
}

/// Errors raised while classifying client firmware from option 93/77
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("missing client system architecture option (93), not a PXE boot request")]
    MissingArchitecture,

    #[error("unsupported client firmware type '{0}'")]
    UnsupportedFirmware(u16),
}

/// Errors raised while resolving the server's own address on an interface
#[derive(Debug, Error)]
pub enum InterfaceError {
    #[error("failed to enumerate network interfaces: {0}")]
    Enumerate(#[from] network_interface::Error),

    #[error("no network interface with index {0}")]
    UnknownIndex(u32),

    #[error("no usable unicast address configured on interface {0}")]
    NoUsableAddress(String),
}

/// Transport failures. A receive failure terminates the worker loop.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("receiving DHCP packet: {0}")]
    Recv(#[source] io::Error),
}

/// Failures of the release notification collaborator
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("decline notification queue is full")]
    QueueFull,

    #[error("decline notification writer has stopped")]
    Disconnected,
}

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid command line: {0}")]
    Args(#[from] pico_args::Error),

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
