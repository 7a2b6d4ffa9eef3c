//! Release notifications for declined addresses.
//!
//! When a client declines an address the machine registry has to be told,
//! so it stops handing that address to the machine. The negotiation engine
//! only sees the [`DeclineNotifier`] trait.

use std::net::Ipv4Addr;
use std::sync::mpsc;
use std::time::{SystemTime, UNIX_EPOCH};

use advmac::MacAddr6;
use serde::Serialize;
use tracing::info;

use crate::error::NotifyError;

pub mod writer;

/// Number of undelivered decline events held before `notify_decline` fails
pub const QUEUE_DEPTH: usize = 1024;

pub trait DeclineNotifier: Send + Sync {
    fn notify_decline(&self, declined: Ipv4Addr, mac: MacAddr6) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeclineEvent {
    pub timestamp_ms: u64,
    pub address: Ipv4Addr,
    pub mac: MacAddr6,
}

impl DeclineEvent {
    pub fn new(address: Ipv4Addr, mac: MacAddr6) -> Self {
        Self {
            timestamp_ms: Self::now(),
            address,
            mac,
        }
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Used when no registry is configured, declines are only logged.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl DeclineNotifier for LogNotifier {
    fn notify_decline(&self, declined: Ipv4Addr, mac: MacAddr6) -> Result<(), NotifyError> {
        info!(address = %declined, %mac, "address declined, no registry configured");
        Ok(())
    }
}

/// Queues decline events for [`writer::tcp_writer`]. Never blocks.
#[derive(Debug)]
pub struct ChannelNotifier {
    tx: mpsc::SyncSender<DeclineEvent>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::SyncSender<DeclineEvent>) -> Self {
        Self { tx }
    }

    /// Bounded channel plus the notifier feeding it
    pub fn with_queue(depth: usize) -> (Self, mpsc::Receiver<DeclineEvent>) {
        let (tx, rx) = mpsc::sync_channel(depth);
        (Self::new(tx), rx)
    }
}

impl DeclineNotifier for ChannelNotifier {
    fn notify_decline(&self, declined: Ipv4Addr, mac: MacAddr6) -> Result<(), NotifyError> {
        self.tx
            .try_send(DeclineEvent::new(declined, mac))
            .map_err(|e| match e {
                mpsc::TrySendError::Full(_) => NotifyError::QueueFull,
                mpsc::TrySendError::Disconnected(_) => NotifyError::Disconnected,
            })
    }
}
