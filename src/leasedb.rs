use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::error::PoolError;

/// Bounded pool of pre-boot IPv4 addresses.
///
/// Addresses are tracked as their big-endian `u32` value. Allocation is a
/// first-fit scan from `begin`, so a released address is handed out again
/// before any higher one. Leases never expire; they are only removed by
/// [`LeasePool::release`].
///
/// A single pool is shared (behind an `Arc`) by every listener in the
/// process, the mutex makes `allocate` safe to call concurrently.
#[derive(Debug)]
pub struct LeasePool {
    begin: u32,
    end: u32,
    leased: Mutex<BTreeSet<u32>>,
}

impl LeasePool {
    pub fn new(begin: Ipv4Addr, end: Ipv4Addr) -> Result<Self, PoolError> {
        if u32::from(begin) > u32::from(end) {
            return Err(PoolError::InvalidRange { begin, end });
        }

        Ok(Self {
            begin: begin.into(),
            end: end.into(),
            leased: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn begin(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.begin)
    }

    pub fn end(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.end)
    }

    /// Number of addresses in the range
    pub fn capacity(&self) -> u64 {
        u64::from(self.end - self.begin) + 1
    }

    pub fn leased_count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_leased(&self, addr: Ipv4Addr) -> bool {
        self.lock().contains(&u32::from(addr))
    }

    /// Currently leased addresses in ascending order
    pub fn leased(&self) -> Vec<Ipv4Addr> {
        self.lock().iter().copied().map(Ipv4Addr::from).collect()
    }

    /// Lease the lowest free address in the range.
    pub fn allocate(&self) -> Result<Ipv4Addr, PoolError> {
        let mut leased = self.lock();

        // inclusive range, so `end == u32::MAX` must not overflow
        let free = (self.begin..=self.end).find(|n| !leased.contains(n));

        match free {
            Some(n) => {
                leased.insert(n);
                let addr = Ipv4Addr::from(n);
                debug!(%addr, leased = leased.len(), "allocated address");
                Ok(addr)
            }
            None => Err(PoolError::Exhausted {
                begin: self.begin(),
                end: self.end(),
            }),
        }
    }

    /// Return `addr` to the pool.
    ///
    /// Releasing an address that is not leased, or that lies outside the
    /// range, is a no-op. Returns whether a lease was actually removed.
    pub fn release(&self, addr: Ipv4Addr) -> bool {
        let n = u32::from(addr);
        if n < self.begin || n > self.end {
            return false;
        }

        let removed = self.lock().remove(&n);
        if removed {
            info!(%addr, "released address");
        }
        removed
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<u32>> {
        // the set is always left consistent, a panic elsewhere can't corrupt it
        self.leased.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
