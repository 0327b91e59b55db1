//! Ephemeral UDP port allocation
//!
//! Broadcast outputs need a port that is free on this host and not already
//! promised to another output whose encoder has not bound it yet. The
//! allocator probes random ports in the IANA dynamic range and keeps a
//! reservation set until the owning pipeline is cleaned up.

use rand::Rng;
use std::collections::HashSet;
use std::net::UdpSocket;
use std::ops::RangeInclusive;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// IANA dynamic/private port range
pub const EPHEMERAL_PORTS: RangeInclusive<u16> = 49152..=65535;

/// How long to keep searching for a free port
pub const DEFAULT_SEARCH_WINDOW: Duration = Duration::from_secs(60);

/// Pause between two failed attempts
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Target resolution failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Can't allocate a free UDP port within {0:?}")]
    NoFreePort(Duration),
}

/// Hands out distinct, currently unbound UDP ports
#[derive(Debug)]
pub struct PortAllocator {
    range: RangeInclusive<u16>,
    window: Duration,
    reserved: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    /// Creates an allocator over the ephemeral range
    pub fn new(window: Duration) -> Self {
        Self::with_range(EPHEMERAL_PORTS, window)
    }

    /// Creates an allocator over a custom range
    pub fn with_range(range: RangeInclusive<u16>, window: Duration) -> Self {
        Self {
            range,
            window,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// Reserves a free port
    ///
    /// Blocks for at most the search window. Callers on an async runtime
    /// should run this on a blocking thread.
    pub fn allocate(&self) -> Result<u16, ResolveError> {
        let deadline = Instant::now() + self.window;
        let mut rng = rand::rng();

        loop {
            let port = rng.random_range(self.range.clone());
            if !self.is_reserved(port) && is_unbound(port) {
                // Another caller may have taken it while the socket was bound
                let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
                if reserved.insert(port) {
                    debug!("Port assigned: {}", port);
                    return Ok(port);
                }
            }

            if Instant::now() >= deadline {
                debug!("No free port found within {:?}", self.window);
                return Err(ResolveError::NoFreePort(self.window));
            }
            std::thread::sleep(RETRY_DELAY);
        }
    }

    /// Returns a port to the pool
    pub fn release(&self, port: u16) {
        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        if reserved.remove(&port) {
            debug!("Port released: {}", port);
        }
    }

    fn is_reserved(&self, port: u16) -> bool {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&port)
    }

    /// Number of ports currently reserved
    pub fn reserved_count(&self) -> usize {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_WINDOW)
    }
}

fn is_unbound(port: u16) -> bool {
    UdpSocket::bind(("0.0.0.0", port)).is_ok()
}
