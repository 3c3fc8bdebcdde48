// Dats - A Statsd client for Rust over UDP and TCP!
//
// Copyright 2026 Nick Pillitteri
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::MetricResult;

/// Snapshot of the I/O counters of a transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub bytes_dropped: u64,
    pub packets_dropped: u64,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SocketStats {
    bytes_sent: Arc<AtomicU64>,
    packets_sent: Arc<AtomicU64>,
    bytes_dropped: Arc<AtomicU64>,
    packets_dropped: Arc<AtomicU64>,
}

impl SocketStats {
    pub(crate) fn incr_sent(&self, n: usize) {
        self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_dropped(&self, n: usize) {
        self.bytes_dropped.fetch_add(n as u64, Ordering::Relaxed);
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of writing a payload of `len` bytes.
    pub(crate) fn update<E>(&self, res: Result<usize, E>, len: usize) -> Result<usize, E> {
        match res {
            Ok(written) => {
                self.incr_sent(written);
                Ok(written)
            }
            Err(e) => {
                self.incr_dropped(len);
                Err(e)
            }
        }
    }
}

impl From<&SocketStats> for TransportStats {
    fn from(stats: &SocketStats) -> Self {
        TransportStats {
            bytes_sent: stats.bytes_sent.load(Ordering::Relaxed),
            packets_sent: stats.packets_sent.load(Ordering::Relaxed),
            bytes_dropped: stats.bytes_dropped.load(Ordering::Relaxed),
            packets_dropped: stats.packets_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Network backend that ships already formatted payloads to a collector.
///
/// A payload is one or more metric lines joined by `\n`, without a trailing
/// newline. Transports that need framing (TCP) add it themselves.
///
/// All methods are called from the dispatcher thread, except for `connect`
/// which may also be called by anyone holding the transport. Implementations
/// must be safe to call after `close`: `connect` returns `Ok(false)` and
/// `send` writes nothing.
pub trait Transport {
    /// Establish whatever the transport needs before sending. Returns `true`
    /// if this call created a new connection or socket.
    ///
    /// The default implementation has nothing to set up.
    fn connect(&self) -> MetricResult<bool> {
        Ok(false)
    }

    /// Write a payload, returning the number of bytes handed to the OS.
    ///
    /// Implementations may return `0` when the payload was dropped without
    /// an error (e.g. because the transport is closing). Callers should *NOT*
    /// interpret this as an error.
    fn send(&self, payload: &[u8]) -> MetricResult<usize>;

    /// Release any OS handle. Calling this more than once is fine.
    fn close(&self) -> MetricResult<()> {
        Ok(())
    }

    /// Return I/O telemetry like bytes / packets sent or dropped.
    ///
    /// Note that not all transports implement this method and the default
    /// implementation returns zeros.
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    fn connect(&self) -> MetricResult<bool> {
        (**self).connect()
    }

    fn send(&self, payload: &[u8]) -> MetricResult<usize> {
        (**self).send(payload)
    }

    fn close(&self) -> MetricResult<()> {
        (**self).close()
    }

    fn stats(&self) -> TransportStats {
        (**self).stats()
    }
}

/// Implementation of a `Transport` that discards everything.
///
/// Useful for disabling metric collection or unit tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopTransport;

impl Transport for NopTransport {
    fn send(&self, _payload: &[u8]) -> MetricResult<usize> {
        Ok(0)
    }
}
