// Dats - A Statsd client for Rust over UDP and TCP!
//
// Copyright 2026 Nick Pillitteri
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};

use crate::transport::core::{SocketStats, Transport, TransportStats};
use crate::types::MetricResult;

/// `Transport` implementation that writes every payload to the `Sender` half
/// of a channel while callers are given ownership of the `Receiver` half.
///
/// This is not a general purpose transport, rather it's meant for verifying
/// payloads written during the course of integration tests. By default, the
/// channel used is unbounded. The channel size can be limited using the
/// `with_capacity` method.
///
/// Like a real transport, the spy stops writing once closed. Clones share the
/// same channel and counters.
#[derive(Debug, Clone)]
pub struct SpyTransport {
    sender: Sender<Vec<u8>>,
    connects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    stats: SocketStats,
}

impl SpyTransport {
    pub fn new() -> (Receiver<Vec<u8>>, Self) {
        Self::with_queue_capacity(None)
    }

    pub fn with_capacity(queue: usize) -> (Receiver<Vec<u8>>, Self) {
        Self::with_queue_capacity(Some(queue))
    }

    fn with_queue_capacity(queue: Option<usize>) -> (Receiver<Vec<u8>>, Self) {
        let (tx, rx) = match queue {
            Some(cap) => bounded(cap),
            None => unbounded(),
        };

        let transport = SpyTransport {
            sender: tx,
            connects: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            stats: SocketStats::default(),
        };
        (rx, transport)
    }

    /// Number of times `connect` has been called.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::Acquire)
    }

    /// Number of times `close` has been called.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Transport for SpyTransport {
    fn connect(&self) -> MetricResult<bool> {
        self.connects.fetch_add(1, Ordering::AcqRel);
        Ok(false)
    }

    fn send(&self, payload: &[u8]) -> MetricResult<usize> {
        if self.is_closed() {
            self.stats.incr_dropped(payload.len());
            return Ok(0);
        }

        let res = match self.sender.try_send(payload.to_vec()) {
            Ok(()) => Ok(payload.len()),
            Err(TrySendError::Full(_)) => Err(io::Error::new(io::ErrorKind::Other, "channel full")),
            Err(TrySendError::Disconnected(_)) => {
                Err(io::Error::new(io::ErrorKind::Other, "channel disconnected"))
            }
        };

        Ok(self.stats.update(res, payload.len())?)
    }

    fn close(&self) -> MetricResult<()> {
        self.closes.fetch_add(1, Ordering::AcqRel);
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        (&self.stats).into()
    }
}
