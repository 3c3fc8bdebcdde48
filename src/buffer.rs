// Dats - A Statsd client for Rust over UDP and TCP!
//
// Copyright 2026 Nick Pillitteri
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

const SEPARATOR: char = '\n';

/// Outcome of appending a line to a `Buffer`.
///
/// `flushed` is a payload that must be handed to the transport right away,
/// `arm` is set when a flush timer needs to be started for the given cycle.
/// `overfull` means the buffer holds more than its capacity and the timer
/// should fire without waiting for the flush timeout.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Append {
    pub(crate) flushed: Option<String>,
    pub(crate) arm: Option<u64>,
    pub(crate) overfull: bool,
}

/// Accumulates formatted metric lines and decides when they leave.
///
/// The buffer never touches the network. Each mutation returns the payload
/// (if any) that should be sent, which lets the owner queue it while still
/// holding whatever lock guards the buffer and so keep flushes in order.
///
/// A "cycle" is the time between the first append into an empty buffer and
/// the flush that empties it again. At most one timer is armed per cycle and
/// a timer only fires a flush for the cycle it was armed in.
#[derive(Debug)]
pub(crate) struct Buffer {
    data: String,
    capacity: usize,
    timeout_active: bool,
    cycle: u64,
    closed: bool,
}

impl Buffer {
    /// Create a buffer flushing once more than `capacity` bytes would be
    /// held. A capacity of `0` disables buffering entirely.
    pub(crate) fn new(capacity: usize) -> Self {
        Buffer {
            data: String::new(),
            capacity,
            timeout_active: false,
            cycle: 0,
            closed: false,
        }
    }

    pub(crate) fn append(&mut self, line: &str) -> Append {
        if self.closed {
            return Append::default();
        }

        if self.capacity == 0 {
            return Append {
                flushed: Some(line.to_string()),
                ..Append::default()
            };
        }

        let separator = if self.data.is_empty() { 0 } else { 1 };
        let candidate = self.data.len() + separator + line.len();

        let flushed = if candidate > self.capacity && !self.data.is_empty() {
            self.flush()
        } else {
            None
        };

        if !self.data.is_empty() {
            self.data.push(SEPARATOR);
        }
        self.data.push_str(line);

        let arm = if self.timeout_active {
            None
        } else {
            self.timeout_active = true;
            Some(self.cycle)
        };

        Append {
            flushed,
            arm,
            overfull: self.data.len() > self.capacity,
        }
    }

    /// Take everything buffered, ending the current cycle.
    pub(crate) fn flush(&mut self) -> Option<String> {
        self.timeout_active = false;
        self.cycle = self.cycle.wrapping_add(1);

        if self.data.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.data))
        }
    }

    /// Flush on behalf of the timer armed for `cycle`. Stale timers, from a
    /// cycle that has already been flushed, do nothing.
    pub(crate) fn expire(&mut self, cycle: u64) -> Option<String> {
        if self.timeout_active && self.cycle == cycle {
            self.flush()
        } else {
            None
        }
    }

    /// Flush one last time and refuse any further appends.
    pub(crate) fn close(&mut self) -> Option<String> {
        if self.closed {
            return None;
        }

        self.closed = true;
        self.flush()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn data(&self) -> &str {
        &self.data
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn timeout_active(&self) -> bool {
        self.timeout_active
    }
}
