// Dats - A Statsd client for Rust over UDP and TCP!
//
// Copyright 2026 Nick Pillitteri
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;

use crossbeam_channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{trace, warn};

use crate::buffer::Buffer;
use crate::transport::{Transport, TransportStats};
use crate::types::{ErrorHandler, MetricResult};

/// Callback run once a `Close` command has been fully processed.
pub(crate) type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

/// Work for the dispatcher thread, processed strictly in the order queued.
pub(crate) enum Command {
    /// Write a flushed payload.
    Send(Vec<u8>),
    /// Flush the buffer at `deadline` unless `cycle` has been flushed already.
    Arm { cycle: u64, deadline: Instant },
    /// Connect the transport. The result goes to the sender if there is one,
    /// otherwise failures go to the error handler.
    Connect(Option<Sender<MetricResult<bool>>>),
    /// Close the transport and stop the thread.
    Close(CloseCallback),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Send(payload) => write!(f, "Send({} bytes)", payload.len()),
            Command::Arm { cycle, deadline } => {
                write!(f, "Arm {{ cycle: {}, deadline: {:?} }}", cycle, deadline)
            }
            Command::Connect(reply) => write!(f, "Connect(reply: {})", reply.is_some()),
            Command::Close(_) => write!(f, "Close(...)"),
        }
    }
}

/// Statistics about the dispatcher running.
#[derive(Debug)]
struct DispatcherStats {
    panics: AtomicU64,
    submitted: AtomicU64,
    drained: AtomicU64,
    discarded: AtomicU64,
}

impl DispatcherStats {
    fn new() -> DispatcherStats {
        DispatcherStats {
            panics: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            drained: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    fn incr_panic(&self) {
        self.panics.fetch_add(1, Ordering::Release);
    }

    fn incr_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Release);
    }

    fn incr_drained(&self) {
        self.drained.fetch_add(1, Ordering::Release);
    }

    fn incr_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Release);
    }
}

/// Owner of the transport and of the flush timer.
///
/// The `.run()` method is meant to be running in its own thread (see
/// `spawn_dispatcher`) while clients call `.submit()` from any thread. The
/// loop waits on the command channel, or on the channel with a deadline
/// when a flush timer is armed, so the timer never needs a thread of its
/// own.
///
/// Every error produced by the transport while processing a command is
/// handed to the error handler. The loop only stops on `Close`.
///
/// Once a close has been requested, the first failed send gives up on the
/// remaining queued payloads so that an unresponsive collector can't hold
/// the close back.
pub(crate) struct Dispatcher {
    transport: Box<dyn Transport + Send + Sync>,
    buffer: Arc<Mutex<Buffer>>,
    errors: ErrorHandler,
    sender: Sender<Command>,
    receiver: Receiver<Command>,
    timer: Mutex<Option<(u64, Instant)>>,
    thread: Mutex<Option<ThreadId>>,
    close_requested: AtomicBool,
    discarding: AtomicBool,
    closing: AtomicBool,
    stopped: AtomicBool,
    stats: DispatcherStats,
}

impl Dispatcher {
    pub(crate) fn new(
        transport: Box<dyn Transport + Send + Sync>,
        buffer: Arc<Mutex<Buffer>>,
        errors: ErrorHandler,
    ) -> Dispatcher {
        let (tx, rx) = crossbeam_channel::unbounded();
        Dispatcher {
            transport,
            buffer,
            errors,
            sender: tx,
            receiver: rx,
            timer: Mutex::new(None),
            thread: Mutex::new(None),
            close_requested: AtomicBool::new(false),
            discarding: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stats: DispatcherStats::new(),
        }
    }

    /// Queue a command. Commands submitted after the dispatcher has stopped
    /// are never processed.
    pub(crate) fn submit(&self, cmd: Command) {
        if self.sender.send(cmd).is_ok() {
            self.stats.incr_submitted();
        }
    }

    /// Note that a `Close` command has been queued.
    pub(crate) fn request_close(&self) {
        self.close_requested.store(true, Ordering::Release);
    }

    pub(crate) fn run(&self) {
        *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread::current().id());

        while !self.closing.load(Ordering::Acquire) {
            let next = match self.deadline() {
                Some(deadline) => match self.receiver.recv_deadline(deadline) {
                    Ok(cmd) => Some(cmd),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.receiver.recv() {
                    Ok(cmd) => Some(cmd),
                    Err(_) => break,
                },
            };

            match next {
                Some(cmd) => {
                    self.stats.incr_drained();
                    self.handle(cmd);
                }
                None => self.expire(),
            }
        }

        // Nothing is queued after a close by well behaved clients but make
        // sure nobody is left waiting on a reply if something was.
        for cmd in self.receiver.try_iter() {
            match cmd {
                Command::Connect(Some(reply)) => {
                    let _ = reply.send(Ok(false));
                }
                Command::Close(callback) => callback(),
                _ => {}
            }
        }

        self.stopped.store(true, Ordering::Release);
    }

    fn handle(&self, cmd: Command) {
        match cmd {
            Command::Send(payload) => self.send(&payload),
            Command::Arm { cycle, deadline } => {
                *self.timer() = Some((cycle, deadline));
            }
            Command::Connect(reply) => {
                let res = self.transport.connect();
                match reply {
                    Some(reply) => {
                        let _ = reply.send(res);
                    }
                    None => {
                        if let Err(e) = res {
                            (self.errors)(e);
                        }
                    }
                }
            }
            Command::Close(callback) => {
                self.closing.store(true, Ordering::Release);
                *self.timer() = None;

                let res = self.transport.close();
                callback();
                if let Err(e) = res {
                    (self.errors)(e);
                }
            }
        }
    }

    fn send(&self, payload: &[u8]) {
        if self.discarding.load(Ordering::Acquire) {
            self.stats.incr_discarded();
            return;
        }

        trace!("sending {} byte payload", payload.len());
        if let Err(e) = self.transport.send(payload) {
            if self.close_requested.load(Ordering::Acquire) {
                warn!("send failed while closing, discarding queued payloads: {}", e);
                self.discarding.store(true, Ordering::Release);
            }
            (self.errors)(e);
        }
    }

    fn expire(&self) {
        let armed = self.timer().take();
        if let Some((cycle, _)) = armed {
            let flushed = self
                .buffer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .expire(cycle);
            if let Some(payload) = flushed {
                trace!("flush timer fired for cycle {}", cycle);
                self.send(payload.as_bytes());
            }
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.timer().map(|(_, deadline)| deadline)
    }

    fn timer(&self) -> MutexGuard<'_, Option<(u64, Instant)>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn transport_stats(&self) -> TransportStats {
        self.transport.stats()
    }

    pub(crate) fn panics(&self) -> u64 {
        self.stats.panics.load(Ordering::Acquire)
    }

    pub(crate) fn submitted(&self) -> u64 {
        self.stats.submitted.load(Ordering::Acquire)
    }

    pub(crate) fn drained(&self) -> u64 {
        self.stats.drained.load(Ordering::Acquire)
    }

    /// Payloads given up on because a send failed while closing.
    pub(crate) fn discarded(&self) -> u64 {
        self.stats.discarded.load(Ordering::Acquire)
    }

    /// Approximate number of commands waiting to be processed.
    pub(crate) fn queued(&self) -> u64 {
        self.submitted().saturating_sub(self.drained())
    }

    /// True when called from the thread currently running `.run()`, e.g.
    /// from inside the error handler.
    pub(crate) fn is_current_thread(&self) -> bool {
        let running = *self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        running == Some(thread::current().id())
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dispatcher {{ ... }}")
    }
}

/// Create a thread and run the dispatcher in it until it is closed.
///
/// A `Sentinel` makes sure that a panic while running the dispatcher (most
/// likely from a user supplied error handler) results in another thread
/// being spawned to keep draining the queue.
pub(crate) fn spawn_dispatcher(dispatcher: Arc<Dispatcher>) {
    let res = thread::Builder::new()
        .name("dats-dispatcher".to_string())
        .spawn(move || {
            let mut sentinel = Sentinel::new(&dispatcher);
            dispatcher.run();
            sentinel.cancel();
        });

    if let Err(e) = res {
        warn!("unable to spawn dispatcher thread: {}", e);
    }
}

/// Struct for ensuring the dispatcher runs to completion correctly, without
/// panicking.
///
/// The sentinel will spawn a new thread to continue running the dispatcher
/// in its destructor unless the `.cancel()` method is called after the
/// dispatcher completes (which won't happen if it panics).
#[derive(Debug)]
struct Sentinel<'a> {
    dispatcher: &'a Arc<Dispatcher>,
    active: bool,
}

impl<'a> Sentinel<'a> {
    fn new(dispatcher: &'a Arc<Dispatcher>) -> Sentinel<'a> {
        Sentinel { dispatcher, active: true }
    }

    fn cancel(&mut self) {
        self.active = false;
    }
}

impl<'a> Drop for Sentinel<'a> {
    fn drop(&mut self) {
        if self.active {
            self.dispatcher.stats.incr_panic();
            warn!("dispatcher thread panicked, restarting");
            spawn_dispatcher(Arc::clone(self.dispatcher));
        }
    }
}
