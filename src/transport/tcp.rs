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
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::config::{HostUrl, Scheme};
use crate::transport::core::{SocketStats, Transport, TransportStats};
use crate::types::{nop_error_handler, ErrorHandler, ErrorKind, MetricError, MetricResult};

/// Longest a single write may block before the connection is given up on.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Factory for TCP connections.
///
/// The host is passed exactly as it appeared in the URL (without brackets
/// for IPv6 literals) and is resolved anew on every attempt.
pub trait Connector {
    fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream>;
}

impl<F> Connector for F
where
    F: Fn(&str, u16) -> io::Result<TcpStream>,
{
    fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        (self)(host, port)
    }
}

/// Connector using the platform resolver and `TcpStream::connect`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemConnector;

impl Connector for SystemConnector {
    fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        TcpStream::connect((host, port))
    }
}

/// Lifecycle of a `TcpTransport` connection.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal. Nothing is sent and nothing reconnects.
    Closing,
}

#[derive(Debug)]
struct TcpState {
    status: ConnectionState,
    // Shared so writes happen without holding the state lock
    stream: Option<Arc<TcpStream>>,
    // Bumped for each new connection so a monitor can tell whether the
    // connection it watches is still the current one.
    generation: u64,
}

struct TcpInner {
    host: HostUrl,
    connector: Box<dyn Connector + Send + Sync>,
    errors: ErrorHandler,
    write_timeout: Duration,
    state: Mutex<TcpState>,
    settled: Condvar,
    stats: SocketStats,
}

impl TcpInner {
    fn state(&self) -> MutexGuard<'_, TcpState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connect(self: &Arc<Self>) -> MetricResult<bool> {
        let mut state = self.state();
        if state.status == ConnectionState::Connecting {
            // Somebody else is already making the attempt, its caller owns the outcome
            while state.status == ConnectionState::Connecting {
                state = self.settled.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
            return Ok(false);
        }

        if matches!(state.status, ConnectionState::Connected | ConnectionState::Closing) {
            return Ok(false);
        }

        state.status = ConnectionState::Connecting;
        drop(state);

        debug!("connecting to {}", self.host);
        let res = self
            .connector
            .connect(self.host.host(), self.host.port())
            .and_then(|stream| {
                stream.set_write_timeout(Some(self.write_timeout))?;
                let reader = stream.try_clone()?;
                Ok((stream, reader))
            });

        let mut state = self.state();
        let out = match res {
            Ok((stream, reader)) => {
                if state.status == ConnectionState::Closing {
                    let _ = stream.shutdown(Shutdown::Both);
                    Ok(false)
                } else {
                    let _ = stream.set_nodelay(true);
                    state.generation = state.generation.wrapping_add(1);
                    state.stream = Some(Arc::new(stream));
                    state.status = ConnectionState::Connected;
                    debug!("connected to {}", self.host);
                    self.spawn_monitor(reader, state.generation);
                    Ok(true)
                }
            }
            Err(e) => {
                if state.status != ConnectionState::Closing {
                    state.status = ConnectionState::Disconnected;
                }
                Err(MetricError::from(e))
            }
        };

        self.settled.notify_all();
        out
    }

    fn spawn_monitor(self: &Arc<Self>, mut reader: TcpStream, generation: u64) {
        let inner: Weak<TcpInner> = Arc::downgrade(self);
        let res = thread::Builder::new()
            .name("dats-tcp-monitor".to_string())
            .spawn(move || {
                let mut buf = [0u8; 512];
                let cause = loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break None,
                        Ok(_) => continue,
                        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => break Some(MetricError::from(e)),
                    }
                };

                if let Some(inner) = inner.upgrade() {
                    inner.on_disconnect(generation, cause);
                }
            });

        if let Err(e) = res {
            warn!("unable to watch connection to {}: {}", self.host, e);
        }
    }

    /// Called once a connection is gone. Makes exactly one attempt to
    /// replace it, unless the transport is closing or has already moved on
    /// to a newer connection.
    fn on_disconnect(self: &Arc<Self>, generation: u64, cause: Option<MetricError>) {
        {
            let mut state = self.state();
            if state.generation != generation || state.status != ConnectionState::Connected {
                return;
            }

            state.status = ConnectionState::Disconnected;
            if let Some(stream) = state.stream.take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }

        debug!("connection to {} lost, reconnecting", self.host);
        if let Some(err) = cause {
            (self.errors)(err);
        }

        if let Err(err) = self.connect() {
            warn!("unable to reconnect to {}: {}", self.host, err);
            (self.errors)(err);
        }
    }
}

impl fmt::Debug for TcpInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TcpInner {{ host: {:?}, connector: ..., errors: ..., state: {:?}, stats: {:?} }}",
            self.host, self.state, self.stats,
        )
    }
}

/// Implementation of a `Transport` that writes payloads to a long lived TCP
/// connection, one newline terminated payload per write.
///
/// The connection is established by `connect()`. Concurrent calls make a
/// single attempt between them. Payloads are only written while connected;
/// in any other state they are silently dropped (and counted as such).
///
/// A background thread watches each connection. When the collector closes
/// it, or a write fails, one new connection attempt is made right away. If
/// that attempt fails the error goes to the error handler and the transport
/// stays disconnected until `connect()` is called again. Nothing reconnects
/// once `close()` has been called.
///
/// # Example
///
/// ```no_run
/// use dats::{HostUrl, TcpTransport, Transport};
///
/// let host = HostUrl::parse("tcp://metrics.example.com:8125").unwrap();
/// let transport = TcpTransport::builder(host)
///     .with_error_handler(|e| eprintln!("metrics: {}", e))
///     .build()
///     .unwrap();
///
/// transport.connect().unwrap();
/// transport.send(b"some.counter:1|c").unwrap();
/// transport.close().unwrap();
/// ```
#[derive(Debug)]
pub struct TcpTransport {
    inner: Arc<TcpInner>,
}

impl TcpTransport {
    /// Construct a transport with the system connector and no error handler.
    ///
    /// # Failures
    ///
    /// Fails if the host URL does not use the `tcp` scheme.
    pub fn new(host: HostUrl) -> MetricResult<TcpTransport> {
        Self::builder(host).build()
    }

    pub fn builder(host: HostUrl) -> TcpTransportBuilder {
        TcpTransportBuilder::new(host)
    }

    pub fn host(&self) -> &HostUrl {
        &self.inner.host
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state().status
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_closing(&self) -> bool {
        self.state() == ConnectionState::Closing
    }
}

impl Transport for TcpTransport {
    fn connect(&self) -> MetricResult<bool> {
        self.inner.connect()
    }

    fn send(&self, payload: &[u8]) -> MetricResult<usize> {
        let mut framed = Vec::with_capacity(payload.len() + 1);
        framed.extend_from_slice(payload);
        framed.push(b'\n');

        let stream = {
            let state = self.inner.state();
            match (state.status, state.stream.as_ref()) {
                (ConnectionState::Connected, Some(stream)) => Arc::clone(stream),
                _ => {
                    self.inner.stats.incr_dropped(framed.len());
                    return Ok(0);
                }
            }
        };

        // `close()` may shut the socket down while this is blocked
        match (&*stream).write_all(&framed) {
            Ok(()) => {
                self.inner.stats.incr_sent(framed.len());
                Ok(framed.len())
            }
            Err(e) => {
                // The monitor sees the shutdown and takes care of reconnecting
                let _ = stream.shutdown(Shutdown::Both);
                self.inner.stats.incr_dropped(framed.len());
                Err(MetricError::from(write_error(e)))
            }
        }
    }

    fn close(&self) -> MetricResult<()> {
        let mut state = self.inner.state();
        if state.status != ConnectionState::Closing {
            debug!("closing connection to {}", self.inner.host);
        }

        state.status = ConnectionState::Closing;
        if let Some(stream) = state.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        self.inner.settled.notify_all();
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        (&self.inner.stats).into()
    }
}

// Blocking sockets report an expired write timeout as `WouldBlock` on Unix
fn write_error(err: io::Error) -> io::Error {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            io::Error::new(io::ErrorKind::TimedOut, "write to collector timed out")
        }
        _ => err,
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Builder for creating and customizing a `TcpTransport`.
pub struct TcpTransportBuilder {
    host: HostUrl,
    connector: Box<dyn Connector + Send + Sync>,
    errors: ErrorHandler,
    write_timeout: Duration,
}

impl TcpTransportBuilder {
    fn new(host: HostUrl) -> Self {
        TcpTransportBuilder {
            host,
            connector: Box::new(SystemConnector),
            errors: Arc::new(nop_error_handler),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Use a custom strategy for opening connections.
    pub fn with_connector<C>(mut self, connector: C) -> Self
    where
        C: Connector + Send + Sync + 'static,
    {
        self.connector = Box::new(connector);
        self
    }

    /// Set a handler for errors that happen in the background, i.e. failed
    /// reconnects and connections dropped with an error.
    pub fn with_error_handler<F>(mut self, errors: F) -> Self
    where
        F: Fn(MetricError) + Sync + Send + 'static,
    {
        self.errors = Arc::new(errors);
        self
    }

    /// Give up on a connection when a single write blocks for longer than
    /// `timeout`, e.g. because the collector stopped reading. The failed
    /// write is reported as `ETIMEDOUT` and the connection replaced.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn build(self) -> MetricResult<TcpTransport> {
        if self.host.scheme() != Scheme::Tcp {
            return Err(MetricError::from((
                ErrorKind::InvalidInput,
                "TCP transport requires a tcp URL",
                self.host.to_string(),
            )));
        }

        if self.write_timeout.is_zero() {
            return Err(MetricError::from((ErrorKind::InvalidInput, "write timeout must be > 0")));
        }

        Ok(TcpTransport {
            inner: Arc::new(TcpInner {
                host: self.host,
                connector: self.connector,
                errors: self.errors,
                write_timeout: self.write_timeout,
                state: Mutex::new(TcpState {
                    status: ConnectionState::Disconnected,
                    stream: None,
                    generation: 0,
                }),
                settled: Condvar::new(),
                stats: SocketStats::default(),
            }),
        })
    }
}

impl fmt::Debug for TcpTransportBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TcpTransportBuilder {{ host: {:?}, connector: ..., errors: ..., write_timeout: {:?} }}",
            self.host, self.write_timeout,
        )
    }
}
