// Dats - A Statsd client for Rust over UDP and TCP!
//
// Copyright 2026 Nick Pillitteri
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Utilities for testing Dats itself.
//!
//! Functionality exported to be used by integration tests. This module
//! is NOT part of the Dats API and is subject to change at any time.
//!
//! IF YOU USE THIS CODE YOUR PROJECT WILL BREAK AND YOU WILL DESERVE IT.

use std::io::{self, BufRead, BufReader, ErrorKind};
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

// How often background loops check whether they should stop
const POLL_INTERVAL: Duration = Duration::from_millis(20);

fn url_for(scheme: &str, addr: SocketAddr) -> String {
    match addr {
        SocketAddr::V4(a) => format!("{}://{}:{}", scheme, a.ip(), a.port()),
        SocketAddr::V6(a) => format!("{}://[{}]:{}", scheme, a.ip(), a.port()),
    }
}

/// Fake Statsd server receiving datagrams on the loopback interface.
///
/// Every datagram is decoded as UTF-8 and made available through
/// `.recv_timeout()`. The server is stopped and its thread joined from the
/// destructor.
pub struct UdpCollector {
    addr: SocketAddr,
    receiver: Receiver<String>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl UdpCollector {
    /// Listen on an ephemeral port of `127.0.0.1`.
    pub fn new() -> io::Result<Self> {
        Self::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
    }

    /// Listen on an ephemeral port of `::1`. Fails on hosts without IPv6.
    pub fn new_v6() -> io::Result<Self> {
        Self::bind(SocketAddr::from((Ipv6Addr::LOCALHOST, 0)))
    }

    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let addr = socket.local_addr()?;

        let (tx, rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_ref = shutdown.clone();

        let thread = thread::spawn(move || {
            let mut buf = [0u8; 65536];
            while !shutdown_ref.load(Ordering::Acquire) {
                match socket.recv(&mut buf) {
                    Ok(n) => {
                        let _ = tx.send(String::from_utf8_lossy(&buf[..n]).into_owned());
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
                    Err(e) => eprintln!("Error: {} - {:?}", e, e.kind()),
                }
            }
        });

        Ok(UdpCollector {
            addr,
            receiver: rx,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// URL of this collector using the given scheme, e.g. `udp://127.0.0.1:1234`.
    pub fn url(&self, scheme: &str) -> String {
        url_for(scheme, self.addr)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<String> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Everything received so far that hasn't been consumed yet.
    pub fn drain(&self) -> Vec<String> {
        self.receiver.try_iter().collect()
    }
}

impl Drop for UdpCollector {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

/// Fake Statsd server accepting TCP connections on the loopback interface.
///
/// Lines received on any connection are made available, including their
/// trailing newline, through `.recv_timeout()`. Connections can be dropped
/// from the server side with `.disconnect_clients()` to exercise reconnects.
pub struct TcpCollector {
    addr: SocketAddr,
    receiver: Receiver<String>,
    accepted: Arc<AtomicUsize>,
    clients: Arc<Mutex<Vec<TcpStream>>>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TcpCollector {
    /// Listen on an ephemeral port of `127.0.0.1`.
    pub fn new() -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let (tx, rx) = unbounded();
        let accepted = Arc::new(AtomicUsize::new(0));
        let clients = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let accepted_ref = accepted.clone();
        let clients_ref = clients.clone();
        let shutdown_ref = shutdown.clone();

        let thread = thread::spawn(move || {
            while !shutdown_ref.load(Ordering::Acquire) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        if let Err(e) = Self::handle(stream, &clients_ref, tx.clone()) {
                            eprintln!("Error: {} - {:?}", e, e.kind());
                        }
                        accepted_ref.fetch_add(1, Ordering::AcqRel);
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL / 4),
                    Err(e) => eprintln!("Error: {} - {:?}", e, e.kind()),
                }
            }
        });

        Ok(TcpCollector {
            addr,
            receiver: rx,
            accepted,
            clients,
            shutdown,
            thread: Some(thread),
        })
    }

    fn handle(stream: TcpStream, clients: &Mutex<Vec<TcpStream>>, tx: Sender<String>) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(stream.try_clone()?);

        thread::spawn(move || {
            let mut reader = BufReader::new(stream);
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let _ = tx.send(line);
                    }
                }
            }
        });

        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// URL of this collector, e.g. `tcp://127.0.0.1:1234`.
    pub fn url(&self) -> String {
        url_for("tcp", self.addr)
    }

    /// Number of connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::Acquire)
    }

    /// Wait until at least `n` connections have been accepted.
    pub fn wait_for_accepted(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.accepted() >= n {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        self.accepted() >= n
    }

    /// Close every accepted connection from the server side.
    pub fn disconnect_clients(&self) {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        for client in clients.drain(..) {
            let _ = client.shutdown(Shutdown::Both);
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<String> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Everything received so far that hasn't been consumed yet.
    pub fn drain(&self) -> Vec<String> {
        self.receiver.try_iter().collect()
    }
}

impl Drop for TcpCollector {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
        self.disconnect_clients();
    }
}

/// Address of a local TCP port nothing is listening on.
pub fn closed_tcp_port() -> io::Result<SocketAddr> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    listener.local_addr()
}
