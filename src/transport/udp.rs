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
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::config::HostUrl;
use crate::dns::{DnsCache, Family};
use crate::transport::core::{SocketStats, Transport, TransportStats};
use crate::types::{ErrorKind, MetricError, MetricResult};

#[derive(Debug)]
struct BoundSocket {
    socket: UdpSocket,
    family: Family,
}

#[derive(Debug, Default)]
struct UdpState {
    socket: Option<BoundSocket>,
    closed: bool,
}

/// Implementation of a `Transport` that sends payloads over UDP.
///
/// Each payload becomes a single datagram, sent with `send_to` over a
/// non-blocking socket, so sending never waits on the collector. There is no
/// connection to lose and therefore no reconnection: errors are returned to
/// the caller and the next payload is attempted as usual.
///
/// When the host is a name rather than an IP literal it is resolved through
/// a `DnsCache` on every send. Whether that actually caches anything depends
/// on how the cache was constructed. The socket is bound to the family of
/// the destination and rebound if a later answer switches families.
#[derive(Debug)]
pub struct UdpTransport {
    host: HostUrl,
    dns: DnsCache,
    state: Mutex<UdpState>,
    stats: SocketStats,
}

impl UdpTransport {
    /// Construct a transport resolving the host on every send.
    ///
    /// # Failures
    ///
    /// Fails if the host URL does not use one of the UDP schemes.
    pub fn new(host: HostUrl) -> MetricResult<UdpTransport> {
        Self::with_dns_cache(host, DnsCache::disabled())
    }

    /// Construct a transport resolving the host through the given cache.
    pub fn with_dns_cache(host: HostUrl, dns: DnsCache) -> MetricResult<UdpTransport> {
        if !host.scheme().is_udp() {
            return Err(MetricError::from((
                ErrorKind::InvalidInput,
                "UDP transport requires a udp, udp4 or udp6 URL",
                host.to_string(),
            )));
        }

        Ok(UdpTransport {
            host,
            dns,
            state: Mutex::new(UdpState::default()),
            stats: SocketStats::default(),
        })
    }

    pub fn host(&self) -> &HostUrl {
        &self.host
    }

    pub fn dns_cache(&self) -> &DnsCache {
        &self.dns
    }

    /// Family of the currently bound socket, if any.
    pub fn bound_family(&self) -> Option<Family> {
        self.state().socket.as_ref().map(|s| s.family)
    }

    fn state(&self) -> MutexGuard<'_, UdpState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn destination(&self) -> MetricResult<SocketAddr> {
        let ip = match self.host.ip_literal() {
            Some(ip) => ip,
            None => self.dns.resolve(self.host.host(), self.host.scheme().family())?,
        };

        Ok(SocketAddr::new(ip, self.host.port()))
    }

    // Family to bind up front, before anything has been sent
    fn initial_family(&self) -> MetricResult<Family> {
        if let Some(ip) = self.host.ip_literal() {
            return Ok(Family::of(&ip));
        }

        if self.dns.is_caching() {
            return self.destination().map(|addr| Family::of(&addr.ip()));
        }

        Ok(self.host.scheme().family().unwrap_or(Family::V4))
    }
}

fn bind(family: Family) -> io::Result<UdpSocket> {
    let socket = match family {
        Family::V4 => UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?,
        Family::V6 => UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))?,
    };
    socket.set_nonblocking(true)?;
    Ok(socket)
}

impl Transport for UdpTransport {
    fn connect(&self) -> MetricResult<bool> {
        let mut state = self.state();
        if state.closed || state.socket.is_some() {
            return Ok(false);
        }

        let family = self.initial_family()?;
        let socket = bind(family)?;
        debug!("bound {:?} udp socket for {}", family, self.host);
        state.socket = Some(BoundSocket { socket, family });
        Ok(true)
    }

    fn send(&self, payload: &[u8]) -> MetricResult<usize> {
        let mut state = self.state();
        if state.closed {
            self.stats.incr_dropped(payload.len());
            return Ok(0);
        }

        let addr = match self.destination() {
            Ok(addr) => addr,
            Err(e) => {
                self.stats.incr_dropped(payload.len());
                return Err(e);
            }
        };

        let family = Family::of(&addr.ip());
        let stale = state.socket.as_ref().map_or(true, |s| s.family != family);
        if stale {
            let socket = bind(family).map_err(|e| {
                self.stats.incr_dropped(payload.len());
                MetricError::from(e)
            })?;
            debug!("bound {:?} udp socket for {}", family, self.host);
            state.socket = Some(BoundSocket { socket, family });
        }

        let res = match state.socket.as_ref() {
            Some(bound) => bound.socket.send_to(payload, addr),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        };

        Ok(self.stats.update(res, payload.len())?)
    }

    fn close(&self) -> MetricResult<()> {
        let mut state = self.state();
        if !state.closed {
            debug!("closing udp transport for {}", self.host);
        }

        state.closed = true;
        state.socket = None;
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        (&self.stats).into()
    }
}
