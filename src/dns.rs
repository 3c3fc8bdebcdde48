// Dats - A Statsd client for Rust over UDP and TCP!
//
// Copyright 2026 Nick Pillitteri
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::trace;

use crate::types::{ErrorKind, MetricError, MetricResult};

/// IP address family, i.e. which DNS record type (A or AAAA) to look up.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(addr: &IpAddr) -> Family {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }

    pub fn matches(self, addr: &IpAddr) -> bool {
        Family::of(addr) == self
    }
}

/// Strategy for turning a hostname into an address.
///
/// When `family` is `None` the first address of any family is returned.
pub trait Resolver {
    fn resolve(&self, hostname: &str, family: Option<Family>) -> MetricResult<IpAddr>;
}

impl<F> Resolver for F
where
    F: Fn(&str, Option<Family>) -> MetricResult<IpAddr>,
{
    fn resolve(&self, hostname: &str, family: Option<Family>) -> MetricResult<IpAddr> {
        (self)(hostname, family)
    }
}

/// Resolver backed by the platform's resolver (`getaddrinfo` and friends).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, hostname: &str, family: Option<Family>) -> MetricResult<IpAddr> {
        let addrs = (hostname, 0).to_socket_addrs().map_err(|e| {
            let detail = format!("{} ({})", hostname, e);
            MetricError::from((ErrorKind::ResolveError, "Unable to resolve host", detail))
        })?;

        addrs
            .map(|addr| addr.ip())
            .find(|ip| family.map_or(true, |f| f.matches(ip)))
            .ok_or_else(|| {
                let detail = hostname.to_string();
                MetricError::from((ErrorKind::ResolveError, "No address of the requested family", detail))
            })
    }
}

/// Source of the current time for cache expiry.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Meant for tests.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            base: Instant::now(),
            offset: Mutex::new(Duration::from_millis(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Clock for std::sync::Arc<T>
where
    T: Clock + ?Sized,
{
    fn now(&self) -> Instant {
        (**self).now()
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    address: IpAddr,
    // None when the TTL reaches past anything an `Instant` can represent
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

type CacheKey = (String, Option<Family>);

/// Memoizes hostname resolution for a fixed time-to-live.
///
/// Entries are keyed by hostname and requested family, so A and AAAA answers
/// for the same name are cached independently. An entry is only served while
/// `now < expires_at`; failures are never cached. With caching disabled, or a
/// TTL of zero, every lookup goes to the resolver.
pub struct DnsCache {
    resolver: Box<dyn Resolver + Send + Sync>,
    clock: Box<dyn Clock + Send + Sync>,
    ttl: Duration,
    enabled: bool,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl DnsCache {
    /// Cache answers from the system resolver for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self::with_resolver(ttl, SystemResolver)
    }

    /// Cache answers from a custom resolver for `ttl`.
    pub fn with_resolver<R>(ttl: Duration, resolver: R) -> Self
    where
        R: Resolver + Send + Sync + 'static,
    {
        Self::from_parts(ttl, true, Box::new(resolver))
    }

    /// Pass every lookup straight through to the system resolver.
    pub fn disabled() -> Self {
        Self::disabled_with_resolver(SystemResolver)
    }

    /// Pass every lookup straight through to a custom resolver.
    pub fn disabled_with_resolver<R>(resolver: R) -> Self
    where
        R: Resolver + Send + Sync + 'static,
    {
        Self::from_parts(Duration::from_secs(0), false, Box::new(resolver))
    }

    pub(crate) fn from_parts(
        ttl: Duration,
        enabled: bool,
        resolver: Box<dyn Resolver + Send + Sync>,
    ) -> Self {
        DnsCache {
            resolver,
            clock: Box::new(SystemClock),
            ttl,
            enabled,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Use a different clock for expiry decisions.
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// True if answers are actually being stored.
    pub fn is_caching(&self) -> bool {
        self.enabled && !self.ttl.is_zero()
    }

    /// Number of entries currently stored, expired or not.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve `hostname`, serving a live cached answer when there is one.
    ///
    /// The cache lock is not held while the resolver runs, so two concurrent
    /// misses for the same key may both resolve; the last one to finish wins.
    pub fn resolve(&self, hostname: &str, family: Option<Family>) -> MetricResult<IpAddr> {
        if !self.is_caching() {
            return self.resolver.resolve(hostname, family);
        }

        let key = (hostname.to_string(), family);
        let now = self.clock.now();
        if let Some(entry) = self.entries().get(&key) {
            if entry.is_live(now) {
                return Ok(entry.address);
            }
        }

        let address = self.resolver.resolve(hostname, family)?;
        let expires_at = self.clock.now().checked_add(self.ttl);
        trace!("resolved {} ({:?}) to {}, cached for {:?}", hostname, family, address, self.ttl);
        self.entries().insert(key, CacheEntry { address, expires_at });
        Ok(address)
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for DnsCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DnsCache {{ resolver: ..., clock: ..., ttl: {:?}, enabled: {:?}, entries: {} }}",
            self.ttl,
            self.enabled,
            self.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{Clock, DnsCache, Family, ManualClock, Resolver, SystemResolver};
    use crate::types::{ErrorKind, MetricError, MetricResult};
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingResolver {
        calls: Arc<AtomicUsize>,
    }

    impl Resolver for CountingResolver {
        fn resolve(&self, _hostname: &str, family: Option<Family>) -> MetricResult<IpAddr> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match family {
                Some(Family::V6) => Ok(IpAddr::V6(Ipv6Addr::LOCALHOST)),
                _ => Ok(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            }
        }
    }

    fn counting_cache(ttl: Duration) -> (Arc<AtomicUsize>, Arc<ManualClock>, DnsCache) {
        let calls = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(ManualClock::new());
        let cache = DnsCache::with_resolver(ttl, CountingResolver { calls: calls.clone() })
            .with_clock(clock.clone());
        (calls, clock, cache)
    }

    #[test]
    fn test_resolves_once_per_ttl_window() {
        let (calls, clock, cache) = counting_cache(Duration::from_millis(900));

        cache.resolve("blabla", Some(Family::V4)).unwrap();
        clock.advance(Duration::from_millis(300));
        cache.resolve("blabla", Some(Family::V4)).unwrap();
        clock.advance(Duration::from_millis(300));
        cache.resolve("blabla", Some(Family::V4)).unwrap();
        assert_eq!(1, calls.load(Ordering::SeqCst));

        clock.advance(Duration::from_millis(301));
        cache.resolve("blabla", Some(Family::V4)).unwrap();
        assert_eq!(2, calls.load(Ordering::SeqCst));
    }

    #[test]
    fn test_expiry_is_exclusive() {
        let (calls, clock, cache) = counting_cache(Duration::from_secs(1));

        cache.resolve("host", None).unwrap();
        clock.advance(Duration::from_secs(1));
        cache.resolve("host", None).unwrap();
        assert_eq!(2, calls.load(Ordering::SeqCst));
    }

    #[test]
    fn test_expired_entry_is_replaced() {
        let (calls, clock, cache) = counting_cache(Duration::from_secs(1));

        cache.resolve("host", None).unwrap();
        clock.advance(Duration::from_millis(1100));
        cache.resolve("host", None).unwrap();
        clock.advance(Duration::from_millis(200));
        cache.resolve("host", None).unwrap();

        assert_eq!(2, calls.load(Ordering::SeqCst));
        assert_eq!(1, cache.len());
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let (calls, clock, cache) = counting_cache(Duration::from_secs(u64::MAX));

        cache.resolve("host", None).unwrap();
        clock.advance(Duration::from_secs(10 * 365 * 24 * 3600));
        cache.resolve("host", None).unwrap();

        assert_eq!(1, calls.load(Ordering::SeqCst));
    }

    #[test]
    fn test_families_cached_independently() {
        let (calls, _clock, cache) = counting_cache(Duration::from_secs(60));

        let v4 = cache.resolve("localhost", Some(Family::V4)).unwrap();
        let v6 = cache.resolve("localhost", Some(Family::V6)).unwrap();
        cache.resolve("localhost", Some(Family::V4)).unwrap();
        cache.resolve("localhost", Some(Family::V6)).unwrap();

        assert_eq!(IpAddr::V4(Ipv4Addr::LOCALHOST), v4);
        assert_eq!(IpAddr::V6(Ipv6Addr::LOCALHOST), v6);
        assert_eq!(2, calls.load(Ordering::SeqCst));
        assert_eq!(2, cache.len());
    }

    #[test]
    fn test_zero_ttl_always_resolves() {
        let (calls, _clock, cache) = counting_cache(Duration::from_secs(0));

        cache.resolve("host", None).unwrap();
        cache.resolve("host", None).unwrap();
        cache.resolve("host", None).unwrap();

        assert!(!cache.is_caching());
        assert_eq!(3, calls.load(Ordering::SeqCst));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disabled_always_resolves() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = DnsCache::disabled_with_resolver(CountingResolver { calls: calls.clone() });

        cache.resolve("host", None).unwrap();
        cache.resolve("host", None).unwrap();

        assert_eq!(2, calls.load(Ordering::SeqCst));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failures_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_ref = calls.clone();
        let resolver = move |hostname: &str, _family: Option<Family>| -> MetricResult<IpAddr> {
            let n = calls_ref.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                let detail = hostname.to_string();
                Err(MetricError::from((ErrorKind::ResolveError, "Unable to resolve host", detail)))
            } else {
                Ok(IpAddr::V4(Ipv4Addr::LOCALHOST))
            }
        };
        let cache = DnsCache::with_resolver(Duration::from_secs(60), resolver);

        let err = cache.resolve("flaky", None).unwrap_err();
        assert_eq!("ENOTFOUND", err.code());
        assert!(cache.is_empty());

        assert_eq!(IpAddr::V4(Ipv4Addr::LOCALHOST), cache.resolve("flaky", None).unwrap());
        cache.resolve("flaky", None).unwrap();
        assert_eq!(2, calls.load(Ordering::SeqCst));
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_millis(250));
        assert_eq!(Duration::from_millis(250), clock.now() - start);
    }

    #[test]
    fn test_system_resolver_localhost_v4() {
        let addr = SystemResolver.resolve("localhost", Some(Family::V4)).unwrap();
        assert_eq!(IpAddr::V4(Ipv4Addr::LOCALHOST), addr);
    }

    #[test]
    fn test_system_resolver_ip_literal() {
        let addr = SystemResolver.resolve("127.0.0.1", None).unwrap();
        assert_eq!(IpAddr::V4(Ipv4Addr::LOCALHOST), addr);
    }
}
