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
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use log::debug;

use crate::buffer::Buffer;
use crate::config::{
    expand_namespace, ClientConfig, HostUrl, Scheme, DEFAULT_BUFFER_FLUSH_TIMEOUT, DEFAULT_DNS_TTL,
};
use crate::dns::{DnsCache, Resolver, SystemResolver};
use crate::transport::{TcpTransport, Transport, TransportStats, UdpTransport};
use crate::types::{
    format_metric, nop_error_handler, ErrorHandler, MetricError, MetricResult, MetricType, MetricValue,
};
use crate::worker::{spawn_dispatcher, CloseCallback, Command, Dispatcher};

/// Conversion trait for valid values for counters
///
/// This trait must be implemented for any types that are used as counter
/// values (currently only `i64`). This trait is internal to how values are
/// formatted as part of metrics but is exposed publicly for documentation
/// purposes.
pub trait ToCounterValue {
    fn to_value(self) -> MetricValue;
}

impl ToCounterValue for i64 {
    fn to_value(self) -> MetricValue {
        MetricValue::Signed(self)
    }
}

/// Conversion trait for valid values for timers
///
/// Currently `u64` milliseconds and `Duration`, which is converted to whole
/// milliseconds.
pub trait ToTimerValue {
    fn to_value(self) -> MetricValue;
}

impl ToTimerValue for u64 {
    fn to_value(self) -> MetricValue {
        MetricValue::Unsigned(self)
    }
}

impl ToTimerValue for Duration {
    fn to_value(self) -> MetricValue {
        MetricValue::from(self)
    }
}

/// Conversion trait for valid values for gauges
pub trait ToGaugeValue {
    fn to_value(self) -> MetricValue;
}

impl ToGaugeValue for u64 {
    fn to_value(self) -> MetricValue {
        MetricValue::Unsigned(self)
    }
}

impl ToGaugeValue for f64 {
    fn to_value(self) -> MetricValue {
        MetricValue::Float(self)
    }
}

/// Conversion trait for valid values for sets
pub trait ToSetValue {
    fn to_value(self) -> MetricValue;
}

impl ToSetValue for i64 {
    fn to_value(self) -> MetricValue {
        MetricValue::Signed(self)
    }
}

/// Trait for incrementing and decrementing counters.
///
/// Counters are simple values incremented or decremented by a client. The
/// rates at which these events occur or average values will be determined
/// by the server receiving them. Examples of counter uses include number
/// of logins to a system or requests received.
///
/// The `_with_rate` variant appends a `|@<rate>` sampling suffix, telling
/// the server the client only sends a fraction of the events.
pub trait Counted<T>
where
    T: ToCounterValue,
{
    /// Increment or decrement the counter by the given amount
    fn counter(&self, key: &str, count: T);

    /// Increment or decrement the counter by the given amount, sampled at
    /// `rate`
    fn counter_with_rate(&self, key: &str, count: T, rate: f64);
}

/// Trait for convenience methods for counters
///
/// This trait specifically implements increment and decrement convenience
/// methods for counters with `i64` types.
pub trait CountedExt: Counted<i64> {
    /// Increment the counter by 1
    fn incr(&self, key: &str) {
        self.counter(key, 1);
    }

    /// Decrement the counter by 1
    fn decr(&self, key: &str) {
        self.counter(key, -1);
    }
}

/// Trait for recording timings in milliseconds.
///
/// Timings are a positive number of milliseconds between a start and end
/// time. Examples include time taken to render a web page or time taken
/// for a database call to return. `Duration` values are converted to
/// milliseconds before being recorded.
pub trait Timed<T>
where
    T: ToTimerValue,
{
    /// Record a timing in milliseconds with the given key
    fn timing(&self, key: &str, time: T);

    /// Record a timing in milliseconds with the given key, sampled at `rate`
    fn timing_with_rate(&self, key: &str, time: T, rate: f64);
}

/// Trait for recording gauge values.
///
/// Gauge values are an instantaneous measurement of a value determined
/// by the client. They do not change unless changed by the client. Examples
/// include things like load average or how many connections are active.
///
/// Gauges are never sampled: a rate passed to `gauge_with_rate` is accepted
/// and left out of the line sent.
pub trait Gauged<T>
where
    T: ToGaugeValue,
{
    /// Record a gauge value with the given key
    fn gauge(&self, key: &str, value: T);

    /// Same as `gauge`, accepting (and ignoring) a sampling rate
    fn gauge_with_rate(&self, key: &str, value: T, rate: f64);
}

/// Trait for recording set values.
///
/// Sets count the number of unique elements in a group. You can use them to,
/// for example, count the unique visitors to your site.
pub trait Setted<T>
where
    T: ToSetValue,
{
    /// Record a single set value with the given key
    fn set(&self, key: &str, value: T);
}

/// Trait that encompasses all other traits for sending metrics.
///
/// If you wish to use `StatsdClient` with a generic type or place a
/// `StatsdClient` instance behind a pointer (such as a `Box`) this will allow
/// you to reference all the implemented methods for recording metrics, while
/// using a single trait.
///
/// ```
/// use std::time::Duration;
/// use dats::{MetricClient, NopTransport, StatsdClient};
///
/// let client: Box<dyn MetricClient> = Box::new(
///     StatsdClient::from_transport("prefix", NopTransport).unwrap());
///
/// client.counter("some.counter", 1);
/// client.incr("some.counter");
/// client.timing("some.timer", 42);
/// client.timing("some.timer", Duration::from_millis(42));
/// client.gauge("some.gauge", 8);
/// client.gauge("some.gauge", 8.5);
/// client.set("some.set", 5);
/// ```
pub trait MetricClient:
    Counted<i64> + CountedExt + Timed<u64> + Timed<Duration> + Gauged<u64> + Gauged<f64> + Setted<i64>
{
}

enum Target {
    Url(String),
    Host(HostUrl),
    Transport(Box<dyn Transport + Send + Sync>),
}

/// Builder for creating and customizing `StatsdClient` instances.
///
/// Instances of the builder should be created by calling the `::builder()`
/// or `::from_transport()` methods on the `StatsdClient` struct.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use dats::prelude::*;
/// use dats::{MetricError, StatsdClient};
///
/// fn my_error_handler(err: MetricError) {
///     eprintln!("Error sending metrics: {} ({})", err, err.code());
/// }
///
/// let client = StatsdClient::builder("udp://metrics.example.com:8125")
///     .with_namespace("my.app.${hostname}")
///     .with_buffer_size(1024)
///     .with_buffer_flush_timeout(Duration::from_millis(250))
///     .with_dns_cache(true)
///     .with_error_handler(my_error_handler)
///     .build()
///     .unwrap();
///
/// client.counter("something", 123);
/// client.close();
/// ```
pub struct StatsdClientBuilder {
    target: Target,
    namespace: String,
    buffer_size: usize,
    buffer_flush_timeout: Duration,
    errors: ErrorHandler,
    cache_dns: bool,
    dns_ttl: Duration,
    resolver: Option<Box<dyn Resolver + Send + Sync>>,
}

impl StatsdClientBuilder {
    // Set the required fields and defaults for optional fields
    fn new(target: Target) -> Self {
        StatsdClientBuilder {
            // required
            target,

            // optional with defaults
            namespace: String::new(),
            buffer_size: 0,
            buffer_flush_timeout: DEFAULT_BUFFER_FLUSH_TIMEOUT,
            errors: Arc::new(nop_error_handler),
            cache_dns: false,
            dns_ttl: DEFAULT_DNS_TTL,
            resolver: None,
        }
    }

    /// Prefix for every metric key. `${hostname}` and `${pid}` are replaced
    /// once, when the client is built.
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// Number of bytes to accumulate before sending. `0` (the default) sends
    /// every metric as soon as it is recorded.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Longest time a metric waits in the buffer. Must be greater than zero.
    pub fn with_buffer_flush_timeout(mut self, timeout: Duration) -> Self {
        self.buffer_flush_timeout = timeout;
        self
    }

    /// Set an error handler for everything that goes wrong after the client
    /// has been built.
    ///
    /// The error handler is invoked from a background thread when metrics
    /// can't be sent, when the host can't be resolved, or when a TCP
    /// connection can't be (re)established. It is never called on success.
    ///
    /// The error handler should consume the error without panicking. The error
    /// may be logged, printed to stderr, discarded, etc. - this is up to the
    /// implementation.
    ///
    /// The handler runs on the thread that writes metrics. Calling `close()`
    /// from it can't wait for that thread, so it behaves like `close_with()`
    /// and returns right away.
    pub fn with_error_handler<F>(mut self, errors: F) -> Self
    where
        F: Fn(MetricError) + Sync + Send + 'static,
    {
        self.errors = Arc::new(errors);
        self
    }

    /// Cache DNS answers for UDP hosts. TCP hosts are resolved on every
    /// connection attempt regardless.
    pub fn with_dns_cache(mut self, cache_dns: bool) -> Self {
        self.cache_dns = cache_dns;
        self
    }

    /// How long a cached DNS answer stays valid.
    pub fn with_dns_ttl(mut self, ttl: Duration) -> Self {
        self.dns_ttl = ttl;
        self
    }

    /// Resolve UDP hostnames with a custom resolver.
    pub fn with_resolver<R>(mut self, resolver: R) -> Self
    where
        R: Resolver + Send + Sync + 'static,
    {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// Send through the given transport instead of one picked from a URL.
    pub fn with_transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + Send + Sync + 'static,
    {
        self.target = Target::Transport(Box::new(transport));
        self
    }

    /// Construct a new `StatsdClient` instance based on current settings.
    ///
    /// This starts the background thread that owns the transport and queues
    /// a first connection attempt, whose failure is reported to the error
    /// handler.
    ///
    /// # Failures
    ///
    /// * The host URL is invalid, uses an unsupported scheme, or lacks a port
    ///   or hostname.
    /// * The buffer flush timeout is zero.
    pub fn build(self) -> MetricResult<StatsdClient> {
        let StatsdClientBuilder {
            target,
            namespace,
            buffer_size,
            buffer_flush_timeout,
            errors,
            cache_dns,
            dns_ttl,
            resolver,
        } = self;

        let config = ClientConfig {
            namespace: expand_namespace(&namespace),
            buffer_size,
            buffer_flush_timeout,
            cache_dns,
            dns_ttl,
        };
        config.validate()?;

        let transport: Box<dyn Transport + Send + Sync> = match target {
            Target::Transport(transport) => transport,
            Target::Url(url) => new_transport(HostUrl::parse(&url)?, &config, resolver, &errors)?,
            Target::Host(host) => new_transport(host, &config, resolver, &errors)?,
        };

        Ok(StatsdClient::from_parts(config, transport, errors))
    }
}

fn new_transport(
    host: HostUrl,
    config: &ClientConfig,
    resolver: Option<Box<dyn Resolver + Send + Sync>>,
    errors: &ErrorHandler,
) -> MetricResult<Box<dyn Transport + Send + Sync>> {
    if host.scheme() == Scheme::Tcp {
        let errors = errors.clone();
        let transport = TcpTransport::builder(host)
            .with_error_handler(move |e| errors(e))
            .build()?;
        return Ok(Box::new(transport));
    }

    let resolver = resolver.unwrap_or_else(|| Box::new(SystemResolver));
    let dns = DnsCache::from_parts(config.dns_ttl, config.cache_dns, resolver);
    Ok(Box::new(UdpTransport::with_dns_cache(host, dns)?))
}

impl fmt::Debug for StatsdClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StatsdClientBuilder {{ namespace: {:?}, buffer_size: {}, buffer_flush_timeout: {:?}, \
             cache_dns: {}, dns_ttl: {:?}, .. }}",
            self.namespace, self.buffer_size, self.buffer_flush_timeout, self.cache_dns, self.dns_ttl,
        )
    }
}

#[derive(Default)]
struct TeardownState {
    done: bool,
    waiters: Vec<CloseCallback>,
}

// Callbacks waiting for the dispatcher to finish closing
#[derive(Default)]
struct Teardown {
    state: Mutex<TeardownState>,
}

impl Teardown {
    fn on_complete(&self, callback: CloseCallback) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.done {
            drop(state);
            callback();
        } else {
            state.waiters.push(callback);
        }
    }

    fn complete(&self) {
        let waiters = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.done = true;
            mem::take(&mut state.waiters)
        };

        for callback in waiters {
            callback();
        }
    }
}

/// Client for Statsd that implements various traits to record metrics.
///
/// # Traits
///
/// The client is the main entry point for users of this library. It supports
/// several traits for recording metrics of different types.
///
/// * `Counted` for emitting counters.
/// * `Timed` for emitting timings.
/// * `Gauged` for emitting gauge values.
/// * `Setted` for emitting set values.
/// * `MetricClient` for a combination of all of the above.
///
/// For more information about the uses for each type of metric, see the
/// documentation for each mentioned trait.
///
/// # Transports
///
/// The client is configured with a URL. `udp://`, `udp4://` and `udp6://`
/// URLs send each payload as a datagram, `tcp://` URLs keep a connection
/// open and reconnect once when it is lost. Any other `Transport` can be
/// plugged in with `from_transport`.
///
/// Recording a metric never blocks on the network and never fails. The line
/// is appended to a buffer (or queued directly when buffering is off) and a
/// background thread writes it. Anything that goes wrong on the way goes to
/// the error handler.
///
/// # Threading
///
/// `StatsdClient` is `Send` and `Sync`. Share it between threads with an
/// `Arc`.
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
/// use dats::prelude::*;
/// use dats::{NopTransport, StatsdClient};
///
/// let client = Arc::new(StatsdClient::from_transport("my.prefix", NopTransport).unwrap());
///
/// let handles: Vec<_> = (0..4).map(|_| {
///     let client = client.clone();
///     thread::spawn(move || client.incr("some.counter"))
/// }).collect();
///
/// for h in handles {
///     h.join().unwrap();
/// }
///
/// client.close();
/// ```
///
/// # Closing
///
/// `close()` flushes whatever is buffered, closes the transport and waits for
/// both to happen. Dropping the client does the same without waiting.
pub struct StatsdClient {
    config: ClientConfig,
    buffer: Arc<Mutex<Buffer>>,
    dispatcher: Arc<Dispatcher>,
    teardown: Arc<Teardown>,
}

impl StatsdClient {
    /// Create a new builder for a client sending to the given URL, e.g.
    /// `udp://127.0.0.1:8125` or `tcp://metrics.example.com:8125`.
    ///
    /// The URL is only checked when `.build()` is called.
    pub fn builder(host: &str) -> StatsdClientBuilder {
        StatsdClientBuilder::new(Target::Url(host.to_string()))
    }

    /// Create a new builder for a client sending to an already parsed host.
    pub fn builder_from_host(host: HostUrl) -> StatsdClientBuilder {
        StatsdClientBuilder::new(Target::Host(host))
    }

    /// Create a new client with the given namespace, sending through a
    /// custom transport with all other settings at their defaults.
    ///
    /// # Example
    ///
    /// ```
    /// use dats::prelude::*;
    /// use dats::{SpyTransport, StatsdClient};
    ///
    /// let (rx, transport) = SpyTransport::new();
    /// let client = StatsdClient::from_transport("my.prefix", transport).unwrap();
    ///
    /// client.counter("some.counter", 1);
    /// client.close();
    ///
    /// assert_eq!(b"my.prefix.some.counter:1|c".to_vec(), rx.recv().unwrap());
    /// ```
    pub fn from_transport<T>(namespace: &str, transport: T) -> MetricResult<Self>
    where
        T: Transport + Send + Sync + 'static,
    {
        Self::builder_from_transport(transport).with_namespace(namespace).build()
    }

    /// Create a new builder for a client sending through a custom transport.
    pub fn builder_from_transport<T>(transport: T) -> StatsdClientBuilder
    where
        T: Transport + Send + Sync + 'static,
    {
        StatsdClientBuilder::new(Target::Transport(Box::new(transport)))
    }

    fn from_parts(
        config: ClientConfig,
        transport: Box<dyn Transport + Send + Sync>,
        errors: ErrorHandler,
    ) -> Self {
        let buffer = Arc::new(Mutex::new(Buffer::new(config.buffer_size)));
        let dispatcher = Arc::new(Dispatcher::new(transport, buffer.clone(), errors));
        spawn_dispatcher(dispatcher.clone());
        dispatcher.submit(Command::Connect(None));

        StatsdClient {
            config,
            buffer,
            dispatcher,
            teardown: Arc::new(Teardown::default()),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a metric of any type.
    ///
    /// The sampling rate is only written for counters and timings. After the
    /// client has been closed this does nothing.
    pub fn emit<V>(&self, key: &str, value: V, metric_type: MetricType, sample_rate: Option<f64>)
    where
        V: Into<MetricValue>,
    {
        let line = format_metric(&self.config.namespace, key, value.into(), metric_type, sample_rate);

        // Payloads are queued while the buffer is still locked so that they
        // reach the transport in the order they were flushed.
        let mut buffer = self.buffer();
        let res = buffer.append(&line);
        if let Some(payload) = res.flushed {
            self.dispatcher.submit(Command::Send(payload.into_bytes()));
        }
        if let Some(cycle) = res.arm {
            let now = Instant::now();
            let deadline = if res.overfull {
                debug!(
                    "{} '{}' does not fit the buffer, sending without delay",
                    metric_type.name(),
                    key
                );
                Some(now)
            } else {
                now.checked_add(self.config.buffer_flush_timeout)
            };

            // A timeout beyond what `Instant` can represent never fires
            if let Some(deadline) = deadline {
                self.dispatcher.submit(Command::Arm { cycle, deadline });
            }
        }
    }

    /// Send everything currently buffered without waiting for the timer.
    pub fn flush(&self) {
        let mut buffer = self.buffer();
        if let Some(payload) = buffer.flush() {
            self.dispatcher.submit(Command::Send(payload.into_bytes()));
        }
    }

    /// Establish the connection (TCP) or bind the socket (UDP) now, and wait
    /// for it to happen. Returns `true` if this call created it.
    ///
    /// Building a client already queues a connection attempt, so calling this
    /// is only needed to learn about the outcome. Returns `Ok(false)` once the
    /// client has been closed.
    pub fn connect(&self) -> MetricResult<bool> {
        let (tx, rx) = bounded(1);
        {
            let buffer = self.buffer();
            if buffer.is_closed() {
                return Ok(false);
            }
            self.dispatcher.submit(Command::Connect(Some(tx)));
        }

        rx.recv().unwrap_or(Ok(false))
    }

    /// Flush the buffer and close the transport, calling `callback` once both
    /// are done. Returns right away.
    ///
    /// Calling this more than once is fine: every callback is invoked once,
    /// after the one and only teardown has completed.
    pub fn close_with<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut buffer = self.buffer();
        if buffer.is_closed() {
            drop(buffer);
            self.teardown.on_complete(Box::new(callback));
            return;
        }

        // Teardown can't complete before the close below is queued
        self.teardown.on_complete(Box::new(callback));
        self.dispatcher.request_close();
        if let Some(payload) = buffer.close() {
            self.dispatcher.submit(Command::Send(payload.into_bytes()));
        }

        let teardown = self.teardown.clone();
        self.dispatcher.submit(Command::Close(Box::new(move || teardown.complete())));
    }

    /// Flush the buffer, close the transport and wait for both.
    ///
    /// Safe to call any number of times. After the client is closed every
    /// metric recorded is silently discarded. When called from the error
    /// handler it only starts the close, the same as `close_with()`.
    ///
    /// If a send fails once closing has started (a TCP write to a collector
    /// that stopped reading times out, for example) the payloads still
    /// queued behind it are dropped so that closing always completes.
    pub fn close(&self) {
        if self.dispatcher.is_current_thread() {
            self.close_with(|| {});
            return;
        }

        let (tx, rx) = bounded(1);
        self.close_with(move || {
            let _ = tx.send(());
        });
        let _ = rx.recv();
    }

    pub fn is_closed(&self) -> bool {
        self.buffer().is_closed()
    }

    /// Namespace prepended to every key, after templating and normalization.
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Metric types this client knows how to send.
    pub fn supported_types(&self) -> &'static [MetricType] {
        &MetricType::ALL
    }

    /// Return I/O telemetry of the transport like bytes / packets sent or
    /// dropped.
    pub fn stats(&self) -> TransportStats {
        self.dispatcher.transport_stats()
    }

    /// Number of times the background thread panicked (most likely in the
    /// error handler) and had to be restarted.
    pub fn panics(&self) -> u64 {
        self.dispatcher.panics()
    }

    /// Approximate number of payloads and commands not yet processed by the
    /// background thread.
    pub fn queued(&self) -> u64 {
        self.dispatcher.queued()
    }

    /// Number of payloads dropped without being sent because a send failed
    /// while the client was closing.
    pub fn discarded(&self) -> u64 {
        self.dispatcher.discarded()
    }
}

impl Drop for StatsdClient {
    fn drop(&mut self) {
        self.close_with(|| {});
    }
}

impl fmt::Debug for StatsdClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StatsdClient {{ config: {:?}, buffer: ..., dispatcher: {:?} }}",
            self.config, self.dispatcher,
        )
    }
}

impl<T> Counted<T> for StatsdClient
where
    T: ToCounterValue,
{
    fn counter(&self, key: &str, count: T) {
        self.emit(key, count.to_value(), MetricType::Counter, None);
    }

    fn counter_with_rate(&self, key: &str, count: T, rate: f64) {
        self.emit(key, count.to_value(), MetricType::Counter, Some(rate));
    }
}

impl CountedExt for StatsdClient {}

impl<T> Timed<T> for StatsdClient
where
    T: ToTimerValue,
{
    fn timing(&self, key: &str, time: T) {
        self.emit(key, time.to_value(), MetricType::Timing, None);
    }

    fn timing_with_rate(&self, key: &str, time: T, rate: f64) {
        self.emit(key, time.to_value(), MetricType::Timing, Some(rate));
    }
}

impl<T> Gauged<T> for StatsdClient
where
    T: ToGaugeValue,
{
    fn gauge(&self, key: &str, value: T) {
        self.emit(key, value.to_value(), MetricType::Gauge, None);
    }

    fn gauge_with_rate(&self, key: &str, value: T, rate: f64) {
        self.emit(key, value.to_value(), MetricType::Gauge, Some(rate));
    }
}

impl<T> Setted<T> for StatsdClient
where
    T: ToSetValue,
{
    fn set(&self, key: &str, value: T) {
        self.emit(key, value.to_value(), MetricType::Set, None);
    }
}

impl MetricClient for StatsdClient {}
