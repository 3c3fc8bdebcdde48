// Dats - A Statsd client for Rust over UDP and TCP!
//
// Copyright 2026 Nick Pillitteri
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A Statsd client for Rust over UDP and TCP!
//!
//! Dats turns counters, timings, gauges and sets into Statsd lines and ships
//! them to a collector without ever blocking the caller on the network.
//!
//! ## Features
//!
//! * Counters, timings, gauges and sets, with optional sampling rates.
//! * UDP (`udp://`, `udp4://`, `udp6://`) and TCP (`tcp://`) transports,
//!   picked from the URL of the collector.
//! * Optional buffering: lines are batched up to a size and sent when the
//!   buffer is full or a timeout expires.
//! * Optional DNS caching for UDP hosts, with a configurable TTL.
//! * TCP connections that reconnect by themselves when the collector drops
//!   them.
//! * Namespace templating with `${hostname}` and `${pid}`.
//! * Support for alternate backends via the `Transport` trait.
//!
//! ## Install
//!
//! To make use of `dats` in your project, add it as a dependency in your `Cargo.toml` file.
//!
//! ```toml
//! [dependencies]
//! dats = "x.y.z"
//! ```
//!
//! ## Usage
//!
//! ### Simple Use
//!
//! Create a client for a collector listening on UDP and send a few metrics.
//! Every metric is sent as its own datagram, right away.
//!
//! ```rust,no_run
//! use dats::prelude::*;
//! use dats::StatsdClient;
//!
//! let client = StatsdClient::builder("udp://metrics.example.com:8125")
//!     .with_namespace("my.metrics")
//!     .build()
//!     .unwrap();
//!
//! client.counter("number.of.conditionals", 1);
//! client.timing("some.method.call", 42);
//! client.gauge("some.thing", 7);
//! client.set("users.uniques", 42);
//! ```
//!
//! ### Buffered Use
//!
//! When sending a lot of metrics, batch them. Lines are joined with `\n` and
//! sent once adding another one would go over the buffer size, or once the
//! flush timeout has passed since the first line of the batch.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use dats::prelude::*;
//! use dats::StatsdClient;
//!
//! let client = StatsdClient::builder("udp://metrics.example.com:8125")
//!     .with_namespace("my.metrics")
//!     .with_buffer_size(1432)
//!     .with_buffer_flush_timeout(Duration::from_millis(500))
//!     .with_dns_cache(true)
//!     .build()
//!     .unwrap();
//!
//! client.incr("requests");
//! client.timing("request.time", Duration::from_millis(12));
//!
//! // Sends anything still buffered and waits for it to be written
//! client.close();
//! ```
//!
//! ### TCP
//!
//! Over TCP, each payload is terminated by a newline. The connection is
//! opened in the background when the client is built, and opened again once
//! if the collector drops it. Errors are never returned by the methods that
//! record metrics, they go to the error handler instead.
//!
//! ```rust,no_run
//! use dats::prelude::*;
//! use dats::{MetricError, StatsdClient};
//!
//! fn my_error_handler(err: MetricError) {
//!     eprintln!("Error sending metrics: {} ({})", err, err.code());
//! }
//!
//! let client = StatsdClient::builder("tcp://metrics.example.com:8125")
//!     .with_namespace("my.metrics.${hostname}")
//!     .with_error_handler(my_error_handler)
//!     .build()
//!     .unwrap();
//!
//! // Optional, wait for the connection to be established
//! if let Err(e) = client.connect() {
//!     eprintln!("Unable to connect: {}", e);
//! }
//!
//! client.incr("logins");
//! client.close();
//! ```
//!
//! ### Custom Transports
//!
//! Anything implementing `Transport` can be used in place of the built in
//! UDP and TCP transports.
//!
//! ```rust
//! use dats::prelude::*;
//! use dats::{MetricResult, StatsdClient, Transport};
//!
//! struct StderrTransport;
//!
//! impl Transport for StderrTransport {
//!     fn send(&self, payload: &[u8]) -> MetricResult<usize> {
//!         eprintln!("{}", String::from_utf8_lossy(payload));
//!         Ok(payload.len())
//!     }
//! }
//!
//! let client = StatsdClient::from_transport("my.metrics", StderrTransport).unwrap();
//! client.incr("some.counter");
//! client.close();
//! ```

pub const DEFAULT_PORT: u16 = 8125;

pub use self::client::{
    Counted, CountedExt, Gauged, MetricClient, Setted, StatsdClient, StatsdClientBuilder, Timed,
    ToCounterValue, ToGaugeValue, ToSetValue, ToTimerValue,
};

pub use self::config::{
    expand_namespace, normalize_namespace, ClientConfig, HostUrl, Scheme, DEFAULT_BUFFER_FLUSH_TIMEOUT,
    DEFAULT_DNS_TTL,
};

pub use self::dns::{Clock, DnsCache, Family, ManualClock, Resolver, SystemClock, SystemResolver};

pub use self::transport::{
    ConnectionState, Connector, NopTransport, SpyTransport, SystemConnector, TcpTransport,
    TcpTransportBuilder, Transport, TransportStats, UdpTransport, DEFAULT_WRITE_TIMEOUT,
};

pub use self::types::{ErrorKind, MetricError, MetricResult, MetricType, MetricValue};

mod buffer;
mod client;
mod config;
mod dns;
pub mod prelude;
mod transport;
mod types;
mod worker;

#[doc(hidden)]
pub mod test;
