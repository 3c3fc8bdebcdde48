// Dats - A Statsd client for Rust over UDP and TCP!
//
// Copyright 2026 Nick Pillitteri
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Export commonly used parts of Dats for easy glob imports
//!
//! # Example
//!
//! ```
//! use dats::prelude::*;
//! use dats::{NopTransport, StatsdClient};
//!
//! let client = StatsdClient::from_transport("some.prefix", NopTransport).unwrap();
//!
//! client.counter("some.counter", 1);
//! client.incr("some.counter");
//! client.timing("some.timer", 23);
//! client.gauge("some.gauge", 45);
//! client.set("some.set", 67);
//! ```

pub use crate::client::{Counted, CountedExt, Gauged, MetricClient, Setted, Timed};
pub use crate::transport::Transport;
