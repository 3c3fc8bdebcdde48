// Dats - A Statsd client for Rust over UDP and TCP!
//
// Copyright 2026 Nick Pillitteri
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

mod core;
mod spy;
mod tcp;
mod udp;

pub(crate) use crate::transport::core::SocketStats;
pub use crate::transport::core::{NopTransport, Transport, TransportStats};
pub use crate::transport::spy::SpyTransport;
pub use crate::transport::tcp::{
    ConnectionState, Connector, SystemConnector, TcpTransport, TcpTransportBuilder, DEFAULT_WRITE_TIMEOUT,
};
pub use crate::transport::udp::UdpTransport;
