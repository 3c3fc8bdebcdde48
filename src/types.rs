// Dats - A Statsd client for Rust over UDP and TCP!
//
// Copyright 2026 Nick Pillitteri
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::error;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Callback that receives every error encountered after a client has been
/// built: resolution failures, socket errors, failed reconnects.
pub(crate) type ErrorHandler = Arc<dyn Fn(MetricError) + Sync + Send>;

pub(crate) fn nop_error_handler(_err: MetricError) {
    // nothing to see here
}

/// Type of a Statsd metric, determining the type suffix written after the
/// value on the wire.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum MetricType {
    Counter,
    Timing,
    Gauge,
    Set,
}

impl MetricType {
    /// Every metric type this client knows how to emit.
    pub const ALL: [MetricType; 4] = [
        MetricType::Counter,
        MetricType::Timing,
        MetricType::Gauge,
        MetricType::Set,
    ];

    /// The wire suffix for this type, e.g. `c` for counters.
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Counter => "c",
            MetricType::Timing => "ms",
            MetricType::Gauge => "g",
            MetricType::Set => "s",
        }
    }

    /// Name of the client method used to emit this type.
    pub fn name(self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Timing => "timing",
            MetricType::Gauge => "gauge",
            MetricType::Set => "set",
        }
    }

    /// Gauges and sets never carry a sampling suffix.
    fn is_sampled(self) -> bool {
        matches!(self, MetricType::Counter | MetricType::Timing)
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

/// Value of a metric as written on the wire.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum MetricValue {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MetricValue::Signed(v) => v.fmt(f),
            MetricValue::Unsigned(v) => v.fmt(f),
            MetricValue::Float(v) => v.fmt(f),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Signed(v)
    }
}

impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        MetricValue::Signed(i64::from(v))
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Unsigned(v)
    }
}

impl From<u32> for MetricValue {
    fn from(v: u32) -> Self {
        MetricValue::Unsigned(u64::from(v))
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<Duration> for MetricValue {
    fn from(d: Duration) -> Self {
        // Timings are whole milliseconds; anything that doesn't fit is clamped.
        MetricValue::Unsigned(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Build the canonical `<namespace><key>:<value>|<type>[|@<rate>]` line.
///
/// The namespace is expected to be normalized already (empty, or ending
/// with a single `.`).
pub(crate) fn format_metric(
    namespace: &str,
    key: &str,
    value: MetricValue,
    type_: MetricType,
    sample_rate: Option<f64>,
) -> String {
    match sample_rate {
        Some(rate) if type_.is_sampled() => format!("{}{}:{}|{}|@{}", namespace, key, value, type_, rate),
        _ => format!("{}{}:{}|{}", namespace, key, value, type_),
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ErrorKind {
    InvalidInput,
    InvalidUrl,
    ResolveError,
    IoError,
}

#[derive(Debug)]
pub struct MetricError {
    repr: ErrorRepr,
}

#[derive(Debug)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDetail(ErrorKind, &'static str, String),
    IoError(io::Error),
}

impl MetricError {
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::IoError(_) => ErrorKind::IoError,
            ErrorRepr::WithDescription(kind, _) => kind,
            ErrorRepr::WithDetail(kind, _, _) => kind,
        }
    }

    /// Machine readable, errno style code for this error (`ENOTFOUND`,
    /// `ECONNREFUSED`, `EPIPE`, ...).
    pub fn code(&self) -> &'static str {
        match self.repr {
            ErrorRepr::IoError(ref err) => io_error_code(err),
            ErrorRepr::WithDescription(kind, _) | ErrorRepr::WithDetail(kind, _, _) => match kind {
                ErrorKind::InvalidInput => "EINVAL",
                ErrorKind::InvalidUrl => "ERR_INVALID_URL",
                ErrorKind::ResolveError => "ENOTFOUND",
                ErrorKind::IoError => "EIO",
            },
        }
    }
}

fn io_error_code(err: &io::Error) -> &'static str {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => "ECONNREFUSED",
        io::ErrorKind::ConnectionReset => "ECONNRESET",
        io::ErrorKind::ConnectionAborted => "ECONNABORTED",
        io::ErrorKind::NotConnected => "ENOTCONN",
        io::ErrorKind::BrokenPipe => "EPIPE",
        io::ErrorKind::TimedOut => "ETIMEDOUT",
        io::ErrorKind::WouldBlock => "EAGAIN",
        io::ErrorKind::AddrInUse => "EADDRINUSE",
        io::ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL",
        io::ErrorKind::PermissionDenied => "EACCES",
        io::ErrorKind::InvalidInput => "EINVAL",
        _ => "EIO",
    }
}

impl fmt::Display for MetricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.repr {
            ErrorRepr::IoError(ref err) => err.fmt(f),
            ErrorRepr::WithDescription(_, desc) => desc.fmt(f),
            ErrorRepr::WithDetail(_, desc, ref detail) => write!(f, "{}: {}", desc, detail),
        }
    }
}

impl error::Error for MetricError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self.repr {
            ErrorRepr::IoError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for MetricError {
    fn from(err: io::Error) -> MetricError {
        MetricError {
            repr: ErrorRepr::IoError(err),
        }
    }
}

impl From<(ErrorKind, &'static str)> for MetricError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> MetricError {
        MetricError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for MetricError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> MetricError {
        MetricError {
            repr: ErrorRepr::WithDetail(kind, desc, detail),
        }
    }
}

pub type MetricResult<T> = Result<T, MetricError>;
