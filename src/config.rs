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
use std::net::IpAddr;
use std::process;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::dns::Family;
use crate::types::{ErrorKind, MetricError, MetricResult};

/// Default time a partially filled buffer waits before being flushed.
pub const DEFAULT_BUFFER_FLUSH_TIMEOUT: Duration = Duration::from_millis(100);

/// Default time a cached DNS answer stays valid.
pub const DEFAULT_DNS_TTL: Duration = Duration::from_secs(120);

const HOSTNAME_TOKEN: &str = "${hostname}";
const PID_TOKEN: &str = "${pid}";

/// Transport selected by the scheme of the host URL.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Scheme {
    Udp,
    Udp4,
    Udp6,
    Tcp,
}

impl Scheme {
    /// Address family requested by the scheme, if any.
    pub fn family(self) -> Option<Family> {
        match self {
            Scheme::Udp4 => Some(Family::V4),
            Scheme::Udp6 => Some(Family::V6),
            Scheme::Udp | Scheme::Tcp => None,
        }
    }

    pub fn is_udp(self) -> bool {
        !matches!(self, Scheme::Tcp)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Udp => "udp",
            Scheme::Udp4 => "udp4",
            Scheme::Udp6 => "udp6",
            Scheme::Tcp => "tcp",
        }
    }
}

impl FromStr for Scheme {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "udp" => Ok(Scheme::Udp),
            "udp4" => Ok(Scheme::Udp4),
            "udp6" => Ok(Scheme::Udp6),
            "tcp" => Ok(Scheme::Tcp),
            other => Err(MetricError::from((
                ErrorKind::InvalidUrl,
                "Unsupported URL scheme",
                other.to_string(),
            ))),
        }
    }
}

/// Address of the metrics collector, e.g. `udp://127.0.0.1:8125`.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct HostUrl {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl HostUrl {
    /// Construct an address from its parts, failing if the hostname is empty.
    pub fn new<H>(scheme: Scheme, host: H, port: u16) -> MetricResult<HostUrl>
    where
        H: Into<String>,
    {
        let host = host.into();
        if host.is_empty() {
            return Err(MetricError::from((ErrorKind::InvalidInput, "The hostname is required")));
        }

        Ok(HostUrl { scheme, host, port })
    }

    /// Parse a URL of the form `<scheme>://<host>:<port>`.
    ///
    /// # Failures
    ///
    /// * `Invalid URL` if the input is not a URL at all.
    /// * `Unsupported URL scheme` for anything but `udp`, `udp4`, `udp6` and `tcp`.
    /// * `A port is required` if the port is missing.
    /// * `The hostname is required` if the host is missing.
    pub fn parse(input: &str) -> MetricResult<HostUrl> {
        let url = Url::parse(input)
            .map_err(|e| MetricError::from((ErrorKind::InvalidUrl, "Invalid URL", e.to_string())))?;
        let scheme = url.scheme().parse::<Scheme>()?;
        let port = url
            .port()
            .ok_or_else(|| MetricError::from((ErrorKind::InvalidInput, "A port is required")))?;

        // IPv6 literals come back from the URL wrapped in brackets
        let host = url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
            .unwrap_or("");

        HostUrl::new(scheme, host, port)
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The host as an IP address, if it is a literal rather than a name.
    pub fn ip_literal(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }
}

impl FromStr for HostUrl {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HostUrl::parse(s)
    }
}

impl fmt::Display for HostUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip_literal() {
            Some(IpAddr::V6(ip)) => write!(f, "{}://[{}]:{}", self.scheme.as_str(), ip, self.port),
            _ => write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port),
        }
    }
}

/// Strip leading separators and make sure a non-empty namespace ends with
/// exactly one `.`.
pub fn normalize_namespace(namespace: &str) -> String {
    let trimmed = namespace.trim_start_matches('.').trim_end_matches('.');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}.", trimmed)
    }
}

/// Substitute `${hostname}` and `${pid}` for the current process and
/// normalize the result.
pub fn expand_namespace(template: &str) -> String {
    let hostname = if template.contains(HOSTNAME_TOKEN) {
        gethostname::gethostname().to_string_lossy().into_owned()
    } else {
        String::new()
    };

    expand_namespace_with(template, &hostname, process::id())
}

pub(crate) fn expand_namespace_with(template: &str, hostname: &str, pid: u32) -> String {
    // Dots in a hostname would otherwise add levels to the metric hierarchy
    let expanded = template
        .replace(HOSTNAME_TOKEN, &hostname.replace('.', "_"))
        .replace(PID_TOKEN, &pid.to_string());

    normalize_namespace(&expanded)
}

/// Settings of a client, fixed once it has been built.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub(crate) namespace: String,
    pub(crate) buffer_size: usize,
    pub(crate) buffer_flush_timeout: Duration,
    pub(crate) cache_dns: bool,
    pub(crate) dns_ttl: Duration,
}

impl ClientConfig {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Maximum number of bytes buffered before a flush, `0` when unbuffered.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn buffer_flush_timeout(&self) -> Duration {
        self.buffer_flush_timeout
    }

    pub fn cache_dns(&self) -> bool {
        self.cache_dns
    }

    pub fn dns_ttl(&self) -> Duration {
        self.dns_ttl
    }

    pub(crate) fn validate(&self) -> MetricResult<()> {
        if self.buffer_flush_timeout.is_zero() {
            return Err(MetricError::from((
                ErrorKind::InvalidInput,
                "bufferFlushTimeout must be a number > 0",
            )));
        }

        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            namespace: String::new(),
            buffer_size: 0,
            buffer_flush_timeout: DEFAULT_BUFFER_FLUSH_TIMEOUT,
            cache_dns: false,
            dns_ttl: DEFAULT_DNS_TTL,
        }
    }
}
