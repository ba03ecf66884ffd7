//! Endpoint descriptions and host list parsing.
//!
//! A host list is a comma separated string. Each entry may contain any number of `{N...M}` ranges
//! which expand into every combination, so `node{1...4}:9000` names four hosts and
//! `rack{1...2}-node{01...03}` names six. Zero-padded lower bounds keep their width.

use std::fmt;

use secrecy::{CloneableSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tokio::net::lookup_host;

use crate::error::{Error, Result};

/// Upper bound on the number of hosts a host list may expand to.
pub const MAX_HOSTS: usize = 10_000;

/// Newtype around a credential string that never shows up in logs.
///
/// Hold it in a [`SecretBox`] so the value is zeroized on drop.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Returns the secret value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Moves the secret into a [`SecretBox`].
    pub fn boxed(self) -> SecretBox<Self> {
        SecretBox::new(Box::new(self))
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for Secret {}
impl SerializableSecret for Secret {}
impl Zeroize for Secret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// One configured storage service address with its credentials and transport settings.
#[derive(Clone, Debug)]
pub struct Endpoint {
    /// `host[:port]` of the service.
    pub host: String,
    /// Access key, sent along with every request when non-empty.
    pub access_key: String,
    /// Secret key belonging to `access_key`.
    pub secret_key: SecretBox<Secret>,
    /// Whether to talk HTTPS.
    pub tls: bool,
    /// Skip certificate verification when `tls` is set.
    pub insecure: bool,
    /// Optional region name.
    pub region: Option<String>,
}

impl Endpoint {
    /// Creates a plain-HTTP endpoint without credentials.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            access_key: String::new(),
            secret_key: Secret::default().boxed(),
            tls: false,
            insecure: false,
            region: None,
        }
    }

    /// The base URL of this endpoint, without a trailing slash.
    pub fn url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}", self.host)
    }
}

/// Splits a comma separated host list and expands all `{N...M}` ranges.
///
/// Fails if the list expands to more than [`MAX_HOSTS`] hosts.
pub fn parse_hosts(list: &str) -> Result<Vec<String>> {
    let mut hosts = Vec::new();
    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        expand_ellipses(entry, &mut hosts)?;
    }
    Ok(hosts)
}

fn expand_ellipses(pattern: &str, out: &mut Vec<String>) -> Result<()> {
    let Some(open) = pattern.find('{') else {
        if pattern.contains('}') {
            return Err(invalid_host(pattern, "unbalanced `}`"));
        }
        if out.len() >= MAX_HOSTS {
            return Err(invalid_host(pattern, "host list expands to too many hosts"));
        }
        out.push(pattern.to_owned());
        return Ok(());
    };
    let close = pattern[open..]
        .find('}')
        .map(|idx| open + idx)
        .ok_or_else(|| invalid_host(pattern, "unbalanced `{`"))?;

    let range = &pattern[open + 1..close];
    let (low, high) = range
        .split_once("...")
        .ok_or_else(|| invalid_host(pattern, "expected a range like {1...4}"))?;
    let start: u64 = low
        .parse()
        .map_err(|_| invalid_host(pattern, "range bounds must be numbers"))?;
    let end: u64 = high
        .parse()
        .map_err(|_| invalid_host(pattern, "range bounds must be numbers"))?;
    if start > end {
        return Err(invalid_host(pattern, "range start is after its end"));
    }
    let width = if low.starts_with('0') && low.len() > 1 {
        low.len()
    } else {
        0
    };

    let (prefix, suffix) = (&pattern[..open], &pattern[close + 1..]);
    for n in start..=end {
        expand_ellipses(&format!("{prefix}{n:0width$}{suffix}"), out)?;
    }
    Ok(())
}

fn invalid_host(host: &str, reason: &str) -> Error {
    Error::InvalidHost {
        host: host.to_owned(),
        reason: reason.to_owned(),
    }
}

/// Resolves every host to all of its IP addresses, keeping the port if one was given.
pub async fn resolve_hosts(hosts: &[String]) -> Result<Vec<String>> {
    let mut resolved = Vec::new();
    for host in hosts {
        let (name, port) = match host.rsplit_once(':') {
            Some((name, port)) if port.parse::<u16>().is_ok() => (name, Some(port)),
            _ => (host.as_str(), None),
        };

        // The port is irrelevant for the lookup itself.
        let addrs = lookup_host((name, 0))
            .await
            .map_err(|err| invalid_host(host, &err.to_string()))?;
        for addr in addrs {
            let ip = addr.ip();
            let ip = if ip.is_ipv6() {
                format!("[{ip}]")
            } else {
                ip.to_string()
            };
            match port {
                Some(port) => resolved.push(format!("{ip}:{port}")),
                None => resolved.push(ip),
            }
        }
    }
    Ok(resolved)
}
