//! Visitor identities derived from a request's network origin.
//!
//! An [Identity] is the subject of view/like deduplication. It is deliberately coarse:
//! IPv4 addresses are kept at full precision, IPv6 addresses are collapsed to their /64
//! routing prefix so that every device behind one household prefix counts once.
//!
//! Visitors sharing a carrier-grade NAT address collapse to one identity as well. That
//! under-counts and is accepted.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use serde::Serialize;
use snafu::{OptionExt as _, Snafu};

/// Number of leading IPv6 bits that identify a visitor.
pub const IPV6_PREFIX_BITS: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum IdentityError {
    #[snafu(display("`{input}` is not a valid network address"))]
    Unparsable { input: String },

    #[snafu(display("request carries no origin address"))]
    MissingOrigin,
}

/// A normalized visitor identity, used as the dedup key of the stats ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct Identity(IpAddr);

impl Identity {
    /// Normalize an already parsed address.
    pub fn from_addr(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Self(IpAddr::V4(v4)),
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => Self(IpAddr::V4(v4)),
                None => Self(IpAddr::V6(mask_v6(v6))),
            },
        }
    }

    /// Parse and normalize an address that may carry a port suffix,
    /// e.g. `203.0.113.5`, `203.0.113.5:8080`, `2001:db8::1` or `[2001:db8::1]:443`.
    pub fn parse(input: &str) -> Result<Self, IdentityError> {
        let trimmed = input.trim();

        if let Ok(socket) = trimmed.parse::<SocketAddr>() {
            return Ok(Self::from_addr(socket.ip()));
        }

        let host = trimmed
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(trimmed);

        host.parse::<IpAddr>()
            .ok()
            .map(Self::from_addr)
            .context(UnparsableSnafu { input })
    }

    /// Resolve the identity of a request.
    ///
    /// The first hop of `X-Forwarded-For` wins, then `X-Real-IP`, then the peer address of
    /// the connection itself. An empty header counts as absent, any other value must parse.
    pub fn from_origin(
        forwarded_for: Option<&str>, real_ip: Option<&str>, peer: Option<SocketAddr>,
    ) -> Result<Self, IdentityError> {
        if let Some(chain) = forwarded_for.filter(|value| !value.is_empty()) {
            let first = chain.split(',').next().unwrap_or(chain);
            return Self::parse(first);
        }

        if let Some(real_ip) = real_ip.filter(|value| !value.is_empty()) {
            return Self::parse(real_ip);
        }

        peer.map(|peer| Self::from_addr(peer.ip()))
            .context(MissingOriginSnafu)
    }

    pub fn addr(&self) -> IpAddr {
        self.0
    }
}

impl std::str::FromStr for Identity {
    type Err = IdentityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.to_string()
    }
}

fn mask_v6(addr: Ipv6Addr) -> Ipv6Addr {
    let mask = u128::MAX << (128 - IPV6_PREFIX_BITS);
    Ipv6Addr::from(u128::from(addr) & mask)
}
