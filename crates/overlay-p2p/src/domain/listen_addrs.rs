//! Listen address derivation.
//!
//! One configured port yields four listeners: QUIC over UDP and TCP, each on
//! IPv6 and IPv4. The same port number is shared by all four.

use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// IP family of a listen address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

/// Transport of a listen address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// QUIC v1 over UDP.
    Quic,
    Tcp,
}

/// A single listen address with its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddress {
    pub family: AddressFamily,
    pub transport: TransportKind,
    pub addr: Multiaddr,
}

/// The ordered set of addresses a node listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddressSet {
    port: u16,
    entries: [ListenAddress; 4],
}

impl ListenAddressSet {
    /// Wildcard hosts on both families.
    pub fn from_port(port: u16) -> Self {
        Self::with_hosts(port, Ipv4Addr::UNSPECIFIED, Ipv6Addr::UNSPECIFIED)
    }

    /// Explicit hosts; count and ordering stay the same.
    pub fn with_hosts(port: u16, ipv4: Ipv4Addr, ipv6: Ipv6Addr) -> Self {
        let entry = |family, transport| {
            let ip = match family {
                AddressFamily::Ipv4 => IpAddr::V4(ipv4),
                AddressFamily::Ipv6 => IpAddr::V6(ipv6),
            };
            ListenAddress {
                family,
                transport,
                addr: build_multiaddr(ip, transport, port),
            }
        };

        Self {
            port,
            entries: [
                entry(AddressFamily::Ipv6, TransportKind::Quic),
                entry(AddressFamily::Ipv4, TransportKind::Quic),
                entry(AddressFamily::Ipv6, TransportKind::Tcp),
                entry(AddressFamily::Ipv4, TransportKind::Tcp),
            ],
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn entries(&self) -> &[ListenAddress] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Multiaddr> {
        self.entries.iter().map(|e| &e.addr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

fn build_multiaddr(ip: IpAddr, transport: TransportKind, port: u16) -> Multiaddr {
    let base = match ip {
        IpAddr::V4(v4) => Multiaddr::empty().with(Protocol::Ip4(v4)),
        IpAddr::V6(v6) => Multiaddr::empty().with(Protocol::Ip6(v6)),
    };
    match transport {
        TransportKind::Quic => base.with(Protocol::Udp(port)).with(Protocol::QuicV1),
        TransportKind::Tcp => base.with(Protocol::Tcp(port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_four_distinct_pairs_for_any_port() {
        for port in [0u16, 1, 4001, 8001, u16::MAX] {
            let set = ListenAddressSet::from_port(port);
            assert_eq!(set.len(), 4);

            let pairs: HashSet<_> = set
                .entries()
                .iter()
                .map(|e| (e.family, e.transport))
                .collect();
            assert_eq!(pairs.len(), 4, "port {port}");
        }
    }

    #[test]
    fn test_rendering_and_order() {
        let set = ListenAddressSet::from_port(8001);
        let rendered: Vec<String> = set.iter().map(ToString::to_string).collect();

        assert_eq!(
            rendered,
            vec![
                "/ip6/::/udp/8001/quic-v1",
                "/ip4/0.0.0.0/udp/8001/quic-v1",
                "/ip6/::/tcp/8001",
                "/ip4/0.0.0.0/tcp/8001",
            ]
        );
    }

    #[test]
    fn test_loopback_hosts_keep_shape() {
        let set = ListenAddressSet::with_hosts(9000, Ipv4Addr::LOCALHOST, Ipv6Addr::LOCALHOST);
        assert_eq!(set.port(), 9000);
        assert_eq!(set.entries()[1].addr.to_string(), "/ip4/127.0.0.1/udp/9000/quic-v1");
        assert_eq!(set.entries()[2].family, AddressFamily::Ipv6);
        assert_eq!(set.entries()[2].transport, TransportKind::Tcp);
    }
}
