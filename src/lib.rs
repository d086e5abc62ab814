//! tunconf - transport configuration for tunneling clients.
//!
//! A YAML document describes how outbound connections leave the host:
//! straight out, refused, through a shadowsocks server, or routed by
//! destination IP between any of these. Parsing it yields a
//! [`TransportPair`](dialer::TransportPair), a stream dialer and a packet
//! proxy, each reporting its first hop and connection type.
//!
//! ```yaml
//! $type: tcpudp
//! tcp:
//!   $type: iptable
//!   table:
//!     - ips: [10.0.0.0/8]
//!       dialer:
//!         $type: direct
//!   fallback: ss://Y2hhY2hhMjAtaWV0Zi1wb2x5MTMwNTpTRUNSRVQ@proxy.example.com:8388
//! udp:
//!   $type: block
//! ```
//!
//! New types are added by registering constructors on the
//! [`TransportProvider`](provider::TransportProvider) registries.

pub mod address;
pub mod async_stream;
pub mod config;
pub mod dialer;
pub mod provider;
pub mod registry;
pub mod shadowsocks;
pub mod socket;
pub mod transports;
