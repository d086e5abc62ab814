//! Built-in transport constructors.
//!
//! | tag                | stream | packet | pair |
//! |--------------------|--------|--------|------|
//! | `direct`           | yes    | yes    | yes  |
//! | `block`            | yes    | yes    | yes  |
//! | `shadowsocks`/`ss` | yes    | yes    | yes  |
//! | `iptable`          | yes    | yes    | yes  |
//! | `tcpudp`           |        |        | yes  |

pub mod block;
pub mod direct;
pub mod iptable;
pub mod shadowsocks;
pub mod tcpudp;

use crate::config::{ConfigError, ConfigNode};
use crate::dialer::TransportPair;
use crate::provider::TransportProvider;

/// Builds a pair whose sides come from the same leaf config.
pub fn parse_pair_from_leaf(
    node: &ConfigNode,
    provider: &TransportProvider,
) -> Result<TransportPair, ConfigError> {
    Ok(TransportPair {
        stream_dialer: Some(provider.parse_stream_dialer(node)?),
        packet_proxy: Some(provider.parse_packet_proxy(node)?),
    })
}

/// Installs the built-in constructors, replacing any registered under the
/// same tags.
pub fn register_defaults(provider: &mut TransportProvider) {
    let stream_dialers = provider.stream_dialers_mut();
    stream_dialers.replace(direct::TAG, direct::parse_stream_dialer);
    stream_dialers.replace(block::TAG, block::parse_stream_dialer);
    stream_dialers.replace(shadowsocks::TAG, shadowsocks::parse_stream_dialer);
    stream_dialers.replace(shadowsocks::URL_SCHEME, shadowsocks::parse_stream_dialer);
    stream_dialers.replace(iptable::TAG, iptable::parse_stream_dialer);
    stream_dialers.set_default_tag(shadowsocks::TAG);

    let packet_proxies = provider.packet_proxies_mut();
    packet_proxies.replace(direct::TAG, direct::parse_packet_proxy);
    packet_proxies.replace(block::TAG, block::parse_packet_proxy);
    packet_proxies.replace(shadowsocks::TAG, shadowsocks::parse_packet_proxy);
    packet_proxies.replace(shadowsocks::URL_SCHEME, shadowsocks::parse_packet_proxy);
    packet_proxies.replace(iptable::TAG, iptable::parse_packet_proxy);
    packet_proxies.set_default_tag(shadowsocks::TAG);

    let transports = provider.transports_mut();
    transports.replace(direct::TAG, parse_pair_from_leaf);
    transports.replace(block::TAG, parse_pair_from_leaf);
    transports.replace(shadowsocks::TAG, parse_pair_from_leaf);
    transports.replace(shadowsocks::URL_SCHEME, parse_pair_from_leaf);
    transports.replace(iptable::TAG, parse_pair_from_leaf);
    transports.replace(tcpudp::TAG, tcpudp::parse_transport_pair);
    transports.set_default_tag(shadowsocks::TAG);
}
