//! Connects straight to the destination with the provider's default dialers.

use crate::config::{ConfigError, ConfigNode};
use crate::dialer::{ConnectionInfo, Dialer, PacketTransport, StreamTransport};
use crate::provider::TransportProvider;

pub const TAG: &str = "direct";

pub fn parse_stream_dialer(
    _node: &ConfigNode,
    provider: &TransportProvider,
) -> Result<StreamTransport, ConfigError> {
    Ok(Dialer::new(
        ConnectionInfo::direct(),
        provider.tcp_dialer().clone(),
    ))
}

pub fn parse_packet_proxy(
    _node: &ConfigNode,
    provider: &TransportProvider,
) -> Result<PacketTransport, ConfigError> {
    Ok(Dialer::new(
        ConnectionInfo::direct(),
        provider.udp_dialer().clone(),
    ))
}
