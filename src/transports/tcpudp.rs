//! Combines independently configured stream and packet sides.

use log::debug;

use crate::config::{ConfigError, ConfigNode};
use crate::dialer::TransportPair;
use crate::provider::TransportProvider;

pub const TAG: &str = "tcpudp";

fn present_field(node: &ConfigNode, field: &str) -> Option<ConfigNode> {
    node.get(field).filter(|value| !value.is_null())
}

pub fn parse_transport_pair(
    node: &ConfigNode,
    provider: &TransportProvider,
) -> Result<TransportPair, ConfigError> {
    let tcp_node = present_field(node, "tcp");
    let udp_node = present_field(node, "udp");
    if tcp_node.is_none() && udp_node.is_none() {
        return Err(ConfigError::missing(TAG, "tcp or udp"));
    }

    let stream_dialer = tcp_node
        .map(|tcp| {
            provider
                .parse_stream_dialer(&tcp)
                .map_err(|e| e.in_field("tcp"))
        })
        .transpose()?;
    let packet_proxy = udp_node
        .map(|udp| {
            provider
                .parse_packet_proxy(&udp)
                .map_err(|e| e.in_field("udp"))
        })
        .transpose()?;

    debug!(
        "Built tcpudp transport (tcp: {}, udp: {})",
        stream_dialer
            .as_ref()
            .map_or("none".to_string(), |d| d.conn_type().to_string()),
        packet_proxy
            .as_ref()
            .map_or("none".to_string(), |d| d.conn_type().to_string()),
    );

    Ok(TransportPair {
        stream_dialer,
        packet_proxy,
    })
}
