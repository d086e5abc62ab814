//! Refuses every connection.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::async_stream::{AsyncMessageStream, AsyncStream};
use crate::config::{ConfigError, ConfigNode};
use crate::dialer::{
    ConnectionInfo, DialError, Dialer, PacketProxy, PacketTransport, StreamDialer,
    StreamTransport,
};
use crate::provider::TransportProvider;

pub const TAG: &str = "block";

#[derive(Debug, Clone, Default)]
pub struct BlockDialer;

#[async_trait]
impl StreamDialer for BlockDialer {
    async fn dial_stream(&self, address: &str) -> std::io::Result<Box<dyn AsyncStream>> {
        debug!("Blocked stream connection to {}", address);
        Err(DialError::Blocked.into())
    }
}

#[async_trait]
impl PacketProxy for BlockDialer {
    async fn dial_packet(&self, address: &str) -> std::io::Result<Box<dyn AsyncMessageStream>> {
        debug!("Blocked packet session to {}", address);
        Err(DialError::Blocked.into())
    }
}

pub fn parse_stream_dialer(
    _node: &ConfigNode,
    _provider: &TransportProvider,
) -> Result<StreamTransport, ConfigError> {
    let inner: Arc<dyn StreamDialer> = Arc::new(BlockDialer);
    Ok(Dialer::new(ConnectionInfo::blocked(), inner))
}

pub fn parse_packet_proxy(
    _node: &ConfigNode,
    _provider: &TransportProvider,
) -> Result<PacketTransport, ConfigError> {
    let inner: Arc<dyn PacketProxy> = Arc::new(BlockDialer);
    Ok(Dialer::new(ConnectionInfo::blocked(), inner))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_block_refuses_everything() {
        let error = BlockDialer.dial_stream("example.com:123").await.err().unwrap();
        assert_eq!(error.to_string(), "blocked by config");
        assert_eq!(DialError::from_io(&error), Some(&DialError::Blocked));

        let error = BlockDialer.dial_packet("1.1.1.1:53").await.err().unwrap();
        assert_eq!(error.to_string(), "blocked by config");
    }
}
