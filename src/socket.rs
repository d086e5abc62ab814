//! Dialers that connect straight through the operating system.

use async_trait::async_trait;
use log::error;
use tokio::net::{TcpStream, UdpSocket};

use crate::address::NetLocation;
use crate::async_stream::{AsyncMessageStream, AsyncStream};
use crate::dialer::{PacketProxy, StreamDialer};

#[derive(Debug, Clone)]
pub struct TcpDialer {
    no_delay: bool,
}

impl TcpDialer {
    pub fn new(no_delay: bool) -> Self {
        Self { no_delay }
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl StreamDialer for TcpDialer {
    async fn dial_stream(&self, address: &str) -> std::io::Result<Box<dyn AsyncStream>> {
        let location = NetLocation::from_str(address, None)?;
        let stream =
            TcpStream::connect((location.address().to_string(), location.port())).await?;

        if self.no_delay && let Err(e) = stream.set_nodelay(true) {
            error!("Failed to set TCP no-delay: {e}");
        }

        Ok(Box::new(stream))
    }
}

/// Opens a connected UDP socket per session.
#[derive(Debug, Clone, Default)]
pub struct UdpDialer;

#[async_trait]
impl PacketProxy for UdpDialer {
    async fn dial_packet(&self, address: &str) -> std::io::Result<Box<dyn AsyncMessageStream>> {
        let location = NetLocation::from_str(address, None)?;
        let target_addr = tokio::net::lookup_host((location.address().to_string(), location.port()))
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("could not resolve {}", address),
                )
            })?;

        let bind_addr = if target_addr.is_ipv6() {
            "[::]:0"
        } else {
            "0.0.0.0:0"
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(target_addr).await?;
        Ok(Box::new(socket))
    }
}
