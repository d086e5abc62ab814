//! Dialing capabilities and the metadata attached to them.
//!
//! Every constructed transport is a [`Dialer`]: a shared capability plus the
//! [`ConnectionInfo`] describing how its traffic leaves the host.
//!
//! Dial operations are plain futures. Dropping one cancels it, and callers
//! wanting a deadline wrap it in `tokio::time::timeout`. Nothing here adds
//! timers or retries of its own.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::async_stream::{AsyncMessageStream, AsyncStream};

/// How traffic from a dialer reaches its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnType {
    /// Traffic goes straight to the destination.
    Direct,
    /// Traffic is relayed through a remote proxy.
    Tunneled,
    /// Traffic is refused.
    Blocked,
}

impl std::fmt::Display for ConnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Tunneled => write!(f, "tunneled"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// Diagnostic metadata of a dialer.
///
/// `first_hop` is the proxy address for tunneled dialers and empty for
/// direct and blocked ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionInfo {
    pub conn_type: ConnType,
    pub first_hop: String,
}

impl ConnectionInfo {
    pub fn direct() -> Self {
        Self {
            conn_type: ConnType::Direct,
            first_hop: String::new(),
        }
    }

    pub fn blocked() -> Self {
        Self {
            conn_type: ConnType::Blocked,
            first_hop: String::new(),
        }
    }

    pub fn tunneled(first_hop: impl Into<String>) -> Self {
        Self {
            conn_type: ConnType::Tunneled,
            first_hop: first_hop.into(),
        }
    }
}

/// Establishes byte-stream connections.
#[async_trait]
pub trait StreamDialer: Send + Sync + Debug {
    /// Connects to `address` (`host:port` or `[ipv6]:port`).
    async fn dial_stream(&self, address: &str) -> std::io::Result<Box<dyn AsyncStream>>;
}

/// Relays datagrams to and from a destination.
#[async_trait]
pub trait PacketProxy: Send + Sync + Debug {
    /// Opens a datagram session whose messages go to `address`.
    async fn dial_packet(&self, address: &str) -> std::io::Result<Box<dyn AsyncMessageStream>>;
}

/// A dialing capability annotated with its connection metadata.
pub struct Dialer<D: ?Sized> {
    info: ConnectionInfo,
    inner: Arc<D>,
}

pub type StreamTransport = Dialer<dyn StreamDialer>;
pub type PacketTransport = Dialer<dyn PacketProxy>;

impl<D: ?Sized> Dialer<D> {
    pub fn new(info: ConnectionInfo, inner: Arc<D>) -> Self {
        Self { info, inner }
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn conn_type(&self) -> ConnType {
        self.info.conn_type
    }

    pub fn first_hop(&self) -> &str {
        &self.info.first_hop
    }
}

impl<D: ?Sized> Clone for Dialer<D> {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<D: ?Sized + Debug> Debug for Dialer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialer")
            .field("conn_type", &self.info.conn_type)
            .field("first_hop", &self.info.first_hop)
            .field("inner", &self.inner)
            .finish()
    }
}

#[async_trait]
impl<D: ?Sized + StreamDialer> StreamDialer for Dialer<D> {
    async fn dial_stream(&self, address: &str) -> std::io::Result<Box<dyn AsyncStream>> {
        self.inner.dial_stream(address).await
    }
}

#[async_trait]
impl<D: ?Sized + PacketProxy> PacketProxy for Dialer<D> {
    async fn dial_packet(&self, address: &str) -> std::io::Result<Box<dyn AsyncMessageStream>> {
        self.inner.dial_packet(address).await
    }
}

/// The result of parsing a transport config.
#[derive(Debug, Clone, Default)]
pub struct TransportPair {
    pub stream_dialer: Option<StreamTransport>,
    pub packet_proxy: Option<PacketTransport>,
}

impl TransportPair {
    pub async fn dial_stream(&self, address: &str) -> std::io::Result<Box<dyn AsyncStream>> {
        match self.stream_dialer {
            Some(ref dialer) => dialer.dial_stream(address).await,
            None => Err(DialError::Unsupported("stream dialer").into()),
        }
    }

    pub async fn dial_packet(&self, address: &str) -> std::io::Result<Box<dyn AsyncMessageStream>> {
        match self.packet_proxy {
            Some(ref proxy) => proxy.dial_packet(address).await,
            None => Err(DialError::Unsupported("packet proxy").into()),
        }
    }

    pub fn summary(&self) -> TransportSummary {
        TransportSummary {
            stream: self.stream_dialer.as_ref().map(|d| d.info().clone()),
            packet: self.packet_proxy.as_ref().map(|d| d.info().clone()),
        }
    }
}

/// Serializable view of a [`TransportPair`]'s metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportSummary {
    pub stream: Option<ConnectionInfo>,
    pub packet: Option<ConnectionInfo>,
}

/// Errors raised by the transports themselves at dial time.
///
/// They reach callers inside `std::io::Error`; use [`DialError::from_io`] to
/// get them back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialError {
    Blocked,
    NoRoute { address: String },
    Unsupported(&'static str),
}

impl DialError {
    pub fn from_io(error: &std::io::Error) -> Option<&DialError> {
        error.get_ref()?.downcast_ref::<DialError>()
    }
}

impl std::fmt::Display for DialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocked => write!(f, "blocked by config"),
            Self::NoRoute { address } => write!(f, "no dialer available for address {}", address),
            Self::Unsupported(what) => write!(f, "no {} is configured", what),
        }
    }
}

impl std::error::Error for DialError {}

impl From<DialError> for std::io::Error {
    fn from(e: DialError) -> Self {
        let kind = match e {
            DialError::Blocked => std::io::ErrorKind::PermissionDenied,
            DialError::NoRoute { .. } => std::io::ErrorKind::HostUnreachable,
            DialError::Unsupported(_) => std::io::ErrorKind::Unsupported,
        };
        std::io::Error::new(kind, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_error_survives_io_conversion() {
        let error: std::io::Error = DialError::Blocked.into();
        assert_eq!(error.to_string(), "blocked by config");
        assert_eq!(error.kind(), std::io::ErrorKind::PermissionDenied);
        assert_eq!(DialError::from_io(&error), Some(&DialError::Blocked));

        let error: std::io::Error = DialError::NoRoute {
            address: "8.8.8.8:53".to_string(),
        }
        .into();
        assert_eq!(error.to_string(), "no dialer available for address 8.8.8.8:53");
    }

    #[test]
    fn test_conn_type_display() {
        assert_eq!(ConnType::Direct.to_string(), "direct");
        assert_eq!(ConnType::Tunneled.to_string(), "tunneled");
        assert_eq!(ConnType::Blocked.to_string(), "blocked");
    }

    #[tokio::test]
    async fn test_empty_pair_rejects_dials() {
        let pair = TransportPair::default();
        let error = pair.dial_stream("example.com:443").await.err().unwrap();
        assert_eq!(
            DialError::from_io(&error),
            Some(&DialError::Unsupported("stream dialer"))
        );
        let error = pair.dial_packet("example.com:53").await.err().unwrap();
        assert_eq!(error.to_string(), "no packet proxy is configured");
    }

    #[test]
    fn test_summary_serializes() {
        let pair = TransportPair::default();
        let yaml = serde_yaml::to_string(&pair.summary()).unwrap();
        assert!(yaml.contains("stream: null"));
    }
}
