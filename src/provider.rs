//! Entry point for turning config documents into transports.

use std::sync::Arc;

use crate::config::{ConfigError, ConfigNode};
use crate::dialer::{PacketProxy, PacketTransport, StreamDialer, StreamTransport, TransportPair};
use crate::registry::TypeRegistry;
use crate::socket::{TcpDialer, UdpDialer};
use crate::transports::register_defaults;

/// Owns the stream, packet and pair registries, plus the default dialers
/// leaf transports use to reach the network.
///
/// Constructors receive the provider, so nested sub-configs can be parsed
/// through whichever registry they need.
pub struct TransportProvider {
    tcp_dialer: Arc<dyn StreamDialer>,
    udp_dialer: Arc<dyn PacketProxy>,
    stream_dialers: TypeRegistry<StreamTransport, TransportProvider>,
    packet_proxies: TypeRegistry<PacketTransport, TransportProvider>,
    transports: TypeRegistry<TransportPair, TransportProvider>,
}

impl TransportProvider {
    /// Creates a provider with every built-in type registered.
    pub fn new(tcp_dialer: Arc<dyn StreamDialer>, udp_dialer: Arc<dyn PacketProxy>) -> Self {
        let mut provider = Self {
            tcp_dialer,
            udp_dialer,
            stream_dialers: TypeRegistry::new("stream dialer"),
            packet_proxies: TypeRegistry::new("packet proxy"),
            transports: TypeRegistry::new("transport"),
        };
        register_defaults(&mut provider);
        provider
    }

    /// Creates a provider that reaches the network through the OS.
    pub fn with_system_dialers() -> Self {
        Self::new(Arc::new(TcpDialer::default()), Arc::new(UdpDialer))
    }

    /// Parses a transport config. Parsing does no I/O.
    pub fn parse(&self, node: &ConfigNode) -> Result<TransportPair, ConfigError> {
        self.transports.parse(node, self)
    }

    pub fn parse_str(&self, text: &str) -> Result<TransportPair, ConfigError> {
        self.parse(&ConfigNode::parse_yaml(text)?)
    }

    pub fn parse_stream_dialer(&self, node: &ConfigNode) -> Result<StreamTransport, ConfigError> {
        self.stream_dialers.parse(node, self)
    }

    pub fn parse_packet_proxy(&self, node: &ConfigNode) -> Result<PacketTransport, ConfigError> {
        self.packet_proxies.parse(node, self)
    }

    pub fn tcp_dialer(&self) -> &Arc<dyn StreamDialer> {
        &self.tcp_dialer
    }

    pub fn udp_dialer(&self) -> &Arc<dyn PacketProxy> {
        &self.udp_dialer
    }

    pub fn stream_dialers_mut(&mut self) -> &mut TypeRegistry<StreamTransport, TransportProvider> {
        &mut self.stream_dialers
    }

    pub fn packet_proxies_mut(&mut self) -> &mut TypeRegistry<PacketTransport, TransportProvider> {
        &mut self.packet_proxies
    }

    pub fn transports_mut(&mut self) -> &mut TypeRegistry<TransportPair, TransportProvider> {
        &mut self.transports
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::async_stream::{AsyncMessageStream, AsyncStream};
    use crate::dialer::{ConnType, ConnectionInfo, DialError, Dialer};

    #[derive(Debug)]
    struct ErrorDialer {
        name: &'static str,
    }

    #[async_trait]
    impl StreamDialer for ErrorDialer {
        async fn dial_stream(&self, address: &str) -> std::io::Result<Box<dyn AsyncStream>> {
            Err(std::io::Error::other(format!(
                "dialer '{}' called for address '{}'",
                self.name, address
            )))
        }
    }

    #[async_trait]
    impl PacketProxy for ErrorDialer {
        async fn dial_packet(&self, address: &str) -> std::io::Result<Box<dyn AsyncMessageStream>> {
            Err(std::io::Error::other(format!(
                "dialer '{}' called for address '{}'",
                self.name, address
            )))
        }
    }

    fn new_test_provider() -> TransportProvider {
        TransportProvider::new(
            Arc::new(ErrorDialer {
                name: "default-tcp",
            }),
            Arc::new(ErrorDialer {
                name: "default-udp",
            }),
        )
    }

    fn stream_info(pair: &TransportPair) -> &ConnectionInfo {
        pair.stream_dialer.as_ref().unwrap().info()
    }

    fn packet_info(pair: &TransportPair) -> &ConnectionInfo {
        pair.packet_proxy.as_ref().unwrap().info()
    }

    const SS_URL: &str =
        "ss://Y2hhY2hhMjAtaWV0Zi1wb2x5MTMwNTpaTXJSMW92ZmRBaEQ@example.com:4321/#My%20Server";

    #[test]
    fn test_register_default_providers() {
        let pair = new_test_provider()
            .parse_str(
                r#"
$type: tcpudp
tcp: &shared
  $type: shadowsocks
  endpoint: example.com:1234
  cipher: chacha20-ietf-poly1305
  secret: SECRET
udp: *shared"#,
            )
            .unwrap();

        assert_eq!(stream_info(&pair), &ConnectionInfo::tunneled("example.com:1234"));
        assert_eq!(packet_info(&pair), &ConnectionInfo::tunneled("example.com:1234"));
    }

    #[test]
    fn test_parse_url() {
        let provider = new_test_provider();
        for text in [SS_URL.to_string(), format!("\"{SS_URL}\""), format!("'{SS_URL}'")] {
            let pair = provider.parse_str(&text).unwrap();
            assert_eq!(stream_info(&pair), &ConnectionInfo::tunneled("example.com:4321"));
            assert_eq!(packet_info(&pair), &ConnectionInfo::tunneled("example.com:4321"));
        }
    }

    #[test]
    fn test_url_and_fields_agree() {
        let provider = new_test_provider();
        let from_url = provider
            .parse_str(&format!("$type: tcpudp\ntcp: {SS_URL}\nudp: {SS_URL}"))
            .unwrap();
        let from_fields = provider
            .parse_str(
                r#"
$type: tcpudp
tcp: &shared
  $type: ss
  endpoint: example.com:4321
  cipher: chacha20-ietf-poly1305
  secret: ZMrR1ovfdAhD
udp: *shared"#,
            )
            .unwrap();
        assert_eq!(from_url.summary(), from_fields.summary());
    }

    #[test]
    fn test_legacy_untyped_config() {
        let pair = new_test_provider()
            .parse_str("server: 10.0.0.1\nserver_port: 8388\nmethod: aes-128-gcm\npassword: pw")
            .unwrap();
        assert_eq!(stream_info(&pair), &ConnectionInfo::tunneled("10.0.0.1:8388"));
    }

    #[tokio::test]
    async fn test_parse_iptable_tcp() {
        let pair = new_test_provider()
            .parse_str(
                r#"$type: tcpudp
tcp:
  $type: iptable
  table:
    - ips:
        - 192.168.1.128
      dialer: &shared
        $type: shadowsocks
        endpoint: example.com:1234
        cipher: chacha20-ietf-poly1305
        secret: SECRET
    - ips:
        - 2001:db8:1:1::/64
      dialer: *shared
udp: null"#,
            )
            .unwrap();
        assert!(pair.stream_dialer.is_some());
        assert!(pair.packet_proxy.is_none());

        let error = pair.dial_stream("192.168.1.128:12345").await.err().unwrap();
        assert!(
            error
                .to_string()
                .contains("dialer 'default-tcp' called for address 'example.com:1234'")
        );

        let error = pair.dial_stream("[2001:db8:1:1::a:b]:443").await.err().unwrap();
        assert!(
            error
                .to_string()
                .contains("dialer 'default-tcp' called for address 'example.com:1234'")
        );

        let error = pair.dial_stream("8.8.8.8:53").await.err().unwrap();
        assert!(
            error
                .to_string()
                .contains("no dialer available for address 8.8.8.8:53")
        );
        assert_eq!(
            DialError::from_io(&error),
            Some(&DialError::NoRoute {
                address: "8.8.8.8:53".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_packet_iptable() {
        let pair = new_test_provider()
            .parse_str(
                r#"$type: tcpudp
udp:
  $type: iptable
  table:
    - ips: 1.1.1.1
      dialer:
        $type: block
  fallback:
    $type: direct"#,
            )
            .unwrap();
        assert!(pair.stream_dialer.is_none());
        assert_eq!(packet_info(&pair), &ConnectionInfo::blocked());

        let error = pair.dial_packet("1.1.1.1:53").await.err().unwrap();
        assert_eq!(error.to_string(), "blocked by config");
        let error = pair.dial_packet("8.8.8.8:53").await.err().unwrap();
        assert_eq!(
            error.to_string(),
            "dialer 'default-udp' called for address '8.8.8.8:53'"
        );

        let error = pair.dial_stream("8.8.8.8:53").await.err().unwrap();
        assert_eq!(
            DialError::from_io(&error),
            Some(&DialError::Unsupported("stream dialer"))
        );
    }

    #[tokio::test]
    async fn test_parse_direct_tcp() {
        let pair = new_test_provider()
            .parse_str("$type: tcpudp\ntcp:\n  $type: direct\nudp: null")
            .unwrap();
        assert_eq!(stream_info(&pair).conn_type, ConnType::Direct);
        assert_eq!(stream_info(&pair).first_hop, "");

        let error = pair.dial_stream("example.com:123").await.err().unwrap();
        assert_eq!(
            error.to_string(),
            "dialer 'default-tcp' called for address 'example.com:123'"
        );
    }

    #[tokio::test]
    async fn test_parse_block_tcp() {
        let pair = new_test_provider()
            .parse_str("$type: tcpudp\ntcp:\n  $type: block\nudp: null")
            .unwrap();
        assert_eq!(stream_info(&pair).conn_type, ConnType::Blocked);
        assert!(pair.packet_proxy.is_none());

        let error = pair.dial_stream("example.com:123").await.err().unwrap();
        assert_eq!(error.to_string(), "blocked by config");
    }

    #[test]
    fn test_iptable_endpoint_first_hop() {
        let provider = new_test_provider();
        let pair = provider
            .parse_str(
                r#"
$type: tcpudp
tcp:
  $type: iptable
  table:
    - ips:
        - 34.117.59.0/24
      dialer:
        $type: shadowsocks
        endpoint: sub.domain.com:443
        cipher: chacha20-ietf-poly1305
        secret: xf0Wzuz5NyAUaCV95q4p9N
  fallback:
    $type: direct
udp:
  $type: shadowsocks
  endpoint: sub.domain.com:443
  cipher: chacha20-ietf-poly1305
  secret: xf0Wzuz5NyAUaCV95q4p9N
"#,
            )
            .unwrap();
        assert_eq!(
            stream_info(&pair),
            &ConnectionInfo::tunneled("sub.domain.com:443")
        );

        let pair = provider
            .parse_str(
                r#"
$type: tcpudp
tcp:
  $type: shadowsocks
  endpoint: sub.domain.com:443
  cipher: chacha20-ietf-poly1305
  secret: xf0Wzuz5NyAUaCV95q4p9N
udp:
  $type: shadowsocks
  endpoint: sub.domain.com:443
  cipher: chacha20-ietf-poly1305
  secret: xf0Wzuz5NyAUaCV95q4p9N
"#,
            )
            .unwrap();
        assert_eq!(stream_info(&pair).first_hop, "sub.domain.com:443");
    }

    #[test]
    fn test_top_level_leaves() {
        let provider = new_test_provider();

        let pair = provider.parse_str("$type: direct").unwrap();
        assert_eq!(stream_info(&pair), &ConnectionInfo::direct());
        assert_eq!(packet_info(&pair), &ConnectionInfo::direct());

        let pair = provider.parse_str("$type: block").unwrap();
        assert_eq!(packet_info(&pair), &ConnectionInfo::blocked());
    }

    #[test]
    fn test_unknown_type_is_wrapped_with_field() {
        let error = new_test_provider()
            .parse_str("$type: tcpudp\ntcp:\n  $type: vless\n")
            .unwrap_err();
        assert!(matches!(error, ConfigError::Field { ref field, .. } if field == "tcp"));
        assert!(matches!(
            error.root_cause(),
            ConfigError::UnknownType { tag: Some(tag) } if tag == "vless"
        ));
    }

    #[test]
    fn test_tcpudp_requires_a_side() {
        let error = new_test_provider()
            .parse_str("$type: tcpudp\ntcp: null\nudp: null")
            .unwrap_err();
        assert!(matches!(error, ConfigError::MissingField { .. }));
    }

    #[test]
    fn test_tcpudp_is_pair_only() {
        let error = new_test_provider()
            .parse_str("$type: tcpudp\ntcp:\n  $type: tcpudp\n  tcp:\n    $type: direct")
            .unwrap_err();
        assert!(matches!(
            error.root_cause(),
            ConfigError::UnknownType { tag: Some(tag) } if tag == "tcpudp"
        ));
    }

    #[test]
    fn test_iptable_validation() {
        let provider = new_test_provider();
        let cases = [
            ("$type: iptable", "table"),
            ("$type: iptable\ntable: []", "table"),
            ("$type: iptable\ntable: direct", "table"),
            (
                "$type: iptable\ntable:\n  - ips: []\n    dialer:\n      $type: direct",
                "table[0].ips",
            ),
            (
                "$type: iptable\ntable:\n  - ips: [example.com]\n    dialer:\n      $type: direct",
                "table[0].ips",
            ),
            ("$type: iptable\ntable:\n  - ips: [10.0.0.0/8]", "table[0].dialer"),
        ];
        for (yaml, expected_field) in cases {
            match provider.parse_str(yaml).unwrap_err() {
                ConfigError::MissingField { field, .. } | ConfigError::InvalidField { field, .. } => {
                    assert_eq!(field, expected_field, "{yaml}")
                }
                other => panic!("unexpected error for {yaml}: {other}"),
            }
        }

        let error = provider
            .parse_str(
                "$type: iptable\ntable:\n  - ips: [10.0.0.0/8]\n    dialer:\n      $type: shadowsocks\n      endpoint: a.com:1\n      cipher: rc4\n      secret: s",
            )
            .unwrap_err();
        assert!(matches!(error, ConfigError::Field { ref field, .. } if field == "table[0].dialer"));
        assert!(error.to_string().contains("unsupported cipher"));
    }

    #[test]
    fn test_nested_iptable_metadata() {
        let pair = new_test_provider()
            .parse_str(
                r#"
$type: tcpudp
tcp:
  $type: iptable
  table:
    - ips: [10.0.0.0/8]
      dialer:
        $type: direct
    - ips: [11.0.0.0/8]
      dialer:
        $type: iptable
        table:
          - ips: [11.1.0.0/16]
            dialer: ss://Y2hhY2hhMjAtaWV0Zi1wb2x5MTMwNTpaTXJSMW92ZmRBaEQ@example.com:4321
"#,
            )
            .unwrap();
        assert_eq!(
            stream_info(&pair),
            &ConnectionInfo::tunneled("example.com:4321")
        );
    }

    #[test]
    fn test_custom_registration() {
        let mut provider = new_test_provider();
        provider
            .stream_dialers_mut()
            .register(
                "named",
                |node: &ConfigNode, _: &TransportProvider| -> Result<StreamTransport, ConfigError> {
                    let name = node.require_string("named", "name")?;
                    let inner: Arc<dyn StreamDialer> = Arc::new(ErrorDialer { name: "named" });
                    Ok(Dialer::new(ConnectionInfo::tunneled(name), inner))
                },
            )
            .unwrap();
        assert!(matches!(
            provider.stream_dialers_mut().register(
                "direct",
                |_: &ConfigNode, _: &TransportProvider| -> Result<StreamTransport, ConfigError> {
                    Err(ConfigError::missing("direct", "unused"))
                },
            ),
            Err(ConfigError::DuplicateType(_))
        ));

        let pair = provider
            .parse_str("$type: tcpudp\ntcp:\n  $type: named\n  name: proxy.example:1")
            .unwrap();
        assert_eq!(stream_info(&pair).first_hop, "proxy.example:1");
    }
}
