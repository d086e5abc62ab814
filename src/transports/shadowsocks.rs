//! Shadowsocks client transports.
//!
//! Accepted config forms:
//!
//! - `{ $type: shadowsocks, endpoint: host:port, cipher: ..., secret: ..., prefix: ... }`
//! - `ss://<base64 of cipher:secret>@host:port/?prefix=...#name`, or the
//!   same with a percent-encoded plain `cipher:secret` userinfo
//! - `{ server: ..., server_port: ..., method: ..., password: ... }`

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use percent_encoding::percent_decode_str;
use tokio::io::AsyncWriteExt;

use crate::address::{Address, NetLocation};
use crate::async_stream::{AsyncMessageStream, AsyncStream};
use crate::config::{ConfigError, ConfigNode, URL_KEY};
use crate::dialer::{
    ConnectionInfo, Dialer, PacketProxy, PacketTransport, StreamDialer, StreamTransport,
};
use crate::provider::TransportProvider;
use crate::shadowsocks::{
    ShadowsocksCipher, ShadowsocksKey, ShadowsocksPacketStream, ShadowsocksStream,
    max_prefix_len, write_location_to_vec,
};

pub const TAG: &str = "shadowsocks";
pub const URL_SCHEME: &str = "ss";

#[derive(Clone, PartialEq, Eq)]
pub struct ShadowsocksConfig {
    pub endpoint: NetLocation,
    pub cipher: ShadowsocksCipher,
    pub secret: String,
    pub prefix: Vec<u8>,
}

impl std::fmt::Debug for ShadowsocksConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowsocksConfig")
            .field("endpoint", &self.endpoint)
            .field("cipher", &self.cipher.name())
            .field("prefix_len", &self.prefix.len())
            .finish_non_exhaustive()
    }
}

impl ShadowsocksConfig {
    pub fn from_node(node: &ConfigNode) -> Result<Self, ConfigError> {
        if let Some(url) = node.get_string(TAG, URL_KEY)? {
            return Self::from_url(&url);
        }

        let is_legacy = node.get("endpoint").is_none()
            && ["server", "server_port", "method", "password"]
                .iter()
                .any(|field| node.get(field).is_some());
        if is_legacy {
            Self::from_legacy_fields(node)
        } else {
            Self::from_fields(node)
        }
    }

    fn from_fields(node: &ConfigNode) -> Result<Self, ConfigError> {
        let endpoint_str = node.require_string(TAG, "endpoint")?;
        let endpoint = NetLocation::from_str(&endpoint_str, None)
            .map_err(|e| ConfigError::invalid(TAG, "endpoint", e))?;
        let cipher = parse_cipher(&node.require_string(TAG, "cipher")?, "cipher")?;
        let secret = node.require_string(TAG, "secret")?;
        let prefix = match node.get_string(TAG, "prefix")? {
            Some(prefix) => parse_prefix(&prefix)?,
            None => vec![],
        };
        Self::new(endpoint, cipher, secret, prefix)
    }

    fn from_legacy_fields(node: &ConfigNode) -> Result<Self, ConfigError> {
        let server = node.require_string(TAG, "server")?;
        let address =
            Address::from(&server).map_err(|e| ConfigError::invalid(TAG, "server", e))?;
        let port = node
            .require_string(TAG, "server_port")?
            .parse::<u16>()
            .map_err(|e| ConfigError::invalid(TAG, "server_port", e))?;
        let cipher = parse_cipher(&node.require_string(TAG, "method")?, "method")?;
        let secret = node.require_string(TAG, "password")?;
        let prefix = match node.get_string(TAG, "prefix")? {
            Some(prefix) => parse_prefix(&prefix)?,
            None => vec![],
        };
        Self::new(NetLocation::new(address, port), cipher, secret, prefix)
    }

    pub fn from_url(url_str: &str) -> Result<Self, ConfigError> {
        let url =
            url::Url::parse(url_str).map_err(|e| ConfigError::invalid(TAG, URL_KEY, e))?;
        if url.scheme() != URL_SCHEME && url.scheme() != TAG {
            return Err(ConfigError::invalid(
                TAG,
                URL_KEY,
                format!("unexpected scheme {}", url.scheme()),
            ));
        }

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host,
            _ => return Err(ConfigError::invalid(TAG, URL_KEY, "missing host")),
        };
        let port = url
            .port()
            .ok_or_else(|| ConfigError::invalid(TAG, URL_KEY, "missing port"))?;
        // IPv6 hosts are already bracketed.
        let endpoint = NetLocation::from_str(&format!("{}:{}", host, port), None)
            .map_err(|e| ConfigError::invalid(TAG, URL_KEY, e))?;

        let (cipher_name, secret) = match url.password() {
            Some(password) => (
                percent_decode(url.username())?,
                percent_decode(password)?,
            ),
            None => decode_user_info(url.username())?,
        };
        let cipher = parse_cipher(&cipher_name, URL_KEY)?;

        let prefix = match url.query_pairs().find(|(key, _)| key == "prefix") {
            Some((_, prefix)) => parse_prefix(&prefix)?,
            None => vec![],
        };

        Self::new(endpoint, cipher, secret, prefix)
    }

    fn new(
        endpoint: NetLocation,
        cipher: ShadowsocksCipher,
        secret: String,
        prefix: Vec<u8>,
    ) -> Result<Self, ConfigError> {
        let max_len = max_prefix_len(&cipher);
        if prefix.len() > max_len {
            return Err(ConfigError::invalid(
                TAG,
                "prefix",
                format!(
                    "{} bytes is too long for {} (at most {})",
                    prefix.len(),
                    cipher.name(),
                    max_len
                ),
            ));
        }
        Ok(Self {
            endpoint,
            cipher,
            secret,
            prefix,
        })
    }

    /// The proxy endpoint, reported as the first hop.
    pub fn first_hop(&self) -> String {
        self.endpoint.to_string()
    }

    fn key(&self) -> Arc<ShadowsocksKey> {
        Arc::new(ShadowsocksKey::new(&self.secret, self.cipher.key_len()))
    }

    pub fn stream_dialer(&self, dialer: Arc<dyn StreamDialer>) -> StreamTransport {
        let inner: Arc<dyn StreamDialer> = Arc::new(ShadowsocksStreamDialer {
            endpoint: self.first_hop(),
            cipher: self.cipher,
            key: self.key(),
            prefix: self.prefix.clone(),
            dialer,
        });
        Dialer::new(ConnectionInfo::tunneled(self.first_hop()), inner)
    }

    pub fn packet_proxy(&self, dialer: Arc<dyn PacketProxy>) -> PacketTransport {
        let inner: Arc<dyn PacketProxy> = Arc::new(ShadowsocksPacketProxy {
            endpoint: self.first_hop(),
            cipher: self.cipher,
            key: self.key(),
            dialer,
        });
        Dialer::new(ConnectionInfo::tunneled(self.first_hop()), inner)
    }
}

fn parse_cipher(name: &str, field: &str) -> Result<ShadowsocksCipher, ConfigError> {
    ShadowsocksCipher::try_from(name).map_err(|e| ConfigError::invalid(TAG, field, e))
}

fn percent_decode(s: &str) -> Result<String, ConfigError> {
    percent_decode_str(s)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| ConfigError::invalid(TAG, URL_KEY, e))
}

/// Decodes a base64 `cipher:secret` user info.
fn decode_user_info(user_info: &str) -> Result<(String, String), ConfigError> {
    let user_info = percent_decode(user_info)?;
    if user_info.is_empty() {
        return Err(ConfigError::invalid(TAG, URL_KEY, "missing user info"));
    }

    let decoded = [STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(&user_info).ok())
        .ok_or_else(|| ConfigError::invalid(TAG, URL_KEY, "user info is not valid base64"))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| ConfigError::invalid(TAG, URL_KEY, "user info is not valid UTF-8"))?;

    match decoded.split_once(':') {
        Some((cipher_name, secret)) => Ok((cipher_name.to_string(), secret.to_string())),
        None => Err(ConfigError::invalid(
            TAG,
            URL_KEY,
            "user info must be cipher:secret",
        )),
    }
}

/// Maps each character to one byte. Only U+0000 to U+00FF are allowed.
fn parse_prefix(prefix: &str) -> Result<Vec<u8>, ConfigError> {
    prefix
        .chars()
        .map(|c| {
            u8::try_from(c).map_err(|_| {
                ConfigError::invalid(
                    TAG,
                    "prefix",
                    format!("character {:?} is outside U+0000 to U+00FF", c),
                )
            })
        })
        .collect()
}

#[derive(Debug)]
pub struct ShadowsocksStreamDialer {
    endpoint: String,
    cipher: ShadowsocksCipher,
    key: Arc<ShadowsocksKey>,
    prefix: Vec<u8>,
    dialer: Arc<dyn StreamDialer>,
}

#[async_trait]
impl StreamDialer for ShadowsocksStreamDialer {
    async fn dial_stream(&self, address: &str) -> std::io::Result<Box<dyn AsyncStream>> {
        let target = NetLocation::from_str(address, None)?;
        let target_header = write_location_to_vec(&target)?;

        let server_stream = self.dialer.dial_stream(&self.endpoint).await?;
        let mut stream =
            ShadowsocksStream::new(server_stream, self.cipher, self.key.clone(), &self.prefix)?;
        stream.write_all(&target_header).await?;
        Ok(Box::new(stream))
    }
}

#[derive(Debug)]
pub struct ShadowsocksPacketProxy {
    endpoint: String,
    cipher: ShadowsocksCipher,
    key: Arc<ShadowsocksKey>,
    dialer: Arc<dyn PacketProxy>,
}

#[async_trait]
impl PacketProxy for ShadowsocksPacketProxy {
    async fn dial_packet(&self, address: &str) -> std::io::Result<Box<dyn AsyncMessageStream>> {
        let target = NetLocation::from_str(address, None)?;
        let target_header = write_location_to_vec(&target)?;

        let socket = self.dialer.dial_packet(&self.endpoint).await?;
        Ok(Box::new(ShadowsocksPacketStream::new(
            socket,
            self.cipher,
            self.key.clone(),
            target_header,
        )))
    }
}

pub fn parse_stream_dialer(
    node: &ConfigNode,
    provider: &TransportProvider,
) -> Result<StreamTransport, ConfigError> {
    let config = ShadowsocksConfig::from_node(node)?;
    Ok(config.stream_dialer(provider.tcp_dialer().clone()))
}

pub fn parse_packet_proxy(
    node: &ConfigNode,
    provider: &TransportProvider,
) -> Result<PacketTransport, ConfigError> {
    let config = ShadowsocksConfig::from_node(node)?;
    Ok(config.packet_proxy(provider.udp_dialer().clone()))
}
