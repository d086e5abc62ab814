//! Routes each connection by destination IP.
//!
//! ```yaml
//! $type: iptable
//! table:
//!   - ips: [10.0.0.0/8, 2001:db8::/32]
//!     dialer: ss://...
//! fallback:
//!   $type: direct
//! ```
//!
//! Rows are matched in declared order and the first hit wins. Hostnames,
//! unparsable destinations and misses all go to the fallback.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::address::{AddressMask, NetLocation};
use crate::async_stream::{AsyncMessageStream, AsyncStream};
use crate::config::{ConfigError, ConfigNode};
use crate::dialer::{
    ConnectionInfo, DialError, Dialer, PacketProxy, PacketTransport, StreamDialer,
    StreamTransport,
};
use crate::provider::TransportProvider;

pub const TAG: &str = "iptable";

#[derive(Debug)]
pub struct IpRoute<D: ?Sized> {
    masks: Vec<AddressMask>,
    dialer: Dialer<D>,
}

impl<D: ?Sized> IpRoute<D> {
    pub fn new(masks: Vec<AddressMask>, dialer: Dialer<D>) -> Self {
        Self { masks, dialer }
    }
}

#[derive(Debug)]
pub struct IpTable<D: ?Sized> {
    routes: Vec<IpRoute<D>>,
    fallback: Option<Dialer<D>>,
}

impl<D: ?Sized> IpTable<D> {
    pub fn new(routes: Vec<IpRoute<D>>, fallback: Option<Dialer<D>>) -> Self {
        Self { routes, fallback }
    }

    /// Picks the dialer for `address`, or `None` when nothing matches and
    /// there is no fallback.
    pub fn select(&self, address: &str) -> Option<&Dialer<D>> {
        let ip = match NetLocation::from_str(address, None) {
            Ok(location) => location.address().ip(),
            Err(e) => {
                debug!("Not routing unparsable address {} by IP: {}", address, e);
                None
            }
        };

        if let Some(ip) = ip
            && let Some(route) = self
                .routes
                .iter()
                .find(|route| route.masks.iter().any(|mask| mask.contains(ip)))
        {
            return Some(&route.dialer);
        }

        self.fallback.as_ref()
    }

    /// Summarizes the candidates (rows in order, then the fallback):
    ///
    /// 1. if they all agree, their shared info;
    /// 2. else the first candidate with a first hop;
    /// 3. else the first row's info.
    ///
    /// Rows that disagree but are all `direct` or `block` have no first hop,
    /// so rule 3 reports an empty one (a block row with a direct fallback
    /// reports blocked via ""). A table without candidates can only refuse,
    /// so it reports blocked.
    pub fn connection_info(&self) -> ConnectionInfo {
        let candidates: Vec<&ConnectionInfo> = self
            .routes
            .iter()
            .map(|route| route.dialer.info())
            .chain(self.fallback.iter().map(|dialer| dialer.info()))
            .collect();

        let first = match candidates.first() {
            Some(first) => *first,
            None => return ConnectionInfo::blocked(),
        };
        if candidates.iter().all(|info| *info == first) {
            return first.clone();
        }
        match candidates.iter().find(|info| !info.first_hop.is_empty()) {
            Some(info) => (*info).clone(),
            None => first.clone(),
        }
    }

    fn no_route(address: &str) -> std::io::Error {
        debug!("No iptable route for {}", address);
        DialError::NoRoute {
            address: address.to_string(),
        }
        .into()
    }
}

#[async_trait]
impl<D: ?Sized + StreamDialer> StreamDialer for IpTable<D> {
    async fn dial_stream(&self, address: &str) -> std::io::Result<Box<dyn AsyncStream>> {
        match self.select(address) {
            Some(dialer) => dialer.dial_stream(address).await,
            None => Err(Self::no_route(address)),
        }
    }
}

#[async_trait]
impl<D: ?Sized + PacketProxy> PacketProxy for IpTable<D> {
    async fn dial_packet(&self, address: &str) -> std::io::Result<Box<dyn AsyncMessageStream>> {
        match self.select(address) {
            Some(dialer) => dialer.dial_packet(address).await,
            None => Err(Self::no_route(address)),
        }
    }
}

fn parse_masks(row: &ConfigNode, field: &str) -> Result<Vec<AddressMask>, ConfigError> {
    let ips_field = format!("{}.ips", field);
    let ips = row
        .get("ips")
        .filter(|ips| !ips.is_null())
        .ok_or_else(|| ConfigError::missing(TAG, &ips_field))?;

    let entries = ips.as_sequence();
    if entries.is_empty() {
        return Err(ConfigError::invalid(TAG, &ips_field, "must not be empty"));
    }

    entries
        .iter()
        .map(|entry| {
            let ip = entry.as_str().ok_or_else(|| {
                ConfigError::invalid(TAG, &ips_field, "expected an IP address or CIDR block")
            })?;
            AddressMask::from(ip).map_err(|e| ConfigError::invalid(TAG, &ips_field, e))
        })
        .collect()
}

fn parse_table<D: ?Sized>(
    node: &ConfigNode,
    parse_dialer: impl Fn(&ConfigNode) -> Result<Dialer<D>, ConfigError>,
) -> Result<IpTable<D>, ConfigError> {
    let table = node
        .get("table")
        .filter(|table| !table.is_null())
        .ok_or_else(|| ConfigError::missing(TAG, "table"))?;
    if !table.value().is_sequence() {
        return Err(ConfigError::invalid(TAG, "table", "expected a sequence"));
    }
    let rows = table.as_sequence();
    if rows.is_empty() {
        return Err(ConfigError::invalid(TAG, "table", "must not be empty"));
    }

    let mut routes = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let field = format!("table[{}]", i);
        if !row.is_mapping() {
            return Err(ConfigError::invalid(TAG, &field, "expected a mapping"));
        }

        let masks = parse_masks(row, &field)?;

        let dialer_field = format!("{}.dialer", field);
        let dialer_node = row
            .get("dialer")
            .filter(|dialer| !dialer.is_null())
            .ok_or_else(|| ConfigError::missing(TAG, &dialer_field))?;
        let dialer = parse_dialer(&dialer_node).map_err(|e| e.in_field(dialer_field))?;

        routes.push(IpRoute::new(masks, dialer));
    }

    let fallback = node
        .get("fallback")
        .filter(|fallback| !fallback.is_null())
        .map(|fallback| parse_dialer(&fallback).map_err(|e| e.in_field("fallback")))
        .transpose()?;

    Ok(IpTable::new(routes, fallback))
}

pub fn parse_stream_dialer(
    node: &ConfigNode,
    provider: &TransportProvider,
) -> Result<StreamTransport, ConfigError> {
    let table = parse_table(node, |dialer| provider.parse_stream_dialer(dialer))?;
    let info = table.connection_info();
    debug!(
        "Built stream iptable with {} routes, reporting {} via '{}'",
        table.routes.len(),
        info.conn_type,
        info.first_hop
    );
    let inner: Arc<dyn StreamDialer> = Arc::new(table);
    Ok(Dialer::new(info, inner))
}

pub fn parse_packet_proxy(
    node: &ConfigNode,
    provider: &TransportProvider,
) -> Result<PacketTransport, ConfigError> {
    let table = parse_table(node, |dialer| provider.parse_packet_proxy(dialer))?;
    let info = table.connection_info();
    debug!(
        "Built packet iptable with {} routes, reporting {} via '{}'",
        table.routes.len(),
        info.conn_type,
        info.first_hop
    );
    let inner: Arc<dyn PacketProxy> = Arc::new(table);
    Ok(Dialer::new(info, inner))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NamedDialer(&'static str);

    #[async_trait]
    impl StreamDialer for NamedDialer {
        async fn dial_stream(&self, address: &str) -> std::io::Result<Box<dyn AsyncStream>> {
            Err(std::io::Error::other(format!(
                "dialer '{}' called for address '{}'",
                self.0, address
            )))
        }
    }

    fn dialer(name: &'static str, info: ConnectionInfo) -> StreamTransport {
        let inner: Arc<dyn StreamDialer> = Arc::new(NamedDialer(name));
        Dialer::new(info, inner)
    }

    fn route(masks: &[&str], dialer: StreamTransport) -> IpRoute<dyn StreamDialer> {
        IpRoute::new(
            masks.iter().map(|m| AddressMask::from(m).unwrap()).collect(),
            dialer,
        )
    }

    fn selected_name(table: &IpTable<dyn StreamDialer>, address: &str) -> Option<String> {
        table.select(address).map(|d| d.first_hop().to_string())
    }

    #[test]
    fn test_first_match_wins() {
        let table = IpTable::new(
            vec![
                route(&["10.0.0.0/8"], dialer("a", ConnectionInfo::tunneled("a:1"))),
                route(&["10.1.0.0/16"], dialer("b", ConnectionInfo::tunneled("b:1"))),
            ],
            Some(dialer("fallback", ConnectionInfo::direct())),
        );
        assert_eq!(selected_name(&table, "10.1.2.3:80").as_deref(), Some("a:1"));
        assert_eq!(selected_name(&table, "11.0.0.1:80").as_deref(), Some(""));
        assert_eq!(selected_name(&table, "example.com:80").as_deref(), Some(""));
    }

    #[test]
    fn test_mapped_ipv4_matches_ipv4_row() {
        let table = IpTable::new(
            vec![route(&["192.168.1.128"], dialer("a", ConnectionInfo::tunneled("a:1")))],
            None,
        );
        assert!(table.select("[::ffff:192.168.1.128]:443").is_some());
        assert!(table.select("192.168.1.129:443").is_none());
        assert!(table.select("example.com:443").is_none());
    }

    #[test]
    fn test_mapped_ipv6_row_matches_both_forms() {
        let table = IpTable::new(
            vec![route(&["::ffff:10.0.0.1"], dialer("a", ConnectionInfo::tunneled("a:1")))],
            None,
        );
        assert_eq!(selected_name(&table, "[::ffff:10.0.0.1]:80").as_deref(), Some("a:1"));
        assert_eq!(selected_name(&table, "10.0.0.1:80").as_deref(), Some("a:1"));
        assert!(table.select("10.0.0.2:80").is_none());
    }

    #[tokio::test]
    async fn test_no_route_error() {
        let table = IpTable::new(
            vec![route(&["10.0.0.0/8"], dialer("a", ConnectionInfo::tunneled("a:1")))],
            None,
        );
        let error = table.dial_stream("8.8.8.8:53").await.err().unwrap();
        assert_eq!(error.to_string(), "no dialer available for address 8.8.8.8:53");

        let error = table.dial_stream("10.0.0.1:53").await.err().unwrap();
        assert_eq!(error.to_string(), "dialer 'a' called for address '10.0.0.1:53'");
    }

    #[test]
    fn test_connection_info_homogeneous() {
        let table = IpTable::new(
            vec![
                route(&["10.0.0.0/8"], dialer("a", ConnectionInfo::tunneled("a:1"))),
                route(&["11.0.0.0/8"], dialer("b", ConnectionInfo::tunneled("a:1"))),
            ],
            None,
        );
        assert_eq!(table.connection_info(), ConnectionInfo::tunneled("a:1"));
    }

    #[test]
    fn test_connection_info_prefers_first_hop() {
        let table = IpTable::new(
            vec![
                route(&["10.0.0.0/8"], dialer("a", ConnectionInfo::direct())),
                route(&["11.0.0.0/8"], dialer("b", ConnectionInfo::tunneled("b:1"))),
                route(&["12.0.0.0/8"], dialer("c", ConnectionInfo::tunneled("c:1"))),
            ],
            Some(dialer("d", ConnectionInfo::blocked())),
        );
        assert_eq!(table.connection_info(), ConnectionInfo::tunneled("b:1"));
    }

    #[test]
    fn test_connection_info_without_first_hops() {
        let table = IpTable::new(
            vec![route(&["10.0.0.0/8"], dialer("a", ConnectionInfo::blocked()))],
            Some(dialer("b", ConnectionInfo::direct())),
        );
        assert_eq!(table.connection_info(), ConnectionInfo::blocked());

        let empty: IpTable<dyn StreamDialer> = IpTable::new(vec![], None);
        assert_eq!(empty.connection_info(), ConnectionInfo::blocked());
    }
}
