//! SOCKS-style address headers, as used by shadowsocks to name the target.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::address::{Address, NetLocation};

const ADDR_TYPE_IPV4: u8 = 0x01;
const ADDR_TYPE_DOMAIN_NAME: u8 = 0x03;
const ADDR_TYPE_IPV6: u8 = 0x04;

pub fn write_location_to_vec(location: &NetLocation) -> std::io::Result<Vec<u8>> {
    let (address, port) = location.components();
    let mut vec = match address {
        Address::Ipv4(v4addr) => {
            let mut vec = Vec::with_capacity(7);
            vec.push(ADDR_TYPE_IPV4);
            vec.extend_from_slice(&v4addr.octets());
            vec
        }
        Address::Ipv6(v6addr) => {
            let mut vec = Vec::with_capacity(19);
            vec.push(ADDR_TYPE_IPV6);
            vec.extend_from_slice(&v6addr.octets());
            vec
        }
        Address::Hostname(domain_name) => {
            let domain_name_bytes = domain_name.as_bytes();
            let domain_name_len = u8::try_from(domain_name_bytes.len()).map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("hostname too long: {}", domain_name),
                )
            })?;
            let mut vec = Vec::with_capacity(4 + domain_name_bytes.len());
            vec.push(ADDR_TYPE_DOMAIN_NAME);
            vec.push(domain_name_len);
            vec.extend_from_slice(domain_name_bytes);
            vec
        }
    };

    vec.extend_from_slice(&port.to_be_bytes());
    Ok(vec)
}

/// Parses an address header from the start of `data`, returning the location
/// and the header length.
pub fn read_location_from_slice(data: &[u8]) -> std::io::Result<(NetLocation, usize)> {
    let address_type = *data.first().ok_or_else(truncated)?;
    match address_type {
        ADDR_TYPE_IPV4 => {
            let address_bytes = data.get(1..7).ok_or_else(truncated)?;
            let v4addr = Ipv4Addr::new(
                address_bytes[0],
                address_bytes[1],
                address_bytes[2],
                address_bytes[3],
            );
            let port = u16::from_be_bytes([address_bytes[4], address_bytes[5]]);
            Ok((NetLocation::new(Address::Ipv4(v4addr), port), 7))
        }
        ADDR_TYPE_IPV6 => {
            let address_bytes = data.get(1..19).ok_or_else(truncated)?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&address_bytes[0..16]);
            let port = u16::from_be_bytes([address_bytes[16], address_bytes[17]]);
            Ok((
                NetLocation::new(Address::Ipv6(Ipv6Addr::from(octets)), port),
                19,
            ))
        }
        ADDR_TYPE_DOMAIN_NAME => {
            let address_len = *data.get(1).ok_or_else(truncated)? as usize;
            let address_bytes = data.get(2..4 + address_len).ok_or_else(truncated)?;
            let address_str = std::str::from_utf8(&address_bytes[0..address_len]).map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Failed to decode address: {}", e),
                )
            })?;
            let port = u16::from_be_bytes([address_bytes[address_len], address_bytes[address_len + 1]]);

            // Some servers send IP literals as domain names.
            Ok((
                NetLocation::new(Address::from(address_str)?, port),
                4 + address_len,
            ))
        }
        _ => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Unknown address type: {}", address_type),
        )),
    }
}

fn truncated() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "truncated address header",
    )
}
