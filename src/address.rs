use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Hostname(String),
}

impl Address {
    pub fn from(s: &str) -> std::io::Result<Self> {
        if s.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Empty address",
            ));
        }

        let mut dots = 0;
        let mut possible_ipv4 = true;
        let mut possible_ipv6 = true;
        let mut possible_hostname = true;
        for b in s.as_bytes().iter() {
            let c = *b;
            if c == b':' {
                possible_ipv4 = false;
                possible_hostname = false;
                break;
            } else if c == b'.' {
                possible_ipv6 = false;
                dots += 1;
                if dots > 3 {
                    // can only be a hostname.
                    break;
                }
            } else if (b'A'..=b'F').contains(&c) || (b'a'..=b'f').contains(&c) {
                possible_ipv4 = false;
            } else if !c.is_ascii_digit() {
                possible_ipv4 = false;
                possible_ipv6 = false;
                break;
            }
        }

        if possible_ipv4
            && dots == 3
            && let Ok(addr) = s.parse::<Ipv4Addr>()
        {
            return Ok(Address::Ipv4(addr));
        }

        if possible_ipv6 && let Ok(addr) = s.parse::<Ipv6Addr>() {
            return Ok(Address::Ipv6(addr));
        }

        if possible_hostname {
            return Ok(Address::Hostname(s.to_string()));
        }

        Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to parse address: {s}"),
        ))
    }

    pub fn is_ipv6(&self) -> bool {
        matches!(self, Address::Ipv6(_))
    }

    /// Returns the IP for literal addresses, with IPv4-mapped IPv6 addresses
    /// converted to plain IPv4.
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Address::Ipv4(addr) => Some(IpAddr::V4(*addr)),
            Address::Ipv6(addr) => Some(IpAddr::V6(*addr).to_canonical()),
            Address::Hostname(_) => None,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Address::Ipv4(i) => write!(f, "{i}"),
            Address::Ipv6(i) => write!(f, "{i}"),
            Address::Hostname(h) => write!(f, "{h}"),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct NetLocation {
    address: Address,
    port: u16,
}

impl NetLocation {
    pub const fn new(address: Address, port: u16) -> Self {
        Self { address, port }
    }

    /// Parses `host:port`, `ipv4:port` or `[ipv6]:port`. The port may be
    /// omitted only when `default_port` is provided.
    pub fn from_str(s: &str, default_port: Option<u16>) -> std::io::Result<Self> {
        if let Some(rest) = s.strip_prefix('[') {
            let (address_str, suffix) = rest.split_once(']').ok_or_else(|| {
                std::io::Error::other(format!("Missing closing bracket in location: {s}"))
            })?;
            let address = Address::from(address_str)?;
            if !address.is_ipv6() {
                return Err(std::io::Error::other(format!(
                    "Only ipv6 addresses may be bracketed: {s}"
                )));
            }
            let port = if suffix.is_empty() {
                default_port
            } else {
                let port_str = suffix.strip_prefix(':').ok_or_else(|| {
                    std::io::Error::other(format!("Unexpected characters after bracket: {s}"))
                })?;
                let port = port_str
                    .parse::<u16>()
                    .map_err(|e| std::io::Error::other(format!("Failed to parse port: {e}")))?;
                Some(port)
            };
            let port = port.ok_or_else(|| std::io::Error::other(format!("No port in {s}")))?;
            return Ok(Self { address, port });
        }

        let (address_str, port, expect_ipv6) = match s.rfind(':') {
            Some(i) => {
                // The ':' could be from an ipv6 address.
                match s[i + 1..].parse::<u16>() {
                    Ok(port) => (&s[0..i], Some(port), false),
                    Err(_) => (s, default_port, true),
                }
            }
            None => (s, default_port, false),
        };

        let address = Address::from(address_str)?;
        if expect_ipv6 && !address.is_ipv6() {
            return Err(std::io::Error::other(format!("Invalid location: {s}")));
        }

        let port = port.ok_or_else(|| std::io::Error::other(format!("No port in {s}")))?;

        Ok(Self { address, port })
    }

    pub fn components(&self) -> (&Address, u16) {
        (&self.address, self.port)
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl std::fmt::Display for NetLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.address {
            Address::Ipv6(ref addr) => write!(f, "[{}]:{}", addr, self.port),
            _ => write!(f, "{}:{}", self.address, self.port),
        }
    }
}

/// An IP literal or CIDR block. Literals without a prefix length match only
/// themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressMask {
    address: IpAddr,
    prefix_len: u8,
    netmask: u128,
}

impl AddressMask {
    pub fn from(s: &str) -> std::io::Result<Self> {
        let (address_str, num_bits) = match s.rfind('/') {
            Some(i) => {
                let num_bits = s[i + 1..]
                    .parse::<u8>()
                    .map_err(|e| std::io::Error::other(format!("Failed to parse netmask: {e}")))?;
                (&s[0..i], Some(num_bits))
            }
            None => (s, None),
        };

        let address = match Address::from(address_str)? {
            Address::Ipv4(addr) => IpAddr::V4(addr),
            Address::Ipv6(addr) => IpAddr::V6(addr),
            Address::Hostname(hostname) => {
                return Err(std::io::Error::other(format!(
                    "Expected an IP address or CIDR block, got hostname: {hostname}"
                )));
            }
        };

        let max_bits = if address.is_ipv4() { 32 } else { 128 };
        let prefix_len = num_bits.unwrap_or(max_bits);
        if prefix_len > max_bits {
            return Err(std::io::Error::other(format!(
                "Invalid number of bits for {address}: {prefix_len}"
            )));
        }

        // destinations are canonicalized before matching, so mapped rules
        // are stored as ipv4.
        let (address, prefix_len) = match address {
            IpAddr::V6(addr) if prefix_len >= 96 => match addr.to_ipv4_mapped() {
                Some(v4) => (IpAddr::V4(v4), prefix_len - 96),
                None => (address, prefix_len),
            },
            _ => (address, prefix_len),
        };

        // ipv4 addresses are compared in their ipv4-mapped ipv6 form.
        let keep_bits = if address.is_ipv4() {
            96 + prefix_len as u32
        } else {
            prefix_len as u32
        };
        let clear_bits = 128 - keep_bits;

        // rust complains if you shift away all the bits.
        let netmask = if clear_bits == 128 {
            0
        } else {
            (u128::MAX >> clear_bits) << clear_bits
        };

        Ok(Self {
            address,
            prefix_len,
            netmask,
        })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        if self.address.is_ipv4() != ip.is_ipv4() {
            return false;
        }
        ip_to_u128(self.address) & self.netmask == ip_to_u128(ip) & self.netmask
    }
}

impl std::fmt::Display for AddressMask {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

#[inline]
fn ip_to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(addr) => u128::from(addr.to_ipv6_mapped()),
        IpAddr::V6(addr) => u128::from(addr),
    }
}
