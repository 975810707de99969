use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

/// CIDR block used to decide which peers may supply `X-Forwarded-For`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpNetwork {
    network: IpAddr,
    prefix: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidIpNetwork;

impl std::fmt::Display for InvalidIpNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("invalid ip network")
    }
}

impl std::error::Error for InvalidIpNetwork {}

impl IpNetwork {
    #[must_use]
    pub fn contains(self, ip: IpAddr) -> bool {
        canonicalize_ip(ip, self.prefix).is_ok_and(|value| value == self.network)
    }

    #[must_use]
    pub fn prefix(self) -> u8 {
        self.prefix
    }
}

impl FromStr for IpNetwork {
    type Err = InvalidIpNetwork;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.is_empty() {
            return Err(InvalidIpNetwork);
        }
        let (address, prefix) = if let Some((ip_part, prefix_part)) = value.split_once('/') {
            if ip_part.is_empty() || prefix_part.is_empty() || prefix_part.contains('/') {
                return Err(InvalidIpNetwork);
            }
            let ip = IpAddr::from_str(ip_part).map_err(|_| InvalidIpNetwork)?;
            let prefix = prefix_part.parse::<u8>().map_err(|_| InvalidIpNetwork)?;
            (ip, prefix)
        } else {
            let ip = IpAddr::from_str(value).map_err(|_| InvalidIpNetwork)?;
            let host_prefix = match ip {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            (ip, host_prefix)
        };

        Ok(Self {
            network: canonicalize_ip(address, prefix)?,
            prefix,
        })
    }
}

impl TryFrom<String> for IpNetwork {
    type Error = InvalidIpNetwork;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(&value)
    }
}

impl std::fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Parses a comma separated CIDR list, ignoring empty entries.
///
/// # Errors
/// Returns [`InvalidIpNetwork`] when any entry fails to parse.
pub fn parse_trusted_proxy_cidrs(raw: &str) -> Result<Vec<IpNetwork>, InvalidIpNetwork> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(IpNetwork::from_str)
        .collect()
}

fn canonicalize_ip(ip: IpAddr, prefix: u8) -> Result<IpAddr, InvalidIpNetwork> {
    match ip {
        IpAddr::V4(value) => {
            if prefix > 32 {
                return Err(InvalidIpNetwork);
            }
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            Ok(IpAddr::V4(Ipv4Addr::from(u32::from(value) & mask)))
        }
        IpAddr::V6(value) => {
            if prefix > 128 {
                return Err(InvalidIpNetwork);
            }
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            Ok(IpAddr::V6(Ipv6Addr::from(u128::from(value) & mask)))
        }
    }
}
