use std::net::IpAddr;

/// A parsed `address/prefix` block, keeping the network address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Cidr {
    pub(crate) addr: IpAddr,
}

impl Cidr {
    pub(crate) fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }
}

pub(crate) fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Parse a single CIDR, returning a human readable reason on failure
pub(crate) fn parse_cidr(s: &str) -> Result<Cidr, String> {
    let (addr, prefix) = s
        .trim()
        .split_once('/')
        .ok_or_else(|| format!("{s:?} is missing a prefix length"))?;
    let addr: IpAddr = addr.parse().map_err(|e| format!("{addr:?}: {e}"))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| format!("{prefix:?} is not a valid prefix length"))?;
    if prefix > max_prefix(&addr) {
        return Err(format!("prefix length {prefix} is too long for {addr}"));
    }
    Ok(Cidr { addr })
}

/// Parse each entry of a comma separated list, paired with its trimmed text
pub(crate) fn parse_cidrs(s: &str) -> impl Iterator<Item = (&str, Result<Cidr, String>)> {
    s.split(',').map(str::trim).map(|cidr| (cidr, parse_cidr(cidr)))
}
