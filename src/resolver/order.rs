//! Candidate ordering.
//!
//! With an explicit family only that family's addresses are returned, in
//! resolver order. Otherwise the two families are interleaved starting with
//! the configured first family; leftovers of the longer list follow in order.
//! Duplicates keep their first position.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Address family of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    #[serde(alias = "v4")]
    Ipv4,
    #[serde(alias = "v6")]
    Ipv6,
}

impl AddressFamily {
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    pub fn other(self) -> Self {
        match self {
            AddressFamily::Ipv4 => AddressFamily::Ipv6,
            AddressFamily::Ipv6 => AddressFamily::Ipv4,
        }
    }
}

/// One resolved socket address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AddressCandidate {
    pub addr: SocketAddr,
    pub family: AddressFamily,
}

impl AddressCandidate {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            family: AddressFamily::of(&addr.ip()),
        }
    }
}

/// Order resolved addresses into connection candidates.
pub fn order_candidates(
    v4: &[IpAddr],
    v6: &[IpAddr],
    port: u16,
    family: Option<AddressFamily>,
    first_family: AddressFamily,
) -> Vec<AddressCandidate> {
    let (primary, secondary) = match family {
        Some(AddressFamily::Ipv4) => (v4, &[][..]),
        Some(AddressFamily::Ipv6) => (v6, &[][..]),
        None => match first_family {
            AddressFamily::Ipv4 => (v4, v6),
            AddressFamily::Ipv6 => (v6, v4),
        },
    };

    let mut ordered: Vec<AddressCandidate> = Vec::with_capacity(primary.len() + secondary.len());
    let mut push = |ip: &IpAddr| {
        let candidate = AddressCandidate::new(SocketAddr::new(*ip, port));
        if !ordered.contains(&candidate) {
            ordered.push(candidate);
        }
    };

    let longest = primary.len().max(secondary.len());
    for i in 0..longest {
        if let Some(ip) = primary.get(i) {
            push(ip);
        }
        if let Some(ip) = secondary.get(i) {
            push(ip);
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ips(list: &[&str]) -> Vec<IpAddr> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn interleaves_starting_with_first_family() {
        let v4 = ips(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        let v6 = ips(&["::1", "::2"]);

        let ordered = order_candidates(&v4, &v6, 80, None, AddressFamily::Ipv6);
        let addrs: Vec<String> = ordered.iter().map(|c| c.addr.to_string()).collect();
        assert_eq!(
            addrs,
            ["[::1]:80", "10.0.0.1:80", "[::2]:80", "10.0.0.2:80", "10.0.0.3:80"]
        );

        let ordered = order_candidates(&v4, &v6, 80, None, AddressFamily::Ipv4);
        assert_eq!(ordered[0].family, AddressFamily::Ipv4);
        assert_eq!(ordered[1].family, AddressFamily::Ipv6);
    }

    #[test]
    fn explicit_family_filters() {
        let v4 = ips(&["10.0.0.1"]);
        let v6 = ips(&["::1"]);
        let ordered = order_candidates(&v4, &v6, 443, Some(AddressFamily::Ipv4), AddressFamily::Ipv6);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].addr, "10.0.0.1:443".parse().unwrap());
    }

    #[test]
    fn duplicates_keep_first_position() {
        let v4 = ips(&["10.0.0.1", "10.0.0.1", "10.0.0.2"]);
        let ordered = order_candidates(&v4, &[], 1, None, AddressFamily::Ipv6);
        assert_eq!(ordered.len(), 2);
    }
}
