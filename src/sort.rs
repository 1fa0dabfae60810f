//! Address Sorter (§4.1): deterministic ordering of discovered IP endpoints.

use std::net::IpAddr;

/// An IP/port pair as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortableAddress {
    pub ip: IpAddr,
    pub port: u16,
}

fn rank(ip: &IpAddr) -> u8 {
    match ip {
        IpAddr::V6(v6) => {
            let octets = v6.octets();
            if octets[0] == 0xfd {
                0 // unique-local
            } else if octets[0] == 0xfe && (octets[1] & 0xc0) == 0x80 {
                1 // link-local
            } else {
                2 // other IPv6
            }
        }
        IpAddr::V4(_) => 3,
    }
}

/// Sort addresses by the rank in §4.1, stable for equal ranks. Never mutates
/// its input; returns a freshly ordered copy.
pub fn sort_addresses(addrs: &[SortableAddress]) -> Vec<SortableAddress> {
    let mut out = addrs.to_vec();
    out.sort_by_key(|a| rank(&a.ip));
    out
}
