//! Tunables for the scanner, gathered in one place so behavior documented in
//! the component design (§4.3, §4.5) is never a magic number buried in logic.

use std::time::Duration;

/// Maximum size of a single mDNS UDP datagram (§3 invariant 5, §4.5 step 3).
pub const MAX_MDNS_MESSAGE_SIZE: usize = 1500;

/// Initial re-broadcast interval after `setQueryRecords` (§4.5).
pub const INITIAL_QUERY_INTERVAL: Duration = Duration::from_millis(1500);

/// Upper bound the back-off doubles towards (§4.5, §8 invariant 4).
pub const MAX_QUERY_INTERVAL: Duration = Duration::from_secs(3600);

/// Period of the cache expiry sweep (§4.3).
pub const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default timeout for `findCommissionableDevices` (§4.7).
pub const DEFAULT_COMMISSIONABLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Standard mDNS multicast port.
pub const MDNS_PORT: u16 = 5353;

/// Standard mDNS IPv4 multicast group.
pub const MDNS_ADDR_V4: &str = "224.0.0.251";

/// Standard mDNS IPv6 multicast group.
pub const MDNS_ADDR_V6: &str = "ff02::fb";

/// Runtime-tunable knobs a caller may override; everything else in this
/// module is a protocol constant that should not vary between instances.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Restrict discovery to a single named interface (e.g. `eth0`). `None`
    /// joins every usable interface, matching the teacher's multi-socket
    /// fan-out in `mdns2::MdnsService::new`.
    pub net_interface: Option<String>,
    /// Whether to also query/accept IPv4 A records. Matter prefers IPv6 but
    /// IPv4-only networks still need to work.
    pub enable_ipv4: bool,
    /// Maximum outbound datagram size; split into `TruncatedQuery`
    /// fragments above this (§4.5 step 3).
    pub max_message_size: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            net_interface: None,
            enable_ipv4: true,
            max_message_size: MAX_MDNS_MESSAGE_SIZE,
        }
    }
}
