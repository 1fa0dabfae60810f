//! Record Cache (§4.3): the operational and commissionable device maps,
//! each with per-entry and per-address TTL.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr};
use std::time::{Duration, Instant};

use crate::sort::{SortableAddress, sort_addresses};
use crate::txt::{CommissionableTxt, DiscoveryData};
use crate::wire::{Record, RecordData, RecordType};

/// A single cached IP endpoint for a device (§3 `addresses`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAddress {
    pub ip: IpAddr,
    pub port: u16,
    pub discovered_at: Instant,
    pub ttl: Duration,
}

impl CachedAddress {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.discovered_at) >= self.ttl
    }
}

fn is_link_local_v6(ip: &Ipv6Addr) -> bool {
    let o = ip.octets();
    o[0] == 0xfe && (o[1] & 0xc0) == 0x80
}

/// Address map key: the literal, plus `%<iface>` for link-local IPv6 (§9
/// "Interface tagging") so the same literal on two interfaces coexists.
fn address_key(ip: &IpAddr, iface: &str) -> String {
    match ip {
        IpAddr::V6(v6) if is_link_local_v6(v6) && !iface.is_empty() => format!("{ip}%{iface}"),
        _ => ip.to_string(),
    }
}

fn prune_expired_addresses(addresses: &mut HashMap<String, CachedAddress>, now: Instant) {
    addresses.retain(|_, a| !a.is_expired(now));
}

/// Apply A/AAAA records from a packet whose owner name matches `target` onto
/// `addresses`, honoring TTL-0 goodbyes and the IPv4-enable flag (§4.3).
fn apply_address_records(
    addresses: &mut HashMap<String, CachedAddress>,
    target: &str,
    port: u16,
    records: &[Record],
    enable_ipv4: bool,
    iface: &str,
    now: Instant,
) {
    for rr in records {
        if rr.name != target {
            continue;
        }
        let ip = match (rr.rtype, &rr.data) {
            (RecordType::A, RecordData::A(ip)) if enable_ipv4 => IpAddr::V4(*ip),
            (RecordType::Aaaa, RecordData::Aaaa(ip)) => IpAddr::V6(*ip),
            _ => continue,
        };
        let key = address_key(&ip, iface);
        if rr.ttl == 0 {
            addresses.remove(&key);
        } else {
            addresses.insert(
                key,
                CachedAddress {
                    ip,
                    port,
                    discovered_at: now,
                    ttl: Duration::from_secs(rr.ttl as u64),
                },
            );
        }
    }
}

/// An operational device already joined to a fabric (§3).
#[derive(Debug, Clone)]
pub struct OperationalDevice {
    pub device_identifier: String,
    pub addresses: HashMap<String, CachedAddress>,
    pub discovered_at: Instant,
    pub ttl: Duration,
    pub discovery_data: DiscoveryData,
    pub target: Option<String>,
}

impl OperationalDevice {
    pub fn sorted_addresses(&self) -> Vec<SortableAddress> {
        sort_addresses(
            &self
                .addresses
                .values()
                .map(|a| SortableAddress {
                    ip: a.ip,
                    port: a.port,
                })
                .collect::<Vec<_>>(),
        )
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.discovered_at) >= self.ttl
    }
}

/// A commissionable device advertising itself for pairing (§3).
#[derive(Debug, Clone)]
pub struct CommissionableDevice {
    pub device_identifier: String,
    pub addresses: HashMap<String, CachedAddress>,
    pub discovered_at: Instant,
    pub ttl: Duration,
    pub discovery_data: DiscoveryData,
    pub d: Option<u16>,
    pub sd: Option<u8>,
    pub cm: Option<u8>,
    pub device_type: Option<u32>,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub target: Option<String>,
}

impl CommissionableDevice {
    pub fn sorted_addresses(&self) -> Vec<SortableAddress> {
        sort_addresses(
            &self
                .addresses
                .values()
                .map(|a| SortableAddress {
                    ip: a.ip,
                    port: a.port,
                })
                .collect::<Vec<_>>(),
        )
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.discovered_at) >= self.ttl
    }
}

fn instance_id_of(name: &str) -> String {
    name.split('.').next().unwrap_or(name).to_owned()
}

/// Outcome of an upsert, used by the correlator to decide whether to wake a
/// streaming waiter as "new" vs. "refreshed" (§4.4 `isUpdatedRecord`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Removed,
    Created,
    Updated,
}

/// Keyed store of operational and commissionable devices (§4.3).
#[derive(Default)]
pub struct RecordCache {
    operational: HashMap<String, OperationalDevice>,
    commissionable: HashMap<String, CommissionableDevice>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operational(&self, name: &str) -> Option<&OperationalDevice> {
        self.operational.get(name)
    }

    pub fn commissionable(&self, name: &str) -> Option<&CommissionableDevice> {
        self.commissionable.get(name)
    }

    pub fn query_commissionable<'a>(
        &'a self,
        predicate: &'a crate::predicate::CommissionablePredicate,
    ) -> Vec<&'a CommissionableDevice> {
        self.commissionable
            .values()
            .filter(|d| predicate.matches(d))
            .collect()
    }

    /// §4.3 `upsertOperationalTxt`.
    pub fn upsert_operational_txt(
        &mut self,
        name: &str,
        ttl_secs: u32,
        data: DiscoveryData,
        now: Instant,
    ) -> UpsertOutcome {
        if ttl_secs == 0 {
            self.operational.remove(name);
            return UpsertOutcome::Removed;
        }
        let existed = self.operational.contains_key(name);
        let entry = self
            .operational
            .entry(name.to_owned())
            .or_insert_with(|| OperationalDevice {
                device_identifier: name.to_owned(),
                addresses: HashMap::new(),
                discovered_at: now,
                ttl: Duration::ZERO,
                discovery_data: DiscoveryData::default(),
                target: None,
            });
        entry.discovery_data = data;
        entry.discovered_at = now;
        entry.ttl = Duration::from_secs(ttl_secs as u64);
        if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        }
    }

    /// §4.3 `upsertOperationalSrv`.
    pub fn upsert_operational_srv(
        &mut self,
        name: &str,
        ttl_secs: u32,
        target: &str,
        port: u16,
        answers_in_packet: &[Record],
        enable_ipv4: bool,
        iface: &str,
        now: Instant,
    ) -> UpsertOutcome {
        if ttl_secs == 0 {
            self.operational.remove(name);
            return UpsertOutcome::Removed;
        }
        let existed = self.operational.contains_key(name);
        let entry = self
            .operational
            .entry(name.to_owned())
            .or_insert_with(|| OperationalDevice {
                device_identifier: name.to_owned(),
                addresses: HashMap::new(),
                discovered_at: now,
                ttl: Duration::ZERO,
                discovery_data: DiscoveryData::default(),
                target: None,
            });
        entry.target = Some(target.to_owned());
        entry.discovered_at = now;
        entry.ttl = Duration::from_secs(ttl_secs as u64);
        apply_address_records(
            &mut entry.addresses,
            target,
            port,
            answers_in_packet,
            enable_ipv4,
            iface,
            now,
        );
        if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        }
    }

    /// §4.6.2: merge a parsed commissionable TXT, preserving any
    /// pre-existing addresses.
    pub fn upsert_commissionable_txt(
        &mut self,
        name: &str,
        ttl_secs: u32,
        txt: CommissionableTxt,
        now: Instant,
    ) -> UpsertOutcome {
        if ttl_secs == 0 {
            self.commissionable.remove(name);
            return UpsertOutcome::Removed;
        }
        let short_d = crate::txt::short_discriminator(txt.d);
        let existed = self.commissionable.contains_key(name);
        let entry = self
            .commissionable
            .entry(name.to_owned())
            .or_insert_with(|| CommissionableDevice {
                device_identifier: instance_id_of(name),
                addresses: HashMap::new(),
                discovered_at: now,
                ttl: Duration::ZERO,
                discovery_data: DiscoveryData::default(),
                d: None,
                sd: None,
                cm: None,
                device_type: None,
                vendor_id: None,
                product_id: None,
                target: None,
            });
        entry.discovery_data = txt.discovery;
        entry.d = Some(txt.d);
        entry.sd = Some(short_d);
        entry.cm = Some(txt.cm);
        entry.device_type = txt.dt;
        entry.vendor_id = txt.vendor_id;
        entry.product_id = txt.product_id;
        entry.discovered_at = now;
        entry.ttl = Duration::from_secs(ttl_secs as u64);
        if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        }
    }

    /// §4.6.2: merge a commissionable SRV, refreshing addresses as for
    /// operational devices.
    pub fn upsert_commissionable_srv(
        &mut self,
        name: &str,
        ttl_secs: u32,
        target: &str,
        port: u16,
        answers_in_packet: &[Record],
        enable_ipv4: bool,
        iface: &str,
        now: Instant,
    ) -> UpsertOutcome {
        if ttl_secs == 0 {
            self.commissionable.remove(name);
            return UpsertOutcome::Removed;
        }
        let existed = self.commissionable.contains_key(name);
        let entry = self
            .commissionable
            .entry(name.to_owned())
            .or_insert_with(|| CommissionableDevice {
                device_identifier: instance_id_of(name),
                addresses: HashMap::new(),
                discovered_at: now,
                ttl: Duration::ZERO,
                discovery_data: DiscoveryData::default(),
                d: None,
                sd: None,
                cm: None,
                device_type: None,
                vendor_id: None,
                product_id: None,
                target: None,
            });
        entry.target = Some(target.to_owned());
        entry.discovered_at = now;
        entry.ttl = Duration::from_secs(ttl_secs as u64);
        apply_address_records(
            &mut entry.addresses,
            target,
            port,
            answers_in_packet,
            enable_ipv4,
            iface,
            now,
        );
        if existed {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        }
    }

    /// §4.3 `expireSweep`: delete devices past their own TTL or left with no
    /// live addresses after per-address expiry. Returns the keys removed.
    pub fn expire_sweep(&mut self, now: Instant) -> Vec<String> {
        let mut removed = Vec::new();
        self.operational.retain(|key, dev| {
            prune_expired_addresses(&mut dev.addresses, now);
            let keep = !dev.is_expired(now) && !dev.addresses.is_empty();
            if !keep {
                removed.push(key.clone());
            }
            keep
        });
        self.commissionable.retain(|key, dev| {
            prune_expired_addresses(&mut dev.addresses, now);
            let keep = !dev.is_expired(now) && !dev.addresses.is_empty();
            if !keep {
                removed.push(key.clone());
            }
            keep
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::RecordType;

    fn a_rec(name: &str, ip: &str, ttl: u32) -> Record {
        Record {
            name: name.to_owned(),
            rtype: RecordType::Aaaa,
            class: crate::wire::CLASS_IN,
            ttl,
            data: RecordData::Aaaa(ip.parse().unwrap()),
        }
    }

    #[test]
    fn zero_ttl_txt_removes_operational_device() {
        let mut cache = RecordCache::new();
        let now = Instant::now();
        cache.upsert_operational_txt("dev.local", 120, DiscoveryData::default(), now);
        assert!(cache.operational("dev.local").is_some());
        let outcome = cache.upsert_operational_txt("dev.local", 0, DiscoveryData::default(), now);
        assert_eq!(outcome, UpsertOutcome::Removed);
        assert!(cache.operational("dev.local").is_none());
    }

    #[test]
    fn srv_links_address_records_by_target_name() {
        let mut cache = RecordCache::new();
        let now = Instant::now();
        let packet = vec![a_rec("device1.local", "fe80::1", 120)];
        cache.upsert_operational_srv(
            "dev._matter._tcp.local",
            120,
            "device1.local",
            5540,
            &packet,
            true,
            "eth0",
            now,
        );
        let dev = cache.operational("dev._matter._tcp.local").unwrap();
        assert_eq!(dev.addresses.len(), 1);
        assert!(dev.addresses.contains_key("fe80::1%eth0"));
    }

    #[test]
    fn link_local_addresses_tagged_per_interface_coexist() {
        let mut cache = RecordCache::new();
        let now = Instant::now();
        cache.upsert_operational_srv(
            "dev._matter._tcp.local",
            120,
            "device1.local",
            5540,
            &[a_rec("device1.local", "fe80::1", 120)],
            true,
            "eth0",
            now,
        );
        cache.upsert_operational_srv(
            "dev._matter._tcp.local",
            120,
            "device1.local",
            5540,
            &[a_rec("device1.local", "fe80::1", 120)],
            true,
            "wlan0",
            now,
        );
        let dev = cache.operational("dev._matter._tcp.local").unwrap();
        assert_eq!(dev.addresses.len(), 2);
    }

    #[test]
    fn zero_ttl_address_record_deletes_just_that_address() {
        let mut cache = RecordCache::new();
        let now = Instant::now();
        cache.upsert_operational_srv(
            "dev._matter._tcp.local",
            120,
            "device1.local",
            5540,
            &[a_rec("device1.local", "fe80::1", 120)],
            true,
            "eth0",
            now,
        );
        cache.upsert_operational_srv(
            "dev._matter._tcp.local",
            120,
            "device1.local",
            5540,
            &[a_rec("device1.local", "fe80::1", 0)],
            true,
            "eth0",
            now,
        );
        let dev = cache.operational("dev._matter._tcp.local").unwrap();
        assert!(dev.addresses.is_empty());
    }

    #[test]
    fn expire_sweep_removes_devices_past_ttl() {
        let mut cache = RecordCache::new();
        let now = Instant::now();
        cache.upsert_operational_srv(
            "dev._matter._tcp.local",
            1,
            "device1.local",
            5540,
            &[a_rec("device1.local", "fe80::1", 1)],
            true,
            "eth0",
            now,
        );
        let later = now + Duration::from_secs(5);
        let removed = cache.expire_sweep(later);
        assert_eq!(removed, vec!["dev._matter._tcp.local".to_owned()]);
        assert!(cache.operational("dev._matter._tcp.local").is_none());
    }

    #[test]
    fn device_with_zero_addresses_after_expiry_is_removed_even_if_device_ttl_not_elapsed() {
        let mut cache = RecordCache::new();
        let now = Instant::now();
        cache.upsert_operational_srv(
            "dev._matter._tcp.local",
            3600,
            "device1.local",
            5540,
            &[a_rec("device1.local", "fe80::1", 1)],
            true,
            "eth0",
            now,
        );
        let later = now + Duration::from_secs(5);
        cache.expire_sweep(later);
        assert!(cache.operational("dev._matter._tcp.local").is_none());
    }

    #[test]
    fn monotone_refresh_never_decreases_expiry() {
        let mut cache = RecordCache::new();
        let t0 = Instant::now();
        cache.upsert_operational_txt("dev.local", 120, DiscoveryData::default(), t0);
        let t1 = t0 + Duration::from_secs(10);
        cache.upsert_operational_txt("dev.local", 120, DiscoveryData::default(), t1);
        let dev = cache.operational("dev.local").unwrap();
        assert_eq!(dev.discovered_at, t1);
        assert!(dev.discovered_at + dev.ttl > t0 + Duration::from_secs(120));
    }
}
