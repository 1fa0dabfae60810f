//! Message Correlator (§4.6): turns one inbound datagram into cache updates
//! and, where warranted, wakes waiters or schedules follow-up queries.

use std::time::Instant;

use crate::cache::{RecordCache, UpsertOutcome};
use crate::config::ScannerConfig;
use crate::names;
use crate::predicate::CommissionablePredicate;
use crate::query::QueryScheduler;
use crate::txt::{self, CommissionableTxt, DiscoveryData};
use crate::waiters::WaiterRegistry;
use crate::wire::{self, MessageType, Query, Record, RecordData, RecordType};

/// Borrowed view over the engine state a datagram mutates (§5: all of it
/// lives behind the scanner's single lock, so this is a plain `&mut` set,
/// not its own synchronization domain).
pub struct Correlator<'a> {
    pub cache: &'a mut RecordCache,
    pub scheduler: &'a mut QueryScheduler,
    pub waiters: &'a mut WaiterRegistry,
    pub config: &'a ScannerConfig,
}

fn aaaa_and_maybe_a(target: &str, enable_ipv4: bool) -> Vec<Query> {
    let mut queries = vec![Query {
        name: target.to_owned(),
        rtype: RecordType::Aaaa,
        class: wire::CLASS_IN,
    }];
    if enable_ipv4 {
        queries.push(Query {
            name: target.to_owned(),
            rtype: RecordType::A,
            class: wire::CLASS_IN,
        });
    }
    queries
}

/// §4.6.5: first query id (in priority order) with an `ActiveQuery` entry.
fn active_query_id_for(
    device: &crate::cache::CommissionableDevice,
    scheduler: &QueryScheduler,
) -> Option<String> {
    let mut candidates =
        vec![CommissionablePredicate::Instance(device.device_identifier.clone()).query_id()];
    if let Some(d) = device.d {
        candidates.push(CommissionablePredicate::LongDiscriminator(d).query_id());
    }
    if let Some(sd) = device.sd {
        candidates.push(CommissionablePredicate::ShortDiscriminator(sd).query_id());
    }
    if let (Some(v), Some(p)) = (device.vendor_id, device.product_id) {
        candidates.push(CommissionablePredicate::VendorProduct(v, p).query_id());
    }
    if let Some(v) = device.vendor_id {
        candidates.push(CommissionablePredicate::Vendor(v).query_id());
    }
    if let Some(dt) = device.device_type {
        candidates.push(CommissionablePredicate::DeviceType(dt).query_id());
    }
    if let Some(p) = device.product_id {
        candidates.push(CommissionablePredicate::Product(p).query_id());
    }
    candidates.push(CommissionablePredicate::Any.query_id());
    candidates.into_iter().find(|id| scheduler.has_query(id))
}

impl<'a> Correlator<'a> {
    /// §4.6: entry point invoked once per received UDP datagram.
    pub fn handle_datagram(&mut self, bytes: &[u8], iface: &str, now: Instant) {
        let Some(msg) = wire::decode(bytes) else {
            log::debug!("mdns scanner: dropping unparsable datagram from {iface}");
            return;
        };
        if !matches!(
            msg.message_type,
            MessageType::Response | MessageType::TruncatedResponse
        ) {
            return;
        }

        let mut answers = msg.answers;
        answers.extend(msg.additional);
        let former_answers = self.scheduler.known_answers();

        if !self.handle_operational(&answers, &former_answers, iface, now) {
            self.handle_commissionable(&answers, &former_answers, iface, now);
        }
    }

    /// §4.6.1. Returns whether any operational record was present.
    fn handle_operational(
        &mut self,
        answers: &[Record],
        former: &[Record],
        iface: &str,
        now: Instant,
    ) -> bool {
        let suffix = names::OPERATIONAL_SERVICE;
        let txts: Vec<&Record> = answers
            .iter()
            .filter(|r| r.rtype == RecordType::Txt && r.name.ends_with(suffix))
            .collect();
        let mut srvs: Vec<&Record> = answers
            .iter()
            .filter(|r| r.rtype == RecordType::Srv && r.name.ends_with(suffix))
            .collect();
        if srvs.is_empty() {
            // spec.md:122: a fresh packet carrying only the A/AAAA answers
            // to an address follow-up query has no SRV of its own; fall
            // back to the SRV already stashed as a known answer so the
            // address merge below still finds it.
            srvs = former
                .iter()
                .filter(|r| r.rtype == RecordType::Srv && r.name.ends_with(suffix))
                .collect();
        }
        if txts.is_empty() && srvs.is_empty() {
            return false;
        }

        let mut combined = answers.to_vec();
        combined.extend_from_slice(former);

        for rr in &txts {
            if rr.ttl == 0 {
                self.cache
                    .upsert_operational_txt(&rr.name, 0, DiscoveryData::default(), now);
                continue;
            }
            let RecordData::Txt(raw) = &rr.data else {
                continue;
            };
            let data = txt::parse_operational_txt(raw);
            let outcome = self.cache.upsert_operational_txt(&rr.name, rr.ttl, data, now);
            self.after_operational_update(&rr.name, outcome == UpsertOutcome::Updated, Vec::new());
        }

        for rr in &srvs {
            if rr.ttl == 0 {
                self.cache
                    .upsert_operational_srv(&rr.name, 0, "", 0, &[], self.config.enable_ipv4, iface, now);
                continue;
            }
            let RecordData::Srv { target, port, .. } = &rr.data else {
                continue;
            };
            let outcome = self.cache.upsert_operational_srv(
                &rr.name,
                rr.ttl,
                target,
                *port,
                &combined,
                self.config.enable_ipv4,
                iface,
                now,
            );
            self.after_operational_update(
                &rr.name,
                outcome == UpsertOutcome::Updated,
                vec![(*rr).clone()],
            );
        }
        true
    }

    /// §4.6.1 "after update": wake a waiting caller once addresses exist,
    /// otherwise chase down the missing address records. `existed_before`
    /// is `isUpdatedRecord` — whether this device was already cached prior
    /// to the record that just arrived. `srv_known_answer` carries the SRV
    /// record that produced this call (if any) so it survives as a known
    /// answer on the follow-up query and can be found via `formerAnswers`
    /// when the address-only response arrives without a SRV of its own.
    fn after_operational_update(
        &mut self,
        device_name: &str,
        existed_before: bool,
        srv_known_answer: Vec<Record>,
    ) {
        let Some(device) = self.cache.operational(device_name) else {
            return;
        };
        if !device.addresses.is_empty() {
            self.waiters.finish(device_name, true, existed_before);
            return;
        }
        if !self.waiters.has_waiter(device_name) {
            return;
        }
        let Some(target) = device.target.clone() else {
            return;
        };
        self.scheduler.set_query_records(
            device_name,
            aaaa_and_maybe_a(&target, self.config.enable_ipv4),
            srv_known_answer,
        );
    }

    /// §4.6.2.
    fn handle_commissionable(
        &mut self,
        answers: &[Record],
        former: &[Record],
        iface: &str,
        now: Instant,
    ) {
        let suffix = names::COMMISSIONABLE_SERVICE;
        let txts: Vec<&Record> = answers
            .iter()
            .filter(|r| r.rtype == RecordType::Txt && r.name.ends_with(suffix))
            .collect();
        let mut srvs: Vec<&Record> = answers
            .iter()
            .filter(|r| r.rtype == RecordType::Srv && r.name.ends_with(suffix))
            .collect();
        if srvs.is_empty() {
            // spec.md:122: same SRV/formerAnswers fallback as the
            // operational path — an address-only follow-up response has no
            // SRV of its own.
            srvs = former
                .iter()
                .filter(|r| r.rtype == RecordType::Srv && r.name.ends_with(suffix))
                .collect();
        }
        if txts.is_empty() && srvs.is_empty() {
            return;
        }

        let mut combined = answers.to_vec();
        combined.extend_from_slice(former);

        let mut missing: Vec<String> = Vec::new();

        for rr in &txts {
            if rr.ttl == 0 {
                let placeholder = CommissionableTxt {
                    discovery: DiscoveryData::default(),
                    d: 0,
                    cm: 0,
                    dt: None,
                    vendor_id: None,
                    product_id: None,
                };
                self.cache.upsert_commissionable_txt(&rr.name, 0, placeholder, now);
                continue;
            }
            let RecordData::Txt(raw) = &rr.data else {
                continue;
            };
            let Some(parsed) = txt::parse_commissionable_txt(raw) else {
                log::debug!("mdns scanner: dropping commissionable TXT missing D/CM: {}", rr.name);
                continue;
            };
            let outcome = self
                .cache
                .upsert_commissionable_txt(&rr.name, rr.ttl, parsed, now);
            if outcome == UpsertOutcome::Created {
                if let Some(device) = self.cache.commissionable(&rr.name) {
                    if device.addresses.is_empty() {
                        missing.push(rr.name.clone());
                    }
                }
            }
        }

        for rr in &srvs {
            if rr.ttl == 0 {
                self.cache.upsert_commissionable_srv(
                    &rr.name,
                    0,
                    "",
                    0,
                    &[],
                    self.config.enable_ipv4,
                    iface,
                    now,
                );
                missing.retain(|n| n != &rr.name);
                continue;
            }
            let RecordData::Srv { target, port, .. } = &rr.data else {
                continue;
            };
            let already_had_addresses = self
                .cache
                .commissionable(&rr.name)
                .is_some_and(|d| !d.addresses.is_empty());
            self.cache.upsert_commissionable_srv(
                &rr.name,
                rr.ttl,
                target,
                *port,
                &combined,
                self.config.enable_ipv4,
                iface,
                now,
            );
            let Some(device) = self.cache.commissionable(&rr.name) else {
                continue;
            };
            if device.addresses.is_empty() {
                if let Some(qid) = active_query_id_for(device, self.scheduler) {
                    self.scheduler.set_query_records(
                        &qid,
                        aaaa_and_maybe_a(target, self.config.enable_ipv4),
                        vec![(*rr).clone()],
                    );
                }
                continue;
            }
            missing.retain(|n| n != &rr.name);
            if let Some(qid) = active_query_id_for(device, self.scheduler) {
                self.waiters.finish(&qid, true, already_had_addresses);
            }
        }

        for name in missing {
            let Some(device) = self.cache.commissionable(&name) else {
                continue;
            };
            if let Some(qid) = active_query_id_for(device, self.scheduler) {
                self.scheduler.set_query_records(
                    &qid,
                    vec![Query {
                        name: name.clone(),
                        rtype: RecordType::Any,
                        class: wire::CLASS_IN,
                    }],
                    Vec::new(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{DnsMessage, RecordData, encode};

    fn ctx<'a>(
        cache: &'a mut RecordCache,
        scheduler: &'a mut QueryScheduler,
        waiters: &'a mut WaiterRegistry,
        config: &'a ScannerConfig,
    ) -> Correlator<'a> {
        Correlator {
            cache,
            scheduler,
            waiters,
            config,
        }
    }

    fn response_with(answers: Vec<Record>, additional: Vec<Record>) -> Vec<u8> {
        encode(&DnsMessage {
            message_type: MessageType::Response,
            transaction_id: 0,
            queries: vec![],
            answers,
            authorities: vec![],
            additional,
        })
    }

    fn txt_entry(key_value: &str) -> Vec<u8> {
        let mut out = vec![key_value.len() as u8];
        out.extend_from_slice(key_value.as_bytes());
        out
    }

    #[test]
    fn operational_srv_and_aaaa_in_one_packet_populates_addresses_and_wakes_waiter() {
        let mut cache = RecordCache::new();
        let mut scheduler = QueryScheduler::new();
        let mut waiters = WaiterRegistry::new();
        let config = ScannerConfig::default();

        let device_name = "ABCD-1234._matter._tcp.local";
        let handle = waiters.register(device_name, true, false);

        let bytes = response_with(
            vec![],
            vec![
                Record {
                    name: device_name.to_owned(),
                    rtype: RecordType::Srv,
                    class: wire::CLASS_IN,
                    ttl: 120,
                    data: RecordData::Srv {
                        priority: 0,
                        weight: 0,
                        port: 5540,
                        target: "device1.local".to_owned(),
                    },
                },
                Record {
                    name: "device1.local".to_owned(),
                    rtype: RecordType::Aaaa,
                    class: wire::CLASS_IN,
                    ttl: 120,
                    data: RecordData::Aaaa("fe80::1".parse().unwrap()),
                },
            ],
        );

        let mut correlator = ctx(&mut cache, &mut scheduler, &mut waiters, &config);
        correlator.handle_datagram(&bytes, "eth0", Instant::now());

        assert!(cache.operational(device_name).unwrap().addresses.len() == 1);
        assert!(!waiters.has_waiter(device_name));
        drop(handle);
    }

    #[test]
    fn operational_srv_without_address_installs_followup_query_when_waiter_present() {
        let mut cache = RecordCache::new();
        let mut scheduler = QueryScheduler::new();
        let mut waiters = WaiterRegistry::new();
        let config = ScannerConfig::default();

        let device_name = "ABCD-1234._matter._tcp.local";
        let _handle = waiters.register(device_name, true, false);

        let bytes = response_with(
            vec![],
            vec![Record {
                name: device_name.to_owned(),
                rtype: RecordType::Srv,
                class: wire::CLASS_IN,
                ttl: 120,
                data: RecordData::Srv {
                    priority: 0,
                    weight: 0,
                    port: 5540,
                    target: "device1.local".to_owned(),
                },
            }],
        );

        let mut correlator = ctx(&mut cache, &mut scheduler, &mut waiters, &config);
        correlator.handle_datagram(&bytes, "eth0", Instant::now());

        assert!(scheduler.has_query(device_name));
    }

    /// §8 invariant 3: a SRV with no address in the same packet installs a
    /// follow-up `(target, AAAA)` query; when the response to *that* query
    /// carries only the AAAA record (no SRV, as real known-answer
    /// suppression produces), the device's address must still populate and
    /// the waiter must still resolve, by falling back to the SRV stashed as
    /// a known answer on the follow-up query.
    #[test]
    fn address_only_followup_response_still_resolves_operational_device() {
        let mut cache = RecordCache::new();
        let mut scheduler = QueryScheduler::new();
        let mut waiters = WaiterRegistry::new();
        let config = ScannerConfig::default();

        let device_name = "ABCD-1234._matter._tcp.local";
        let handle = waiters.register(device_name, true, false);

        let srv_only = response_with(
            vec![],
            vec![Record {
                name: device_name.to_owned(),
                rtype: RecordType::Srv,
                class: wire::CLASS_IN,
                ttl: 120,
                data: RecordData::Srv {
                    priority: 0,
                    weight: 0,
                    port: 5540,
                    target: "device1.local".to_owned(),
                },
            }],
        );
        {
            let mut correlator = ctx(&mut cache, &mut scheduler, &mut waiters, &config);
            correlator.handle_datagram(&srv_only, "eth0", Instant::now());
        }
        assert!(scheduler.has_query(device_name));
        assert!(waiters.has_waiter(device_name));

        let address_only = response_with(
            vec![],
            vec![Record {
                name: "device1.local".to_owned(),
                rtype: RecordType::Aaaa,
                class: wire::CLASS_IN,
                ttl: 120,
                data: RecordData::Aaaa("fe80::1".parse().unwrap()),
            }],
        );
        let mut correlator = ctx(&mut cache, &mut scheduler, &mut waiters, &config);
        correlator.handle_datagram(&address_only, "eth0", Instant::now());

        assert_eq!(cache.operational(device_name).unwrap().addresses.len(), 1);
        assert!(!waiters.has_waiter(device_name));
        drop(handle);
    }

    #[test]
    fn commissionable_txt_then_srv_finds_active_query_by_long_discriminator() {
        let mut cache = RecordCache::new();
        let mut scheduler = QueryScheduler::new();
        let mut waiters = WaiterRegistry::new();
        let config = ScannerConfig::default();

        let qid = CommissionablePredicate::LongDiscriminator(3840).query_id();
        scheduler.set_query_records(
            &qid,
            vec![Query {
                name: names::long_discriminator(3840),
                rtype: RecordType::Ptr,
                class: wire::CLASS_IN,
            }],
            vec![],
        );
        let one_shot = waiters.register(&qid, true, false);

        let instance = "ABCD1234._matterc._udp.local";
        let mut txt_payload = Vec::new();
        txt_payload.extend(txt_entry("D=3840"));
        txt_payload.extend(txt_entry("CM=2"));

        let txt_bytes = response_with(
            vec![Record {
                name: instance.to_owned(),
                rtype: RecordType::Txt,
                class: wire::CLASS_IN,
                ttl: 120,
                data: RecordData::Txt(txt_payload),
            }],
            vec![],
        );
        {
            let mut correlator = ctx(&mut cache, &mut scheduler, &mut waiters, &config);
            correlator.handle_datagram(&txt_bytes, "eth0", Instant::now());
        }
        assert!(cache.commissionable(instance).is_some());

        let srv_bytes = response_with(
            vec![Record {
                name: instance.to_owned(),
                rtype: RecordType::Srv,
                class: wire::CLASS_IN,
                ttl: 120,
                data: RecordData::Srv {
                    priority: 0,
                    weight: 0,
                    port: 5540,
                    target: "device1.local".to_owned(),
                },
            }],
            vec![Record {
                name: "device1.local".to_owned(),
                rtype: RecordType::Aaaa,
                class: wire::CLASS_IN,
                ttl: 120,
                data: RecordData::Aaaa("fd12::1".parse().unwrap()),
            }],
        );
        {
            let mut correlator = ctx(&mut cache, &mut scheduler, &mut waiters, &config);
            correlator.handle_datagram(&srv_bytes, "eth0", Instant::now());
        }

        assert_eq!(cache.commissionable(instance).unwrap().addresses.len(), 1);
        assert!(!waiters.has_waiter(&qid));
        drop(one_shot);
    }

    /// Commissionable analogue of `address_only_followup_response_still_resolves_operational_device`:
    /// a SRV with no address installs a follow-up AAAA query; the response
    /// to that query, carrying only the AAAA record, must still resolve the
    /// device via the SRV stashed as a known answer.
    #[test]
    fn address_only_followup_response_still_resolves_commissionable_device() {
        let mut cache = RecordCache::new();
        let mut scheduler = QueryScheduler::new();
        let mut waiters = WaiterRegistry::new();
        let config = ScannerConfig::default();

        let qid = CommissionablePredicate::LongDiscriminator(3840).query_id();
        scheduler.set_query_records(
            &qid,
            vec![Query {
                name: names::long_discriminator(3840),
                rtype: RecordType::Ptr,
                class: wire::CLASS_IN,
            }],
            vec![],
        );
        let one_shot = waiters.register(&qid, true, false);

        let instance = "ABCD1234._matterc._udp.local";
        let mut txt_payload = Vec::new();
        txt_payload.extend(txt_entry("D=3840"));
        txt_payload.extend(txt_entry("CM=2"));
        let txt_bytes = response_with(
            vec![Record {
                name: instance.to_owned(),
                rtype: RecordType::Txt,
                class: wire::CLASS_IN,
                ttl: 120,
                data: RecordData::Txt(txt_payload),
            }],
            vec![],
        );
        {
            let mut correlator = ctx(&mut cache, &mut scheduler, &mut waiters, &config);
            correlator.handle_datagram(&txt_bytes, "eth0", Instant::now());
        }

        let srv_only = response_with(
            vec![Record {
                name: instance.to_owned(),
                rtype: RecordType::Srv,
                class: wire::CLASS_IN,
                ttl: 120,
                data: RecordData::Srv {
                    priority: 0,
                    weight: 0,
                    port: 5540,
                    target: "device1.local".to_owned(),
                },
            }],
            vec![],
        );
        {
            let mut correlator = ctx(&mut cache, &mut scheduler, &mut waiters, &config);
            correlator.handle_datagram(&srv_only, "eth0", Instant::now());
        }
        assert!(cache.commissionable(instance).unwrap().addresses.is_empty());
        assert!(waiters.has_waiter(&qid));

        let address_only = response_with(
            vec![],
            vec![Record {
                name: "device1.local".to_owned(),
                rtype: RecordType::Aaaa,
                class: wire::CLASS_IN,
                ttl: 120,
                data: RecordData::Aaaa("fd12::1".parse().unwrap()),
            }],
        );
        let mut correlator = ctx(&mut cache, &mut scheduler, &mut waiters, &config);
        correlator.handle_datagram(&address_only, "eth0", Instant::now());

        assert_eq!(cache.commissionable(instance).unwrap().addresses.len(), 1);
        assert!(!waiters.has_waiter(&qid));
        drop(one_shot);
    }

    #[test]
    fn zero_ttl_commissionable_txt_removes_device() {
        let mut cache = RecordCache::new();
        let mut scheduler = QueryScheduler::new();
        let mut waiters = WaiterRegistry::new();
        let config = ScannerConfig::default();

        let instance = "ABCD1234._matterc._udp.local";
        let mut txt_payload = Vec::new();
        txt_payload.extend(txt_entry("D=3840"));
        txt_payload.extend(txt_entry("CM=2"));
        let create_bytes = response_with(
            vec![Record {
                name: instance.to_owned(),
                rtype: RecordType::Txt,
                class: wire::CLASS_IN,
                ttl: 120,
                data: RecordData::Txt(txt_payload),
            }],
            vec![],
        );
        {
            let mut correlator = ctx(&mut cache, &mut scheduler, &mut waiters, &config);
            correlator.handle_datagram(&create_bytes, "eth0", Instant::now());
        }
        assert!(cache.commissionable(instance).is_some());

        let goodbye_bytes = response_with(
            vec![Record {
                name: instance.to_owned(),
                rtype: RecordType::Txt,
                class: wire::CLASS_IN,
                ttl: 0,
                data: RecordData::Txt(vec![]),
            }],
            vec![],
        );
        let mut correlator = ctx(&mut cache, &mut scheduler, &mut waiters, &config);
        correlator.handle_datagram(&goodbye_bytes, "eth0", Instant::now());
        assert!(cache.commissionable(instance).is_none());
    }

    #[test]
    fn query_message_types_are_ignored() {
        let mut cache = RecordCache::new();
        let mut scheduler = QueryScheduler::new();
        let mut waiters = WaiterRegistry::new();
        let config = ScannerConfig::default();

        let bytes = encode(&DnsMessage {
            message_type: MessageType::Query,
            transaction_id: 0,
            queries: vec![Query {
                name: names::COMMISSIONABLE_SERVICE.to_owned(),
                rtype: RecordType::Ptr,
                class: wire::CLASS_IN,
            }],
            answers: vec![],
            authorities: vec![],
            additional: vec![],
        });
        let mut correlator = ctx(&mut cache, &mut scheduler, &mut waiters, &config);
        correlator.handle_datagram(&bytes, "eth0", Instant::now());
        assert!(cache.commissionable(names::COMMISSIONABLE_SERVICE).is_none());
    }
}
