//! Public API (§4.7): `Scanner<T, C>` wires the Record Cache, Query
//! Scheduler, Waiter Registry and Message Correlator behind a single lock
//! (§5), and drives them from a receive loop, a query timer, and a
//! periodic expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, mpsc::UnboundedReceiver};

use crate::cache::{CommissionableDevice, OperationalDevice, RecordCache};
use crate::clock::{Clock, TokioClock};
use crate::config::{DEFAULT_COMMISSIONABLE_TIMEOUT, EXPIRY_SWEEP_INTERVAL, ScannerConfig};
use crate::correlator::Correlator;
use crate::error::ScannerError;
use crate::names;
use crate::predicate::CommissionablePredicate;
use crate::query::QueryScheduler;
use crate::transport::{InboundDatagram, Transport, UdpMulticastTransport};
use crate::waiters::WaiterRegistry;
use crate::wire::{self, Query, RecordType};

struct EngineState {
    cache: RecordCache,
    scheduler: QueryScheduler,
    waiters: WaiterRegistry,
    config: ScannerConfig,
    closed: bool,
}

/// The mDNS Scanner. Generic over its network and time collaborators so
/// tests can inject `MockTransport`/`MockClock` (§6); production code uses
/// the defaults.
pub struct Scanner<T: Transport = UdpMulticastTransport, C: Clock = TokioClock> {
    state: Mutex<EngineState>,
    transport: T,
    clock: C,
    /// Wakes the timer/expiry loops early: on `setQueryRecords` (immediate
    /// rebroadcast), on `removeQuery`, and on `close()`.
    wake: Notify,
}

impl Scanner<UdpMulticastTransport, TokioClock> {
    /// Production constructor: opens multicast sockets on every usable
    /// interface and spawns the background tasks.
    pub async fn new(config: ScannerConfig) -> Result<Arc<Self>, ScannerError> {
        let (transport, inbound) = UdpMulticastTransport::new(&config)
            .await
            .map_err(ScannerError::NoTransport)?;
        Ok(Self::with_parts(config, transport, TokioClock, inbound))
    }
}

impl<T: Transport, C: Clock> Scanner<T, C> {
    /// Test/advanced-embedder seam: accepts injected `Transport`/`Clock`
    /// implementations plus the channel the transport delivers inbound
    /// datagrams on.
    pub fn with_parts(
        config: ScannerConfig,
        transport: T,
        clock: C,
        inbound: UnboundedReceiver<InboundDatagram>,
    ) -> Arc<Self> {
        let scanner = Arc::new(Self {
            state: Mutex::new(EngineState {
                cache: RecordCache::new(),
                scheduler: QueryScheduler::new(),
                waiters: WaiterRegistry::new(),
                config,
                closed: false,
            }),
            transport,
            clock,
            wake: Notify::new(),
        });
        tokio::spawn(Self::recv_loop(scanner.clone(), inbound));
        tokio::spawn(Self::timer_loop(scanner.clone()));
        tokio::spawn(Self::expiry_loop(scanner.clone()));
        scanner
    }

    async fn recv_loop(self: Arc<Self>, mut inbound: UnboundedReceiver<InboundDatagram>) {
        while let Some(dg) = inbound.recv().await {
            let now = self.clock.now();
            let mut st = self.state.lock().await;
            if st.closed {
                return;
            }
            let EngineState {
                cache,
                scheduler,
                waiters,
                config,
                ..
            } = &mut *st;
            let mut correlator = Correlator {
                cache,
                scheduler,
                waiters,
                config,
            };
            correlator.handle_datagram(&dg.bytes, &dg.interface, now);
            drop(st);
            self.wake.notify_waiters();
        }
    }

    /// §4.5 broadcast loop / §5 "single query timer".
    async fn timer_loop(self: Arc<Self>) {
        loop {
            let is_idle = {
                let st = self.state.lock().await;
                if st.closed {
                    return;
                }
                st.scheduler.is_empty()
            };
            if is_idle {
                self.wake.notified().await;
                continue;
            }

            let (fragments, interval) = {
                let mut st = self.state.lock().await;
                let fragments = st.scheduler.build_fragments(st.config.max_message_size);
                let interval = st.scheduler.advance_interval();
                (fragments, interval)
            };
            for fragment in &fragments {
                let bytes = wire::encode(fragment);
                if let Err(e) = self.transport.send(&bytes).await {
                    log::warn!("mdns scanner: broadcast send failed: {e}");
                }
            }

            tokio::select! {
                _ = self.clock.sleep(interval) => {},
                _ = self.wake.notified() => {},
            }
        }
    }

    /// §4.3 periodic expiry sweep, §5 timer (b).
    async fn expiry_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.clock.sleep(EXPIRY_SWEEP_INTERVAL) => {},
                _ = self.wake.notified() => {},
            }
            let mut st = self.state.lock().await;
            if st.closed {
                return;
            }
            let now = self.clock.now();
            st.cache.expire_sweep(now);
        }
    }

    async fn wait_for(&self, query_id: &str, rx: tokio::sync::oneshot::Receiver<()>, timeout: Option<Duration>) {
        match timeout {
            Some(dur) => {
                tokio::select! {
                    _ = rx => {},
                    _ = self.clock.sleep(dur) => {
                        let mut st = self.state.lock().await;
                        st.waiters.finish(query_id, true, false);
                    }
                }
            }
            None => {
                let _ = rx.await;
            }
        }
    }

    /// §4.7 `findOperationalDevice`.
    pub async fn find_operational_device(
        &self,
        operational_id: u64,
        node_id: u64,
        timeout: Option<Duration>,
        ignore_cache: bool,
    ) -> Result<Option<OperationalDevice>, ScannerError> {
        let name = names::operational_instance(operational_id, node_id);
        let rx = {
            let mut st = self.state.lock().await;
            if st.closed {
                return Err(ScannerError::Closed);
            }
            if !ignore_cache {
                if let Some(dev) = st.cache.operational(&name) {
                    if !dev.addresses.is_empty() {
                        return Ok(Some(dev.clone()));
                    }
                }
            }
            let handle = st.waiters.register(&name, true, timeout.is_some());
            st.scheduler.set_query_records(
                &name,
                vec![Query {
                    name: name.clone(),
                    rtype: RecordType::Srv,
                    class: wire::CLASS_IN,
                }],
                Vec::new(),
            );
            handle.rx
        };
        self.wake.notify_waiters();
        self.wait_for(&name, rx, timeout).await;

        let st = self.state.lock().await;
        Ok(st.cache.operational(&name).cloned())
    }

    /// §4.7 `cancelOperationalDeviceDiscovery`.
    pub async fn cancel_operational_device_discovery(
        &self,
        operational_id: u64,
        node_id: u64,
        resolve: bool,
    ) -> Result<(), ScannerError> {
        let name = names::operational_instance(operational_id, node_id);
        let mut st = self.state.lock().await;
        if st.closed {
            return Err(ScannerError::Closed);
        }
        st.waiters.finish(&name, resolve, false);
        st.scheduler.remove_query(&name);
        Ok(())
    }

    /// §4.7 `findCommissionableDevices`.
    pub async fn find_commissionable_devices(
        &self,
        predicate: CommissionablePredicate,
        timeout: Option<Duration>,
        ignore_cache: bool,
    ) -> Result<Vec<CommissionableDevice>, ScannerError> {
        let query_id = predicate.query_id();
        let rx = {
            let mut st = self.state.lock().await;
            if st.closed {
                return Err(ScannerError::Closed);
            }
            if !ignore_cache {
                let hits: Vec<CommissionableDevice> = st
                    .cache
                    .query_commissionable(&predicate)
                    .into_iter()
                    .filter(|d| !d.addresses.is_empty())
                    .cloned()
                    .collect();
                if !hits.is_empty() {
                    return Ok(hits);
                }
            }
            let handle = st.waiters.register(&query_id, true, timeout.is_some());
            let mut queries = vec![Query {
                name: names::COMMISSIONABLE_SERVICE.to_owned(),
                rtype: RecordType::Ptr,
                class: wire::CLASS_IN,
            }];
            if let Some(sub) = predicate.wire_sub_service() {
                queries.push(Query {
                    name: sub,
                    rtype: RecordType::Ptr,
                    class: wire::CLASS_IN,
                });
            }
            st.scheduler.set_query_records(&query_id, queries, Vec::new());
            handle.rx
        };
        self.wake.notify_waiters();
        let effective_timeout = timeout.or(Some(DEFAULT_COMMISSIONABLE_TIMEOUT));
        self.wait_for(&query_id, rx, effective_timeout).await;

        let st = self.state.lock().await;
        Ok(st
            .cache
            .query_commissionable(&predicate)
            .into_iter()
            .cloned()
            .collect())
    }

    /// §4.7 `findCommissionableDevicesContinuously`. Loops installing a
    /// fresh "non-updated-records" waiter each iteration, emitting only
    /// devices not previously passed to `on_device` (deduped on
    /// `deviceIdentifier`), until `timeout` elapses or `cancel` fires.
    pub async fn find_commissionable_devices_continuously(
        &self,
        predicate: CommissionablePredicate,
        mut on_device: impl FnMut(CommissionableDevice) + Send,
        timeout: Option<Duration>,
        cancel: Option<tokio_util::sync::CancellationToken>,
    ) -> Result<(), ScannerError> {
        let query_id = predicate.query_id();
        {
            let mut st = self.state.lock().await;
            if st.closed {
                return Err(ScannerError::Closed);
            }
            let mut queries = vec![Query {
                name: names::COMMISSIONABLE_SERVICE.to_owned(),
                rtype: RecordType::Ptr,
                class: wire::CLASS_IN,
            }];
            if let Some(sub) = predicate.wire_sub_service() {
                queries.push(Query {
                    name: sub,
                    rtype: RecordType::Ptr,
                    class: wire::CLASS_IN,
                });
            }
            st.scheduler.set_query_records(&query_id, queries, Vec::new());
        }
        self.wake.notify_waiters();

        let deadline_at = timeout.map(|t| self.clock.now() + t);
        let mut seen = std::collections::HashSet::new();

        loop {
            let remaining = match deadline_at {
                Some(deadline) => {
                    let now = self.clock.now();
                    if now >= deadline {
                        return Ok(());
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            let rx = {
                let mut st = self.state.lock().await;
                if st.closed {
                    return Ok(());
                }
                st.waiters.register(&query_id, false, remaining.is_some()).rx
            };

            if let Some(cancel) = &cancel {
                tokio::select! {
                    _ = rx => {},
                    _ = async { if let Some(d) = remaining { self.clock.sleep(d).await } else { std::future::pending::<()>().await } } => {
                        let mut st = self.state.lock().await;
                        st.waiters.finish(&query_id, true, false);
                    },
                    _ = cancel.cancelled() => {
                        let mut st = self.state.lock().await;
                        st.waiters.finish(&query_id, true, false);
                        self.emit_new(&predicate, &mut seen, &mut on_device).await;
                        return Ok(());
                    }
                }
            } else {
                tokio::select! {
                    _ = rx => {},
                    _ = async { if let Some(d) = remaining { self.clock.sleep(d).await } else { std::future::pending::<()>().await } } => {
                        let mut st = self.state.lock().await;
                        st.waiters.finish(&query_id, true, false);
                    },
                }
            }

            self.emit_new(&predicate, &mut seen, &mut on_device).await;
        }
    }

    async fn emit_new(
        &self,
        predicate: &CommissionablePredicate,
        seen: &mut std::collections::HashSet<String>,
        on_device: &mut impl FnMut(CommissionableDevice),
    ) {
        let st = self.state.lock().await;
        for device in st.cache.query_commissionable(predicate) {
            if device.addresses.is_empty() {
                continue;
            }
            if seen.insert(device.device_identifier.clone()) {
                on_device(device.clone());
            }
        }
    }

    /// §4.7 `getDiscoveredOperationalDevice`: pure cache read.
    pub async fn get_discovered_operational_device(
        &self,
        operational_id: u64,
        node_id: u64,
    ) -> Option<OperationalDevice> {
        let name = names::operational_instance(operational_id, node_id);
        self.state.lock().await.cache.operational(&name).cloned()
    }

    /// §4.7 `getDiscoveredCommissionableDevices`: pure cache read.
    pub async fn get_discovered_commissionable_devices(
        &self,
        predicate: &CommissionablePredicate,
    ) -> Vec<CommissionableDevice> {
        self.state
            .lock()
            .await
            .cache
            .query_commissionable(predicate)
            .into_iter()
            .cloned()
            .collect()
    }

    /// §4.7 `close()`.
    pub async fn close(&self) {
        {
            let mut st = self.state.lock().await;
            if st.closed {
                return;
            }
            st.closed = true;
            st.waiters.close_all();
        }
        self.wake.notify_waiters();
        self.transport.close().await;
    }
}
