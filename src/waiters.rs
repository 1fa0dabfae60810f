//! Waiter Registry (§4.4): at most one pending waiter per query id (§3
//! invariant 4), woken by the Message Correlator or a timeout.

use std::collections::HashMap;

use tokio::sync::oneshot;

struct Waiter {
    tx: oneshot::Sender<()>,
    resolve_on_updated_records: bool,
    has_timeout: bool,
}

/// Returned by [`WaiterRegistry::register`]; `rx` resolves once `finish`
/// (or a caller-driven timeout) wakes this query id.
pub struct WaiterHandle {
    pub rx: oneshot::Receiver<()>,
}

/// Keyed by the same string the Query Scheduler uses as a query id.
#[derive(Default)]
pub struct WaiterRegistry {
    waiters: HashMap<String, Waiter>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// §4.4 `register`. A second `register` for the same `queryId` replaces
    /// the previous one outright (the caller holding the stale `rx` simply
    /// never gets woken — by construction this only happens when that
    /// caller has already been resolved and is about to re-register).
    pub fn register(
        &mut self,
        query_id: &str,
        resolve_on_updated_records: bool,
        has_timeout: bool,
    ) -> WaiterHandle {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(
            query_id.to_owned(),
            Waiter {
                tx,
                resolve_on_updated_records,
                has_timeout,
            },
        );
        WaiterHandle { rx }
    }

    /// §4.4 `finish`. `isUpdatedRecord && !resolveOnUpdatedRecords` is a
    /// no-op: a streaming waiter that only wants genuinely new devices is
    /// left registered (and its timer keeps running) across refreshes of
    /// devices it has already seen.
    pub fn finish(&mut self, query_id: &str, resolve: bool, is_updated_record: bool) {
        let Some(waiter) = self.waiters.get(query_id) else {
            return;
        };
        if is_updated_record && !waiter.resolve_on_updated_records {
            return;
        }
        let waiter = self.waiters.remove(query_id).unwrap();
        if resolve {
            let _ = waiter.tx.send(());
        }
    }

    pub fn has_waiter(&self, query_id: &str) -> bool {
        self.waiters.contains_key(query_id)
    }

    /// §4.7 `close()`: waiters with a timeout are resolved (their caller
    /// expected eventual completion); waiters with none are abandoned —
    /// dropping the sender fails their `rx.await`, which the caller must
    /// treat as "no result".
    pub fn close_all(&mut self) {
        for (_, waiter) in self.waiters.drain() {
            if waiter.has_timeout {
                let _ = waiter.tx.send(());
            }
        }
    }
}
