//! Query Scheduler (§4.5): tracks active queries keyed by query id and
//! assembles the periodic, fragmented mDNS broadcast. Pure data + encoding;
//! the actual timer and socket send live in `scanner`'s engine loop so this
//! stays trivially unit-testable.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::{INITIAL_QUERY_INTERVAL, MAX_QUERY_INTERVAL};
use crate::wire::{DnsMessage, MessageType, Query, Record, encode, encode_record};

#[derive(Default, Clone)]
struct QuerySet {
    queries: Vec<Query>,
    known_answers: Vec<Record>,
}

fn same_query(a: &Query, b: &Query) -> bool {
    a.name == b.name && a.rtype == b.rtype && a.class == b.class
}

/// §4.5: `activeQueries` plus the single shared back-off interval.
#[derive(Default)]
pub struct QueryScheduler {
    active: HashMap<String, QuerySet>,
    next_interval: Duration,
}

impl QueryScheduler {
    pub fn new() -> Self {
        Self {
            active: HashMap::new(),
            next_interval: INITIAL_QUERY_INTERVAL,
        }
    }

    /// §4.5 `setQueryRecords`. Returns whether the timer should reset and an
    /// immediate broadcast should fire.
    pub fn set_query_records(
        &mut self,
        query_id: &str,
        queries: Vec<Query>,
        known_answers: Vec<Record>,
    ) -> bool {
        let is_new_id = !self.active.contains_key(query_id);
        let entry = self.active.entry(query_id.to_owned()).or_default();
        let fresh: Vec<Query> = queries
            .into_iter()
            .filter(|q| !entry.queries.iter().any(|e| same_query(e, q)))
            .collect();
        let should_broadcast = is_new_id || !fresh.is_empty();
        entry.queries.extend(fresh);
        entry.known_answers.extend(known_answers);
        if should_broadcast {
            self.next_interval = INITIAL_QUERY_INTERVAL;
        }
        should_broadcast
    }

    /// §4.5 `removeQuery`. Returns `true` when the timer should now stop
    /// because no active queries remain.
    pub fn remove_query(&mut self, query_id: &str) -> bool {
        self.active.remove(query_id);
        if self.active.is_empty() {
            self.next_interval = INITIAL_QUERY_INTERVAL;
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn has_query(&self, query_id: &str) -> bool {
        self.active.contains_key(query_id)
    }

    /// §4.6 `formerAnswers`: the union of known-answer lists across every
    /// currently active query, used to correlate multi-packet responses.
    pub fn known_answers(&self) -> Vec<Record> {
        self.active
            .values()
            .flat_map(|e| e.known_answers.iter().cloned())
            .collect()
    }

    /// §4.5 step 2: the wait before the next fire, advancing the doubling
    /// back-off (capped) for the fire after that.
    pub fn advance_interval(&mut self) -> Duration {
        let current = self.next_interval;
        self.next_interval = (self.next_interval * 2).min(MAX_QUERY_INTERVAL);
        current
    }

    /// §4.5 steps 1, 3-5: flatten every active query/answer and split into
    /// `TruncatedQuery`/`Query` fragments under `max_size`. Returns an empty
    /// vec when there is nothing active to broadcast.
    pub fn build_fragments(&self, max_size: usize) -> Vec<DnsMessage> {
        let queries: Vec<Query> = self
            .active
            .values()
            .flat_map(|e| e.queries.iter().cloned())
            .collect();
        if queries.is_empty() {
            return Vec::new();
        }
        let answers: Vec<Record> = self
            .active
            .values()
            .flat_map(|e| e.known_answers.iter().cloned())
            .collect();

        let empty_len = encode(&DnsMessage {
            message_type: MessageType::Query,
            transaction_id: 0,
            queries: queries.clone(),
            answers: vec![],
            authorities: vec![],
            additional: vec![],
        })
        .len();

        let mut fragments = Vec::new();
        let mut current_answers: Vec<Record> = Vec::new();
        let mut current_len = empty_len;

        for ans in answers {
            let mut buf = Vec::new();
            encode_record(&ans, &mut buf);
            let ans_len = buf.len();
            if !current_answers.is_empty() && current_len + ans_len > max_size {
                fragments.push(DnsMessage {
                    message_type: MessageType::TruncatedQuery,
                    transaction_id: 0,
                    queries: queries.clone(),
                    answers: std::mem::take(&mut current_answers),
                    authorities: vec![],
                    additional: vec![],
                });
                current_len = empty_len;
            }
            if current_answers.is_empty() && current_len + ans_len > max_size {
                log::warn!("mdns scanner: single known-answer record exceeds max message size");
            }
            current_len += ans_len;
            current_answers.push(ans);
        }

        fragments.push(DnsMessage {
            message_type: MessageType::Query,
            transaction_id: 0,
            queries,
            answers: current_answers,
            authorities: vec![],
            additional: vec![],
        });
        fragments
    }
}
