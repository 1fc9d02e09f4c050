//! `KBucketEntry` (spec.md §3): a known node plus liveness bookkeeping.

use boson_proto::NodeInfo;

use crate::constants::MAX_TIMEOUTS;

#[derive(Debug, Clone)]
pub struct KBucketEntry {
    pub node_info: NodeInfo,
    pub first_seen: i64,
    pub last_seen: i64,
    pub failed_requests: u32,
}

impl KBucketEntry {
    pub fn new(node_info: NodeInfo, now: i64) -> Self {
        KBucketEntry {
            node_info,
            first_seen: now,
            last_seen: now,
            failed_requests: 0,
        }
    }

    pub fn on_response(&mut self, now: i64) {
        self.last_seen = now;
        self.failed_requests = 0;
    }

    pub fn on_timeout(&mut self) {
        self.failed_requests += 1;
    }

    pub fn eligible_for_eviction(&self) -> bool {
        self.failed_requests >= MAX_TIMEOUTS
    }

    pub fn needs_pinging(&self, now: i64, refresh_interval_secs: i64) -> bool {
        now - self.last_seen >= refresh_interval_secs
    }

    pub fn is_questionable(&self) -> bool {
        self.failed_requests > 0
    }
}
