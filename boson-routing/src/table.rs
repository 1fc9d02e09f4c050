//! The Kademlia routing table (spec.md §4.5): a binary trie of K-buckets
//! realized as a flat `Vec<Bucket>` that only ever splits its tail bucket —
//! the one containing the owner's own id — following the same incremental
//! splitting scheme used by mainstream Kademlia implementations. Entries
//! live in a `slab::Slab` arena (spec.md §9's "arena of entries with integer
//! handles") so buckets only hold cheap integer handles.

use std::time::{SystemTime, UNIX_EPOCH};

use boson_crypto::Id;
use boson_proto::NodeInfo;
use rand::RngCore;
use slab::Slab;
use tracing::debug;

use crate::bucket::Bucket;
use crate::constants::{BUCKET_REFRESH_INTERVAL, ID_BITS, K};
use crate::entry::KBucketEntry;

pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    Updated,
    CachedAsReplacement,
    RejectedSelf,
}

pub struct RoutingTable {
    owner: Id,
    arena: Slab<KBucketEntry>,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    pub fn new(owner: Id) -> Self {
        RoutingTable {
            owner,
            arena: Slab::new(),
            buckets: vec![Bucket::default()],
        }
    }

    pub fn owner(&self) -> Id {
        self.owner
    }

    fn bucket_index_for(&self, id: &Id) -> usize {
        id.bucket_index(&self.owner).min(self.buckets.len() - 1)
    }

    fn find_live_key(&self, bidx: usize, id: &Id) -> Option<usize> {
        self.buckets[bidx]
            .live
            .iter()
            .copied()
            .find(|&key| self.arena[key].node_info.id == *id)
    }

    pub fn add(&mut self, node_info: NodeInfo) -> AddOutcome {
        if node_info.id == self.owner {
            return AddOutcome::RejectedSelf;
        }
        let now = now();
        loop {
            let bidx = self.bucket_index_for(&node_info.id);

            if let Some(key) = self.find_live_key(bidx, &node_info.id) {
                let entry = &mut self.arena[key];
                entry.node_info = node_info;
                entry.on_response(now);
                return AddOutcome::Updated;
            }

            if !self.buckets[bidx].is_full() {
                let key = self.arena.insert(KBucketEntry::new(node_info, now));
                self.buckets[bidx].live.push(key);
                return AddOutcome::Inserted;
            }

            let is_home_bucket = bidx == self.buckets.len() - 1;
            if is_home_bucket && self.buckets.len() < ID_BITS {
                self.split_tail();
                continue;
            }

            let key = self.arena.insert(KBucketEntry::new(node_info, now));
            self.buckets[bidx].push_replacement(key);
            return AddOutcome::CachedAsReplacement;
        }
    }

    /// Split the tail (home) bucket into two, redistributing its entries by
    /// their prefix length against the owner id at the new, deeper split.
    fn split_tail(&mut self) {
        let old_index = self.buckets.len() - 1;
        self.buckets.push(Bucket::default());
        let new_len = self.buckets.len();

        let old_live = std::mem::take(&mut self.buckets[old_index].live);
        let old_repl = std::mem::take(&mut self.buckets[old_index].replacements);

        for key in old_live {
            let target = self.arena[key].node_info.id.bucket_index(&self.owner).min(new_len - 1);
            self.buckets[target].live.push(key);
        }
        for key in old_repl {
            let target = self.arena[key].node_info.id.bucket_index(&self.owner).min(new_len - 1);
            self.buckets[target].replacements.push_back(key);
        }

        // A pathological split can momentarily push more than K live entries
        // into one side; demote the oldest overflow into that bucket's
        // replacement cache so the `|live| <= K` invariant always holds.
        for bidx in [old_index, new_len - 1] {
            while self.buckets[bidx].live.len() > K {
                let key = self.buckets[bidx].live.remove(0);
                self.buckets[bidx].push_replacement(key);
            }
        }

        debug!(buckets = new_len, "split home bucket");
    }

    /// The `k` nodes with smallest XOR distance to `target`, live entries
    /// preferred over questionable ones, ties broken by numerically smaller
    /// id (spec.md §4.5).
    pub fn closest(&self, target: &Id, k: usize) -> Vec<NodeInfo> {
        let mut candidates: Vec<&KBucketEntry> = self
            .buckets
            .iter()
            .flat_map(|b| b.live.iter())
            .map(|&key| &self.arena[key])
            .collect();

        candidates.sort_by(|a, b| {
            let da = a.node_info.id.distance(target);
            let db = b.node_info.id.distance(target);
            a.is_questionable()
                .cmp(&b.is_questionable())
                .then_with(|| da.as_bytes().cmp(db.as_bytes()))
                .then_with(|| a.node_info.id.cmp(&b.node_info.id))
        });

        candidates.into_iter().take(k).map(|e| e.node_info.clone()).collect()
    }

    pub fn on_response(&mut self, id: &Id) {
        let bidx = self.bucket_index_for(id);
        if let Some(key) = self.find_live_key(bidx, id) {
            self.arena[key].on_response(now());
        }
    }

    /// After `MAX_TIMEOUTS` consecutive failures, evict the entry and
    /// promote the most-recently-seen replacement candidate in its place
    /// (spec.md §4.5).
    pub fn on_timeout(&mut self, id: &Id) {
        let bidx = self.bucket_index_for(id);
        let Some(key) = self.find_live_key(bidx, id) else {
            return;
        };
        self.arena[key].on_timeout();
        if !self.arena[key].eligible_for_eviction() {
            return;
        }
        self.buckets[bidx].remove_live(key);
        self.arena.remove(key);
        if let Some(replacement_key) = self.buckets[bidx].pop_best_replacement() {
            self.buckets[bidx].live.push(replacement_key);
        }
    }

    pub fn remove(&mut self, id: &Id) -> bool {
        let bidx = self.bucket_index_for(id);
        if let Some(key) = self.find_live_key(bidx, id) {
            self.buckets[bidx].remove_live(key);
            self.arena.remove(key);
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.live.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Bucket indices untouched (no successful response) for at least
    /// `BUCKET_REFRESH_INTERVAL`, along with a random id falling in that
    /// bucket's range — the self-FIND_NODE target for maintenance.
    pub fn buckets_needing_refresh(&self) -> Vec<(usize, Id)> {
        let now = now();
        let refresh_secs = BUCKET_REFRESH_INTERVAL.as_secs() as i64;
        self.buckets
            .iter()
            .enumerate()
            .filter(|(bidx, bucket)| {
                let most_recent_contact = bucket
                    .live
                    .iter()
                    .map(|&key| self.arena[key].last_seen)
                    .max()
                    .unwrap_or(bucket.last_refreshed);
                now - most_recent_contact.max(bucket.last_refreshed) >= refresh_secs
                    && *bidx < self.buckets.len()
            })
            .map(|(bidx, _)| (bidx, self.random_id_in_bucket(bidx)))
            .collect()
    }

    pub fn mark_bucket_refreshed(&mut self, bidx: usize) {
        if let Some(bucket) = self.buckets.get_mut(bidx) {
            bucket.last_refreshed = now();
        }
    }

    /// A random id sharing exactly `bidx` leading bits with the owner (or at
    /// least `bidx` for the final bucket), i.e. one that would route into
    /// bucket `bidx`.
    fn random_id_in_bucket(&self, bidx: usize) -> Id {
        let mut bytes = self.owner.to_bytes();
        let flip_bit = bidx.min(ID_BITS - 1);
        let byte_index = flip_bit / 8;
        let bit_in_byte = 7 - (flip_bit % 8);
        bytes[byte_index] ^= 1 << bit_in_byte;

        let mut rng = rand::rngs::OsRng;
        let tail_start_byte = byte_index;
        let tail_start_bit = bit_in_byte;
        if tail_start_bit > 0 {
            let mask = (1u8 << tail_start_bit) - 1;
            let mut random_byte = 0u8;
            rng.fill_bytes(std::slice::from_mut(&mut random_byte));
            bytes[tail_start_byte] = (bytes[tail_start_byte] & !mask) | (random_byte & mask);
        }
        if tail_start_byte + 1 < bytes.len() {
            rng.fill_bytes(&mut bytes[tail_start_byte + 1..]);
        }
        Id::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "127.0.0.1:6881".parse().unwrap()
    }

    #[test]
    fn never_contains_the_owner_id() {
        let owner = Id::random();
        let mut table = RoutingTable::new(owner);
        assert_eq!(table.add(NodeInfo::new(owner, addr())), AddOutcome::RejectedSelf);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn duplicate_id_updates_rather_than_duplicating() {
        let owner = Id::random();
        let mut table = RoutingTable::new(owner);
        let peer = Id::random();
        table.add(NodeInfo::new(peer, addr()));
        let outcome = table.add(NodeInfo::new(peer, addr()));
        assert_eq!(outcome, AddOutcome::Updated);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn bucket_sizes_never_exceed_k() {
        let owner = Id::random();
        let mut table = RoutingTable::new(owner);
        for _ in 0..500 {
            table.add(NodeInfo::new(Id::random(), addr()));
        }
        for bucket in &table.buckets {
            assert!(bucket.live.len() <= K);
            assert!(bucket.replacements.len() <= K);
        }
    }

    #[test]
    fn closest_returns_nodes_sorted_by_xor_distance() {
        let owner = Id::random();
        let mut table = RoutingTable::new(owner);
        let mut ids = Vec::new();
        for _ in 0..64 {
            let id = Id::random();
            ids.push(id);
            table.add(NodeInfo::new(id, addr()));
        }
        let target = Id::random();
        let closest = table.closest(&target, 8);
        assert!(closest.len() <= 8);
        for w in closest.windows(2) {
            assert!(w[0].id.distance(&target).as_bytes() <= w[1].id.distance(&target).as_bytes());
        }
    }

    /// An id sharing exactly `cpl` leading bits with `owner` — lands in
    /// bucket `cpl` as long as the table has split at least that deep.
    fn id_with_cpl(owner: &Id, cpl: usize) -> Id {
        let mut bytes = owner.to_bytes();
        let byte_index = cpl / 8;
        let bit_in_byte = 7 - (cpl % 8);
        bytes[byte_index] ^= 1 << bit_in_byte;
        let mut rng = rand::rngs::OsRng;
        if bit_in_byte > 0 {
            let mask = (1u8 << bit_in_byte) - 1;
            let mut random_byte = 0u8;
            rng.fill_bytes(std::slice::from_mut(&mut random_byte));
            bytes[byte_index] = (bytes[byte_index] & !mask) | (random_byte & mask);
        }
        if byte_index + 1 < bytes.len() {
            rng.fill_bytes(&mut bytes[byte_index + 1..]);
        }
        Id::from_bytes(bytes)
    }

    #[test]
    fn timeout_eviction_promotes_a_replacement() {
        let owner = Id::random();
        let mut table = RoutingTable::new(owner);

        // Force one split so bucket 0 stops being the home bucket: it then
        // only ever catches cpl == 0 ids and can no longer split further.
        table.add(NodeInfo::new(id_with_cpl(&owner, 1), addr()));
        assert_eq!(table.bucket_count(), 2);

        let mut first: Option<Id> = None;
        for i in 0..K {
            let id = id_with_cpl(&owner, 0);
            if i == 0 {
                first = Some(id);
            }
            table.add(NodeInfo::new(id, addr()));
        }
        let replacement = id_with_cpl(&owner, 0);
        let outcome = table.add(NodeInfo::new(replacement, addr()));
        assert_eq!(table.bucket_count(), 2, "bucket 0 is no longer the home bucket and must not split");
        assert_eq!(outcome, AddOutcome::CachedAsReplacement);

        let evictee = first.unwrap();
        for _ in 0..crate::constants::MAX_TIMEOUTS {
            table.on_timeout(&evictee);
        }
        assert!(table.find_live_key(table.bucket_index_for(&evictee), &evictee).is_none());
        assert!(table.find_live_key(table.bucket_index_for(&replacement), &replacement).is_some());
    }
}
