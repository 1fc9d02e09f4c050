//! Shared candidate-queue bookkeeping for the iterative lookup skeleton
//! (spec.md §4.8, steps 1-3): seed from the routing table, track which
//! candidates are still un-queried, merge newly discovered nodes
//! deduplicated by id, and maintain the K-closest window.

use std::collections::HashSet;

use boson_crypto::{Distance, Id};
use boson_proto::NodeInfo;

fn distance_key(node: &NodeInfo, target: &Id) -> (Distance, Id) {
    (node.id.distance(target), node.id)
}

fn insert_sorted(list: &mut Vec<NodeInfo>, node: NodeInfo, target: &Id) {
    let key = distance_key(&node, target);
    let pos = list
        .iter()
        .position(|n| distance_key(n, target) > key)
        .unwrap_or(list.len());
    list.insert(pos, node);
}

pub struct CandidateSet {
    target: Id,
    k: usize,
    seen: HashSet<Id>,
    queue: Vec<NodeInfo>,
    responded: Vec<NodeInfo>,
    unreachable: HashSet<Id>,
}

impl CandidateSet {
    pub fn new(target: Id, seed: Vec<NodeInfo>, k: usize) -> Self {
        let mut set = CandidateSet {
            target,
            k,
            seen: HashSet::new(),
            queue: Vec::new(),
            responded: Vec::new(),
            unreachable: HashSet::new(),
        };
        set.merge_discovered(seed);
        set
    }

    /// Insert newly learned nodes, ignoring ones already seen this lookup
    /// (spec.md §4.8 step 3: "merge ... deduplicated by Id").
    pub fn merge_discovered(&mut self, nodes: impl IntoIterator<Item = NodeInfo>) {
        for node in nodes {
            if node.id == self.target || !self.seen.insert(node.id) {
                continue;
            }
            insert_sorted(&mut self.queue, node, &self.target);
        }
    }

    /// The nearest un-queried candidate, if any, removed from the queue.
    pub fn pop_next(&mut self) -> Option<NodeInfo> {
        if self.queue.is_empty() {
            None
        } else {
            Some(self.queue.remove(0))
        }
    }

    pub fn mark_responded(&mut self, node: NodeInfo) {
        insert_sorted(&mut self.responded, node, &self.target);
        if self.responded.len() > self.k * 4 {
            self.responded.truncate(self.k * 4);
        }
    }

    pub fn mark_unreachable(&mut self, id: Id) {
        self.unreachable.insert(id);
    }

    /// The spec.md §4.8 "closest-so-far window of K nodes".
    pub fn k_closest(&self) -> Vec<NodeInfo> {
        self.responded.iter().take(self.k).cloned().collect()
    }

    /// True once the K closest nodes have all responded or been determined
    /// unreachable and no closer candidate remains queued (spec.md §4.8
    /// step 4).
    pub fn is_converged(&self) -> bool {
        if self.responded.len() >= self.k {
            let kth = self.responded[self.k - 1].id.distance(&self.target);
            let next_is_closer = self
                .queue
                .first()
                .map(|n| n.id.distance(&self.target) < kth)
                .unwrap_or(false);
            !next_is_closer
        } else {
            self.queue.is_empty()
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}
