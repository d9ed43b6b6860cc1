//! Coordinator registry: the in-memory map from worker identity to
//! worker record, with group formation and port allocation.
//!
//! Implemented as a plain `HashMap` keyed by the transport's opaque
//! [`PeerId`], with groups as plain `Vec<Group>` rather than any
//! derived-view abstraction — there are no cycles and no shared
//! ownership to manage here, just insertion-ordered queues of
//! unpaired senders and receivers that `try_form_group` drains from.

use crate::messages::{Role, TestResult, WorkerState};
use crate::transport::PeerId;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub identity: PeerId,
    pub worker_id: String,
    pub role: Role,
    pub state: WorkerState,
    pub test_number: usize,
    pub group_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub group_id: u64,
    pub sender: PeerId,
    pub receivers: Vec<PeerId>,
    pub data_port: u16,
    pub receiver_ports: Vec<u16>,
}

pub struct WorkerRegistry {
    workers: HashMap<PeerId, WorkerRecord>,
    unpaired_senders: VecDeque<PeerId>,
    unpaired_receivers: VecDeque<PeerId>,
    groups: Vec<Group>,
    next_group_id: u64,
    port_offset: u16,
    data_port_start: u16,
    sender_bind: bool,
    results_bucket: Vec<TestResult>,
}

impl WorkerRegistry {
    pub fn new(data_port_start: u16, sender_bind: bool) -> Self {
        Self {
            workers: HashMap::new(),
            unpaired_senders: VecDeque::new(),
            unpaired_receivers: VecDeque::new(),
            groups: Vec::new(),
            next_group_id: 0,
            port_offset: 0,
            data_port_start,
            sender_bind,
            results_bucket: Vec::new(),
        }
    }

    /// Idempotent on identity: re-registering an already-known peer is
    /// a no-op that keeps the first record.
    pub fn register(&mut self, identity: PeerId, worker_id: String, role: Role) -> bool {
        if self.workers.contains_key(&identity) {
            return false;
        }
        self.workers.insert(
            identity,
            WorkerRecord {
                identity,
                worker_id,
                role,
                state: WorkerState::ConnectingToCoordinator,
                test_number: 0,
                group_id: None,
            },
        );
        match role {
            Role::Sender => self.unpaired_senders.push_back(identity),
            Role::Receiver => self.unpaired_receivers.push_back(identity),
        }
        true
    }

    pub fn update(
        &mut self,
        identity: PeerId,
        state: WorkerState,
        test_number: usize,
        result: Option<TestResult>,
    ) -> anyhow::Result<()> {
        let record = self
            .workers
            .get_mut(&identity)
            .ok_or_else(|| anyhow::anyhow!("update from unknown worker identity {identity}"))?;
        record.state = state;
        record.test_number = test_number;
        if let Some(result) = result {
            self.results_bucket.push(result);
        }
        Ok(())
    }

    /// Deterministic pick: the oldest unpaired sender and the oldest
    /// `receivers_per_sender` unpaired receivers, by insertion order
    /// (the `VecDeque`s are FIFO by construction).
    pub fn try_form_group(&mut self, receivers_per_sender: usize) -> Option<Group> {
        if self.unpaired_senders.is_empty()
            || self.unpaired_receivers.len() < receivers_per_sender
        {
            return None;
        }

        let sender = self.unpaired_senders.pop_front().expect("checked above");
        let mut receivers = Vec::with_capacity(receivers_per_sender);
        for _ in 0..receivers_per_sender {
            receivers.push(self.unpaired_receivers.pop_front().expect("checked above"));
        }

        let (data_port, receiver_ports) = self.allocate_ports(receivers_per_sender);
        let group_id = self.next_group_id;
        self.next_group_id += 1;

        if let Some(record) = self.workers.get_mut(&sender) {
            record.group_id = Some(group_id);
        }
        for receiver in &receivers {
            if let Some(record) = self.workers.get_mut(receiver) {
                record.group_id = Some(group_id);
            }
        }

        let group = Group {
            group_id,
            sender,
            receivers,
            data_port,
            receiver_ports,
        };
        self.groups.push(group.clone());
        Some(group)
    }

    /// Monotone offset allocator. Sender-bind groups consume a single
    /// offset (every receiver connects to the same port); receiver-bind
    /// groups consume `k` contiguous offsets, one per receiver.
    fn allocate_ports(&mut self, k: usize) -> (u16, Vec<u16>) {
        let offset = self.port_offset;
        if self.sender_bind {
            self.port_offset += 1;
            let port = self.data_port_start + offset;
            (port, vec![port; k])
        } else {
            self.port_offset += k as u16;
            let ports: Vec<u16> = (0..k as u16)
                .map(|i| self.data_port_start + offset + i)
                .collect();
            (self.data_port_start + offset, ports)
        }
    }

    /// True iff the registry is non-empty and every record is exactly
    /// at `(state, test_number)` — the milestone predicate the
    /// coordinator's test-execution phase waits on between steps.
    pub fn all_peers_at(&self, state: WorkerState, test_number: usize) -> bool {
        !self.workers.is_empty()
            && self
                .workers
                .values()
                .all(|record| record.state == state && record.test_number == test_number)
    }

    pub fn contains(&self, identity: PeerId) -> bool {
        self.workers.contains_key(&identity)
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn worker_id_of(&self, identity: PeerId) -> Option<&str> {
        self.workers.get(&identity).map(|r| r.worker_id.as_str())
    }

    /// Removes and returns every result collected since the last call,
    /// for the per-test bucket the coordinator appends to the results
    /// file and then clears.
    pub fn drain_results_bucket(&mut self) -> Vec<TestResult> {
        std::mem::take(&mut self.results_bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u64) -> PeerId {
        PeerId(n)
    }

    #[test]
    fn registration_is_idempotent_on_identity() {
        let mut registry = WorkerRegistry::new(6000, true);
        assert!(registry.register(peer(1), "sender-0".into(), Role::Sender));
        assert!(!registry.register(peer(1), "sender-0-again".into(), Role::Sender));
        assert_eq!(registry.num_workers(), 1);
        assert_eq!(registry.worker_id_of(peer(1)), Some("sender-0"));
    }

    #[test]
    fn group_forms_only_once_ratio_is_satisfiable() {
        let mut registry = WorkerRegistry::new(6000, true);
        registry.register(peer(1), "sender-0".into(), Role::Sender);
        registry.register(peer(2), "receiver-0".into(), Role::Receiver);
        assert!(registry.try_form_group(2).is_none());

        registry.register(peer(3), "receiver-1".into(), Role::Receiver);
        let group = registry.try_form_group(2).expect("ratio satisfied");
        assert_eq!(group.sender, peer(1));
        assert_eq!(group.receivers, vec![peer(2), peer(3)]);
        assert_eq!(registry.num_groups(), 1);
    }

    #[test]
    fn sender_bind_ports_are_all_equal() {
        let mut registry = WorkerRegistry::new(6000, true);
        registry.register(peer(1), "sender-0".into(), Role::Sender);
        registry.register(peer(2), "receiver-0".into(), Role::Receiver);
        registry.register(peer(3), "receiver-1".into(), Role::Receiver);
        registry.register(peer(4), "receiver-2".into(), Role::Receiver);

        let group = registry.try_form_group(3).unwrap();
        assert_eq!(group.receiver_ports.len(), 3);
        assert!(group.receiver_ports.iter().all(|&p| p == group.data_port));
    }

    #[test]
    fn receiver_bind_ports_are_contiguous_and_distinct() {
        let mut registry = WorkerRegistry::new(6000, false);
        registry.register(peer(1), "sender-0".into(), Role::Sender);
        for i in 0..3 {
            registry.register(peer(10 + i), format!("receiver-{i}"), Role::Receiver);
        }

        let group = registry.try_form_group(3).unwrap();
        let mut sorted = group.receiver_ports.clone();
        sorted.sort();
        assert_eq!(sorted, vec![6000, 6001, 6002]);
        let unique: std::collections::HashSet<_> = group.receiver_ports.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn port_offsets_do_not_overlap_across_groups() {
        let mut registry = WorkerRegistry::new(6000, false);
        for i in 0..2u64 {
            registry.register(peer(i * 10), format!("sender-{i}"), Role::Sender);
            for j in 0..2u64 {
                registry.register(peer(i * 10 + j + 1), format!("receiver-{i}-{j}"), Role::Receiver);
            }
        }
        let g1 = registry.try_form_group(2).unwrap();
        let g2 = registry.try_form_group(2).unwrap();

        let mut all_ports = g1.receiver_ports.clone();
        all_ports.extend(g2.receiver_ports.clone());
        let unique: std::collections::HashSet<_> = all_ports.iter().collect();
        assert_eq!(unique.len(), all_ports.len());
    }

    #[test]
    fn two_groups_satisfy_worker_and_group_counts() {
        let mut registry = WorkerRegistry::new(6000, true);
        for i in 0..2u64 {
            registry.register(peer(i * 10), format!("sender-{i}"), Role::Sender);
            for j in 0..2u64 {
                registry.register(peer(i * 10 + j + 1), format!("receiver-{i}-{j}"), Role::Receiver);
            }
        }
        registry.try_form_group(2);
        registry.try_form_group(2);

        assert_eq!(registry.num_workers(), 2 * (2 + 1));
        assert_eq!(registry.num_groups(), 2);
    }

    #[test]
    fn all_peers_at_is_false_when_registry_is_empty() {
        let registry = WorkerRegistry::new(6000, true);
        assert!(!registry.all_peers_at(WorkerState::ConnectedToSync, 0));
    }
}
