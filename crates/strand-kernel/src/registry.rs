//! Strand arena and ready queue.
//!
//! The registry is the sole owner of every live strand.  Everything else
//! (wait groups, links, wakeups) refers to strands by [`StrandId`], so there
//! are no reference cycles to break when a strand exits.
//!
//! A strand is *attached* while it sits in the ready queue waiting for the
//! next scheduler pass, and detached while suspended.  Terminal strands are
//! removed immediately, so the registry never holds one.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::strand::{Outcome, Strand, StrandInfo};
use crate::value::StrandId;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct Registry {
    strands: HashMap<StrandId, Strand>,
    /// Attachment order for the next pass.  May hold ids that were detached
    /// since; `attached` is authoritative.
    ready: VecDeque<StrandId>,
    attached: HashSet<StrandId>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, strand: Strand) {
        let id = strand.id();
        debug_assert!(!strand.state.is_terminal());
        if self.strands.insert(id, strand).is_some() {
            tracing::warn!(strand = %id, "strand id registered twice");
        }
    }

    /// Remove a strand, detaching it from the ready queue.
    pub(crate) fn remove(&mut self, id: StrandId) -> Option<Strand> {
        self.attached.remove(&id);
        self.strands.remove(&id)
    }

    pub(crate) fn get(&self, id: StrandId) -> Option<&Strand> {
        self.strands.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: StrandId) -> Option<&mut Strand> {
        self.strands.get_mut(&id)
    }

    pub(crate) fn contains(&self, id: StrandId) -> bool {
        self.strands.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.strands.len()
    }

    /// Whether `id` is live and has not been resumed since `epoch`.
    pub(crate) fn is_current(&self, id: StrandId, epoch: u64) -> bool {
        self.strands.get(&id).is_some_and(|s| s.epoch == epoch)
    }

    /// Queue `id` for the next pass.  Returns `false` if it is already
    /// attached or not live.
    pub(crate) fn attach(&mut self, id: StrandId) -> bool {
        if !self.strands.contains_key(&id) || !self.attached.insert(id) {
            return false;
        }
        self.ready.push_back(id);
        true
    }

    pub(crate) fn has_ready(&self) -> bool {
        !self.attached.is_empty()
    }

    /// Detach and return every attached strand, in attachment order.
    pub(crate) fn take_ready(&mut self) -> Vec<StrandId> {
        let batch: Vec<StrandId> = self
            .ready
            .drain(..)
            .filter(|id| self.attached.remove(id))
            .collect();
        batch
    }

    /// Put strands taken by [`take_ready`](Self::take_ready) but never
    /// ticked back at the head of the queue, keeping their order.
    pub(crate) fn reattach_front(&mut self, ids: impl DoubleEndedIterator<Item = StrandId>) {
        for id in ids.rev() {
            if self.strands.contains_key(&id) && self.attached.insert(id) {
                self.ready.push_front(id);
            }
        }
    }

    /// Live strand ids in spawn order.
    pub(crate) fn ids(&self) -> Vec<StrandId> {
        let mut ids: Vec<StrandId> = self.strands.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Snapshots of every live strand in spawn order.
    pub(crate) fn infos(&self) -> Vec<StrandInfo> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.get(id).map(Strand::info))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Retained outcomes
// ---------------------------------------------------------------------------

/// Bounded memory of recent exit outcomes, oldest evicted first.
#[derive(Debug, Default)]
pub(crate) struct Retained {
    capacity: usize,
    order: VecDeque<StrandId>,
    outcomes: HashMap<StrandId, Outcome>,
}

impl Retained {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub(crate) fn insert(&mut self, id: StrandId, outcome: Outcome) {
        if self.capacity == 0 {
            return;
        }
        while self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.outcomes.remove(&evicted);
            }
        }
        self.order.push_back(id);
        self.outcomes.insert(id, outcome);
    }

    pub(crate) fn get(&self, id: StrandId) -> Option<&Outcome> {
        self.outcomes.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::Script;
    use crate::value::Value;

    fn strand(id: u64) -> Strand {
        Strand::new(StrandId::new(id), Box::new(Script::new()))
    }

    #[test]
    fn attach_preserves_order_and_dedupes() {
        let mut registry = Registry::new();
        for id in 1..=3 {
            registry.insert(strand(id));
        }
        assert!(registry.attach(StrandId::new(2)));
        assert!(registry.attach(StrandId::new(1)));
        assert!(!registry.attach(StrandId::new(2)));
        assert!(!registry.attach(StrandId::new(9)));

        assert_eq!(
            registry.take_ready(),
            vec![StrandId::new(2), StrandId::new(1)]
        );
        assert!(!registry.has_ready());
    }

    #[test]
    fn reattached_strands_run_before_newer_ones() {
        let mut registry = Registry::new();
        for id in 1..=4 {
            registry.insert(strand(id));
        }
        registry.attach(StrandId::new(1));
        registry.attach(StrandId::new(2));
        registry.attach(StrandId::new(3));
        let mut batch = registry.take_ready().into_iter();
        assert_eq!(batch.next(), Some(StrandId::new(1)));

        registry.attach(StrandId::new(4));
        registry.attach(StrandId::new(3));
        registry.reattach_front(batch);
        assert_eq!(
            registry.take_ready(),
            vec![StrandId::new(2), StrandId::new(4), StrandId::new(3)]
        );
    }

    #[test]
    fn removed_strands_leave_the_ready_queue() {
        let mut registry = Registry::new();
        registry.insert(strand(1));
        registry.insert(strand(2));
        registry.attach(StrandId::new(1));
        registry.attach(StrandId::new(2));

        assert!(registry.remove(StrandId::new(1)).is_some());
        assert_eq!(registry.take_ready(), vec![StrandId::new(2)]);
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(StrandId::new(1)));
    }

    #[test]
    fn epochs_identify_current_suspensions() {
        let mut registry = Registry::new();
        registry.insert(strand(1));
        let id = StrandId::new(1);
        assert!(registry.is_current(id, 0));
        if let Some(s) = registry.get_mut(id) {
            s.epoch += 1;
        }
        assert!(!registry.is_current(id, 0));
        assert!(!registry.is_current(StrandId::new(2), 0));
    }

    #[test]
    fn infos_are_sorted_by_id() {
        let mut registry = Registry::new();
        registry.insert(strand(3));
        registry.insert(strand(1));
        let ids: Vec<_> = registry.infos().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![StrandId::new(1), StrandId::new(3)]);
    }

    #[test]
    fn retained_outcomes_are_bounded() {
        let mut retained = Retained::new(2);
        for id in 1..=3 {
            retained.insert(StrandId::new(id), Outcome::Succeeded(Value::Int(id as i64)));
        }
        assert!(retained.get(StrandId::new(1)).is_none());
        assert_eq!(
            retained.get(StrandId::new(3)),
            Some(&Outcome::Succeeded(Value::Int(3)))
        );

        let mut disabled = Retained::new(0);
        disabled.insert(StrandId::new(1), Outcome::Terminated);
        assert!(disabled.get(StrandId::new(1)).is_none());
    }
}
