use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{PoolError, Result};
use crate::scheduler::job::{now_millis, QueueEntry};

/// Serialized queue contents plus the mutation generation they were read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub entries: Vec<QueueEntry>,
    pub generation: u64,
}

#[derive(Debug)]
struct HeapItem {
    entry: QueueEntry,
    seq: u64,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    // BinaryHeap pops the greatest item: higher priority first, then the
    // earliest queuing time, then insertion order.
    fn cmp(&self, other: &Self) -> Ordering {
        self.entry
            .priority
            .cmp(&other.entry.priority)
            .then_with(|| other.entry.queuing_time.cmp(&self.entry.queuing_time))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<HeapItem>,
    tombstones: HashSet<Uuid>,
    /// Physically stored entries per job id.
    stored: HashMap<Uuid, usize>,
    next_seq: u64,
    generation: u64,
}

impl QueueState {
    fn push(&mut self, mut entry: QueueEntry) {
        if !entry.has_queuing_time() {
            entry.queuing_time = now_millis();
        }
        // A re-queued job supersedes its stopped entries.
        if self.tombstones.remove(&entry.job_id) {
            let id = entry.job_id;
            self.heap.retain(|item| item.entry.job_id != id);
            self.stored.remove(&id);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        *self.stored.entry(entry.job_id).or_insert(0) += 1;
        self.heap.push(HeapItem { entry, seq });
    }

    fn pop(&mut self) -> Option<QueueEntry> {
        let item = self.heap.pop()?;
        let id = item.entry.job_id;
        if let Some(count) = self.stored.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                self.stored.remove(&id);
            }
        }
        Some(item.entry)
    }
}

/// Thread-safe priority queue with lazy (tombstone) removal.
///
/// Every operation, including the dequeue skip loop, runs under one lock.
#[derive(Debug, Default)]
pub struct PriorityJobQueue {
    state: Mutex<QueueState>,
}

impl PriorityJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, stamping `queuing_time` with the current time if unset.
    pub fn enqueue(&self, entry: QueueEntry) {
        let mut state = self.state.lock();
        state.push(entry);
        state.generation += 1;
    }

    /// Pop the highest-priority live entry, discarding tombstoned ones.
    pub fn dequeue(&self) -> Result<QueueEntry> {
        self.try_dequeue().ok_or(PoolError::EmptyQueue)
    }

    pub fn try_dequeue(&self) -> Option<QueueEntry> {
        let mut state = self.state.lock();
        let mut mutated = false;
        let mut found = None;
        while let Some(entry) = state.pop() {
            mutated = true;
            if state.tombstones.contains(&entry.job_id) {
                // The tombstone covers every stored entry for the id.
                if !state.stored.contains_key(&entry.job_id) {
                    state.tombstones.remove(&entry.job_id);
                }
                tracing::debug!(job_id = %entry.job_id, "Discarded job marked for removal");
                continue;
            }
            found = Some(entry);
            break;
        }
        if mutated {
            state.generation += 1;
        }
        found
    }

    /// Physically stored entries, tombstoned ones included. Re-queueing a
    /// tombstoned job drops its stale entries.
    pub fn count(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Whether an entry for `job_id` is physically stored.
    pub fn contains(&self, job_id: &Uuid) -> bool {
        self.state.lock().stored.contains_key(job_id)
    }

    /// Tombstone `job_id`. Returns false if it was already tombstoned.
    pub fn mark_for_lazy_removal(&self, job_id: Uuid) -> bool {
        let mut state = self.state.lock();
        if !state.tombstones.insert(job_id) {
            return false;
        }
        state.generation += 1;
        true
    }

    /// Live entries in no particular order.
    pub fn serialize(&self) -> Vec<QueueEntry> {
        self.snapshot().entries
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock();
        let entries = state
            .heap
            .iter()
            .filter(|item| !state.tombstones.contains(&item.entry.job_id))
            .map(|item| item.entry)
            .collect();
        QueueSnapshot {
            entries,
            generation: state.generation,
        }
    }

    /// Replace the queue contents, keeping each entry's original queuing time.
    pub fn recover_queue(&self, entries: Vec<QueueEntry>) {
        let mut state = self.state.lock();
        state.heap.clear();
        state.stored.clear();
        state.tombstones.clear();
        for entry in entries {
            state.push(entry);
        }
        state.generation += 1;
    }

    /// Mutation counter, bumped by every enqueue, dequeue, tombstone and recover.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::JobPriority;

    fn entry(priority: JobPriority, queuing_time: i64) -> QueueEntry {
        QueueEntry::new(Uuid::new_v4(), priority).with_queuing_time(queuing_time)
    }

    #[test]
    fn high_priority_dequeues_before_regular() {
        let queue = PriorityJobQueue::new();
        let regular = entry(JobPriority::Regular, 1);
        let high = entry(JobPriority::High, 5);
        queue.enqueue(regular);
        queue.enqueue(high);

        assert_eq!(queue.dequeue().unwrap().job_id, high.job_id);
        assert_eq!(queue.dequeue().unwrap().job_id, regular.job_id);
        assert!(matches!(queue.dequeue(), Err(PoolError::EmptyQueue)));
    }

    #[test]
    fn equal_priority_is_fifo_by_queuing_time() {
        let queue = PriorityJobQueue::new();
        let late = entry(JobPriority::Regular, 30);
        let early = entry(JobPriority::Regular, 10);
        let middle = entry(JobPriority::Regular, 20);
        queue.enqueue(late);
        queue.enqueue(early);
        queue.enqueue(middle);

        let order: Vec<Uuid> = (0..3).map(|_| queue.dequeue().unwrap().job_id).collect();
        assert_eq!(order, vec![early.job_id, middle.job_id, late.job_id]);
    }

    #[test]
    fn identical_keys_fall_back_to_insertion_order() {
        let queue = PriorityJobQueue::new();
        let first = entry(JobPriority::High, 7);
        let second = entry(JobPriority::High, 7);
        queue.enqueue(first);
        queue.enqueue(second);

        assert_eq!(queue.dequeue().unwrap().job_id, first.job_id);
        assert_eq!(queue.dequeue().unwrap().job_id, second.job_id);
    }

    #[test]
    fn enqueue_stamps_unset_queuing_time_only() {
        let queue = PriorityJobQueue::new();
        let unset = QueueEntry::new(Uuid::new_v4(), JobPriority::Regular);
        let preset = entry(JobPriority::Regular, 42);
        queue.enqueue(unset);
        queue.enqueue(preset);

        let first = queue.dequeue().unwrap();
        assert_eq!(first.job_id, preset.job_id);
        assert_eq!(first.queuing_time, 42);

        let second = queue.dequeue().unwrap();
        assert_eq!(second.job_id, unset.job_id);
        assert!(second.has_queuing_time());
    }

    #[test]
    fn tombstoned_entry_is_skipped_once() {
        let queue = PriorityJobQueue::new();
        let doomed = entry(JobPriority::High, 1);
        let kept = entry(JobPriority::Regular, 2);
        queue.enqueue(doomed);
        queue.enqueue(kept);

        assert!(queue.mark_for_lazy_removal(doomed.job_id));
        assert!(!queue.mark_for_lazy_removal(doomed.job_id));
        // Still physically stored until skipped.
        assert_eq!(queue.count(), 2);
        assert_eq!(queue.serialize(), vec![kept]);

        assert_eq!(queue.dequeue().unwrap().job_id, kept.job_id);
        assert_eq!(queue.count(), 0);

        // The tombstone was consumed by the skip, so a re-queued entry is live.
        queue.enqueue(doomed);
        assert_eq!(queue.dequeue().unwrap().job_id, doomed.job_id);
    }

    #[test]
    fn requeue_of_tombstoned_job_replaces_stale_entry() {
        let queue = PriorityJobQueue::new();
        let job = entry(JobPriority::Regular, 1);
        queue.enqueue(job);
        assert!(queue.mark_for_lazy_removal(job.job_id));

        let again = job.with_queuing_time(9);
        queue.enqueue(again);
        assert_eq!(queue.count(), 1);
        assert_eq!(queue.serialize(), vec![again]);

        // The new entry can be tombstoned in turn and is never handed out.
        assert!(queue.mark_for_lazy_removal(job.job_id));
        assert_eq!(queue.try_dequeue(), None);
        assert!(!queue.contains(&job.job_id));
    }

    #[test]
    fn tombstone_covers_duplicate_entries() {
        let queue = PriorityJobQueue::new();
        let job = entry(JobPriority::High, 1);
        queue.enqueue(job);
        queue.enqueue(job.with_queuing_time(2));
        assert!(queue.mark_for_lazy_removal(job.job_id));

        assert_eq!(queue.try_dequeue(), None);
        assert_eq!(queue.count(), 0);

        // Fully consumed, so the id is free again.
        queue.enqueue(job);
        assert_eq!(queue.try_dequeue(), Some(job));
    }

    #[test]
    fn dequeue_of_only_tombstones_is_empty() {
        let queue = PriorityJobQueue::new();
        let doomed = entry(JobPriority::Regular, 1);
        queue.enqueue(doomed);
        queue.mark_for_lazy_removal(doomed.job_id);

        assert!(queue.try_dequeue().is_none());
        assert!(queue.is_empty());
        assert!(!queue.contains(&doomed.job_id));
    }

    #[test]
    fn contains_tracks_physical_entries() {
        let queue = PriorityJobQueue::new();
        let e = entry(JobPriority::Regular, 1);
        assert!(!queue.contains(&e.job_id));
        queue.enqueue(e);
        assert!(queue.contains(&e.job_id));
        queue.dequeue().unwrap();
        assert!(!queue.contains(&e.job_id));
    }

    #[test]
    fn recover_preserves_relative_order() {
        let queue = PriorityJobQueue::new();
        let entries = vec![
            entry(JobPriority::Regular, 3),
            entry(JobPriority::High, 9),
            entry(JobPriority::Regular, 1),
            entry(JobPriority::High, 2),
        ];
        for e in &entries {
            queue.enqueue(*e);
        }

        let restored = PriorityJobQueue::new();
        restored.enqueue(entry(JobPriority::High, 0));
        restored.recover_queue(queue.serialize());
        assert_eq!(restored.count(), entries.len());

        let original: Vec<QueueEntry> = (0..4).map(|_| queue.dequeue().unwrap()).collect();
        let recovered: Vec<QueueEntry> = (0..4).map(|_| restored.dequeue().unwrap()).collect();
        assert_eq!(original, recovered);
    }

    #[test]
    fn generation_moves_on_every_mutation() {
        let queue = PriorityJobQueue::new();
        let g0 = queue.generation();
        let e = entry(JobPriority::Regular, 1);
        queue.enqueue(e);
        let g1 = queue.generation();
        assert!(g1 > g0);

        assert_eq!(queue.count(), 1);
        assert_eq!(queue.serialize().len(), 1);
        assert_eq!(queue.generation(), g1, "reads do not mutate");

        queue.mark_for_lazy_removal(e.job_id);
        let g2 = queue.generation();
        assert!(g2 > g1);

        queue.try_dequeue();
        assert!(queue.generation() > g2);

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.generation, queue.generation());
    }
}
